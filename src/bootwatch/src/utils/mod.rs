pub mod message;
pub mod system_info;
pub mod workdir;
