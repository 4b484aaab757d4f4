mod info;
mod report;
mod run;

pub use info::info;
pub use report::report;
pub use run::run;
