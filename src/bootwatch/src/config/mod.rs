mod config_loader;
mod defaults;

pub use config_loader::{CategoryThreshold, Config, ConfigLoader, OperationThreshold};
