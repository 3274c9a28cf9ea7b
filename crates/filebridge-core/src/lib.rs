pub mod config;
pub mod factory;

pub use config::BridgeConfig;
pub use factory::{open_local, open_server};
