pub mod cli;
pub mod config;
pub mod ics;
pub mod journaling;
pub mod storage;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use storage::{Reply, Store, StoreContext, StoreError};
