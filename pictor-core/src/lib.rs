pub mod config;
pub mod error;
pub mod logging;
pub mod media;

pub use config::{ConfigMap, ConfigStore, ConfigStoreOptions, ConfigValue};
pub use error::{Error, Result};
pub use media::Resizer;
