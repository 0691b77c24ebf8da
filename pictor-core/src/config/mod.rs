pub mod cache;
pub mod parser;
pub mod store;
pub mod value;

pub use cache::{CacheRecord, CacheStorage, DirCacheStorage, MemoryCacheStorage};
pub use parser::{RawParam, CONFIG_NAMESPACE};
pub use store::{ConfigMap, ConfigStore, ConfigStoreOptions};
pub use value::ConfigValue;
