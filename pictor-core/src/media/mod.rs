pub mod resizer;

pub use resizer::{ResizeMode, Resizer};
