pub mod config;
pub mod error;
pub mod error_utils;
pub mod intent;
pub mod policy;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use error_utils::*;
pub use intent::{classify, IntentClassifier};
pub use policy::*;
pub use traits::*;
pub use types::*;
