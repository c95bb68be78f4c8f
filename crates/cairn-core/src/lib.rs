pub mod config;
pub mod error;

pub use config::CairnConfig;
pub use error::{CairnError, CairnResult};
