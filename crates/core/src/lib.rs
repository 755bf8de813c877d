pub mod config;
pub mod error;
pub mod paths;

pub use config::{BrowserConfig, Config, ServerConfig, VisionConfig};
pub use error::{Error, Result};
pub use paths::Paths;
