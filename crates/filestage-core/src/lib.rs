pub mod config;
pub mod engine;
pub mod error;

pub use config::Config;
pub use engine::{Engine, JobService};
pub use error::{Error, Result};

/// Current version of filestage-core.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
