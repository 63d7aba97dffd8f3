//! Home Agent - self-improvement pipeline for a home assistant
//!
//! - Detectors that propose configuration, dependency, code and
//!   best-practice improvements
//! - An approval lifecycle with durable history
//! - Settings snapshots taken before every fix, restorable on rollback
//! - Feedback analytics that suggest categories to stop scanning
//!
//! # Example
//!
//! ```ignore
//! use home_agent::config::Config;
//! use home_agent::improvement::ImprovementPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pipeline = ImprovementPipeline::open(&config.improvements)?;
//!     let run = pipeline.scanner().run_full_scan(false).await?;
//!     println!("{} new improvement(s)", run.new_improvements);
//!     Ok(())
//! }
//! ```

pub mod improvement;
pub mod agent;
pub mod config;
pub mod cli;

pub use config::Config;

pub use improvement::{
    Improvement,
    ImprovementError,
    ImprovementPipeline,
    Severity,
    Status,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Home Assistant Self-Improvement Library", NAME, VERSION)
}
