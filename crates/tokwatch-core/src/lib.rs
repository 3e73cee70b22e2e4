//! # tokwatch-core
//!
//! Core error type and logging setup shared by the tokwatch crates.
//!
//! - [`TokwatchError`] - user-facing errors (configuration, directories)
//! - [`logging`] - tracing setup and default paths
//!
//! ## Example
//!
//! ```no_run
//! use tokwatch_core::logging;
//!
//! fn main() -> tokwatch_core::Result<()> {
//!     let _guard = logging::init_logging(None, false)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{Result, TokwatchError};
pub use logging::{LogGuard, init_logging};
