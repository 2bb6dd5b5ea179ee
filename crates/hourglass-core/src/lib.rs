//! `hourglass-core` - configuration and shared error types for the Hourglass
//! job scheduler.

pub mod config;
pub mod error;

pub use config::HourglassConfig;
pub use error::{HourglassError, Result};
