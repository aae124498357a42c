//! steer-core — shared types, dial targets and configuration.

pub mod config;
pub mod error;
pub mod target;
pub mod types;

pub use config::SteerConfig;
pub use error::{CoreError, CoreResult};
pub use target::Target;
pub use types::*;
