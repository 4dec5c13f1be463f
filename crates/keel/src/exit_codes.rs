//! Exit codes for the CLI

use keel_core::{ConfigError, KeelError, ModelError};
use keel_tasks::{BuildError, GraphError};

/// Success
pub const SUCCESS: u8 = 0;

/// A task failed or another runtime error occurred
pub const ERROR: u8 = 1;

/// The project file or the task graph is invalid
pub const CONFIG_ERROR: u8 = 2;

/// Interrupted by the user
pub const CANCELLED: u8 = 130;

/// Exit code for an error returned by a command
pub fn for_error(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if let Some(build) = cause.downcast_ref::<BuildError>() {
            return match build {
                BuildError::Cancelled => CANCELLED,
                BuildError::TaskFailed(_) => ERROR,
            };
        }
        if cause.is::<GraphError>() || cause.is::<ConfigError>() || cause.is::<ModelError>() {
            return CONFIG_ERROR;
        }
        if let Some(keel) = cause.downcast_ref::<KeelError>() {
            if !matches!(keel, KeelError::Io(_) | KeelError::Other(_)) {
                return CONFIG_ERROR;
            }
        }
    }
    ERROR
}
