//! Process exit codes.
//!
//! | code | meaning                                     |
//! |------|---------------------------------------------|
//! | 0    | clean shutdown                              |
//! | 1    | fatal source-file error or other failure    |
//! | 2    | fatal configuration error                   |

use tailcast_core::error::{ConfigError, SourceError, TailcastError};
use tailcast_relay::RelayError;

/// Clean shutdown.
pub const EXIT_OK: u8 = 0;
/// The source file is gone or unreadable, or the daemon failed at runtime.
pub const EXIT_FAILURE: u8 = 1;
/// The configuration could not be loaded or is invalid.
pub const EXIT_CONFIG: u8 = 2;

/// Map an error chain to a process exit code.
///
/// Walks the chain outermost-first and returns on the first typed error that
/// classifies it; untyped errors fall through to [`EXIT_FAILURE`].
pub fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<TailcastError>() {
            if e.is_config() {
                return EXIT_CONFIG;
            }
            if e.is_source() {
                return EXIT_FAILURE;
            }
        }
        if let Some(e) = cause.downcast_ref::<RelayError>() {
            match e {
                RelayError::Config { .. } => return EXIT_CONFIG,
                RelayError::SourceGone { .. } => return EXIT_FAILURE,
                _ => {}
            }
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return EXIT_CONFIG;
        }
        if cause.downcast_ref::<SourceError>().is_some() {
            return EXIT_FAILURE;
        }
    }
    EXIT_FAILURE
}
