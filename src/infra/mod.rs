//! Infrastructure shared by the client: logging setup and the reconnection
//! policy.

pub mod logging;
pub mod reconnection;

pub use logging::{init_logging, targets, LogConfig, LogFormat};
pub use reconnection::{calculate_backoff_delay, ReconnectionConfig, ReconnectionPolicy};
