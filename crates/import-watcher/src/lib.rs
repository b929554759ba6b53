//! Watchdog for image import folders drained by an external service.
//!
//! A run picks the oldest pending file, waits to see whether the consuming
//! service picks it up, and when it does not, either reports the service as
//! down or moves the file aside so intake can continue. Operators hear about
//! both through an illustrated alert mail.

pub mod config;
pub mod error;
pub mod notify;
pub mod telemetry;
pub mod watch;

pub use config::WatcherConfig;
pub use error::AppError;
pub use notify::{EmailNotifier, Notifier};
pub use watch::{ImportWatcher, StallOutcome};
