//! logbook-core: one façade over several experiment-logging backends.
//!
//! A [`LogBook`] takes a record (a JSON object), stamps it with its id,
//! timestamp and type, and hands it to every configured backend. Each
//! backend reshapes keys on its own (`logbook_key_map`, `logbook_key_prefix`)
//! before talking to its client. The [`parser`] module reads the filesystem
//! backend's output back for analysis.

pub mod config;
pub mod error;
pub mod logbook;
pub mod logger;
pub mod metrics;
pub mod models;
pub mod parser;

pub use config::{make_config, LogBookConfig};
pub use error::LogBookError;
pub use logbook::LogBook;
pub use logger::Logger;
pub use models::{LogRecord, LogType, MetricValue};
