//! Domain types shared by the notification and alerting crates.
//!
//! Nothing in here performs I/O: the persistence layer (`finpulse-db`) and
//! the engine (`finpulse-events`) both build on these definitions.

pub mod alert;
pub mod analytics;
pub mod channels;
pub mod clock;
pub mod error;
pub mod notification;
pub mod schedule;
pub mod types;
