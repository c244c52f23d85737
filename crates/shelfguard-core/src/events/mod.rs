//! Security event taxonomy and the bounded audit log

mod event;
mod log;

pub use event::{DetailValue, SecurityEvent, SecurityEventType, SecurityLevel};
pub use log::{EventStatistics, SecurityEventLog, TelemetrySink, MAX_STORED_EVENTS};
