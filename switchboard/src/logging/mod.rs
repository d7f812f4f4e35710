//! Logging infrastructure for Switchboard
//!
//! Per-turn usage accounting, emitted as structured tracing events and
//! optionally appended to a JSONL file.

pub mod usage;

pub use usage::{EventType, UsageEvent, UsageLogger, USAGE_TARGET};
