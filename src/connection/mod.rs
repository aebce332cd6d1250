//! Connection Module
//!
//! Turns connection lifecycle events into connection table mutations.

pub mod dispatch;
pub mod event;
pub mod manager;
pub mod reader;

pub use dispatch::EventDispatcher;
pub use event::ConnectionEvent;
pub use manager::{ConnectionTracker, EventOutcome, TrackedConnection, TrackerStats};
pub use reader::EventReader;
