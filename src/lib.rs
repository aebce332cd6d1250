//! proctrack Library
//!
//! Tracks which process owns each live TCP connection. Connection-open events
//! record the originating process (pid, effective uid, command name, start
//! time) in a bounded concurrent table keyed by connection context;
//! connection-close events remove it again.

pub mod capture;
pub mod config;
pub mod connection;
pub mod metrics;
pub mod record;
pub mod shutdown;
pub mod table;

pub use config::Config;
pub use connection::{ConnectionEvent, ConnectionTracker};
pub use record::{Comm, ConnectionContext, ProcessRecord};
pub use shutdown::ShutdownCoordinator;
pub use table::{ConnectionTable, InsertOutcome, TableError};

/// Common error type for the tracker
pub type Result<T> = anyhow::Result<T>;
