//! Two-device sync: transport to the counterpart and session orchestration

mod session;
mod transport;

pub use session::{SyncError, SyncOptions, SyncOrchestrator, SyncPhase};
pub use transport::{PushReceipt, SyncTransport, TransportError};
