// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for Prometheus metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const ROOM_ACTIVE: &str = "room.active";
pub const ROOM_JOINED: &str = "room.joined";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_CLOSED: &str = "room.closed";
pub const MESSAGE_PERSISTED: &str = "message.persisted";
pub const BROADCAST_FAILED: &str = "broadcast.failed";
pub const AUTH_DENIED: &str = "auth.denied";
pub const CREW_ACCEPTED: &str = "crew.accepted";
pub const CREW_REJECTED: &str = "crew.rejected";
pub const APPLICATION_SUBMITTED: &str = "application.submitted";
pub const LEDGER_CAS_RETRY: &str = "ledger.cas_retry";

/// Counts a WebSocket connection as active until dropped, so the gauge
/// is restored even when the connection task is cancelled.
pub struct ActiveConnection(());

impl ActiveConnection {
    pub fn open() -> Self {
        metrics::gauge!(WS_ACTIVE).increment(1.0);
        Self(())
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        metrics::counter!(WS_DISCONNECTION).increment(1);
        metrics::gauge!(WS_ACTIVE).decrement(1.0);
    }
}
