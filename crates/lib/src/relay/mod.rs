//! Relay: pairs one device and one controller over WebSocket.
//!
//! Single port serves HTTP and WebSocket. A connection claims a role with
//! `{"type":"register","client":"device"|"controller"}`; afterwards its frames are
//! forwarded to the other role. Device traffic is wrapped as `sensor_data`,
//! controller traffic is passed through unchanged.

mod protocol;
mod registry;
mod router;
mod server;

pub use protocol::{Envelope, EnvelopeKind, ProtocolError, RegisterRequest, Role};
pub use registry::{ConnId, Outbound, PeerHandle, Registry, RegistryError, SlotState, SlotStatus};
pub use router::{Connection, Disposition, Relay, CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION};
pub use server::{build_app, run_relay, serve, RelayState};
