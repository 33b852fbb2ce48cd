//! Relay core: registration handshake, role bookkeeping, and forwarding.
//!
//! Transport-agnostic. The server feeds socket events in through `on_connect`,
//! `on_message`, `on_disconnect` and `on_error`; frames for peers leave through
//! each connection's outbound queue.

use crate::relay::protocol::{Envelope, EnvelopeKind, ProtocolError, Role};
use crate::relay::registry::{ConnId, Outbound, PeerHandle, Registry, RegistryError, SlotStatus};
use std::fmt::Display;
use std::net::SocketAddr;
use tokio::sync::{mpsc, Mutex};

/// WebSocket close code for a rejected registration (policy violation).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// WebSocket close code used when the relay shuts down (going away).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// What the socket loop should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// A close frame was queued; stop reading.
    Close,
}

/// Per-connection state owned by the socket task.
#[derive(Debug)]
pub struct Connection {
    peer: PeerHandle,
    role: Option<Role>,
}

impl Connection {
    pub fn new(addr: SocketAddr, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            peer: PeerHandle::new(addr, tx),
            role: None,
        }
    }

    pub fn id(&self) -> ConnId {
        self.peer.id()
    }

    pub fn addr(&self) -> SocketAddr {
        self.peer.addr()
    }

    /// Role assigned by a successful registration, if any.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.peer.send(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }
}

fn log_status(status: &SlotStatus) {
    log::info!(
        "current status: device {}, controller {}",
        status.device,
        status.controller
    );
}

/// The relay: owns the registry and routes between the two role slots.
#[derive(Debug, Default)]
pub struct Relay {
    registry: Mutex<Registry>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&self, conn: &Connection) {
        log::info!("new connection attempt from {}", conn.addr());
    }

    /// Handle one text frame.
    pub async fn on_message(&self, conn: &mut Connection, raw: &str) -> Disposition {
        self.dispatch(conn, raw, Envelope::parse(raw)).await
    }

    /// Handle one binary frame; the payload must be UTF-8 JSON.
    pub async fn on_binary(&self, conn: &mut Connection, raw: &[u8]) -> Disposition {
        let parsed = Envelope::parse_bytes(raw);
        self.dispatch(conn, &String::from_utf8_lossy(raw), parsed).await
    }

    async fn dispatch(
        &self,
        conn: &mut Connection,
        raw: &str,
        parsed: Result<Envelope, ProtocolError>,
    ) -> Disposition {
        let envelope = match parsed {
            Ok(e) => e,
            Err(e) => {
                log::warn!("error processing message from {}: {}", conn.addr(), e);
                return Disposition::Continue;
            }
        };
        match envelope.kind() {
            EnvelopeKind::Register(Some(role)) => self.register(conn, role).await,
            EnvelopeKind::Register(None) => {
                log::debug!(
                    "ignoring registration with unknown client from {}",
                    conn.addr()
                );
                Disposition::Continue
            }
            EnvelopeKind::Data => {
                self.forward(conn, raw, &envelope).await;
                Disposition::Continue
            }
        }
    }

    async fn register(&self, conn: &mut Connection, role: Role) -> Disposition {
        match conn.role {
            Some(current) if current == role => {
                log::debug!("{} re-registered on the same connection; nothing to do", role);
                return Disposition::Continue;
            }
            Some(current) => {
                log::warn!(
                    "connection from {} is already registered as {}; ignoring registration as {}",
                    conn.addr(),
                    current,
                    role
                );
                return Disposition::Continue;
            }
            None => {}
        }

        let mut registry = self.registry.lock().await;
        match registry.claim(role, conn.peer.clone()) {
            Ok(()) => {
                conn.role = Some(role);
                log::info!("{} successfully registered from {}", role, conn.addr());
                log_status(&registry.status());
                Disposition::Continue
            }
            Err(RegistryError::Occupied(role)) => {
                log::warn!(
                    "{} already connected; rejecting new connection from {}",
                    role,
                    conn.addr()
                );
                conn.close(CLOSE_POLICY_VIOLATION, role.occupied_reason());
                Disposition::Close
            }
        }
    }

    async fn forward(&self, conn: &Connection, raw: &str, envelope: &Envelope) {
        let Some(role) = conn.role else {
            log::debug!("dropping message from unregistered connection {}", conn.addr());
            return;
        };
        log::info!("received from {}: {}", role, raw);

        // Hold the lock across the enqueue so per-sender order is kept.
        let registry = self.registry.lock().await;
        let Some(target) = registry.occupant(role.counterpart()) else {
            return;
        };
        let text = match envelope.forward_text(role) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("failed to encode message from {}: {}", role, e);
                return;
            }
        };
        if !target.send(Outbound::Text(text)) {
            log::debug!("{} outbound queue closed; message dropped", role.counterpart());
        }
    }

    /// Release the connection's slot, if it holds one.
    pub async fn on_disconnect(&self, conn: &mut Connection) {
        if let Some(role) = conn.role.take() {
            let mut registry = self.registry.lock().await;
            if registry.release(role, conn.id()) {
                log::info!("{} disconnected", role);
                log_status(&registry.status());
                return;
            }
        }
        log::info!("unknown client disconnected from {}", conn.addr());
    }

    pub fn on_error(&self, conn: &Connection, err: &dyn Display) {
        log::warn!("websocket error on {}: {}", conn.addr(), err);
    }

    pub async fn status(&self) -> SlotStatus {
        self.registry.lock().await.status()
    }

    /// Empty the registry and ask every registered peer to close.
    pub async fn shutdown(&self, reason: &str) {
        let drained = self.registry.lock().await.drain();
        for (role, peer) in drained {
            log::debug!("closing {} connection for shutdown", role);
            let _ = peer.send(Outbound::Close {
                code: CLOSE_GOING_AWAY,
                reason: reason.to_string(),
            });
        }
    }
}
