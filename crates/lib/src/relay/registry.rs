//! Role registry: the two slots (device, controller) and who occupies them.
//!
//! The registry is plain data; the router wraps it in a single mutex so every
//! claim, release and lookup is serialized.

use crate::relay::protocol::Role;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Opaque per-connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(uuid::Uuid);

impl ConnId {
    pub(crate) fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Cloneable handle to a live connection: identity, address, and its outbound queue.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnId,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PeerHandle {
    pub fn new(addr: SocketAddr, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: ConnId::new(),
            addr,
            tx,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue a frame. Returns false when the writer side is already gone.
    pub fn send(&self, frame: Outbound) -> bool {
        self.tx.send(frame).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{0} slot is already occupied")]
    Occupied(Role),
}

/// Connection state of one slot as reported in status lines and the health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Connected,
    Disconnected,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlotState::Connected => "connected",
            SlotState::Disconnected => "disconnected",
        })
    }
}

/// Aggregate view of both slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub device: SlotState,
    pub controller: SlotState,
}

/// The two role slots. Each holds at most one connection.
#[derive(Debug, Default)]
pub struct Registry {
    device: Option<PeerHandle>,
    controller: Option<PeerHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, role: Role) -> &Option<PeerHandle> {
        match role {
            Role::Device => &self.device,
            Role::Controller => &self.controller,
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<PeerHandle> {
        match role {
            Role::Device => &mut self.device,
            Role::Controller => &mut self.controller,
        }
    }

    /// Occupy an empty slot. An occupied slot is never overwritten.
    pub fn claim(&mut self, role: Role, peer: PeerHandle) -> Result<(), RegistryError> {
        let slot = self.slot_mut(role);
        if slot.is_some() {
            return Err(RegistryError::Occupied(role));
        }
        *slot = Some(peer);
        Ok(())
    }

    /// Empty the slot if `id` is its occupant. Returns whether anything was released.
    pub fn release(&mut self, role: Role, id: ConnId) -> bool {
        let slot = self.slot_mut(role);
        if slot.as_ref().map(PeerHandle::id) == Some(id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn occupant(&self, role: Role) -> Option<&PeerHandle> {
        self.slot(role).as_ref()
    }

    pub fn status(&self) -> SlotStatus {
        let state = |s: &Option<PeerHandle>| {
            if s.is_some() {
                SlotState::Connected
            } else {
                SlotState::Disconnected
            }
        };
        SlotStatus {
            device: state(&self.device),
            controller: state(&self.controller),
        }
    }

    /// Take every occupant out of the registry (process teardown).
    pub fn drain(&mut self) -> Vec<(Role, PeerHandle)> {
        let mut out = Vec::new();
        if let Some(p) = self.device.take() {
            out.push((Role::Device, p));
        }
        if let Some(p) = self.controller.take() {
            out.push((Role::Controller, p));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holds(reg: &Registry, role: Role, id: ConnId) -> bool {
        reg.occupant(role).map(PeerHandle::id) == Some(id)
    }

    fn peer() -> (PeerHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PeerHandle::new("127.0.0.1:5000".parse().unwrap(), tx), rx)
    }

    #[test]
    fn starts_empty() {
        let reg = Registry::new();
        assert_eq!(
            reg.status(),
            SlotStatus {
                device: SlotState::Disconnected,
                controller: SlotState::Disconnected
            }
        );
    }

    #[test]
    fn second_claim_is_rejected_and_occupant_kept() {
        let mut reg = Registry::new();
        let (a, _ra) = peer();
        let (b, _rb) = peer();
        reg.claim(Role::Device, a.clone()).unwrap();
        assert_eq!(
            reg.claim(Role::Device, b),
            Err(RegistryError::Occupied(Role::Device))
        );
        assert!(holds(&reg, Role::Device, a.id()));
        assert_eq!(reg.status().controller, SlotState::Disconnected);
    }

    #[test]
    fn slots_are_independent() {
        let mut reg = Registry::new();
        let (a, _ra) = peer();
        let (b, _rb) = peer();
        reg.claim(Role::Device, a).unwrap();
        reg.claim(Role::Controller, b).unwrap();
        assert_eq!(reg.status().device, SlotState::Connected);
        assert_eq!(reg.status().controller, SlotState::Connected);
    }

    #[test]
    fn release_requires_current_occupant() {
        let mut reg = Registry::new();
        let (a, _ra) = peer();
        let (b, _rb) = peer();
        reg.claim(Role::Device, a.clone()).unwrap();
        assert!(!reg.release(Role::Device, b.id()));
        assert!(!reg.release(Role::Controller, a.id()));
        assert!(holds(&reg, Role::Device, a.id()));
        assert!(reg.release(Role::Device, a.id()));
        assert!(reg.occupant(Role::Device).is_none());
        reg.claim(Role::Device, b.clone()).unwrap();
        assert!(holds(&reg, Role::Device, b.id()));
    }

    #[test]
    fn drain_empties_both_slots() {
        let mut reg = Registry::new();
        let (a, _ra) = peer();
        let (b, _rb) = peer();
        reg.claim(Role::Device, a).unwrap();
        reg.claim(Role::Controller, b).unwrap();
        let drained = reg.drain();
        assert_eq!(drained.len(), 2);
        assert!(reg.occupant(Role::Device).is_none());
        assert!(reg.occupant(Role::Controller).is_none());
    }

    #[test]
    fn peer_send_reports_closed_queue() {
        let (a, rx) = peer();
        assert!(a.send(Outbound::Text("x".into())));
        drop(rx);
        assert!(!a.send(Outbound::Text("y".into())));
    }

    #[test]
    fn slot_status_serializes_lowercase() {
        let s = SlotStatus {
            device: SlotState::Connected,
            controller: SlotState::Disconnected,
        };
        assert_eq!(
            serde_json::to_string(&s).unwrap(),
            r#"{"device":"connected","controller":"disconnected"}"#
        );
    }
}
