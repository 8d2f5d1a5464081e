//! Network addressing for concurrently running simulation sessions.
//!
//! Every rollout of a generation runs at the same time, so each one needs its
//! own game, client and RPC ports. The authentication port is shared.

use serde::{Deserialize, Serialize};

/// Base ports from which per-slot ports are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortLayout {
    /// Authentication port, shared by every session.
    pub auth_port: u16,
    /// Base of the server game (control) ports.
    pub game_port_base: u16,
    /// Base of the client-side ports.
    pub client_port_base: u16,
    /// Base of the state/action RPC ports.
    pub rpc_port_base: u16,
}

impl Default for PortLayout {
    fn default() -> Self {
        Self {
            auth_port: 4000,
            game_port_base: 5000,
            client_port_base: 6000,
            rpc_port_base: 50051,
        }
    }
}

impl PortLayout {
    /// Resolves the ports for the rollout running in `slot`.
    ///
    /// Returns `None` if any derived port would overflow `u16`.
    #[must_use]
    pub fn slot(&self, slot: usize) -> Option<SlotPorts> {
        let offset = u16::try_from(slot).ok()?;
        Some(SlotPorts {
            slot,
            auth_port: self.auth_port,
            game_port: self.game_port_base.checked_add(offset)?,
            client_port: self.client_port_base.checked_add(offset)?,
            rpc_port: self.rpc_port_base.checked_add(offset)?,
        })
    }
}

/// Concrete ports reserved by one rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPorts {
    pub slot: usize,
    pub auth_port: u16,
    pub game_port: u16,
    pub client_port: u16,
    pub rpc_port: u16,
}
