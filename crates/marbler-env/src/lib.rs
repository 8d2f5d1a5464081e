//! Simulation environment plumbing for marble race rollouts.
//!
//! This crate owns everything needed to reach a running race simulation:
//!
//! - [`protocol`] - state snapshots, actions and race results
//! - [`ports`] - per-rollout network addressing
//! - [`session`] - a handle that guarantees spawned resources are terminated
//! - [`process`] - launcher that spawns the simulation server and client binaries
//! - [`bridge`] - gRPC client for the state/action service
//!
//! The training orchestrator only sees the [`Environment`] and
//! [`EnvironmentLauncher`] traits, so tests can substitute scripted sessions.

use std::io;

pub use self::{
    ports::{PortLayout, SlotPorts},
    protocol::{Action, ResultEntry, StateSnapshot, Vec3},
    session::{Session, SessionResource, SessionState},
};

pub mod bridge;
pub mod ports;
pub mod process;
pub mod protocol;
pub mod session;

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum EnvironmentError {
    #[display("failed to spawn {program}")]
    Spawn { program: String, source: io::Error },
    #[display("no free ports for rollout slot {slot}")]
    PortRange { slot: usize },
    #[display("failed to connect to {addr}")]
    Connect { addr: String, source: io::Error },
    #[display("call to {method} failed")]
    Rpc {
        method: &'static str,
        source: Box<tonic::Status>,
    },
    #[display("session is not connected")]
    NotConnected,
    #[display("session already terminated")]
    Terminated,
}

/// A live simulation session speaking the state/action protocol.
///
/// Calls are strictly sequential: one state fetch, then one action.
pub trait Environment {
    fn get_state(&mut self) -> Result<StateSnapshot, EnvironmentError>;

    fn send_action(&mut self, action: Action) -> Result<(), EnvironmentError>;
}

/// Allocates fresh simulation sessions, one per concurrent rollout.
///
/// Launching is split in two phases so that a session whose connection fails
/// is still torn down by its [`Session`] handle.
pub trait EnvironmentLauncher: Send + Sync {
    type Connection: Environment + Send;

    /// Spawns the simulation for `slot`, naming the agent `player_name`.
    fn spawn(
        &self,
        slot: usize,
        player_name: &str,
    ) -> Result<Session<Self::Connection>, EnvironmentError>;

    /// Establishes the state/action connection of a spawned session.
    fn connect(&self, session: &mut Session<Self::Connection>) -> Result<(), EnvironmentError>;
}
