//! Messages exchanged with a running simulation client.
//!
//! A rollout alternates between two calls: fetching a [`StateSnapshot`] and
//! submitting an [`Action`]. Once the race is over the snapshot carries
//! `finished = true` and one [`ResultEntry`] per competitor.

use serde::{Deserialize, Serialize};

/// Three-component vector as reported by the physics simulation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    #[must_use]
    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Final standing of one competitor in a race.
///
/// Every field except the name is optional: a marble that never crossed the
/// finish line has no `finish_time`, and one that never touched a checkpoint
/// has neither checkpoint field.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub name: String,
    #[serde(default)]
    pub finish_time: Option<f32>,
    #[serde(default)]
    pub last_touched_checkpoint_id: Option<u64>,
    #[serde(default)]
    pub last_touched_checkpoint_time: Option<f32>,
}

/// Everything the simulation exposes about the agent's marble at one step.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    #[serde(default)]
    pub relative_angular_velocity: Vec3,
    /// Raw RGBA frame. Empty when the client runs headless.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screen: Vec<u8>,
    pub finished: bool,
    #[serde(default)]
    pub results: Vec<ResultEntry>,
}

impl StateSnapshot {
    /// Magnitude of the linear velocity in m/s.
    #[must_use]
    pub fn speed(&self) -> f32 {
        self.linear_velocity.length()
    }
}

/// Control input for one step. Each flag is an independent key press.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub reset: bool,
}

impl Action {
    pub const IDLE: Self = Self {
        forward: false,
        back: false,
        left: false,
        right: false,
        reset: false,
    };

    /// Number of independent decisions in an action.
    pub const DIMENSIONS: usize = 5;

    /// Builds an action from flags in `forward, back, left, right, reset` order.
    #[must_use]
    pub const fn from_flags(flags: [bool; Self::DIMENSIONS]) -> Self {
        let [forward, back, left, right, reset] = flags;
        Self {
            forward,
            back,
            left,
            right,
            reset,
        }
    }

    #[must_use]
    pub const fn flags(self) -> [bool; Self::DIMENSIONS] {
        [self.forward, self.back, self.left, self.right, self.reset]
    }

    #[must_use]
    pub const fn is_idle(self) -> bool {
        !(self.forward || self.back || self.left || self.right || self.reset)
    }
}
