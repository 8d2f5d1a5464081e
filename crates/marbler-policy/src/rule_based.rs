//! Hand-written driving rules used as a baseline and for smoke-testing environments.
//!
//! The policy keeps the marble inside a speed band around a target speed and
//! requests a reset when perception says the marble has left the track surface.

use std::fmt;

use marbler_env::{Action, StateSnapshot};
use serde::{Deserialize, Serialize};

use crate::Policy;

/// Where perception believes the marble is relative to the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum BallStatus {
    /// On the track surface between the walls.
    OnTrack,
    /// Between the walls but lifted off the surface.
    OffTrack,
    /// Outside the track walls.
    OutOfTrack,
    /// Between the walls with no visible shadow.
    LikelyOffTrack,
    Unknown,
}

/// Derives the marble's track status from a snapshot.
pub trait Perception: fmt::Debug + Send + Sync {
    fn ball_status(&self, state: &StateSnapshot) -> BallStatus;
}

/// Perception that performs no image analysis and always reports [`BallStatus::OnTrack`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeOnTrack;

impl Perception for AssumeOnTrack {
    fn ball_status(&self, _state: &StateSnapshot) -> BallStatus {
        BallStatus::OnTrack
    }
}

/// Target speed with a tolerance band in m/s.
///
/// No correction is applied while the speed stays within
/// `target ± tolerance`, which keeps the policy from toggling between
/// accelerating and braking on every step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedBand {
    pub target: f32,
    pub tolerance: f32,
}

impl Default for SpeedBand {
    fn default() -> Self {
        Self {
            target: 25.0,
            tolerance: 0.5,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RuleBasedPolicy<P> {
    band: SpeedBand,
    perception: P,
}

impl<P> RuleBasedPolicy<P> {
    pub fn new(band: SpeedBand, perception: P) -> Self {
        Self { band, perception }
    }
}

impl<P> Policy for RuleBasedPolicy<P>
where
    P: Perception,
{
    fn decide(&self, state: &StateSnapshot) -> Action {
        match self.perception.ball_status(state) {
            BallStatus::OffTrack => Action {
                reset: true,
                ..Action::IDLE
            },
            BallStatus::OnTrack => {
                let speed = state.speed();
                Action {
                    forward: speed < self.band.target - self.band.tolerance,
                    back: speed > self.band.target + self.band.tolerance,
                    ..Action::IDLE
                }
            }
            BallStatus::OutOfTrack | BallStatus::LikelyOffTrack | BallStatus::Unknown => {
                Action::IDLE
            }
        }
    }
}
