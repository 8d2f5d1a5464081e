use marbler_env::StateSnapshot;

/// Length of the feature vector fed to model policies.
pub const FEATURE_COUNT: usize = 10;

/// Flattens the motion part of a snapshot into model inputs.
///
/// Layout: linear velocity `xyz`, angular velocity `xyz`, relative angular
/// velocity `xyz`, then speed.
#[must_use]
pub fn extract(state: &StateSnapshot) -> [f32; FEATURE_COUNT] {
    let [lx, ly, lz] = state.linear_velocity.to_array();
    let [ax, ay, az] = state.angular_velocity.to_array();
    let [rx, ry, rz] = state.relative_angular_velocity.to_array();
    [lx, ly, lz, ax, ay, az, rx, ry, rz, state.speed()]
}

#[cfg(test)]
mod tests {
    use marbler_env::Vec3;

    use super::*;

    #[test]
    fn test_feature_layout() {
        let state = StateSnapshot {
            linear_velocity: Vec3::new(0.0, 3.0, 4.0),
            angular_velocity: Vec3::new(1.0, 2.0, 3.0),
            relative_angular_velocity: Vec3::new(-1.0, -2.0, -3.0),
            ..StateSnapshot::default()
        };
        assert_eq!(
            extract(&state),
            [0.0, 3.0, 4.0, 1.0, 2.0, 3.0, -1.0, -2.0, -3.0, 5.0]
        );
    }
}
