//! Engine configuration.
//!
//! Everything tunable is passed in at coordinator creation; there is no file
//! or CLI surface. Defaults carry the tuning the engine shipped with.

use thiserror::Error;

/// Errors from [`ReplicationConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    /// Distance bands must satisfy `near < far <= furthest`.
    #[error("distance bands out of order: near {near}, far {far}, furthest {furthest}")]
    DistanceBandsOutOfOrder {
        /// Near band edge.
        near: f32,
        /// Far band edge.
        far: f32,
        /// Cutoff distance.
        furthest: f32,
    },

    /// A cadence interval must be positive.
    #[error("{name} must be positive, got {value}")]
    NonPositiveInterval {
        /// Which interval.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// The in-flight event cap must allow at least one event.
    #[error("max_in_flight_events must be at least 1")]
    ZeroEventCap,

    /// Time synchronization needs at least one sample.
    #[error("min_time_samples must be at least 1")]
    ZeroTimeSamples,
}

/// Tuning for one coordinator.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Distance at or under which peers get the fastest state cadence.
    pub near_distance: f32,
    /// Distance at which the cadence bottoms out at the far interval.
    pub far_distance: f32,
    /// Beyond this distance no state is transmitted at all.
    pub furthest_distance: f32,

    /// Target seconds between state packets to a near peer.
    pub near_state_interval: f64,
    /// Target seconds between state packets to a far peer.
    pub far_state_interval: f64,

    /// Seconds between pings to an established peer (distance-independent).
    pub ping_interval: f64,
    /// Seconds between handshake announcements while connecting.
    pub handshake_interval: f64,
    /// Seconds of silence after which a peer is considered gone.
    pub peer_timeout: f64,

    /// Horizon past the newest shadow sample beyond which state queries
    /// return nothing rather than extrapolating into fiction.
    pub max_extrapolation: f64,
    /// Every Nth transmitted state packet is packed full rather than delta,
    /// bounding how long a lost delta can leave a receiver stale.
    pub full_state_interval: u32,

    /// Floor on the resend interval for unacknowledged reliable events.
    pub min_resend_interval: f64,
    /// Resend interval as a multiple of the estimated round-trip time.
    pub resend_rtt_multiplier: f64,
    /// Resend attempts after which a reliable event is declared
    /// undeliverable, dropped and counted.
    pub max_event_resends: u32,
    /// Cap on queued outgoing events per peer; sends past it are rejected.
    pub max_in_flight_events: usize,

    /// Gain applied to a positive time error when nudging the smoothed clock.
    pub time_adjust_gain: f64,
    /// Largest single clock nudge, in seconds.
    pub max_time_step: f64,
    /// Time-error standard deviation below which the clock counts as
    /// synchronized.
    pub time_sync_deviation: f64,
    /// Samples required before the clock may declare synchronization.
    pub min_time_samples: u32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            near_distance: 15.0,
            far_distance: 150.0,
            furthest_distance: 300.0,
            near_state_interval: 1.0 / 15.0,
            far_state_interval: 1.0 / 8.0,
            ping_interval: 1.0,
            handshake_interval: 1.0,
            peer_timeout: 20.0,
            max_extrapolation: 4.0,
            full_state_interval: 8,
            min_resend_interval: 0.5,
            resend_rtt_multiplier: 2.0,
            max_event_resends: 16,
            max_in_flight_events: 64,
            time_adjust_gain: 0.75,
            max_time_step: 0.5,
            time_sync_deviation: 0.01,
            min_time_samples: 8,
        }
    }
}

impl ReplicationConfig {
    /// Checks internal consistency. Called once at coordinator creation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.near_distance < self.far_distance && self.far_distance <= self.furthest_distance)
        {
            return Err(ConfigError::DistanceBandsOutOfOrder {
                near: self.near_distance,
                far: self.far_distance,
                furthest: self.furthest_distance,
            });
        }
        for (name, value) in [
            ("near_state_interval", self.near_state_interval),
            ("far_state_interval", self.far_state_interval),
            ("ping_interval", self.ping_interval),
            ("handshake_interval", self.handshake_interval),
            ("peer_timeout", self.peer_timeout),
            ("min_resend_interval", self.min_resend_interval),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::NonPositiveInterval { name, value });
            }
        }
        if self.max_in_flight_events == 0 {
            return Err(ConfigError::ZeroEventCap);
        }
        if self.min_time_samples == 0 {
            return Err(ConfigError::ZeroTimeSamples);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        ReplicationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_bad_distance_bands_are_rejected() {
        let config = ReplicationConfig {
            near_distance: 100.0,
            far_distance: 50.0,
            ..ReplicationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DistanceBandsOutOfOrder { .. })
        ));
    }

    #[test]
    fn test_non_positive_interval_is_rejected() {
        let config = ReplicationConfig {
            ping_interval: 0.0,
            ..ReplicationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveInterval {
                name: "ping_interval",
                ..
            })
        ));
    }
}
