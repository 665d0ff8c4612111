//! Smooth motion for remote entities and delta sync for owned ones
//!
//! Remote entities render `interpolation_back_ms` behind the estimated server
//! time. While the newest snapshot is still ahead of that render point the
//! transform eases toward it, speeding up the staler the snapshot is. Once
//! the render point passes the newest snapshot the entity is extrapolated
//! along its velocity until the extrapolation limit, then held in place.

use crate::proxy::ProxyBuffer;
use serde_json::Value;
use shared::math::{Quat, Vec3};
use shared::model::{NetworkedEntity, TransformField};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }
}

impl From<&NetworkedEntity> for Transform {
    fn from(entity: &NetworkedEntity) -> Self {
        Self::new(entity.position, entity.rotation)
    }
}

/// What the reconciler did on a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionMode {
    /// No snapshot buffered yet
    Idle,
    Interpolating,
    Extrapolating,
    /// Past the extrapolation limit, pose held
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSettings {
    pub interpolation_back_ms: f64,
    pub extrapolation_limit_ms: f64,
    /// Base position lerp rate per second
    pub lerp_speed: f32,
    /// Base rotation slerp rate per second
    pub slerp_speed: f32,
    pub snap_angle_deg: f32,
    pub catch_up_gain: f32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            interpolation_back_ms: shared::DEFAULT_INTERPOLATION_BACK_MS,
            extrapolation_limit_ms: shared::DEFAULT_EXTRAPOLATION_LIMIT_MS,
            lerp_speed: shared::DEFAULT_LERP_SPEED,
            slerp_speed: shared::DEFAULT_SLERP_SPEED,
            snap_angle_deg: shared::DEFAULT_SNAP_ANGLE_DEG,
            catch_up_gain: shared::CATCH_UP_GAIN,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MotionReconciler {
    settings: MotionSettings,
}

impl MotionReconciler {
    pub fn new(settings: MotionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MotionSettings {
        &self.settings
    }

    /// Moves `current` one frame toward the buffered authoritative motion
    pub fn reconcile(
        &self,
        current: &mut Transform,
        buffer: &ProxyBuffer,
        server_time_ms: f64,
        dt_secs: f32,
    ) -> MotionMode {
        let Some(newest) = buffer.newest() else {
            return MotionMode::Idle;
        };
        let s = &self.settings;
        let interpolation_time = server_time_ms - s.interpolation_back_ms;

        if newest.timestamp > interpolation_time {
            let staleness_secs = ((server_time_ms - newest.timestamp) / 1000.0).max(0.0) as f32;
            let catch_up = staleness_secs * s.catch_up_gain;

            current.position = current
                .position
                .lerp(newest.position, dt_secs * (s.lerp_speed + catch_up));

            if current.rotation.angle_degrees(newest.rotation) > s.snap_angle_deg {
                current.rotation = newest.rotation;
            } else {
                current.rotation = current
                    .rotation
                    .slerp(newest.rotation, dt_secs * (s.slerp_speed + catch_up));
            }
            return MotionMode::Interpolating;
        }

        let elapsed_ms = interpolation_time - newest.timestamp;
        if elapsed_ms < s.extrapolation_limit_ms {
            let elapsed_secs = (elapsed_ms / 1000.0) as f32;
            current.position = newest.position.add(newest.velocity.scale(elapsed_secs));
            current.rotation = newest.rotation;
            MotionMode::Extrapolating
        } else {
            MotionMode::Frozen
        }
    }
}

/// Publishes an owned entity's transform at a fixed cadence.
///
/// Velocity is derived each frame as position delta over frame time, in
/// units per second. Only fields that differ from the last sent state go out.
#[derive(Debug, Clone)]
pub struct OwnedEntitySync {
    interval_secs: f32,
    elapsed_secs: f32,
    previous_position: Option<Vec3>,
    last_sent: NetworkedEntity,
}

impl OwnedEntitySync {
    /// Starts from the entity as the server created it
    pub fn new(initial: &NetworkedEntity, interval_ms: u64) -> Self {
        Self {
            interval_secs: interval_ms as f32 / 1000.0,
            elapsed_secs: 0.0,
            previous_position: None,
            last_sent: initial.clone(),
        }
    }

    pub fn last_sent(&self) -> &NetworkedEntity {
        &self.last_sent
    }

    /// Feeds one frame of the local transform. Returns an `entityUpdate`
    /// change list when the cadence elapsed and something changed.
    pub fn sample(&mut self, local: &mut NetworkedEntity, dt_secs: f32) -> Option<Vec<Value>> {
        if dt_secs > 0.0 {
            if let Some(previous) = self.previous_position {
                local.velocity = local.position.sub(previous).scale(1.0 / dt_secs);
            }
        }
        self.previous_position = Some(local.position);

        self.elapsed_secs += dt_secs;
        if self.elapsed_secs < self.interval_secs {
            return None;
        }
        self.elapsed_secs = 0.0;

        let changes = local.transform_changes(&self.last_sent);
        if changes.is_empty() {
            return None;
        }

        self.last_sent = local.clone();
        Some(change_list(&local.id, &changes))
    }
}

/// Encodes `[entityId, field, value, ...]`
pub fn change_list(entity_id: &str, changes: &[(TransformField, f32)]) -> Vec<Value> {
    let mut list = Vec::with_capacity(1 + changes.len() * 2);
    list.push(Value::from(entity_id));
    for (field, value) in changes {
        list.push(Value::from(field.as_str()));
        list.push(Value::from(*value as f64));
    }
    list
}
