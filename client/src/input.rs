//! Scripted input for the headless client
//!
//! Stands in for a player: walks the owned avatar around a circle and fires
//! at a random remote entity every few seconds while a round is running.

use rand::seq::SliceRandom;
use rand::Rng;
use shared::math::{Quat, Vec3};

/// What the bot wants to do this frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BotIntent {
    pub position: Vec3,
    pub rotation: Quat,
    /// Entity id to shoot at, if a shot is due
    pub fire_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BotInput {
    center: Vec3,
    radius: f32,
    /// Radians per second
    angular_speed: f32,
    angle: f32,
    fire_interval_secs: f32,
    since_fire_secs: f32,
}

impl BotInput {
    pub fn new(center: Vec3, radius: f32, angular_speed: f32, fire_interval_secs: f32) -> Self {
        Self {
            center,
            radius,
            angular_speed,
            angle: 0.0,
            fire_interval_secs,
            since_fire_secs: 0.0,
        }
    }

    /// Bot with a random spawn point and pace
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let center = Vec3::new(rng.gen_range(-20.0..20.0), 0.0, rng.gen_range(-20.0..20.0));
        Self::new(
            center,
            rng.gen_range(2.0..6.0),
            rng.gen_range(0.5..1.5),
            rng.gen_range(2.0..5.0),
        )
    }

    pub fn spawn_point(&self) -> Vec3 {
        self.position_at(0.0)
    }

    fn position_at(&self, angle: f32) -> Vec3 {
        Vec3::new(
            self.center.x + self.radius * angle.cos(),
            self.center.y,
            self.center.z + self.radius * angle.sin(),
        )
    }

    /// Advances the script by one frame. `targets` are candidate entities to
    /// shoot; pass an empty slice outside of a running round.
    pub fn update(&mut self, dt_secs: f32, targets: &[String]) -> BotIntent {
        self.angle = (self.angle + self.angular_speed * dt_secs) % std::f32::consts::TAU;
        let heading_degrees = -self.angle.to_degrees();

        let mut fire_at = None;
        if targets.is_empty() {
            self.since_fire_secs = 0.0;
        } else {
            self.since_fire_secs += dt_secs;
            if self.since_fire_secs >= self.fire_interval_secs {
                self.since_fire_secs = 0.0;
                fire_at = targets.choose(&mut rand::thread_rng()).cloned();
            }
        }

        BotIntent {
            position: self.position_at(self.angle),
            rotation: Quat::from_yaw_degrees(heading_degrees),
            fire_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_walks_a_circle() {
        let mut bot = BotInput::new(Vec3::ZERO, 2.0, std::f32::consts::FRAC_PI_2, 10.0);
        assert_eq!(bot.spawn_point(), Vec3::new(2.0, 0.0, 0.0));

        let intent = bot.update(1.0, &[]);
        assert_approx_eq!(intent.position.x, 0.0, 1e-4);
        assert_approx_eq!(intent.position.z, 2.0, 1e-4);
        assert!(intent.fire_at.is_none());
    }

    #[test]
    fn test_fires_on_interval() {
        let mut bot = BotInput::new(Vec3::ZERO, 1.0, 1.0, 1.0);
        let targets = vec!["enemy".to_string()];

        assert!(bot.update(0.5, &targets).fire_at.is_none());
        assert_eq!(bot.update(0.5, &targets).fire_at.as_deref(), Some("enemy"));
        assert!(bot.update(0.5, &targets).fire_at.is_none());
    }

    #[test]
    fn test_no_targets_resets_timer() {
        let mut bot = BotInput::new(Vec3::ZERO, 1.0, 1.0, 1.0);
        let targets = vec!["enemy".to_string()];

        bot.update(0.9, &targets);
        bot.update(0.5, &[]);
        assert!(bot.update(0.5, &targets).fire_at.is_none());
    }

    #[test]
    fn test_random_bot_stays_in_arena() {
        for _ in 0..20 {
            let bot = BotInput::random();
            let spawn = bot.spawn_point();
            assert!(spawn.x.abs() < 30.0 && spawn.z.abs() < 30.0);
        }
    }
}
