//! Minimal vector and quaternion types used by the replicated transform

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    pub const ONE: Vec3 = Vec3 {
        x: 1.0,
        y: 1.0,
        z: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, factor: f32) -> Vec3 {
        Vec3::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(self, other: Vec3) -> f32 {
        self.sub(other).length()
    }

    /// Linear interpolation with `t` clamped to `[0, 1]`
    pub fn lerp(self, target: Vec3, t: f32) -> Vec3 {
        let t = t.clamp(0.0, 1.0);
        self.add(target.sub(self).scale(t))
    }

    /// Rounds every component to 4 decimal places
    pub fn rounded(self) -> Vec3 {
        Vec3::new(round4(self.x), round4(self.y), round4(self.z))
    }
}

/// Rounds to 4 decimal places, the precision positions are replicated at
pub fn round4(value: f32) -> f32 {
    ((value as f64 * 10_000.0).round() / 10_000.0) as f32
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `degrees` around the vertical axis
    pub fn from_yaw_degrees(degrees: f32) -> Self {
        let half = degrees.to_radians() * 0.5;
        Quat::new(0.0, half.sin(), 0.0, half.cos())
    }

    pub fn dot(self, other: Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    pub fn normalized(self) -> Quat {
        let len = self.dot(self).sqrt();
        if len < f32::EPSILON {
            return Quat::IDENTITY;
        }
        Quat::new(self.x / len, self.y / len, self.z / len, self.w / len)
    }

    /// Angle in degrees between two orientations
    pub fn angle_degrees(self, other: Quat) -> f32 {
        let dot = self.normalized().dot(other.normalized()).abs().min(1.0);
        (dot.acos() * 2.0).to_degrees()
    }

    /// Spherical interpolation along the shortest arc, `t` clamped to `[0, 1]`
    pub fn slerp(self, target: Quat, t: f32) -> Quat {
        let t = t.clamp(0.0, 1.0);
        let from = self.normalized();
        let mut to = target.normalized();
        let mut dot = from.dot(to);

        if dot < 0.0 {
            to = Quat::new(-to.x, -to.y, -to.z, -to.w);
            dot = -dot;
        }

        // Nearly parallel, fall back to normalized lerp
        if dot > 0.9995 {
            return Quat::new(
                from.x + (to.x - from.x) * t,
                from.y + (to.y - from.y) * t,
                from.z + (to.z - from.z) * t,
                from.w + (to.w - from.w) * t,
            )
            .normalized();
        }

        let theta = dot.acos();
        let sin_theta = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin_theta;
        let b = (t * theta).sin() / sin_theta;

        Quat::new(
            from.x * a + to.x * b,
            from.y * a + to.y * b,
            from.z * a + to.z * b,
            from.w * a + to.w * b,
        )
    }
}
