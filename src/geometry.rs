//! View-direction geometry in the trace's world units.
//!
//! Orientation follows the engine convention: positive pitch looks down,
//! yaw is measured counter-clockwise from +x in the horizontal plane.

use serde::{Deserialize, Serialize};

/// Returned by [`view_angle_to`] when the two points coincide.
pub const DEGENERATE_ANGLE: f64 = 999.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn raised(self, dz: f64) -> Self {
        Self { z: self.z + dz, ..self }
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }
}

/// Unit vector of a pitch/yaw orientation in degrees.
pub fn view_vector(pitch_deg: f64, yaw_deg: f64) -> Vec3 {
    let (pr, yr) = (pitch_deg.to_radians(), yaw_deg.to_radians());
    Vec3::new(pr.cos() * yr.cos(), pr.cos() * yr.sin(), -pr.sin())
}

/// Degrees between the view direction at `eye` and the line from `eye` to
/// `target`. Points closer than one unit give [`DEGENERATE_ANGLE`].
pub fn view_angle_to(pitch_deg: f64, yaw_deg: f64, eye: Vec3, target: Vec3) -> f64 {
    let d = target.sub(eye);
    let dist = d.length();
    if dist < 1.0 {
        return DEGENERATE_ANGLE;
    }
    let to_target = Vec3::new(d.x / dist, d.y / dist, d.z / dist);
    let dot = view_vector(pitch_deg, yaw_deg).dot(to_target).clamp(-1.0, 1.0);
    dot.acos().to_degrees()
}

/// Combined angular change between two orientations: pitch delta and
/// wrap-aware yaw delta joined euclidean-style.
pub fn aim_delta(prev_pitch: f64, prev_yaw: f64, pitch: f64, yaw: f64) -> f64 {
    let dp = (pitch - prev_pitch).abs();
    let mut dy = (yaw - prev_yaw).abs();
    if dy > 180.0 {
        dy = 360.0 - dy;
    }
    (dp * dp + dy * dy).sqrt()
}
