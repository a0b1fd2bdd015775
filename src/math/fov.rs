//! Per-eye field of view and its texture-space projection

use serde::{Deserialize, Serialize};

use crate::core::types::{Mat3, Vec2, Vec3};

/// Field of view as tangents of the four half angles (all positive)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fov {
    pub left: f32,
    pub right: f32,
    pub up: f32,
    pub down: f32,
}

impl Fov {
    /// Symmetric FOV with the same full angle horizontally and vertically
    pub fn symmetric(full_degrees: f32) -> Self {
        let t = (full_degrees.to_radians() * 0.5).tan();
        Self { left: t, right: t, up: t, down: t }
    }

    /// Asymmetric FOV from half angles in degrees
    pub fn from_degrees(left: f32, right: f32, up: f32, down: f32) -> Self {
        let tan = |deg: f32| deg.to_radians().tan();
        Self {
            left: tan(left),
            right: tan(right),
            up: tan(up),
            down: tan(down),
        }
    }

    /// Horizontal extent in tangent space
    pub fn width(&self) -> f32 {
        self.left + self.right
    }

    /// Vertical extent in tangent space
    pub fn height(&self) -> f32 {
        self.up + self.down
    }

    /// Matrix taking a view-space direction (looking down -Z) to homogeneous
    /// texture coordinates: divide x and y by z to get (u, v), u to the
    /// right and v downwards, both in [0, 1] inside the FOV.
    pub fn texcoord_projection(&self) -> Mat3 {
        let w = self.width();
        let h = self.height();
        Mat3::from_cols(
            Vec3::new(1.0 / w, 0.0, 0.0),
            Vec3::new(0.0, -1.0 / h, 0.0),
            Vec3::new(-self.left / w, -self.up / h, -1.0),
        )
    }

    /// Tangent-space coordinates of texture coordinate (u, v)
    pub fn tangent_at(&self, u: f32, v: f32) -> Vec2 {
        Vec2::new(-self.left + u * self.width(), self.up - v * self.height())
    }

    /// Texture coordinate of a tangent-space point (inverse of `tangent_at`)
    pub fn uv_of_tangent(&self, tangent: Vec2) -> Vec2 {
        Vec2::new(
            (tangent.x + self.left) / self.width(),
            (self.up - tangent.y) / self.height(),
        )
    }
}

impl Default for Fov {
    fn default() -> Self {
        Self::symmetric(90.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_90() {
        let fov = Fov::symmetric(90.0);
        assert!((fov.left - 1.0).abs() < 1e-5);
        assert!((fov.width() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_projection_corners() {
        let fov = Fov::from_degrees(40.0, 50.0, 45.0, 35.0);
        let p = fov.texcoord_projection();

        let project = |t: Vec2| {
            let h = p * Vec3::new(t.x, t.y, -1.0);
            Vec2::new(h.x / h.z, h.y / h.z)
        };

        let top_left = project(Vec2::new(-fov.left, fov.up));
        assert!(top_left.abs_diff_eq(Vec2::ZERO, 1e-5));

        let bottom_right = project(Vec2::new(fov.right, -fov.down));
        assert!(bottom_right.abs_diff_eq(Vec2::ONE, 1e-5));
    }

    #[test]
    fn test_tangent_uv_inverse() {
        let fov = Fov::from_degrees(40.0, 50.0, 45.0, 35.0);
        let t = fov.tangent_at(0.3, 0.8);
        assert!(fov.uv_of_tangent(t).abs_diff_eq(Vec2::new(0.3, 0.8), 1e-5));
    }
}
