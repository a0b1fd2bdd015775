//! Rotational time warp transforms

use crate::core::types::{Mat3, Quat, Vec2, Vec3};
use crate::math::fov::Fov;

/// Transform from display-space tangent coordinates to eye-buffer texture
/// coordinates.
///
/// `render` is the head orientation the eye buffer was rendered with and
/// `display` the (newer) orientation the frame is shown at, both as
/// world-from-head rotations. Only the rotation delta is applied.
pub fn timewarp_transform(fov: &Fov, render: Quat, display: Quat) -> Mat3 {
    let delta = render.inverse() * display;
    fov.texcoord_projection() * Mat3::from_quat(delta.normalize())
}

/// Homogeneous texture coordinate of a display tangent `(tx, ty)` through `transform`
#[inline]
pub fn project_homogeneous(transform: &Mat3, tangent: Vec2) -> Vec3 {
    *transform * Vec3::new(tangent.x, tangent.y, -1.0)
}

/// Perspective divide; directions at or behind the eye plane map far outside [0, 1]
#[inline]
pub fn perspective_divide(h: Vec3) -> Vec2 {
    if h.z <= 1e-6 {
        return Vec2::splat(-1.0);
    }
    Vec2::new(h.x / h.z, h.y / h.z)
}

/// Texture coordinate of a display tangent, interpolating between the
/// transforms at the start and end of the refresh by `fraction`
#[inline]
pub fn project_interpolated(start: &Mat3, end: &Mat3, tangent: Vec2, fraction: f32) -> Vec2 {
    let a = project_homogeneous(start, tangent);
    let b = project_homogeneous(end, tangent);
    perspective_divide(a.lerp(b, fraction))
}

/// Fraction of the refresh elapsed when a column is scanned out.
/// The panel scans left to right across both eyes.
#[inline]
pub fn scanout_fraction(eye: usize, x: f32) -> f32 {
    ((eye as f32 + x.clamp(0.0, 1.0)) * 0.5).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rotation_is_plain_projection() {
        let fov = Fov::symmetric(90.0);
        let t = timewarp_transform(&fov, Quat::IDENTITY, Quat::IDENTITY);
        let uv = perspective_divide(project_homogeneous(&t, Vec2::new(0.5, -0.5)));
        assert!(uv.abs_diff_eq(fov.uv_of_tangent(Vec2::new(0.5, -0.5)), 1e-5));
    }

    #[test]
    fn test_yaw_shifts_sample_point() {
        let fov = Fov::symmetric(90.0);
        let angle = 10f32.to_radians();
        // Head turned left since render: the centre of the display now
        // looks at content that was left of centre in the eye buffer
        let display = Quat::from_rotation_y(angle);
        let t = timewarp_transform(&fov, Quat::IDENTITY, display);
        let uv = perspective_divide(project_homogeneous(&t, Vec2::ZERO));
        let expected_u = 0.5 - angle.tan() / fov.width();
        assert!((uv.x - expected_u).abs() < 1e-4, "u = {}", uv.x);
        assert!((uv.y - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_same_delta_any_base() {
        let fov = Fov::symmetric(100.0);
        let base = Quat::from_rotation_x(0.3) * Quat::from_rotation_y(1.2);
        let delta = Quat::from_rotation_y(0.05);
        let a = timewarp_transform(&fov, Quat::IDENTITY, delta);
        let b = timewarp_transform(&fov, base, base * delta);
        assert!(a.abs_diff_eq(b, 1e-5));
    }

    #[test]
    fn test_behind_eye_is_outside() {
        let fov = Fov::symmetric(90.0);
        let t = timewarp_transform(&fov, Quat::IDENTITY, Quat::from_rotation_y(std::f32::consts::PI));
        let uv = perspective_divide(project_homogeneous(&t, Vec2::ZERO));
        assert!(uv.x < 0.0 || uv.x > 1.0);
    }

    #[test]
    fn test_scanout_fraction() {
        assert_eq!(scanout_fraction(0, 0.0), 0.0);
        assert_eq!(scanout_fraction(0, 1.0), 0.5);
        assert_eq!(scanout_fraction(1, 1.0), 1.0);
        assert_eq!(scanout_fraction(1, 0.5), 0.75);
    }
}
