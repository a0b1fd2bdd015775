//! Procedural environment the stereo renderer draws
//!
//! A sphere at infinity: each cube face direction has its own base colour
//! and a latitude/longitude grid is drawn every `GRID_DEGREES`. Because the
//! environment is infinitely far away, rotation is the only thing that
//! changes what an eye sees, which is exactly what time warp corrects.

use crate::core::types::Vec3;

/// Grid spacing in degrees
pub const GRID_DEGREES: f32 = 10.0;
/// Grid line half-width in degrees
const LINE_HALF_WIDTH: f32 = 0.35;

const FACE_COLORS: [[f32; 3]; 6] = [
    [0.55, 0.20, 0.20], // +X
    [0.20, 0.45, 0.55], // -X
    [0.60, 0.60, 0.65], // +Y
    [0.25, 0.20, 0.15], // -Y
    [0.20, 0.50, 0.25], // +Z
    [0.45, 0.35, 0.60], // -Z
];
const LINE_COLOR: [f32; 3] = [0.95, 0.95, 0.85];

/// Which cube face a direction points through
fn face_index(d: Vec3) -> usize {
    let a = d.abs();
    if a.x >= a.y && a.x >= a.z {
        if d.x >= 0.0 { 0 } else { 1 }
    } else if a.y >= a.z {
        if d.y >= 0.0 { 2 } else { 3 }
    } else if d.z >= 0.0 {
        4
    } else {
        5
    }
}

/// Distance in degrees from `angle` to the nearest grid line
fn grid_distance(angle_degrees: f32) -> f32 {
    let m = angle_degrees.rem_euclid(GRID_DEGREES);
    m.min(GRID_DEGREES - m)
}

/// Linear RGB radiance seen along world direction `dir` (need not be normalized)
pub fn shade(dir: Vec3) -> [f32; 3] {
    let d = dir.normalize_or_zero();
    if d == Vec3::ZERO {
        return [0.0; 3];
    }

    let yaw = d.x.atan2(-d.z).to_degrees();
    let pitch = d.y.clamp(-1.0, 1.0).asin().to_degrees();

    // Meridians converge at the poles, keep their on-screen width constant
    let meridian_width = LINE_HALF_WIDTH / pitch.to_radians().cos().max(0.05);
    let on_line = grid_distance(pitch) < LINE_HALF_WIDTH
        || (pitch.abs() < 80.0 && grid_distance(yaw) < meridian_width);

    if on_line {
        LINE_COLOR
    } else {
        FACE_COLORS[face_index(d)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faces_differ() {
        let forward = shade(Vec3::new(0.3, 0.2, -1.0));
        let right = shade(Vec3::new(1.0, 0.25, 0.3));
        assert_eq!(forward, FACE_COLORS[5]);
        assert_eq!(right, FACE_COLORS[0]);
    }

    #[test]
    fn test_grid_line_on_horizon() {
        // Pitch 0 is a grid line
        assert_eq!(shade(Vec3::new(0.2, 0.0, -1.0)), LINE_COLOR);
        // Straight ahead is on the yaw = 0 meridian
        assert_eq!(shade(Vec3::new(0.0, 0.3, -1.0)), LINE_COLOR);
    }

    #[test]
    fn test_grid_distance() {
        assert!((grid_distance(21.0) - 1.0).abs() < 1e-4);
        assert!((grid_distance(-9.0) - 1.0).abs() < 1e-4);
        assert!(grid_distance(30.0).abs() < 1e-4);
    }
}
