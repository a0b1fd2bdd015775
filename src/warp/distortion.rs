//! Lens distortion mesh
//!
//! The panel is viewed through a lens with pincushion distortion, so the
//! warp has to pre-distort with the inverse (barrel) profile. Each eye gets
//! a regular grid over the panel; every vertex stores, per colour channel,
//! the tangent-space direction the eye sees through that panel point.

use serde::{Deserialize, Serialize};

use crate::core::config::AtwConfig;
use crate::core::types::Vec2;
use crate::math::Fov;

/// Radial distortion and chromatic aberration coefficients
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensParams {
    /// r² coefficient
    pub k1: f32,
    /// r⁴ coefficient
    pub k2: f32,
    /// Red scale `1 + c0 + c1 r²`, blue scale `1 + c2 + c3 r²`
    pub chromatic: [f32; 4],
}

impl Default for LensParams {
    fn default() -> Self {
        Self {
            k1: 0.22,
            k2: 0.24,
            chromatic: [-0.006, 0.0, 0.014, 0.0],
        }
    }
}

impl LensParams {
    /// A perfect lens
    pub fn none() -> Self {
        Self {
            k1: 0.0,
            k2: 0.0,
            chromatic: [0.0; 4],
        }
    }

    fn radial(&self, r2: f32) -> f32 {
        1.0 + r2 * (self.k1 + r2 * self.k2)
    }

    /// Per-channel scale at normalized squared radius `r2`, normalized so the
    /// green channel is unscaled at the horizontal edge of the FOV
    pub fn channel_scales(&self, r2: f32) -> [f32; 3] {
        let s = self.radial(r2) / self.radial(1.0);
        let c = &self.chromatic;
        [
            s * (1.0 + c[0] + c[1] * r2),
            s,
            s * (1.0 + c[2] + c[3] * r2),
        ]
    }
}

/// Per-channel tangent coordinates at one mesh vertex (red, green, blue)
pub type ChannelCoords = [Vec2; 3];

/// Distortion grids for both eyes
#[derive(Clone, Debug)]
pub struct DistortionMesh {
    cols: u32,
    rows: u32,
    fov: Fov,
    lens: LensParams,
    /// Row-major `(rows + 1) × (cols + 1)` vertices per eye
    vertices: [Vec<ChannelCoords>; 2],
}

impl DistortionMesh {
    pub fn build(fov: Fov, lens: LensParams, cols: u32, rows: u32) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        // Radius normalization: the horizontal edge of the eye is r = 1
        let edge = fov.left.max(fov.right).max(f32::EPSILON);

        let grid = {
            let mut vertices = Vec::with_capacity(((cols + 1) * (rows + 1)) as usize);
            for row in 0..=rows {
                for col in 0..=cols {
                    let t = fov.tangent_at(col as f32 / cols as f32, row as f32 / rows as f32);
                    let r2 = (t / edge).length_squared();
                    let scales = lens.channel_scales(r2);
                    vertices.push(scales.map(|s| t * s));
                }
            }
            vertices
        };

        // Both lenses share one profile
        Self {
            cols,
            rows,
            fov,
            lens,
            vertices: [grid.clone(), grid],
        }
    }

    /// Mesh for the configured lens and display field of view
    pub fn from_config(config: &AtwConfig) -> Self {
        Self::build(
            Fov::symmetric(config.display.fov_degrees),
            config.warp.lens,
            config.warp.mesh_cols,
            config.warp.mesh_rows,
        )
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn fov(&self) -> Fov {
        self.fov
    }

    pub fn lens(&self) -> LensParams {
        self.lens
    }

    /// Vertex at grid position (`col`, `row`)
    pub fn coords(&self, eye: usize, col: u32, row: u32) -> ChannelCoords {
        self.vertices[eye][(row * (self.cols + 1) + col) as usize]
    }

    pub fn vertices(&self, eye: usize) -> &[ChannelCoords] {
        &self.vertices[eye]
    }

    /// Bilinear interpolation at normalized panel position (`x`, `y`) in [0, 1]
    pub fn interpolate(&self, eye: usize, x: f32, y: f32) -> ChannelCoords {
        interpolate_grid(&self.vertices[eye], self.cols, self.rows, x, y)
    }
}

/// Bilinear interpolation over any `(rows + 1) × (cols + 1)` vertex grid laid
/// out like the distortion mesh, at normalized position (`x`, `y`)
#[inline]
pub fn interpolate_grid(grid: &[ChannelCoords], cols: u32, rows: u32, x: f32, y: f32) -> ChannelCoords {
    let fx = x.clamp(0.0, 1.0) * cols as f32;
    let fy = y.clamp(0.0, 1.0) * rows as f32;
    let c0 = (fx as u32).min(cols - 1);
    let r0 = (fy as u32).min(rows - 1);
    let tx = fx - c0 as f32;
    let ty = fy - r0 as f32;

    let stride = cols + 1;
    let at = |c: u32, r: u32| grid[(r * stride + c) as usize];
    let (a, b) = (at(c0, r0), at(c0 + 1, r0));
    let (c, d) = (at(c0, r0 + 1), at(c0 + 1, r0 + 1));
    std::array::from_fn(|ch| a[ch].lerp(b[ch], tx).lerp(c[ch].lerp(d[ch], tx), ty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_lens_is_plain_tangents() {
        let fov = Fov::symmetric(90.0);
        let mesh = DistortionMesh::build(fov, LensParams::none(), 8, 8);
        let v = mesh.coords(0, 2, 6);
        let expected = fov.tangent_at(0.25, 0.75);
        for ch in v {
            assert!(ch.abs_diff_eq(expected, 1e-5));
        }
        let mid = mesh.interpolate(1, 0.3, 0.6);
        assert!(mid[1].abs_diff_eq(fov.tangent_at(0.3, 0.6), 1e-5));
    }

    #[test]
    fn test_barrel_profile() {
        let fov = Fov::symmetric(90.0);
        let mesh = DistortionMesh::build(fov, LensParams::default(), 16, 16);
        // Centre is fixed
        assert!(mesh.coords(0, 8, 8)[1].abs_diff_eq(Vec2::ZERO, 1e-6));
        // Horizontal edge maps to itself for green
        let edge = mesh.coords(0, 16, 8)[1];
        assert!((edge.x - fov.right).abs() < 1e-5);
        // Points between centre and edge are pulled inwards (magnified)
        let quarter = mesh.coords(0, 12, 8)[1];
        assert!(quarter.x < fov.tangent_at(0.75, 0.5).x);
    }

    #[test]
    fn test_chromatic_ordering() {
        let mesh = DistortionMesh::build(Fov::symmetric(90.0), LensParams::default(), 16, 16);
        let [r, g, b] = mesh.coords(0, 14, 3);
        assert!(r.length() < g.length());
        assert!(g.length() < b.length());
    }
}
