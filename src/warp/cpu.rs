//! CPU/DSP time warp
//!
//! Mirrors what the GPU path does in its vertex stage: the start/end
//! transforms are applied at the distortion mesh vertices, then every
//! output pixel bilinearly interpolates the warped texture coordinates of
//! its cell and samples the eye buffer. Rows are spread over a private
//! rayon pool so scene rendering can never occupy the warp's workers.

use rayon::prelude::*;

use crate::core::error::Error;
use crate::core::types::{Result, Vec2};
use crate::display::FrameSink;
use crate::frame::EyeImage;
use crate::math::{project_interpolated, scanout_fraction};
use crate::warp::backend::{WarpBackend, WarpJob};
use crate::warp::distortion::{ChannelCoords, DistortionMesh, interpolate_grid};

/// Rayon-parallel warp into an RGBA8 display image
pub struct CpuTimeWarp {
    mesh: DistortionMesh,
    eye_width: u32,
    eye_height: u32,
    /// Warped texture coordinates per mesh vertex, per eye
    warped: [Vec<ChannelCoords>; 2],
    output: EyeImage,
    pool: rayon::ThreadPool,
}

impl CpuTimeWarp {
    pub fn new(mesh: DistortionMesh, eye_width: u32, eye_height: u32, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("atw-warp-pool-{}", i))
            .build()
            .map_err(|e| Error::Backend(format!("warp thread pool: {}", e)))?;
        let vertex_count = mesh.vertices(0).len();
        Ok(Self {
            mesh,
            eye_width,
            eye_height,
            warped: [
                vec![[Vec2::ZERO; 3]; vertex_count],
                vec![[Vec2::ZERO; 3]; vertex_count],
            ],
            output: EyeImage::new(eye_width * 2, eye_height),
            pool,
        })
    }

    pub fn output(&self) -> &EyeImage {
        &self.output
    }

    /// Apply the job's transforms at every mesh vertex
    fn warp_vertices(&mut self, job: &WarpJob<'_>) {
        let cols = self.mesh.cols();
        let rows = self.mesh.rows();
        for eye in 0..2 {
            let start = &job.start[eye];
            let end = &job.end[eye];
            for row in 0..=rows {
                for col in 0..=cols {
                    let i = (row * (cols + 1) + col) as usize;
                    let fraction = scanout_fraction(eye, col as f32 / cols as f32);
                    let coords = self.mesh.coords(eye, col, row);
                    self.warped[eye][i] = if job.chromatic_aberration {
                        coords.map(|t| project_interpolated(start, end, t, fraction))
                    } else {
                        [project_interpolated(start, end, coords[1], fraction); 3]
                    };
                }
            }
        }
    }

    /// Warp both eyes of `job.frame` into the output image
    pub fn warp(&mut self, job: &WarpJob<'_>) -> &EyeImage {
        self.warp_vertices(job);

        let eye_width = self.eye_width as usize;
        let eye_height = self.eye_height;
        let cols = self.mesh.cols();
        let rows = self.mesh.rows();
        let chromatic = job.chromatic_aberration;
        let warped = &self.warped;
        let frame = job.frame;
        let output = &mut self.output;

        self.pool.install(|| {
            output
                .pixels_mut()
                .par_chunks_mut(eye_width * 2)
                .enumerate()
                .for_each(|(y, row)| {
                    let v = (y as f32 + 0.5) / eye_height as f32;
                    for (eye, half) in row.chunks_exact_mut(eye_width).enumerate() {
                        let source = &frame.eyes[eye];
                        for (x, pixel) in half.iter_mut().enumerate() {
                            let u = (x as f32 + 0.5) / eye_width as f32;
                            let uv = interpolate_grid(&warped[eye], cols, rows, u, v);
                            *pixel = if chromatic {
                                [
                                    to_u8(source.sample_channel(uv[0], 0)),
                                    to_u8(source.sample_channel(uv[1], 1)),
                                    to_u8(source.sample_channel(uv[2], 2)),
                                    255,
                                ]
                            } else {
                                let [r, g, b, _] = source.sample_bilinear(uv[1]);
                                [to_u8(r), to_u8(g), to_u8(b), 255]
                            };
                        }
                    }
                });
        });

        &self.output
    }
}

#[inline]
fn to_u8(channel: f32) -> u8 {
    (channel + 0.5).min(255.0) as u8
}

/// The CPU/DSP path: CPU warp feeding a frame sink
pub struct CpuBackend {
    warp: CpuTimeWarp,
    sink: Box<dyn FrameSink>,
}

impl CpuBackend {
    pub fn new(warp: CpuTimeWarp, sink: Box<dyn FrameSink>) -> Self {
        Self { warp, sink }
    }
}

impl WarpBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn warp_and_present(&mut self, job: &WarpJob<'_>) -> Result<()> {
        let output = self.warp.warp(job);
        self.sink.present(output, job.tick)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.sink.resize(width, height);
    }

    fn capture(&mut self) -> Option<EyeImage> {
        self.sink
            .last_frame()
            .cloned()
            .or_else(|| Some(self.warp.output().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ClockTime, Quat};
    use crate::display::{HeadlessSink, VsyncTick};
    use crate::frame::StereoFrame;
    use crate::math::{Fov, timewarp_transform};
    use crate::pose::HeadPose;
    use crate::warp::distortion::LensParams;

    const RES: u32 = 32;

    fn gradient_frame(fov: Fov) -> StereoFrame {
        let pose = HeadPose::new(Quat::IDENTITY, ClockTime::ZERO);
        let mut frame = StereoFrame::solid(1, RES, [0, 0, 0, 255], pose, fov);
        frame.eyes[0] = EyeImage::from_fn(RES, RES, |x, y| [(x * 8) as u8, (y * 8) as u8, 64, 255]);
        frame.eyes[1] = EyeImage::from_fn(RES, RES, |x, y| [(y * 8) as u8, (x * 8) as u8, 192, 255]);
        frame
    }

    fn job<'a>(frame: &'a StereoFrame, display: Quat, chromatic: bool) -> WarpJob<'a> {
        let t = timewarp_transform(&frame.fov, frame.render_pose.orientation, display);
        WarpJob {
            frame,
            tick: VsyncTick { index: 0, time: ClockTime::ZERO },
            start: [t; 2],
            end: [t; 2],
            chromatic_aberration: chromatic,
        }
    }

    fn warper(fov: Fov, lens: LensParams) -> CpuTimeWarp {
        CpuTimeWarp::new(DistortionMesh::build(fov, lens, 8, 8), RES, RES, 2).unwrap()
    }

    #[test]
    fn test_identity_warp_reproduces_eyes() {
        let fov = Fov::symmetric(90.0);
        let frame = gradient_frame(fov);
        let mut warp = warper(fov, LensParams::none());
        let out = warp.warp(&job(&frame, Quat::IDENTITY, false)).clone();

        assert_eq!(out.width(), RES * 2);
        assert_eq!(out.crop(0, 0, RES, RES), frame.eyes[0]);
        assert_eq!(out.crop(RES, 0, RES, RES), frame.eyes[1]);
    }

    #[test]
    fn test_identity_warp_with_chroma_and_no_lens() {
        let fov = Fov::symmetric(90.0);
        let frame = gradient_frame(fov);
        let mut warp = warper(fov, LensParams::none());
        let out = warp.warp(&job(&frame, Quat::IDENTITY, true)).clone();
        assert_eq!(out.crop(0, 0, RES, RES), frame.eyes[0]);
    }

    #[test]
    fn test_yaw_shifts_content_right() {
        let fov = Fov::symmetric(90.0);
        // A single bright column in the middle of the left eye
        let pose = HeadPose::new(Quat::IDENTITY, ClockTime::ZERO);
        let mut frame = StereoFrame::solid(1, RES, [0, 0, 0, 255], pose, fov);
        frame.eyes[0] = EyeImage::from_fn(RES, RES, |x, _| {
            if x == RES / 2 { [255, 255, 255, 255] } else { [0, 0, 0, 255] }
        });

        // Head turned left by the angle of a few pixels
        let pixels = 4.0;
        let angle = (pixels * fov.width() / RES as f32).atan();
        let mut warp = warper(fov, LensParams::none());
        let out = warp.warp(&job(&frame, Quat::from_rotation_y(angle), false)).clone();

        let brightest = (0..RES)
            .max_by_key(|&x| out.get(x, RES / 2)[0])
            .unwrap();
        assert_eq!(brightest, RES / 2 + pixels as u32);
    }

    #[test]
    fn test_lens_blacks_out_corners() {
        let fov = Fov::symmetric(90.0);
        let frame = gradient_frame(fov);
        let mut warp = warper(fov, LensParams::default());
        let out = warp.warp(&job(&frame, Quat::IDENTITY, true)).clone();
        assert_eq!(out.get(0, 0), [0, 0, 0, 255]);
        assert_ne!(out.get(RES / 2, RES / 2), [0, 0, 0, 255]);
    }

    #[test]
    fn test_backend_presents_to_sink() {
        let fov = Fov::symmetric(90.0);
        let frame = gradient_frame(fov);
        let mut backend = CpuBackend::new(warper(fov, LensParams::none()), Box::new(HeadlessSink::new()));
        backend.warp_and_present(&job(&frame, Quat::IDENTITY, false)).unwrap();
        let captured = backend.capture().unwrap();
        assert_eq!(captured.crop(RES, 0, RES, RES), frame.eyes[1]);
        assert_eq!(backend.name(), "cpu");
    }
}
