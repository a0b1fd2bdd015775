use criterion::{criterion_group, criterion_main, Criterion, black_box};

use atw::core::types::{ClockTime, Quat};
use atw::display::VsyncTick;
use atw::frame::StereoFrame;
use atw::math::{Fov, timewarp_transform};
use atw::pose::HeadPose;
use atw::scene::{RenderLoad, SceneRenderer};
use atw::warp::{CpuTimeWarp, DistortionMesh, LensParams, WarpJob};

const EYE: u32 = 512;

fn test_frame(fov: Fov) -> StereoFrame {
    let pose = HeadPose::new(Quat::IDENTITY, ClockTime::ZERO);
    StereoFrame::solid(1, EYE, [128, 128, 128, 255], pose, fov)
}

fn bench_warp(c: &mut Criterion, name: &str, chromatic: bool) {
    let fov = Fov::symmetric(90.0);
    let mesh = DistortionMesh::build(fov, LensParams::default(), 32, 32);
    let mut warp = CpuTimeWarp::new(mesh, EYE, EYE, 4).unwrap();
    let frame = test_frame(fov);
    let start = timewarp_transform(&fov, Quat::IDENTITY, Quat::from_rotation_y(0.02));
    let end = timewarp_transform(&fov, Quat::IDENTITY, Quat::from_rotation_y(0.03));
    let job = WarpJob {
        frame: &frame,
        tick: VsyncTick { index: 1, time: ClockTime::ZERO },
        start: [start; 2],
        end: [end; 2],
        chromatic_aberration: chromatic,
    };

    c.bench_function(name, |b| {
        b.iter(|| {
            warp.warp(black_box(&job));
        });
    });
}

fn bench_cpu_warp_512(c: &mut Criterion) {
    bench_warp(c, "cpu_warp_512", false);
}

fn bench_cpu_warp_512_chromatic(c: &mut Criterion) {
    bench_warp(c, "cpu_warp_512_chromatic", true);
}

fn bench_distortion_mesh_build(c: &mut Criterion) {
    let fov = Fov::symmetric(90.0);
    c.bench_function("distortion_mesh_build_32", |b| {
        b.iter(|| DistortionMesh::build(black_box(fov), LensParams::default(), 32, 32));
    });
}

fn bench_scene_render_256(c: &mut Criterion) {
    let renderer = SceneRenderer::new(256, Fov::symmetric(90.0), 4).unwrap();
    let pose = HeadPose::new(Quat::from_rotation_y(0.3), ClockTime::ZERO);
    let load = RenderLoad::default();

    c.bench_function("scene_render_eye_256", |b| {
        b.iter(|| renderer.render_eye(atw::frame::Eye::Left, black_box(&pose), &load));
    });
}

criterion_group!(
    benches,
    bench_cpu_warp_512,
    bench_cpu_warp_512_chromatic,
    bench_distortion_mesh_build,
    bench_scene_render_256,
);
criterion_main!(benches);
