//! Benchmarks for rendering, rigidity and fitting steps.

use criterion::{criterion_group, criterion_main, Criterion};
use meshfit::prelude::*;
use meshfit::render::Background;
use nalgebra::{Matrix3, Point3, Vector3};

fn depth_fitter(subdivisions: usize, resolution: usize) -> MeshDepthFitter {
    let sphere = icosphere(subdivisions).unwrap();
    let mut fitter = MeshDepthFitter::new(
        sphere.vertices().to_vec(),
        sphere.faces().to_vec(),
        Vector3::zeros(),
        Vector3::new(0.05, 0.0, 0.0),
        FitterConfig::for_depth(),
    )
    .unwrap();
    fitter.set_max_depth(10.0).unwrap();
    fitter
        .set_image(&Image::filled(resolution, resolution, 1, 3.0), None, None)
        .unwrap();
    fitter
}

fn bench_rigidity(c: &mut Criterion) {
    let sphere = icosphere(4).unwrap();
    let energy = LaplacianRigidEnergy::new(&sphere, sphere.vertices(), 2000.0).unwrap();
    let moved: Vec<Point3<f64>> = sphere
        .vertices()
        .iter()
        .map(|p| p + Vector3::new(0.01 * p.y, 0.0, -0.02 * p.x))
        .collect();

    c.bench_function("rigidity_eval_icosphere_4", |b| {
        b.iter(|| energy.eval(&moved).unwrap().energy)
    });
}

fn bench_render(c: &mut Criterion) {
    let mut sphere = icosphere(3).unwrap();
    let colors = vec![Vector3::new(0.8, 0.6, 0.4); sphere.nb_vertices()];
    sphere.set_vertices_colors(colors).unwrap();
    let flip = Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0);
    let camera = Camera::look_from(&Point3::new(0.0, 0.0, 4.0), &flip, 200.0, (128, 128), None).unwrap();
    let scene = Scene3D::new()
        .with_light(LightConfig::new(Vector3::new(0.0, 0.0, -1.0), 0.4))
        .with_background(Background::Constant(vec![0.0, 0.0, 0.0]));

    c.bench_function("render_rgb_128", |b| b.iter(|| scene.render(&camera, &sphere).unwrap()));

    let rendering = scene.render(&camera, &sphere).unwrap();
    let grad = Image::filled(128, 128, 3, 0.1);
    c.bench_function("backward_rgb_128", |b| {
        b.iter(|| scene.backward(&rendering, &grad).unwrap())
    });
}

fn bench_step(c: &mut Criterion) {
    c.bench_function("depth_step_icosphere_3_64", |b| {
        let mut fitter = depth_fitter(3, 64);
        b.iter(|| fitter.step().unwrap().energy)
    });

    c.bench_function("depth_step_icosphere_3_64_sequential", |b| {
        let sphere = icosphere(3).unwrap();
        let mut fitter = MeshDepthFitter::new(
            sphere.vertices().to_vec(),
            sphere.faces().to_vec(),
            Vector3::zeros(),
            Vector3::zeros(),
            FitterConfig::for_depth().sequential(),
        )
        .unwrap();
        fitter.set_max_depth(10.0).unwrap();
        fitter
            .set_image(&Image::filled(64, 64, 1, 3.0), None, None)
            .unwrap();
        b.iter(|| fitter.step().unwrap().energy)
    });
}

criterion_group!(benches, bench_rigidity, bench_render, bench_step);
criterion_main!(benches);
