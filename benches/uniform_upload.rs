use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::{Mat4, Vec3, Vec4};

use deferred_renderer::backend::{GraphicsBackend, ShaderStage};
use deferred_renderer::renderer::shaders;
use deferred_renderer::resources::{GpuMesh, Material, Mesh};
use deferred_renderer::scene::{Camera, DirectionalLight, Light};
use deferred_renderer::shader::{CompiledShader, ShaderReflection, ShaderStageUnit};
use deferred_renderer::{DeferredRenderer, DummyBackend, Pipeline, RendererConfig, SceneFrame};

fn backend() -> Arc<dyn GraphicsBackend> {
    Arc::new(DummyBackend::new())
}

fn geometry_pipeline(backend: &Arc<dyn GraphicsBackend>) -> Pipeline {
    let source = shaders::assemble(&[shaders::GBUFFER_OUTPUT, shaders::GEOMETRY]);
    let unit = |stage: ShaderStage, entry: &str| {
        ShaderStageUnit::new(
            backend,
            CompiledShader::from_wgsl("geometry", stage, entry, source.clone()),
        )
        .unwrap()
    };
    Pipeline::new(
        "geometry",
        vec![
            unit(ShaderStage::Vertex, "vs_main"),
            unit(ShaderStage::Fragment, "fs_main"),
        ],
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Reflection
// ---------------------------------------------------------------------------

fn bench_reflect_geometry(c: &mut Criterion) {
    let shader = CompiledShader::from_wgsl(
        "geometry",
        ShaderStage::Fragment,
        "fs_main",
        shaders::assemble(&[shaders::GBUFFER_OUTPUT, shaders::GEOMETRY]),
    );
    c.bench_function("reflect_geometry_fragment", |b| {
        b.iter(|| black_box(ShaderReflection::reflect(&shader).unwrap()));
    });
}

// ---------------------------------------------------------------------------
// Uniform writes
// ---------------------------------------------------------------------------

fn bench_update_and_upload(c: &mut Criterion) {
    let backend = backend();
    let mut pipeline = geometry_pipeline(&backend);
    let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));

    c.bench_function("uniform_update_upload_per_drawable", |b| {
        b.iter(|| {
            pipeline.update_uniform("model", world).unwrap();
            pipeline
                .update_uniform("normal_matrix", world.inverse().transpose())
                .unwrap();
            pipeline
                .update_uniform("albedo_factor", Vec4::new(0.8, 0.2, 0.2, 1.0))
                .unwrap();
            pipeline.upload_updated_uniforms().unwrap();
        });
    });
}

fn bench_unknown_uniform(c: &mut Criterion) {
    let backend = backend();
    let mut pipeline = geometry_pipeline(&backend);
    c.bench_function("uniform_try_update_unknown", |b| {
        b.iter(|| black_box(pipeline.try_update_uniform("not_declared", 1.0f32)));
    });
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

fn bench_dummy_frame(c: &mut Criterion) {
    let dummy = Arc::new(DummyBackend::new());
    let backend: Arc<dyn GraphicsBackend> = dummy.clone();
    let mut renderer = DeferredRenderer::new(
        Arc::clone(&backend),
        RendererConfig::default().with_size(320, 180),
    )
    .unwrap();

    let mut scene = SceneFrame::new().with_camera(Camera::new(Vec3::new(0.0, 5.0, 12.0), Vec3::ZERO));
    let cube = Arc::new(GpuMesh::upload(&backend, &Mesh::cube()).unwrap());
    let material = Arc::new(Material::gold());
    for i in 0..64 {
        let offset = Vec3::new((i % 8) as f32 * 1.5 - 6.0, 0.0, (i / 8) as f32 * 1.5 - 6.0);
        scene.add_drawable(
            Mat4::from_translation(offset),
            Arc::clone(&cube),
            Arc::clone(&material),
        );
    }
    let sun = DirectionalLight {
        shadow_resolution: Some(512),
        ..Default::default()
    };
    scene.add_light(Light::directional(1, &sun));

    c.bench_function("dummy_frame_64_drawables", |b| {
        b.iter(|| {
            black_box(renderer.render_frame(Some(&scene)).unwrap());
            dummy.clear_commands();
        });
    });
}

criterion_group!(
    benches,
    bench_reflect_geometry,
    bench_update_and_upload,
    bench_unknown_uniform,
    bench_dummy_frame,
);
criterion_main!(benches);
