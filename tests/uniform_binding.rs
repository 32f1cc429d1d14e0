//! Uniform binding tests: reflection-driven constant buffers, named writes,
//! upload and readback.
//!
//! ```bash
//! cargo test --test uniform_binding
//! ```

mod common;

use rstest::rstest;

use common::{tint_pipeline, Backend};
use deferred_renderer::backend::ShaderStage;
use deferred_renderer::renderer::shaders;
use deferred_renderer::shader::{CompiledShader, ShaderReflection};
use deferred_renderer::RenderError;
use glam::{Mat4, Vec4};

fn le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

// ============================================================================
// Tint scenario
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn tint_upload_reads_back_marshalled_bytes(#[case] backend: Backend) {
    common::init_logging();
    let Some(backend) = backend.create() else {
        eprintln!("Backend not available, skipping");
        return;
    };
    let mut pipeline = tint_pipeline(&backend);

    let fragment = pipeline.unit(ShaderStage::Fragment).unwrap();
    let tint = fragment
        .constant_buffer("material")
        .and_then(|buffer| buffer.variable("tint"))
        .unwrap();
    assert_eq!((tint.offset, tint.size), (0, 16));
    assert!(!pipeline.unit(ShaderStage::Vertex).unwrap().has_variable("tint"));

    pipeline
        .update_uniform("tint", Vec4::new(1.0, 0.0, 0.0, 1.0))
        .unwrap();
    pipeline.upload_updated_uniforms().unwrap();

    let bytes = pipeline
        .unit(ShaderStage::Fragment)
        .unwrap()
        .constant_buffer("material")
        .unwrap()
        .buffer()
        .read()
        .unwrap();
    assert_eq!(&bytes[..16], le_bytes(&[1.0, 0.0, 0.0, 1.0]).as_slice());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn second_upload_replaces_contents(#[case] backend: Backend) {
    let Some(backend) = backend.create() else {
        return;
    };
    let mut pipeline = tint_pipeline(&backend);
    pipeline.update_uniform("tint", Vec4::ONE).unwrap();
    pipeline.upload_updated_uniforms().unwrap();
    pipeline
        .update_uniform("tint", Vec4::new(0.25, 0.5, 0.75, 1.0))
        .unwrap();
    pipeline.upload_updated_uniforms().unwrap();

    let buffer = pipeline
        .unit(ShaderStage::Fragment)
        .unwrap()
        .constant_buffer("material")
        .unwrap();
    assert!(!buffer.is_dirty());
    assert_eq!(
        &buffer.buffer().read().unwrap()[..16],
        le_bytes(&[0.25, 0.5, 0.75, 1.0]).as_slice()
    );
}

#[test]
fn unknown_and_oversize_writes_fail() {
    let backend = Backend::Dummy.create().unwrap();
    let mut pipeline = tint_pipeline(&backend);

    assert!(matches!(
        pipeline.update_uniform("shade", Vec4::ONE),
        Err(RenderError::UnknownUniform { .. })
    ));
    assert!(!pipeline.try_update_uniform("shade", Vec4::ONE));

    assert!(matches!(
        pipeline.update_uniform("tint", Mat4::IDENTITY),
        Err(RenderError::UniformTooLarge { .. })
    ));
    assert!(!pipeline.try_update_uniform("tint", Mat4::IDENTITY));
    assert!(!pipeline
        .unit(ShaderStage::Fragment)
        .unwrap()
        .constant_buffer("material")
        .unwrap()
        .is_dirty());

    // A smaller value fits the slot.
    assert!(pipeline.try_update_uniform("tint", 0.5f32));
}

// ============================================================================
// Layout flattening
// ============================================================================

#[rstest]
#[case::geometry_vertex(ShaderStage::Vertex, "vs_main", &[shaders::GBUFFER_OUTPUT, shaders::GEOMETRY])]
#[case::geometry_fragment(ShaderStage::Fragment, "fs_main", &[shaders::GBUFFER_OUTPUT, shaders::GEOMETRY])]
#[case::point_light(ShaderStage::Fragment, "fs_main", &[shaders::LIGHTING_COMMON, shaders::POINT_LIGHT])]
#[case::directional_light(ShaderStage::Fragment, "fs_main", &[shaders::LIGHTING_COMMON, shaders::DIRECTIONAL_LIGHT])]
#[case::post(ShaderStage::Fragment, "fs_main", &[shaders::POST])]
fn reflected_layouts_flatten_to_declared_size(
    #[case] stage: ShaderStage,
    #[case] entry_point: &str,
    #[case] parts: &[&str],
) {
    let shader = CompiledShader::from_wgsl("layout", stage, entry_point, shaders::assemble(parts));
    let reflection = ShaderReflection::reflect(&shader).unwrap();
    assert!(!reflection.constant_buffers.is_empty());
    for layout in &reflection.constant_buffers {
        assert!(layout.is_consistent(), "{} overlaps", layout.name);
        assert_eq!(layout.flattened_extent(), layout.size, "{}", layout.name);
        assert_eq!(layout.size % 16, 0, "{}", layout.name);
    }
}
