//! Resource view tests: which view kinds a texture gets and how its slices
//! and mips are addressed.

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::Backend;
use deferred_renderer::backend::{TextureDescriptor, TextureFormat, TextureUsage, TextureViewDimension};
use deferred_renderer::resources::{DepthStencil, RenderTarget, ShaderResource, Texture};
use deferred_renderer::RenderError;

// ============================================================================
// View kinds per usage
// ============================================================================

/// Expected (render target, depth stencil, shader resource) collections.
#[rstest]
#[case::sampled_color(TextureFormat::Rgba8Unorm, TextureUsage::TEXTURE_BINDING, (false, false, true))]
#[case::color_target(TextureFormat::Rgba16Float, TextureUsage::RENDER_ATTACHMENT, (true, false, false))]
#[case::sampled_color_target(
    TextureFormat::Rgba8Unorm,
    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
    (true, false, true)
)]
#[case::depth(TextureFormat::Depth32Float, TextureUsage::RENDER_ATTACHMENT, (false, true, false))]
#[case::sampled_depth(
    TextureFormat::Depth32Float,
    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
    (false, true, true)
)]
fn usage_decides_view_kinds(
    #[case] format: TextureFormat,
    #[case] usage: TextureUsage,
    #[case] expected: (bool, bool, bool),
    #[values(Backend::Dummy, Backend::Wgpu)] backend: Backend,
) {
    let Some(backend) = backend.create() else {
        return;
    };
    let texture = Texture::new(&backend, TextureDescriptor::new_2d(8, 8, format, usage)).unwrap();
    assert_eq!(
        (
            texture.has_views::<RenderTarget>(),
            texture.has_views::<DepthStencil>(),
            texture.has_views::<ShaderResource>(),
        ),
        expected
    );
    assert_eq!(texture.view::<RenderTarget>().is_ok(), expected.0);
    assert_eq!(texture.view::<DepthStencil>().is_ok(), expected.1);
    assert_eq!(texture.view::<ShaderResource>().is_ok(), expected.2);
}

#[test]
fn missing_view_kind_names_texture() {
    let backend = Backend::Dummy.create().unwrap();
    let texture = Texture::new(
        &backend,
        TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::TEXTURE_BINDING)
            .with_label("albedo"),
    )
    .unwrap();
    match texture.view::<RenderTarget>() {
        Err(RenderError::ViewNotGenerated { texture, .. }) => assert_eq!(texture, "albedo"),
        other => panic!("expected ViewNotGenerated, got {:?}", other.map(|v| v.handle())),
    }
}

// ============================================================================
// Slices and mips
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn slices_address_single_layers(#[case] backend: Backend) {
    let Some(backend) = backend.create() else {
        return;
    };
    let texture = Texture::new(
        &backend,
        TextureDescriptor::new_2d(
            32,
            32,
            TextureFormat::Depth32Float,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        )
        .with_array_layers(4),
    )
    .unwrap();

    let collection = texture.views::<DepthStencil>().unwrap();
    assert_eq!(collection.slice_count(), 4);
    for slice in 0..4 {
        let view = texture.view_slice::<DepthStencil>(slice).unwrap();
        assert_eq!(view.base_array_layer(), slice);
        assert_eq!(view.array_layer_count(), 1);
        assert_eq!(view.dimension(), TextureViewDimension::D2);
    }
    let sampled = texture.view::<ShaderResource>().unwrap();
    assert_eq!(sampled.dimension(), TextureViewDimension::D2Array);
    assert_eq!(sampled.array_layer_count(), 4);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn mip_views_halve_per_level(#[case] backend: Backend) {
    let Some(backend) = backend.create() else {
        return;
    };
    let texture = Texture::new(
        &backend,
        TextureDescriptor::new_2d(
            64,
            32,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        )
        .with_mip_levels(4),
    )
    .unwrap();

    let sizes: Vec<(u32, u32)> = (0..4)
        .map(|mip| texture.view_mip::<RenderTarget>(0, mip).unwrap().size())
        .collect();
    assert_eq!(sizes, vec![(64, 32), (32, 16), (16, 8), (8, 4)]);

    // The sampled general view spans the whole chain, attachments one level.
    assert_eq!(texture.view::<ShaderResource>().unwrap().mip_level_count(), 4);
    assert_eq!(texture.view::<RenderTarget>().unwrap().mip_level_count(), 1);
    assert!(matches!(
        texture.view_mip::<ShaderResource>(0, 4),
        Err(RenderError::ViewIndexOutOfRange { mip: 4, .. })
    ));
}

#[test]
fn degenerate_texture_reuses_general_view() {
    let backend = Backend::Dummy.create().unwrap();
    let texture = Texture::new(
        &backend,
        TextureDescriptor::new_2d(1, 1, TextureFormat::Rgba8Unorm, TextureUsage::TEXTURE_BINDING),
    )
    .unwrap();
    let general = texture.view::<ShaderResource>().unwrap();
    assert!(Arc::ptr_eq(general, texture.view_slice::<ShaderResource>(0).unwrap()));
    assert!(Arc::ptr_eq(general, texture.view_mip::<ShaderResource>(0, 0).unwrap()));
}

#[test]
fn array_flag_keeps_single_layer_as_array() {
    let backend = Backend::Dummy.create().unwrap();
    let texture = Texture::new(
        &backend,
        TextureDescriptor::new_2d(4, 4, TextureFormat::Depth32Float, TextureUsage::TEXTURE_BINDING)
            .as_array(),
    )
    .unwrap();
    let general = texture.view::<ShaderResource>().unwrap();
    assert_eq!(general.dimension(), TextureViewDimension::D2Array);
    let slice = texture.view_slice::<ShaderResource>(0).unwrap();
    assert!(!Arc::ptr_eq(general, slice));
    assert_eq!(slice.dimension(), TextureViewDimension::D2);
}
