//! Shader reflection.
//!
//! Reflection is plain data so it can be produced by `naga` (WGSL or SPIR-V
//! blobs) or written by hand for stages naga has no front end for.

use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use naga::{AddressSpace, ArraySize, Binding, Module, ScalarKind, TypeInner, VectorSize};

use super::layout::{BufferLayout, LayoutType, MemberLayout};
use super::CompiledShader;
use crate::backend::{BindingSlot, ShaderCode, ShaderStage, VertexFormat};
use crate::error::{RenderError, RenderResult};

/// One vertex input read by a vertex entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputElement {
    pub name: String,
    pub location: u32,
    pub format: VertexFormat,
}

/// Kind of a non-buffer resource binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    DepthTexture,
    StorageTexture,
    Sampler,
    ComparisonSampler,
}

impl ResourceKind {
    pub fn is_sampler(self) -> bool {
        matches!(self, ResourceKind::Sampler | ResourceKind::ComparisonSampler)
    }
}

/// A named texture or sampler slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSlot {
    pub name: String,
    pub slot: BindingSlot,
    pub kind: ResourceKind,
}

/// Everything the uniform layer needs to know about one shader entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    /// Vertex inputs ordered by location (empty for other stages).
    pub input_layout: Vec<InputElement>,
    pub constant_buffers: Vec<BufferLayout>,
    pub resources: Vec<ResourceSlot>,
}

impl ShaderReflection {
    /// Reflect the entry point of a compiled shader.
    pub fn reflect(shader: &CompiledShader) -> RenderResult<Self> {
        let naga_stage = match shader.stage() {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
            other => {
                return Err(RenderError::Reflection(format!(
                    "{}: {} shaders must be reflected by hand",
                    shader.label(),
                    other
                )))
            }
        };

        let module = parse(shader)?;
        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| RenderError::Reflection(format!("{}: {}", shader.label(), e)))?;

        let index = module
            .entry_points
            .iter()
            .position(|ep| ep.name == shader.entry_point() && ep.stage == naga_stage)
            .ok_or_else(|| {
                RenderError::Reflection(format!(
                    "{}: no {} entry point named '{}'",
                    shader.label(),
                    shader.stage(),
                    shader.entry_point()
                ))
            })?;

        let mut reflection = reflect_globals(&module, &info, index)?;
        if naga_stage == naga::ShaderStage::Vertex {
            reflection.input_layout = reflect_inputs(&module, index)?;
        }
        log::debug!(
            "Reflected {} ({}): {} inputs, {} constant buffers, {} resources",
            shader.label(),
            shader.entry_point(),
            reflection.input_layout.len(),
            reflection.constant_buffers.len(),
            reflection.resources.len()
        );
        Ok(reflection)
    }

    pub fn with_constant_buffer(mut self, layout: BufferLayout) -> Self {
        self.constant_buffers.push(layout);
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, slot: BindingSlot, kind: ResourceKind) -> Self {
        self.resources.push(ResourceSlot {
            name: name.into(),
            slot,
            kind,
        });
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, location: u32, format: VertexFormat) -> Self {
        self.input_layout.push(InputElement {
            name: name.into(),
            location,
            format,
        });
        self
    }

    /// Every binding slot the entry point reads, buffers included.
    pub fn binding_slots(&self) -> Vec<BindingSlot> {
        let mut slots: Vec<BindingSlot> = self
            .constant_buffers
            .iter()
            .map(|cb| cb.slot)
            .chain(self.resources.iter().map(|r| r.slot))
            .collect();
        slots.sort();
        slots.dedup();
        slots
    }

    pub fn input_locations(&self) -> Vec<u32> {
        self.input_layout.iter().map(|e| e.location).collect()
    }
}

fn parse(shader: &CompiledShader) -> RenderResult<Module> {
    match shader.code() {
        ShaderCode::Wgsl(source) => naga::front::wgsl::parse_str(source).map_err(|e| {
            RenderError::Reflection(format!("{}: {}", shader.label(), e.emit_to_string(source)))
        }),
        ShaderCode::SpirV(words) => {
            let options = naga::front::spv::Options::default();
            naga::front::spv::parse_u8_slice(bytemuck::cast_slice(words), &options)
                .map_err(|e| RenderError::Reflection(format!("{}: {}", shader.label(), e)))
        }
    }
}

fn reflect_globals(module: &Module, info: &ModuleInfo, entry: usize) -> RenderResult<ShaderReflection> {
    let usage = info.get_entry_point(entry);
    let mut reflection = ShaderReflection::default();

    for (handle, var) in module.global_variables.iter() {
        if usage[handle].is_empty() {
            continue;
        }
        let Some(binding) = &var.binding else {
            continue;
        };
        let slot = BindingSlot::new(binding.group, binding.binding);
        let name = var
            .name
            .clone()
            .unwrap_or_else(|| format!("binding_{}_{}", binding.group, binding.binding));

        match var.space {
            AddressSpace::Uniform => {
                reflection
                    .constant_buffers
                    .push(buffer_layout(module, name, slot, var.ty)?);
            }
            AddressSpace::Handle => {
                let kind = match &module.types[var.ty].inner {
                    TypeInner::Image { class, .. } => match class {
                        naga::ImageClass::Depth { .. } => ResourceKind::DepthTexture,
                        naga::ImageClass::Storage { .. } => ResourceKind::StorageTexture,
                        naga::ImageClass::Sampled { .. } => ResourceKind::Texture,
                    },
                    TypeInner::Sampler { comparison: true } => ResourceKind::ComparisonSampler,
                    TypeInner::Sampler { comparison: false } => ResourceKind::Sampler,
                    other => {
                        return Err(RenderError::Reflection(format!(
                            "resource '{}' has unsupported type {:?}",
                            name, other
                        )))
                    }
                };
                reflection.resources.push(ResourceSlot { name, slot, kind });
            }
            other => log::warn!("Ignoring global '{}' in {:?} address space", name, other),
        }
    }
    Ok(reflection)
}

/// A uniform global whose type is a struct contributes its members as
/// top-level variables; any other type becomes a single variable named after
/// the global.
fn buffer_layout(
    module: &Module,
    name: String,
    slot: BindingSlot,
    ty: naga::Handle<naga::Type>,
) -> RenderResult<BufferLayout> {
    match layout_type(module, ty)? {
        LayoutType::Struct { members, size } => Ok(BufferLayout {
            name,
            slot,
            size,
            members,
        }),
        other => Ok(BufferLayout {
            size: other.size(),
            members: vec![MemberLayout::new(name.clone(), 0, other)],
            name,
            slot,
        }),
    }
}

fn layout_type(module: &Module, ty: naga::Handle<naga::Type>) -> RenderResult<LayoutType> {
    let inner = &module.types[ty].inner;
    match inner {
        TypeInner::Struct { members, span } => {
            let members = members
                .iter()
                .enumerate()
                .map(|(i, member)| {
                    Ok(MemberLayout::new(
                        member.name.clone().unwrap_or_else(|| format!("member{}", i)),
                        member.offset,
                        layout_type(module, member.ty)?,
                    ))
                })
                .collect::<RenderResult<Vec<_>>>()?;
            Ok(LayoutType::Struct {
                members,
                size: *span,
            })
        }
        TypeInner::Array {
            base,
            size: ArraySize::Constant(count),
            stride,
        } => {
            let element = layout_type(module, *base)?;
            let array = LayoutType::array(element, count.get());
            if let LayoutType::Array { element, .. } = &array {
                let padded = super::layout::array_stride(element.size());
                if padded != *stride {
                    log::warn!(
                        "Array stride {} differs from padded element size {}",
                        stride,
                        padded
                    );
                }
            }
            Ok(array)
        }
        TypeInner::Array { .. } => Err(RenderError::Reflection(
            "runtime-sized arrays cannot live in a constant buffer".to_string(),
        )),
        other => Ok(LayoutType::leaf(other.size(module.to_ctx()))),
    }
}

fn reflect_inputs(module: &Module, entry: usize) -> RenderResult<Vec<InputElement>> {
    let function = &module.entry_points[entry].function;
    let mut inputs = Vec::new();

    for (i, argument) in function.arguments.iter().enumerate() {
        let name = argument.name.clone().unwrap_or_else(|| format!("input{}", i));
        match &argument.binding {
            Some(Binding::Location { location, .. }) => {
                inputs.push(input_element(module, name, *location, argument.ty)?);
            }
            Some(Binding::BuiltIn(_)) => {}
            None => {
                if let TypeInner::Struct { members, .. } = &module.types[argument.ty].inner {
                    for member in members {
                        if let Some(Binding::Location { location, .. }) = member.binding {
                            let member_name = member
                                .name
                                .clone()
                                .unwrap_or_else(|| format!("{}{}", name, location));
                            inputs.push(input_element(module, member_name, location, member.ty)?);
                        }
                    }
                }
            }
        }
    }
    inputs.sort_by_key(|e| e.location);
    Ok(inputs)
}

fn input_element(
    module: &Module,
    name: String,
    location: u32,
    ty: naga::Handle<naga::Type>,
) -> RenderResult<InputElement> {
    let (components, scalar) = match &module.types[ty].inner {
        TypeInner::Scalar(scalar) => (1, *scalar),
        TypeInner::Vector { size, scalar } => {
            let components = match size {
                VectorSize::Bi => 2,
                VectorSize::Tri => 3,
                VectorSize::Quad => 4,
            };
            (components, *scalar)
        }
        other => {
            return Err(RenderError::Reflection(format!(
                "vertex input '{}' has unsupported type {:?}",
                name, other
            )))
        }
    };
    if scalar.width != 4 {
        return Err(RenderError::Reflection(format!(
            "vertex input '{}' uses {}-byte components",
            name, scalar.width
        )));
    }
    let format = match (scalar.kind, components) {
        (ScalarKind::Float, 1) => VertexFormat::Float32,
        (ScalarKind::Float, 2) => VertexFormat::Float32x2,
        (ScalarKind::Float, 3) => VertexFormat::Float32x3,
        (ScalarKind::Float, _) => VertexFormat::Float32x4,
        (ScalarKind::Uint, 1) => VertexFormat::Uint32,
        (ScalarKind::Uint, 2) => VertexFormat::Uint32x2,
        (ScalarKind::Uint, 3) => VertexFormat::Uint32x3,
        (ScalarKind::Uint, _) => VertexFormat::Uint32x4,
        (ScalarKind::Sint, 1) => VertexFormat::Sint32,
        (ScalarKind::Sint, 2) => VertexFormat::Sint32x2,
        (ScalarKind::Sint, 3) => VertexFormat::Sint32x3,
        (ScalarKind::Sint, _) => VertexFormat::Sint32x4,
        (kind, _) => {
            return Err(RenderError::Reflection(format!(
                "vertex input '{}' has unsupported scalar kind {:?}",
                name, kind
            )))
        }
    };
    Ok(InputElement {
        name,
        location,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADER: &str = r#"
struct Light {
    position: vec3<f32>,
    radius: f32,
    color: vec4<f32>,
}

struct SceneUniforms {
    view_proj: mat4x4<f32>,
    lights: array<Light, 2>,
    light_count: u32,
}

@group(0) @binding(0) var<uniform> scene: SceneUniforms;
@group(0) @binding(1) var<uniform> tint: vec4<f32>;
@group(1) @binding(0) var albedo_map: texture_2d<f32>;
@group(1) @binding(1) var albedo_sampler: sampler;
@group(1) @binding(2) var shadow_map: texture_depth_2d;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(1) id: u32,
}

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput, @builtin(vertex_index) index: u32) -> VertexOutput {
    var out: VertexOutput;
    out.clip = scene.view_proj * vec4<f32>(input.position, f32(input.id + index));
    out.uv = input.uv;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let depth = textureLoad(shadow_map, vec2<i32>(0, 0), 0);
    return textureSample(albedo_map, albedo_sampler, input.uv) * tint * depth;
}
"#;

    fn reflect(stage: ShaderStage, entry: &str) -> ShaderReflection {
        let shader = CompiledShader::from_wgsl("test", stage, entry, SHADER);
        ShaderReflection::reflect(&shader).unwrap()
    }

    #[test]
    fn vertex_inputs_sorted_by_location() {
        let reflection = reflect(ShaderStage::Vertex, "vs_main");
        let formats: Vec<(u32, VertexFormat)> = reflection
            .input_layout
            .iter()
            .map(|e| (e.location, e.format))
            .collect();
        assert_eq!(
            formats,
            vec![
                (0, VertexFormat::Float32x3),
                (1, VertexFormat::Uint32),
                (2, VertexFormat::Float32x2),
            ]
        );
    }

    #[test]
    fn globals_filtered_per_entry_point() {
        let vertex = reflect(ShaderStage::Vertex, "vs_main");
        assert_eq!(vertex.constant_buffers.len(), 1);
        assert_eq!(vertex.constant_buffers[0].name, "scene");
        assert!(vertex.resources.is_empty());

        let fragment = reflect(ShaderStage::Fragment, "fs_main");
        assert!(fragment.input_layout.is_empty());
        assert_eq!(fragment.constant_buffers.len(), 1);
        assert_eq!(fragment.constant_buffers[0].name, "tint");
        assert_eq!(fragment.resources.len(), 3);
    }

    #[test]
    fn struct_buffer_layout_matches_declaration() {
        let vertex = reflect(ShaderStage::Vertex, "vs_main");
        let scene = &vertex.constant_buffers[0];
        assert_eq!(scene.size, 144);
        assert_eq!(scene.flattened_extent(), scene.size);

        let flat = scene.flatten();
        let offset = |name: &str| flat.iter().find(|v| v.name == name).unwrap().offset;
        assert_eq!(offset("view_proj"), 0);
        assert_eq!(offset("lights[0].position"), 64);
        assert_eq!(offset("lights[0].radius"), 76);
        assert_eq!(offset("lights[1].color"), 112);
        assert_eq!(offset("light_count"), 128);
    }

    #[test]
    fn resource_kinds() {
        let fragment = reflect(ShaderStage::Fragment, "fs_main");
        let kind = |name: &str| {
            fragment
                .resources
                .iter()
                .find(|r| r.name == name)
                .unwrap()
                .kind
        };
        assert_eq!(kind("albedo_map"), ResourceKind::Texture);
        assert_eq!(kind("albedo_sampler"), ResourceKind::Sampler);
        assert_eq!(kind("shadow_map"), ResourceKind::DepthTexture);
        assert_eq!(
            fragment.binding_slots(),
            vec![
                BindingSlot::new(0, 1),
                BindingSlot::new(1, 0),
                BindingSlot::new(1, 1),
                BindingSlot::new(1, 2),
            ]
        );
    }

    const SPIRV_SOURCE: &str = r#"
struct Light {
    position: vec3<f32>,
    radius: f32,
}

struct SceneUniforms {
    view_proj: mat4x4<f32>,
    lights: array<Light, 2>,
}

@group(0) @binding(0) var<uniform> scene: SceneUniforms;
@group(1) @binding(0) var albedo_map: texture_2d<f32>;
@group(1) @binding(1) var albedo_sampler: sampler;

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>, @location(2) id: u32) -> VertexOutput {
    var out: VertexOutput;
    out.clip = scene.view_proj * vec4<f32>(position + scene.lights[id].position, 1.0);
    out.uv = uv * scene.lights[1].radius;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(albedo_map, albedo_sampler, input.uv);
}
"#;

    fn compile_spirv(stage: ShaderStage, entry: &str) -> CompiledShader {
        let module = naga::front::wgsl::parse_str(SPIRV_SOURCE).unwrap();
        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .unwrap();
        let options = naga::back::spv::Options {
            flags: naga::back::spv::WriterFlags::DEBUG,
            ..Default::default()
        };
        let words = naga::back::spv::write_vec(&module, &info, &options, None).unwrap();
        CompiledShader::from_spirv("spirv", stage, entry, bytemuck::cast_slice(&words)).unwrap()
    }

    /// Names can change through a SPIR-V round trip (uniform blocks gain a
    /// wrapper struct), so only slots, formats, sizes and offsets are compared.
    #[test]
    fn spirv_blob_reflects_like_wgsl() {
        for (stage, entry) in [
            (ShaderStage::Vertex, "vs_main"),
            (ShaderStage::Fragment, "fs_main"),
        ] {
            let wgsl = ShaderReflection::reflect(&CompiledShader::from_wgsl(
                "wgsl",
                stage,
                entry,
                SPIRV_SOURCE,
            ))
            .unwrap();
            let spirv = ShaderReflection::reflect(&compile_spirv(stage, entry)).unwrap();

            let inputs = |r: &ShaderReflection| -> Vec<(u32, VertexFormat)> {
                r.input_layout.iter().map(|e| (e.location, e.format)).collect()
            };
            assert_eq!(inputs(&spirv), inputs(&wgsl));

            let buffers = |r: &ShaderReflection| -> Vec<(BindingSlot, u32, Vec<u32>)> {
                r.constant_buffers
                    .iter()
                    .map(|cb| {
                        let mut offsets: Vec<u32> = cb
                            .flatten()
                            .iter()
                            .filter(|v| v.is_leaf)
                            .map(|v| v.offset)
                            .collect();
                        offsets.sort();
                        (cb.slot, cb.size, offsets)
                    })
                    .collect()
            };
            assert_eq!(buffers(&spirv), buffers(&wgsl));
            assert!(spirv.constant_buffers.iter().all(|cb| cb.is_consistent()));

            let resources = |r: &ShaderReflection| -> Vec<(BindingSlot, ResourceKind)> {
                let mut slots: Vec<_> = r.resources.iter().map(|r| (r.slot, r.kind)).collect();
                slots.sort_by_key(|(slot, _)| *slot);
                slots
            };
            assert_eq!(resources(&spirv), resources(&wgsl));
        }

        let vertex =
            ShaderReflection::reflect(&compile_spirv(ShaderStage::Vertex, "vs_main")).unwrap();
        assert_eq!(vertex.input_locations(), vec![0, 1, 2]);
        assert_eq!(vertex.constant_buffers[0].size, 96);
        let fragment =
            ShaderReflection::reflect(&compile_spirv(ShaderStage::Fragment, "fs_main")).unwrap();
        assert_eq!(
            fragment.binding_slots(),
            vec![BindingSlot::new(1, 0), BindingSlot::new(1, 1)]
        );
    }

    #[test]
    fn missing_entry_point_is_an_error() {
        let shader = CompiledShader::from_wgsl("test", ShaderStage::Vertex, "fs_main", SHADER);
        assert!(matches!(
            ShaderReflection::reflect(&shader),
            Err(RenderError::Reflection(_))
        ));
    }

    #[test]
    fn hull_stage_needs_manual_reflection() {
        let shader = CompiledShader::from_wgsl("hull", ShaderStage::Hull, "main", SHADER);
        assert!(ShaderReflection::reflect(&shader).is_err());
    }
}
