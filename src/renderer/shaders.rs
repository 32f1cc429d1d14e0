//! Built-in WGSL shaders of the deferred renderer.
//!
//! Every program is assembled from shared fragments at pipeline creation, so
//! each light kind gets its own module with only the bindings it reads.

/// Attachment layout written by the geometry and particle passes.
pub const GBUFFER_OUTPUT: &str = r#"
struct GBufferOutput {
    // w is 1 wherever geometry was written.
    @location(0) position: vec4<f32>,
    @location(1) albedo: vec4<f32>,
    @location(2) normal: vec4<f32>,
    @location(3) metallic: f32,
    @location(4) roughness: f32,
    @location(5) ao: f32,
}

struct FrameUniforms {
    view_proj: mat4x4<f32>,
    camera_position: vec3<f32>,
}

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
"#;

pub const GEOMETRY: &str = r#"
struct ObjectUniforms {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
}

struct MaterialUniforms {
    albedo_factor: vec4<f32>,
    metallic_factor: f32,
    roughness_factor: f32,
    ao_factor: f32,
    alpha_cutoff: f32,
}

@group(1) @binding(0) var<uniform> object: ObjectUniforms;
@group(2) @binding(0) var<uniform> material: MaterialUniforms;
@group(2) @binding(1) var albedo_map: texture_2d<f32>;
@group(2) @binding(2) var normal_map: texture_2d<f32>;
@group(2) @binding(3) var metallic_map: texture_2d<f32>;
@group(2) @binding(4) var roughness_map: texture_2d<f32>;
@group(2) @binding(5) var ao_map: texture_2d<f32>;
@group(2) @binding(6) var opacity_map: texture_2d<f32>;
@group(2) @binding(7) var material_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct SurfaceVarying {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) world_tangent: vec4<f32>,
}

@vertex
fn vs_main(attributes: VertexInput) -> SurfaceVarying {
    var result: SurfaceVarying;
    let world = object.model * vec4<f32>(attributes.position, 1.0);
    result.clip_position = frame.view_proj * world;
    result.world_position = world.xyz;
    result.world_normal = (object.normal_matrix * vec4<f32>(attributes.normal, 0.0)).xyz;
    result.uv = attributes.uv;
    let tangent = (object.model * vec4<f32>(attributes.tangent.xyz, 0.0)).xyz;
    result.world_tangent = vec4<f32>(tangent, attributes.tangent.w);
    return result;
}

@fragment
fn fs_main(surface: SurfaceVarying) -> GBufferOutput {
    let albedo_sample = textureSample(albedo_map, material_sampler, surface.uv);
    let normal_sample = textureSample(normal_map, material_sampler, surface.uv).xyz;
    let metallic_sample = textureSample(metallic_map, material_sampler, surface.uv).r;
    let roughness_sample = textureSample(roughness_map, material_sampler, surface.uv).r;
    let ao_sample = textureSample(ao_map, material_sampler, surface.uv).r;
    let opacity_sample = textureSample(opacity_map, material_sampler, surface.uv).r;

    let albedo = albedo_sample * material.albedo_factor;
    if albedo.a * opacity_sample < material.alpha_cutoff {
        discard;
    }

    let n = normalize(surface.world_normal);
    let t = normalize(surface.world_tangent.xyz - n * dot(n, surface.world_tangent.xyz));
    let b = cross(n, t) * surface.world_tangent.w;
    let mapped_normal = normalize(mat3x3<f32>(t, b, n) * (normal_sample * 2.0 - 1.0));

    var output: GBufferOutput;
    output.position = vec4<f32>(surface.world_position, 1.0);
    output.albedo = vec4<f32>(albedo.rgb, 1.0);
    output.normal = vec4<f32>(mapped_normal, 0.0);
    output.metallic = metallic_sample * material.metallic_factor;
    output.roughness = roughness_sample * material.roughness_factor;
    output.ao = ao_sample * material.ao_factor;
    return output;
}
"#;

pub const PARTICLES: &str = r#"
struct ParticleInput {
    @location(0) position: vec3<f32>,
    @location(1) size: f32,
    @location(2) color: vec4<f32>,
}

struct ParticleVarying {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) color: vec4<f32>,
    @location(2) size: f32,
}

@vertex
fn vs_main(particle: ParticleInput) -> ParticleVarying {
    var result: ParticleVarying;
    result.clip_position = frame.view_proj * vec4<f32>(particle.position, 1.0);
    result.world_position = particle.position;
    result.color = particle.color;
    result.size = particle.size;
    return result;
}

@fragment
fn fs_main(particle: ParticleVarying) -> GBufferOutput {
    if particle.size <= 0.0 || particle.color.a <= 0.0 {
        discard;
    }
    var output: GBufferOutput;
    output.position = vec4<f32>(particle.world_position, 1.0);
    output.albedo = vec4<f32>(particle.color.rgb, 1.0);
    output.normal = vec4<f32>(normalize(frame.camera_position - particle.world_position), 0.0);
    output.metallic = 0.0;
    output.roughness = 1.0;
    output.ao = 1.0;
    return output;
}
"#;

pub const SHADOW: &str = r#"
struct ShadowUniforms {
    light_view_proj: mat4x4<f32>,
}

struct ObjectUniforms {
    model: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> shadow: ShadowUniforms;
@group(1) @binding(0) var<uniform> object: ObjectUniforms;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return shadow.light_view_proj * object.model * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() {
}
"#;

/// G-buffer reads, the full-screen triangle and the BRDF shared by every
/// light kind.
pub const LIGHTING_COMMON: &str = r#"
const PI: f32 = 3.14159265;

@group(0) @binding(0) var gbuffer_position: texture_2d<f32>;
@group(0) @binding(1) var gbuffer_albedo: texture_2d<f32>;
@group(0) @binding(2) var gbuffer_normal: texture_2d<f32>;
@group(0) @binding(3) var gbuffer_metallic: texture_2d<f32>;
@group(0) @binding(4) var gbuffer_roughness: texture_2d<f32>;
@group(0) @binding(5) var gbuffer_ao: texture_2d<f32>;

@group(2) @binding(0) var shadow_map: texture_depth_2d_array;
@group(2) @binding(1) var shadow_sampler: sampler_comparison;

struct Surface {
    position: vec3<f32>,
    albedo: vec3<f32>,
    normal: vec3<f32>,
    metallic: f32,
    roughness: f32,
    ao: f32,
    // False where the position target kept its zero clear.
    covered: bool,
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32((index << 1u) & 2u);
    let y = f32(index & 2u);
    return vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
}

fn load_surface(frag: vec4<f32>) -> Surface {
    let coord = vec2<i32>(frag.xy);
    var surface: Surface;
    let position = textureLoad(gbuffer_position, coord, 0);
    surface.position = position.xyz;
    surface.covered = position.w > 0.5;
    surface.albedo = textureLoad(gbuffer_albedo, coord, 0).rgb;
    surface.normal = textureLoad(gbuffer_normal, coord, 0).xyz;
    surface.metallic = textureLoad(gbuffer_metallic, coord, 0).r;
    surface.roughness = max(textureLoad(gbuffer_roughness, coord, 0).r, 0.04);
    surface.ao = textureLoad(gbuffer_ao, coord, 0).r;
    return surface;
}

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / (PI * d * d);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    let gv = n_dot_v / (n_dot_v * (1.0 - k) + k);
    let gl = n_dot_l / (n_dot_l * (1.0 - k) + k);
    return gv * gl;
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (vec3<f32>(1.0) - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn shade(surface: Surface, view_dir: vec3<f32>, light_dir: vec3<f32>, radiance: vec3<f32>) -> vec3<f32> {
    let n = normalize(surface.normal);
    let h = normalize(view_dir + light_dir);
    let n_dot_l = max(dot(n, light_dir), 0.0);
    let n_dot_v = max(dot(n, view_dir), 0.0001);
    let n_dot_h = max(dot(n, h), 0.0);
    let f0 = mix(vec3<f32>(0.04), surface.albedo, surface.metallic);
    let fresnel = fresnel_schlick(max(dot(h, view_dir), 0.0), f0);
    let specular = distribution_ggx(n_dot_h, surface.roughness)
        * geometry_smith(n_dot_v, n_dot_l, surface.roughness)
        * fresnel / (4.0 * n_dot_v * n_dot_l + 0.0001);
    let diffuse = (vec3<f32>(1.0) - fresnel) * (1.0 - surface.metallic) * surface.albedo / PI;
    return (diffuse + specular) * radiance * n_dot_l;
}

fn sample_shadow(light_view_proj: mat4x4<f32>, layer: i32, position: vec3<f32>, bias: f32) -> f32 {
    let clip = light_view_proj * vec4<f32>(position, 1.0);
    let ndc = clip.xyz / clip.w;
    let uv = ndc.xy * vec2<f32>(0.5, -0.5) + vec2<f32>(0.5, 0.5);
    if any(uv < vec2<f32>(0.0, 0.0)) || any(uv > vec2<f32>(1.0, 1.0)) || ndc.z > 1.0 {
        return 1.0;
    }
    return textureSampleCompareLevel(shadow_map, shadow_sampler, uv, layer, ndc.z - bias);
}
"#;

pub const POINT_LIGHT: &str = r#"
struct PointLightUniforms {
    face_view_proj: array<mat4x4<f32>, 6>,
    light_position: vec3<f32>,
    light_radius: f32,
    light_color: vec3<f32>,
    light_intensity: f32,
    camera_position: vec3<f32>,
    shadows_enabled: u32,
}

@group(1) @binding(0) var<uniform> light: PointLightUniforms;

fn cube_face(direction: vec3<f32>) -> i32 {
    let a = abs(direction);
    if a.x >= a.y && a.x >= a.z {
        return select(1i, 0i, direction.x > 0.0);
    }
    if a.y >= a.z {
        return select(3i, 2i, direction.y > 0.0);
    }
    return select(5i, 4i, direction.z > 0.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let surface = load_surface(frag);
    if !surface.covered {
        return vec4<f32>(0.0, 0.0, 0.0, 0.0);
    }
    let to_light = light.light_position - surface.position;
    let dist = length(to_light);
    if dist > light.light_radius {
        return vec4<f32>(0.0, 0.0, 0.0, 0.0);
    }
    let ratio = dist / light.light_radius;
    let window = clamp(1.0 - ratio * ratio * ratio * ratio, 0.0, 1.0);
    let falloff = window * window / (dist * dist + 1.0);

    var visibility = 1.0;
    if light.shadows_enabled != 0u {
        let face = cube_face(-to_light);
        visibility = sample_shadow(light.face_view_proj[face], face, surface.position, 0.005);
    }

    let view_dir = normalize(light.camera_position - surface.position);
    let radiance = light.light_color * light.light_intensity * falloff;
    let color = shade(surface, view_dir, to_light / dist, radiance) * visibility;
    return vec4<f32>(color, 1.0);
}
"#;

pub const SPOT_LIGHT: &str = r#"
struct SpotLightUniforms {
    light_view_proj: mat4x4<f32>,
    light_position: vec3<f32>,
    light_radius: f32,
    light_direction: vec3<f32>,
    cos_inner: f32,
    light_color: vec3<f32>,
    light_intensity: f32,
    camera_position: vec3<f32>,
    cos_outer: f32,
    shadows_enabled: u32,
}

@group(1) @binding(0) var<uniform> light: SpotLightUniforms;

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let surface = load_surface(frag);
    if !surface.covered {
        return vec4<f32>(0.0, 0.0, 0.0, 0.0);
    }
    let to_light = light.light_position - surface.position;
    let dist = length(to_light);
    if dist > light.light_radius {
        return vec4<f32>(0.0, 0.0, 0.0, 0.0);
    }
    let light_dir = to_light / dist;
    let cone = smoothstep(light.cos_outer, light.cos_inner, dot(-light_dir, light.light_direction));
    let ratio = dist / light.light_radius;
    let window = clamp(1.0 - ratio * ratio * ratio * ratio, 0.0, 1.0);
    let falloff = cone * window * window / (dist * dist + 1.0);

    var visibility = 1.0;
    if light.shadows_enabled != 0u {
        visibility = sample_shadow(light.light_view_proj, 0i, surface.position, 0.002);
    }

    let view_dir = normalize(light.camera_position - surface.position);
    let radiance = light.light_color * light.light_intensity * falloff;
    return vec4<f32>(shade(surface, view_dir, light_dir, radiance) * visibility, 1.0);
}
"#;

pub const DIRECTIONAL_LIGHT: &str = r#"
struct DirectionalLightUniforms {
    cascade_view_proj: array<mat4x4<f32>, 4>,
    view: mat4x4<f32>,
    cascade_splits: vec4<f32>,
    light_direction: vec3<f32>,
    light_intensity: f32,
    light_color: vec3<f32>,
    cascade_count: u32,
    camera_position: vec3<f32>,
    shadows_enabled: u32,
}

@group(1) @binding(0) var<uniform> light: DirectionalLightUniforms;

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let surface = load_surface(frag);
    if !surface.covered {
        return vec4<f32>(0.0, 0.0, 0.0, 0.0);
    }
    let light_dir = -normalize(light.light_direction);

    var visibility = 1.0;
    if light.shadows_enabled != 0u {
        let view_depth = -(light.view * vec4<f32>(surface.position, 1.0)).z;
        var cascade = 0u;
        for (var i = 0u; i + 1u < light.cascade_count; i = i + 1u) {
            if view_depth > light.cascade_splits[i] {
                cascade = i + 1u;
            }
        }
        visibility = sample_shadow(
            light.cascade_view_proj[cascade],
            i32(cascade),
            surface.position,
            0.001,
        );
    }

    let view_dir = normalize(light.camera_position - surface.position);
    let radiance = light.light_color * light.light_intensity;
    return vec4<f32>(shade(surface, view_dir, light_dir, radiance) * visibility, 1.0);
}
"#;

pub const AMBIENT_LIGHT: &str = r#"
struct AmbientLightUniforms {
    light_color: vec3<f32>,
    light_intensity: f32,
}

@group(1) @binding(0) var<uniform> light: AmbientLightUniforms;

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let surface = load_surface(frag);
    if !surface.covered {
        return vec4<f32>(0.0, 0.0, 0.0, 0.0);
    }
    let ambient = surface.albedo * surface.ao * light.light_color * light.light_intensity;
    return vec4<f32>(ambient, 1.0);
}
"#;

pub const POST: &str = r#"
struct PostUniforms {
    exposure: f32,
    gamma: f32,
    tonemap_operator: u32,
    ambient_floor: f32,
}

@group(0) @binding(0) var<uniform> post: PostUniforms;
@group(1) @binding(0) var radiance_map: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(2) var gbuffer_ao: texture_2d<f32>;
@group(1) @binding(3) var post_sampler: sampler;

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32((index << 1u) & 2u);
    let y = f32(index & 2u);
    return vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
}

fn reinhard(color: vec3<f32>) -> vec3<f32> {
    return color / (color + vec3<f32>(1.0));
}

fn aces(color: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return clamp((color * (a * color + b)) / (color * (c * color + d) + e), vec3<f32>(0.0), vec3<f32>(1.0));
}

fn uncharted2_curve(x: vec3<f32>) -> vec3<f32> {
    let a = 0.15;
    let b = 0.50;
    let c = 0.10;
    let d = 0.20;
    let e = 0.02;
    let f = 0.30;
    return ((x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f)) - e / f;
}

fn uncharted2(color: vec3<f32>) -> vec3<f32> {
    let white = uncharted2_curve(vec3<f32>(11.2));
    return uncharted2_curve(color * 2.0) / white;
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let uv = frag.xy / vec2<f32>(textureDimensions(radiance_map));
    let hdr = textureSample(radiance_map, post_sampler, uv).rgb;
    let albedo = textureSample(gbuffer_albedo, post_sampler, uv).rgb;
    let ao = textureSample(gbuffer_ao, post_sampler, uv).r;

    let color = max(hdr, albedo * ao * post.ambient_floor) * post.exposure;
    var mapped: vec3<f32>;
    switch post.tonemap_operator {
        case 0u: {
            mapped = reinhard(color);
        }
        case 1u: {
            mapped = aces(color);
        }
        case 2u: {
            mapped = uncharted2(color);
        }
        default: {
            mapped = clamp(color, vec3<f32>(0.0), vec3<f32>(1.0));
        }
    }
    return vec4<f32>(pow(max(mapped, vec3<f32>(0.0)), vec3<f32>(1.0 / post.gamma)), 1.0);
}
"#;

/// Source of one program: shared fragments followed by the body.
pub fn assemble(parts: &[&str]) -> String {
    parts.concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ShaderStage;
    use crate::shader::{CompiledShader, ResourceKind, ShaderReflection};

    fn reflect(source: &str, stage: ShaderStage, entry: &str) -> ShaderReflection {
        let shader = CompiledShader::from_wgsl("test", stage, entry, source);
        ShaderReflection::reflect(&shader).unwrap()
    }

    #[test]
    fn geometry_program_reflects() {
        let source = assemble(&[GBUFFER_OUTPUT, GEOMETRY]);
        let vertex = reflect(&source, ShaderStage::Vertex, "vs_main");
        assert_eq!(vertex.input_locations(), vec![0, 1, 2, 3]);
        let fragment = reflect(&source, ShaderStage::Fragment, "fs_main");
        assert_eq!(fragment.resources.len(), 7);
        assert!(fragment
            .constant_buffers
            .iter()
            .any(|cb| cb.name == "material"));
    }

    #[test]
    fn light_programs_reflect() {
        for body in [POINT_LIGHT, SPOT_LIGHT, DIRECTIONAL_LIGHT, AMBIENT_LIGHT] {
            let source = assemble(&[LIGHTING_COMMON, body]);
            let fragment = reflect(&source, ShaderStage::Fragment, "fs_main");
            let shadowed = fragment
                .resources
                .iter()
                .any(|r| r.kind == ResourceKind::ComparisonSampler);
            assert_eq!(shadowed, body != AMBIENT_LIGHT);
            let vertex = reflect(&source, ShaderStage::Vertex, "vs_fullscreen");
            assert!(vertex.input_layout.is_empty());
        }
    }

    #[test]
    fn shadow_and_post_programs_reflect() {
        let shadow = reflect(SHADOW, ShaderStage::Vertex, "vs_main");
        assert_eq!(shadow.input_locations(), vec![0]);
        assert!(reflect(SHADOW, ShaderStage::Fragment, "fs_main")
            .constant_buffers
            .is_empty());
        let post = reflect(POST, ShaderStage::Fragment, "fs_main");
        assert_eq!(post.resources.len(), 4);
        let particles = assemble(&[GBUFFER_OUTPUT, PARTICLES]);
        assert_eq!(
            reflect(&particles, ShaderStage::Vertex, "vs_main").input_locations(),
            vec![0, 1, 2]
        );
    }
}
