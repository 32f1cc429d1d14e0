//! PBR materials for the geometry pass

use std::sync::Arc;

use glam::{Vec3, Vec4};

use super::Texture;

/// Texture slots a material can fill. Empty slots fall back to 1x1 defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialSlot {
    Albedo,
    Normal,
    Metallic,
    Roughness,
    AmbientOcclusion,
    Opacity,
}

impl MaterialSlot {
    pub const ALL: [MaterialSlot; 6] = [
        MaterialSlot::Albedo,
        MaterialSlot::Normal,
        MaterialSlot::Metallic,
        MaterialSlot::Roughness,
        MaterialSlot::AmbientOcclusion,
        MaterialSlot::Opacity,
    ];

    /// Shader resource name of the slot's texture.
    pub fn texture_name(self) -> &'static str {
        match self {
            MaterialSlot::Albedo => "albedo_map",
            MaterialSlot::Normal => "normal_map",
            MaterialSlot::Metallic => "metallic_map",
            MaterialSlot::Roughness => "roughness_map",
            MaterialSlot::AmbientOcclusion => "ao_map",
            MaterialSlot::Opacity => "opacity_map",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// PBR material: scalar factors multiplied with the slot textures.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub albedo: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub ambient_occlusion: f32,
    /// Fragments with opacity below this are discarded.
    pub alpha_cutoff: f32,
    textures: [Option<Arc<Texture>>; 6],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            albedo: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            ambient_occlusion: 1.0,
            alpha_cutoff: 0.5,
            textures: Default::default(),
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_albedo(mut self, color: Vec4) -> Self {
        self.albedo = color;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic.clamp(0.0, 1.0);
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    pub fn with_ambient_occlusion(mut self, ao: f32) -> Self {
        self.ambient_occlusion = ao.clamp(0.0, 1.0);
        self
    }

    pub fn with_alpha_cutoff(mut self, cutoff: f32) -> Self {
        self.alpha_cutoff = cutoff;
        self
    }

    pub fn with_texture(mut self, slot: MaterialSlot, texture: Arc<Texture>) -> Self {
        self.textures[slot.index()] = Some(texture);
        self
    }

    pub fn texture(&self, slot: MaterialSlot) -> Option<&Arc<Texture>> {
        self.textures[slot.index()].as_ref()
    }

    /// Uniform writes for the geometry pass, as (name, value) pairs.
    pub fn uniforms(&self) -> [(&'static str, crate::shader::UniformValue); 5] {
        [
            ("albedo_factor", self.albedo.into()),
            ("metallic_factor", self.metallic.into()),
            ("roughness_factor", self.roughness.into()),
            ("ao_factor", self.ambient_occlusion.into()),
            ("alpha_cutoff", self.alpha_cutoff.into()),
        ]
    }

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic")
            .with_albedo(color.extend(1.0))
            .with_roughness(0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::new("metal")
            .with_albedo(color.extend(1.0))
            .with_metallic(1.0)
            .with_roughness(roughness)
    }

    pub fn gold() -> Self {
        Self::metal(Vec3::new(1.0, 0.766, 0.336), 0.3)
    }

    pub fn copper() -> Self {
        Self::metal(Vec3::new(0.955, 0.637, 0.538), 0.4)
    }

    pub fn rubber(color: Vec3) -> Self {
        Self::new("rubber")
            .with_albedo(color.extend(1.0))
            .with_roughness(0.9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factors_are_clamped() {
        let material = Material::new("m").with_metallic(2.0).with_roughness(-1.0);
        assert_eq!(material.metallic, 1.0);
        assert_eq!(material.roughness, 0.0);
        assert!(MaterialSlot::ALL
            .iter()
            .all(|&slot| material.texture(slot).is_none()));
    }

    #[test]
    fn slot_names_are_unique() {
        let mut names: Vec<_> = MaterialSlot::ALL.iter().map(|s| s.texture_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MaterialSlot::ALL.len());
    }
}
