//! Uniform values and dirty-tracked constant buffers.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use glam::{IVec4, Mat3, Mat4, UVec4, Vec2, Vec3, Vec4};

use super::layout::BufferLayout;
use crate::backend::{BindingSlot, BufferDescriptor, BufferUsage, GraphicsBackend};
use crate::error::{RenderError, RenderResult};
use crate::resources::Buffer;

/// A value pending upload to a named uniform slot.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    IVec4(IVec4),
    UVec4(UVec4),
    /// Marshalled as three 16-byte columns.
    Mat3(Mat3),
    Mat4(Mat4),
    /// Arbitrary plain-old-data payload.
    Bytes(Vec<u8>),
}

impl UniformValue {
    pub fn from_pod<T: Pod>(value: &T) -> Self {
        UniformValue::Bytes(bytemuck::bytes_of(value).to_vec())
    }

    pub fn from_slice<T: Pod>(values: &[T]) -> Self {
        UniformValue::Bytes(bytemuck::cast_slice(values).to_vec())
    }

    /// Size of the marshalled representation.
    pub fn byte_size(&self) -> usize {
        match self {
            UniformValue::Float(_) | UniformValue::Int(_) | UniformValue::UInt(_) => 4,
            UniformValue::Vec2(_) => 8,
            UniformValue::Vec3(_) => 12,
            UniformValue::Vec4(_) | UniformValue::IVec4(_) | UniformValue::UVec4(_) => 16,
            UniformValue::Mat3(_) => 48,
            UniformValue::Mat4(_) => 64,
            UniformValue::Bytes(bytes) => bytes.len(),
        }
    }

    /// Write the marshalled bytes to the front of `dst`.
    ///
    /// `dst` must hold at least [`byte_size`](Self::byte_size) bytes.
    pub fn write_to(&self, dst: &mut [u8]) {
        match self {
            UniformValue::Float(v) => dst[..4].copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Int(v) => dst[..4].copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::UInt(v) => dst[..4].copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec2(v) => dst[..8].copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec3(v) => dst[..12].copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec4(v) => dst[..16].copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::IVec4(v) => dst[..16].copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::UVec4(v) => dst[..16].copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Mat3(m) => {
                for (i, column) in [m.x_axis, m.y_axis, m.z_axis].iter().enumerate() {
                    let padded = column.extend(0.0);
                    dst[i * 16..(i + 1) * 16].copy_from_slice(bytemuck::bytes_of(&padded));
                }
            }
            UniformValue::Mat4(m) => dst[..64].copy_from_slice(bytemuck::bytes_of(m)),
            UniformValue::Bytes(bytes) => dst[..bytes.len()].copy_from_slice(bytes),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; self.byte_size()];
        self.write_to(&mut bytes);
        bytes
    }
}

macro_rules! impl_from_uniform {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for UniformValue {
                fn from(value: $ty) -> Self {
                    UniformValue::$variant(value)
                }
            }
        )*
    };
}

impl_from_uniform!(
    f32 => Float,
    i32 => Int,
    u32 => UInt,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    IVec4 => IVec4,
    UVec4 => UVec4,
    Mat3 => Mat3,
    Mat4 => Mat4,
    Vec<u8> => Bytes,
);

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::UInt(value as u32)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(value: [f32; 4]) -> Self {
        UniformValue::Vec4(Vec4::from_array(value))
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(value: [f32; 3]) -> Self {
        UniformValue::Vec3(Vec3::from_array(value))
    }
}

/// A named slot inside a constant buffer.
#[derive(Debug, Clone)]
pub struct UniformVariable {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    value: Option<UniformValue>,
    written_at: u64,
}

impl UniformVariable {
    pub fn value(&self) -> Option<&UniformValue> {
        self.value.as_ref()
    }
}

/// A GPU constant buffer whose variables are addressed by flattened name.
///
/// Writes only touch CPU state and mark the buffer dirty; [`upload`]
/// marshals every written variable into a full buffer image and replaces the
/// GPU contents in one write.
///
/// [`upload`]: ConstantBuffer::upload
pub struct ConstantBuffer {
    layout: BufferLayout,
    variables: Vec<UniformVariable>,
    lookup: HashMap<String, usize>,
    dirty: bool,
    write_counter: u64,
    image: Vec<u8>,
    buffer: Buffer,
}

impl ConstantBuffer {
    pub fn new(backend: &Arc<dyn GraphicsBackend>, layout: BufferLayout) -> RenderResult<Self> {
        let variables: Vec<UniformVariable> = layout
            .flatten()
            .into_iter()
            .map(|flat| UniformVariable {
                name: flat.name,
                offset: flat.offset,
                size: flat.size,
                value: None,
                written_at: 0,
            })
            .collect();
        let lookup = variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.name.clone(), i))
            .collect();

        let size = layout.size.max(16).div_ceil(16) * 16;
        let buffer = Buffer::new(
            backend,
            BufferDescriptor::new(
                layout.name.clone(),
                size as u64,
                BufferUsage::UNIFORM | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
            ),
        )?;

        Ok(Self {
            layout,
            variables,
            lookup,
            dirty: false,
            write_counter: 0,
            image: vec![0; size as usize],
            buffer,
        })
    }

    pub fn name(&self) -> &str {
        &self.layout.name
    }

    pub fn slot(&self) -> BindingSlot {
        self.layout.slot
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    pub fn variable(&self, name: &str) -> Option<&UniformVariable> {
        self.lookup.get(name).map(|&i| &self.variables[i])
    }

    pub fn variables(&self) -> impl Iterator<Item = &UniformVariable> {
        self.variables.iter()
    }

    /// Check that `value` could be stored under `name`, returning its index.
    pub fn check(&self, name: &str, value: &UniformValue) -> RenderResult<usize> {
        let index = *self
            .lookup
            .get(name)
            .ok_or_else(|| RenderError::UnknownUniform {
                name: name.to_string(),
                owner: format!("constant buffer '{}'", self.layout.name),
            })?;
        let slot_size = self.variables[index].size as usize;
        if value.byte_size() > slot_size {
            return Err(RenderError::UniformTooLarge {
                name: name.to_string(),
                size: value.byte_size(),
                slot_size,
            });
        }
        Ok(index)
    }

    /// Store a value for later upload.
    pub fn set(&mut self, name: &str, value: UniformValue) -> RenderResult<()> {
        let index = self.check(name, &value)?;
        let variable = &mut self.variables[index];
        self.write_counter += 1;
        variable.value = Some(value);
        variable.written_at = self.write_counter;
        self.dirty = true;
        Ok(())
    }

    /// Re-marshal and upload the whole buffer if anything changed.
    ///
    /// Returns whether an upload happened. Overlapping variables (an array and
    /// one of its elements, say) are applied in write order.
    pub fn upload(&mut self) -> RenderResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.image.fill(0);
        let mut written: Vec<&UniformVariable> =
            self.variables.iter().filter(|v| v.value.is_some()).collect();
        written.sort_by_key(|v| v.written_at);
        for variable in written {
            if let Some(value) = &variable.value {
                let start = variable.offset as usize;
                value.write_to(&mut self.image[start..start + value.byte_size()]);
            }
        }
        self.buffer.write(0, &self.image)?;
        self.dirty = false;
        log::trace!(
            "Uploaded constant buffer '{}' ({} bytes)",
            self.layout.name,
            self.image.len()
        );
        Ok(true)
    }
}

impl std::fmt::Debug for ConstantBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantBuffer")
            .field("name", &self.layout.name)
            .field("slot", &self.layout.slot)
            .field("size", &self.image.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::shader::layout::LayoutType;

    fn buffer() -> ConstantBuffer {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(DummyBackend::new());
        let layout = BufferLayout::new("Material", BindingSlot::new(0, 0), 96)
            .with_member("tint", 0, LayoutType::leaf(16))
            .with_member("normal_matrix", 16, LayoutType::leaf(48))
            .with_member("weights", 64, LayoutType::array(LayoutType::leaf(4), 2));
        ConstantBuffer::new(&backend, layout).unwrap()
    }

    #[test]
    fn mat3_marshals_padded_columns() {
        let bytes = UniformValue::from(Mat3::IDENTITY).to_bytes();
        assert_eq!(bytes.len(), 48);
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
        assert_eq!(
            floats,
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn writes_mark_dirty_until_upload() {
        let mut cb = buffer();
        assert!(!cb.is_dirty());
        cb.set("tint", Vec4::ONE.into()).unwrap();
        assert!(cb.is_dirty());
        assert!(cb.upload().unwrap());
        assert!(!cb.is_dirty());
        assert!(!cb.upload().unwrap());
    }

    #[test]
    fn rejects_unknown_and_oversize() {
        let mut cb = buffer();
        assert!(matches!(
            cb.set("missing", 1.0f32.into()),
            Err(RenderError::UnknownUniform { .. })
        ));
        assert!(matches!(
            cb.set("tint", Mat4::IDENTITY.into()),
            Err(RenderError::UniformTooLarge {
                size: 64,
                slot_size: 16,
                ..
            })
        ));
        assert!(!cb.is_dirty());
    }

    #[test]
    fn upload_places_values_at_offsets() {
        let mut cb = buffer();
        cb.set("weights[1]", 2.5f32.into()).unwrap();
        cb.set("tint", [0.5, 0.25, 0.0, 1.0].into()).unwrap();
        cb.upload().unwrap();

        let bytes = cb.buffer().read().unwrap();
        assert_eq!(bytes.len(), 96);
        let tint: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[0..16]);
        assert_eq!(tint, vec![0.5, 0.25, 0.0, 1.0]);
        assert_eq!(&bytes[80..84], &2.5f32.to_le_bytes());
        assert_eq!(&bytes[64..68], &[0; 4]);
    }

    #[test]
    fn later_writes_win_over_overlapping_aggregates() {
        let mut cb = buffer();
        cb.set("weights[0]", 1.0f32.into()).unwrap();
        cb.set("weights", UniformValue::from_slice(&[7.0f32; 8])).unwrap();
        cb.upload().unwrap();
        let bytes = cb.buffer().read().unwrap();
        assert_eq!(&bytes[64..68], &7.0f32.to_le_bytes());

        cb.set("weights[0]", 3.0f32.into()).unwrap();
        cb.upload().unwrap();
        let bytes = cb.buffer().read().unwrap();
        assert_eq!(&bytes[64..68], &3.0f32.to_le_bytes());
        assert_eq!(&bytes[68..72], &7.0f32.to_le_bytes());
    }
}
