//! Constant buffer layout description and flattening.
//!
//! The layout is plain data: reflection front ends produce it, and the
//! uniform layer only ever walks it. Flattening turns nested members into
//! dotted/indexed paths (`light.color`, `cascades[2]`, `lights[1].position`)
//! with absolute byte offsets.

use crate::backend::BindingSlot;

/// Array element stride is rounded up to this many bytes.
pub const ARRAY_STRIDE_ALIGNMENT: u32 = 16;

/// Round an element size up to the array stride boundary.
pub fn array_stride(element_size: u32) -> u32 {
    element_size.div_ceil(ARRAY_STRIDE_ALIGNMENT) * ARRAY_STRIDE_ALIGNMENT
}

/// Type of a constant buffer member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutType {
    /// Scalar, vector or matrix occupying `size` bytes.
    Leaf { size: u32 },
    /// Struct with explicitly offset members.
    Struct { members: Vec<MemberLayout>, size: u32 },
    /// Fixed-size array.
    Array { element: Box<LayoutType>, count: u32 },
}

impl LayoutType {
    pub fn leaf(size: u32) -> Self {
        LayoutType::Leaf { size }
    }

    pub fn array(element: LayoutType, count: u32) -> Self {
        LayoutType::Array {
            element: Box::new(element),
            count,
        }
    }

    /// Byte size of the type, with arrays spanning `stride * count`.
    pub fn size(&self) -> u32 {
        match self {
            LayoutType::Leaf { size } | LayoutType::Struct { size, .. } => *size,
            LayoutType::Array { element, count } => array_stride(element.size()) * count,
        }
    }
}

/// A named member at a byte offset relative to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLayout {
    pub name: String,
    pub offset: u32,
    pub ty: LayoutType,
}

impl MemberLayout {
    pub fn new(name: impl Into<String>, offset: u32, ty: LayoutType) -> Self {
        Self {
            name: name.into(),
            offset,
            ty,
        }
    }
}

/// Layout of one constant buffer bound at `slot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    pub name: String,
    pub slot: BindingSlot,
    pub size: u32,
    pub members: Vec<MemberLayout>,
}

/// One addressable variable after flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatVariable {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    /// Scalars, vectors and matrices are leaves; structs and arrays are
    /// aggregates that may also be written as a whole.
    pub is_leaf: bool,
}

impl BufferLayout {
    pub fn new(name: impl Into<String>, slot: BindingSlot, size: u32) -> Self {
        Self {
            name: name.into(),
            slot,
            size,
            members: Vec::new(),
        }
    }

    pub fn with_member(mut self, name: impl Into<String>, offset: u32, ty: LayoutType) -> Self {
        self.members.push(MemberLayout::new(name, offset, ty));
        self
    }

    /// Flatten every member, aggregates before their children.
    pub fn flatten(&self) -> Vec<FlatVariable> {
        let mut out = Vec::new();
        for member in &self.members {
            flatten_into(&member.name, member.offset, &member.ty, &mut out);
        }
        out
    }

    /// Per-leaf extents: each leaf owns the bytes up to the next leaf (or the
    /// end of the buffer), so trailing padding counts towards the leaf before
    /// it. The extents of a well-formed layout add up to `size`.
    pub fn leaf_extents(&self) -> Vec<(String, u32)> {
        let mut leaves: Vec<FlatVariable> =
            self.flatten().into_iter().filter(|v| v.is_leaf).collect();
        leaves.sort_by_key(|v| v.offset);

        let mut extents = Vec::with_capacity(leaves.len());
        let first = leaves.first().map(|v| v.offset).unwrap_or(self.size);
        for (i, leaf) in leaves.iter().enumerate() {
            let end = leaves
                .get(i + 1)
                .map(|next| next.offset)
                .unwrap_or(self.size);
            let extent = end.saturating_sub(leaf.offset);
            let extent = if i == 0 { extent + first } else { extent };
            extents.push((leaf.name.clone(), extent));
        }
        extents
    }

    /// Total of [`leaf_extents`](Self::leaf_extents).
    pub fn flattened_extent(&self) -> u32 {
        self.leaf_extents().iter().map(|(_, extent)| extent).sum()
    }

    /// Whether no two leaves overlap and every leaf fits in the buffer.
    pub fn is_consistent(&self) -> bool {
        let mut leaves: Vec<FlatVariable> =
            self.flatten().into_iter().filter(|v| v.is_leaf).collect();
        leaves.sort_by_key(|v| v.offset);
        leaves.windows(2).all(|w| w[0].offset + w[0].size <= w[1].offset)
            && leaves.iter().all(|v| v.offset + v.size <= self.size)
    }
}

fn flatten_into(path: &str, offset: u32, ty: &LayoutType, out: &mut Vec<FlatVariable>) {
    match ty {
        LayoutType::Leaf { size } => out.push(FlatVariable {
            name: path.to_string(),
            offset,
            size: *size,
            is_leaf: true,
        }),
        LayoutType::Struct { members, size } => {
            out.push(FlatVariable {
                name: path.to_string(),
                offset,
                size: *size,
                is_leaf: false,
            });
            for member in members {
                let child = format!("{}.{}", path, member.name);
                flatten_into(&child, offset + member.offset, &member.ty, out);
            }
        }
        LayoutType::Array { element, count } => {
            out.push(FlatVariable {
                name: path.to_string(),
                offset,
                size: ty.size(),
                is_leaf: false,
            });
            let stride = array_stride(element.size());
            for i in 0..*count {
                let child = format!("{}[{}]", path, i);
                flatten_into(&child, offset + i * stride, element, out);
            }
        }
    }
}
