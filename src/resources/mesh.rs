//! Mesh data and procedural generators

use std::f32::consts::{PI, TAU};
use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};

use super::Buffer;
use crate::backend::{
    BufferDescriptor, BufferUsage, GraphicsBackend, IndexFormat, Vertex, VertexBufferLayout,
};
use crate::error::{RenderError, RenderResult};

/// CPU-side indexed triangle mesh.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Append a counter-clockwise quad as two triangles.
    fn push_quad(&mut self, corners: [Vec3; 4], normal: Vec3, tangent: Vec4) {
        let base = self.vertices.len() as u32;
        let uvs = [
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 0.0),
        ];
        for (position, uv) in corners.into_iter().zip(uvs) {
            self.vertices.push(Vertex {
                position,
                normal,
                uv,
                tangent,
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Unit cube centered at the origin.
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");
        for normal in [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z] {
            // Face basis: `right` runs along +U, `up` along -V.
            let up = if normal.y.abs() > 0.5 { -Vec3::Z * normal.y } else { Vec3::Y };
            let right = up.cross(normal);
            let center = normal * 0.5;
            let corners = [
                center - right * 0.5 - up * 0.5,
                center + right * 0.5 - up * 0.5,
                center + right * 0.5 + up * 0.5,
                center - right * 0.5 + up * 0.5,
            ];
            mesh.push_quad(corners, normal, right.extend(1.0));
        }
        mesh
    }

    /// UV sphere of radius 0.5.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);

        for ring in 0..=rings {
            let phi = ring as f32 * PI / rings as f32;
            for segment in 0..=segments {
                let theta = segment as f32 * TAU / segments as f32;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                mesh.vertices.push(Vertex {
                    position: normal * 0.5,
                    normal,
                    uv: Vec2::new(
                        segment as f32 / segments as f32,
                        ring as f32 / rings as f32,
                    ),
                    tangent: Vec4::new(-theta.sin(), 0.0, theta.cos(), 1.0),
                });
            }
        }

        let stride = segments + 1;
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * stride + segment;
                let b = a + stride;
                mesh.indices
                    .extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
            }
        }
        mesh
    }

    /// Subdivided plane on XZ facing +Y.
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");
        let cells = subdivisions.max(1);

        for z in 0..=cells {
            for x in 0..=cells {
                let uv = Vec2::new(x as f32 / cells as f32, z as f32 / cells as f32);
                mesh.vertices.push(Vertex {
                    position: Vec3::new((uv.x - 0.5) * width, 0.0, (uv.y - 0.5) * depth),
                    normal: Vec3::Y,
                    uv,
                    tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
                });
            }
        }

        let stride = cells + 1;
        for z in 0..cells {
            for x in 0..cells {
                let a = z * stride + x;
                let b = a + stride;
                mesh.indices
                    .extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
            }
        }
        mesh
    }

    /// Full-screen clip-space quad, used by tests that draw without a camera.
    pub fn screen_quad() -> Self {
        let mut mesh = Mesh::new("screen_quad");
        mesh.push_quad(
            [
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
            ],
            Vec3::Z,
            Vec4::new(1.0, 0.0, 0.0, 1.0),
        );
        mesh
    }
}

/// A mesh uploaded to vertex and index buffers.
pub struct GpuMesh {
    name: String,
    vertex_buffer: Buffer,
    index_buffer: Option<Buffer>,
    vertex_count: u32,
    index_count: u32,
    layout: VertexBufferLayout,
}

impl GpuMesh {
    pub fn upload(backend: &Arc<dyn GraphicsBackend>, mesh: &Mesh) -> RenderResult<Self> {
        if mesh.vertices.is_empty() {
            return Err(RenderError::InvalidParameter(format!(
                "mesh '{}' has no vertices",
                mesh.name
            )));
        }
        let vertex_buffer = Buffer::with_data(
            backend,
            BufferDescriptor::new(
                format!("{}/vertices", mesh.name),
                mesh.vertex_bytes().len() as u64,
                BufferUsage::VERTEX | BufferUsage::COPY_DST,
            ),
            mesh.vertex_bytes(),
        )?;
        let index_buffer = if mesh.indices.is_empty() {
            None
        } else {
            Some(Buffer::with_data(
                backend,
                BufferDescriptor::new(
                    format!("{}/indices", mesh.name),
                    mesh.index_bytes().len() as u64,
                    BufferUsage::INDEX | BufferUsage::COPY_DST,
                ),
                mesh.index_bytes(),
            )?)
        };
        log::debug!(
            "Uploaded mesh '{}' ({} vertices, {} triangles)",
            mesh.name,
            mesh.vertex_count(),
            mesh.triangle_count()
        );
        Ok(Self {
            name: mesh.name.clone(),
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertex_count() as u32,
            index_count: mesh.index_count() as u32,
            layout: Vertex::layout(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn layout(&self) -> &VertexBufferLayout {
        &self.layout
    }

    /// Bind the vertex buffer restricted to `locations` plus the index buffer.
    pub fn bind(&self, backend: &dyn GraphicsBackend, locations: &[u32]) {
        backend.set_vertex_buffer(
            0,
            self.vertex_buffer.handle(),
            &self.layout.restricted_to(locations),
        );
        if let Some(indices) = &self.index_buffer {
            backend.set_index_buffer(indices.handle(), IndexFormat::Uint32);
        }
    }

    pub fn draw(&self, backend: &dyn GraphicsBackend) -> RenderResult<()> {
        match &self.index_buffer {
            Some(_) => backend.draw_indexed(0..self.index_count, 0, 0..1)?,
            None => backend.draw(0..self.vertex_count, 0..1)?,
        }
        Ok(())
    }
}

impl std::fmt::Debug for GpuMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuMesh")
            .field("name", &self.name)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_wind_outward() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        for tri in cube.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.vertices[tri[i] as usize].position);
            let face_normal = (b - a).cross(c - a).normalize();
            let vertex_normal = cube.vertices[tri[0] as usize].normal;
            assert!(face_normal.dot(vertex_normal) > 0.99);
        }
    }

    #[test]
    fn generators_produce_valid_indices() {
        for mesh in [Mesh::sphere(8, 6), Mesh::plane(2.0, 2.0, 3), Mesh::screen_quad()] {
            assert_eq!(mesh.indices.len() % 3, 0);
            assert!(mesh
                .indices
                .iter()
                .all(|&i| (i as usize) < mesh.vertices.len()));
        }
        assert_eq!(Mesh::plane(1.0, 1.0, 3).vertex_count(), 16);
    }
}
