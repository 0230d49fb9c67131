//! GPU mesh types and draw-call submission

use std::sync::Arc;

/// Vertex format matching `VertexInput` in mesh.wgsl (32 bytes)
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedVertex {
    pub position: [f32; 3],
    pub bitangent_sign: f32,
    pub tex_coords: [f32; 2],
    pub normal: u32,   // Packed SNORM8x4
    pub tangent: u32,  // Packed SNORM8x4
}

impl PackedVertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32,
        2 => Float32x2,
        3 => Snorm8x4,
        4 => Snorm8x4,
    ];

    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coords: [f32; 2]) -> Self {
        Self {
            position,
            bitangent_sign: 1.0,
            tex_coords,
            normal: pack_snorm8x4(normal[0], normal[1], normal[2], 0.0),
            tangent: pack_snorm8x4(1.0, 0.0, 0.0, 1.0),
        }
    }

    /// Vertex buffer layout shared by the depth, shadow and main pipelines
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<PackedVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

fn pack_snorm8x4(x: f32, y: f32, z: f32, w: f32) -> u32 {
    let pack = |v: f32| (v.clamp(-1.0, 1.0) * 127.0).round() as i8 as u8 as u32;
    pack(x) | (pack(y) << 8) | (pack(z) << 16) | (pack(w) << 24)
}

/// GPU-resident mesh (owns wgpu vertex + index buffers)
#[derive(Clone)]
pub struct GpuMesh {
    pub vertex_buffer: Arc<wgpu::Buffer>,
    pub index_buffer: Arc<wgpu::Buffer>,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn new(device: &wgpu::Device, vertices: &[PackedVertex], indices: &[u32]) -> Self {
        use wgpu::util::DeviceExt;
        let vertex_buffer = Arc::new(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Vertex Buffer"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        }));
        let index_buffer = Arc::new(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Index Buffer"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        }));
        Self { vertex_buffer, index_buffer, index_count: indices.len() as u32 }
    }

    /// Axis-aligned box centered at `center`
    pub fn cuboid(device: &wgpu::Device, center: [f32; 3], half_extents: [f32; 3]) -> Self {
        let (vertices, indices) = cuboid_geometry(center, half_extents);
        Self::new(device, &vertices, &indices)
    }

    /// Cube centered at `center` with half-extent `half_size`
    pub fn cube(device: &wgpu::Device, center: [f32; 3], half_size: f32) -> Self {
        Self::cuboid(device, center, [half_size; 3])
    }

    /// Flat XZ plane centered at `center` with half-extent `half_extent`
    pub fn plane(device: &wgpu::Device, center: [f32; 3], half_extent: f32) -> Self {
        let [cx, cy, cz] = center;
        let h = half_extent;
        let n = [0.0f32, 1.0, 0.0];
        let vertices = [
            PackedVertex::new([cx-h,cy,cz+h], n, [0.0,0.0]),
            PackedVertex::new([cx+h,cy,cz+h], n, [1.0,0.0]),
            PackedVertex::new([cx+h,cy,cz-h], n, [1.0,1.0]),
            PackedVertex::new([cx-h,cy,cz-h], n, [0.0,1.0]),
        ];
        let indices = [0u32, 1, 2, 0, 2, 3];
        Self::new(device, &vertices, &indices)
    }
}

/// 24 vertices / 36 indices, counter-clockwise when viewed from outside
fn cuboid_geometry(center: [f32; 3], half_extents: [f32; 3]) -> (Vec<PackedVertex>, Vec<u32>) {
    let [cx, cy, cz] = center;
    let [hx, hy, hz] = half_extents;

    let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
        ([0.0, 0.0, 1.0], [[cx-hx,cy-hy,cz+hz],[cx+hx,cy-hy,cz+hz],[cx+hx,cy+hy,cz+hz],[cx-hx,cy+hy,cz+hz]]),
        ([0.0, 0.0,-1.0], [[cx+hx,cy-hy,cz-hz],[cx-hx,cy-hy,cz-hz],[cx-hx,cy+hy,cz-hz],[cx+hx,cy+hy,cz-hz]]),
        ([1.0, 0.0, 0.0], [[cx+hx,cy-hy,cz+hz],[cx+hx,cy-hy,cz-hz],[cx+hx,cy+hy,cz-hz],[cx+hx,cy+hy,cz+hz]]),
        ([-1.0,0.0, 0.0], [[cx-hx,cy-hy,cz-hz],[cx-hx,cy-hy,cz+hz],[cx-hx,cy+hy,cz+hz],[cx-hx,cy+hy,cz-hz]]),
        ([0.0, 1.0, 0.0], [[cx-hx,cy+hy,cz+hz],[cx+hx,cy+hy,cz+hz],[cx+hx,cy+hy,cz-hz],[cx-hx,cy+hy,cz-hz]]),
        ([0.0,-1.0, 0.0], [[cx-hx,cy-hy,cz-hz],[cx+hx,cy-hy,cz-hz],[cx+hx,cy-hy,cz+hz],[cx-hx,cy-hy,cz+hz]]),
    ];

    let uvs: [[f32; 2]; 4] = [[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,1.0]];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (face_idx, (normal, corners)) in faces.iter().enumerate() {
        let base = (face_idx * 4) as u32;
        for (i, &pos) in corners.iter().enumerate() {
            vertices.push(PackedVertex::new(pos, *normal, uvs[i]));
        }
        indices.extend_from_slice(&[base, base+1, base+2, base, base+2, base+3]);
    }

    (vertices, indices)
}

/// A single queued opaque draw call
#[derive(Clone)]
pub struct DrawCall {
    pub vertex_buffer: Arc<wgpu::Buffer>,
    pub index_buffer: Arc<wgpu::Buffer>,
    pub index_count: u32,
    pub albedo: [f32; 3],
}

impl DrawCall {
    pub fn new(mesh: &GpuMesh, albedo: [f32; 3]) -> Self {
        Self {
            vertex_buffer: mesh.vertex_buffer.clone(),
            index_buffer: mesh.index_buffer.clone(),
            index_count: mesh.index_count,
            albedo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_vertex_is_32_bytes() {
        assert_eq!(std::mem::size_of::<PackedVertex>(), 32);
    }

    #[test]
    fn snorm_packing_hits_extremes() {
        assert_eq!(pack_snorm8x4(1.0, -1.0, 0.0, 0.0), 0x0000_817F);
    }

    #[test]
    fn cuboid_faces_wind_outwards() {
        let (vertices, indices) = cuboid_geometry([1.0, 2.0, 3.0], [0.5, 1.0, 2.0]);
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);

        let center = glam::Vec3::new(1.0, 2.0, 3.0);
        for tri in indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]]
                .map(|i| glam::Vec3::from_array(vertices[i as usize].position));
            let normal = (b - a).cross(c - a);
            let outward = (a + b + c) / 3.0 - center;
            assert!(normal.dot(outward) > 0.0);
        }
    }
}
