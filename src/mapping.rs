// mapping.rs — 等距柱状投影到球面的两种绘制方式
//
// Tessellated: 每个分块在其角度范围内细分为 S x S 的球面小面片，顶点直接给出世界坐标。
// Analytic:    每个分块画同一个铺满屏幕的四边形，片元阶段把视线方向换算成 (u, v)，
//              不在本块范围内的片元丢弃。
//
// 两者共用同一份输入：分块的归一化矩形 + 相机矩阵。

use crate::camera::Camera;
use crate::math::{sphere_point, sphere_uv, to_f32_cols, DMat4, DVec2, DVec3, OPENGL_TO_WGPU};
use crate::tiles::{TileRect, TiledImage};

/// Quads per axis for each tile patch.
pub const DEFAULT_SPHERE_SAMPLING: u32 = 30;

/// Inset beyond the near plane for the screen quad, so it is never clipped.
pub const QUAD_EPSILON: f64 = 1e-4;

/// Two triangles over the four screen-quad corners.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingStrategy {
    Tessellated,
    Analytic,
}

impl MappingStrategy {
    /// Chosen once at setup from the backend's capability.
    pub fn select(analytic_available: bool, force_tessellated: bool) -> Self {
        if analytic_available && !force_tessellated {
            MappingStrategy::Analytic
        } else {
            MappingStrategy::Tessellated
        }
    }

    /// The other strategy, or `Tessellated` when the analytic one is unavailable.
    pub fn toggled(self, analytic_available: bool) -> Self {
        match self {
            MappingStrategy::Analytic => MappingStrategy::Tessellated,
            MappingStrategy::Tessellated if analytic_available => MappingStrategy::Analytic,
            MappingStrategy::Tessellated => MappingStrategy::Tessellated,
        }
    }

    /// i18n key of the strategy name.
    pub fn label_key(self) -> &'static str {
        match self {
            MappingStrategy::Tessellated => "strategy.tessellated",
            MappingStrategy::Analytic => "strategy.analytic",
        }
    }
}

// ---------------------------------------------------------------------------
// Tessellated patches
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PatchVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
}

#[derive(Debug, Clone, Default)]
pub struct TilePatch {
    pub vertices: Vec<PatchVertex>,
    pub indices: Vec<u32>,
}

/// `a + (b - a) * i / n`, returning `a` and `b` exactly at the ends so
/// neighbouring tiles produce identical boundary vertices.
fn lerp_exact(a: f64, b: f64, i: u32, n: u32) -> f64 {
    match i {
        0 => a,
        _ if i == n => b,
        _ => a + (b - a) * i as f64 / n as f64,
    }
}

/// Unit-sphere mesh covering exactly the angular extent of one tile.
///
/// Texture coordinates are tile-local, `[0,1]^2`.
pub fn tessellate_tile(rect: &TileRect, sampling: u32) -> TilePatch {
    let s = sampling.max(1);
    let row = s + 1;
    let mut vertices = Vec::with_capacity((row * row) as usize);
    let mut indices = Vec::with_capacity((s * s * 6) as usize);

    for j in 0..=s {
        let v = lerp_exact(rect.ymin, rect.ymax, j, s);
        let t = j as f32 / s as f32;
        for i in 0..=s {
            let u = lerp_exact(rect.xmin, rect.xmax, i, s);
            let p = sphere_point(u, v);
            vertices.push(PatchVertex {
                position: p.as_vec3().to_array(),
                tex_coords: [i as f32 / s as f32, t],
            });
        }
    }

    for j in 0..s {
        for i in 0..s {
            let a = j * row + i;
            let b = a + row;
            indices.extend_from_slice(&[a, b, a + 1, b, b + 1, a + 1]);
        }
    }

    TilePatch { vertices, indices }
}

// ---------------------------------------------------------------------------
// Analytic per-fragment mapping
// ---------------------------------------------------------------------------

/// World-space corners of the screen-filling quad just beyond the near plane.
///
/// Order: (max.x, min.y), (max.x, max.y), (min.x, max.y), (min.x, min.y).
/// The frustum extents are scaled out to the quad's depth so it still covers
/// the whole viewport.
pub fn screen_quad(camera: &Camera) -> [DVec3; 4] {
    let f = camera.frustum();
    let depth = f.znear() + QUAD_EPSILON;
    let k = depth / f.znear();
    [
        DVec3::new(f.max.x * k, f.min.y * k, -depth),
        DVec3::new(f.max.x * k, f.max.y * k, -depth),
        DVec3::new(f.min.x * k, f.max.y * k, -depth),
        DVec3::new(f.min.x * k, f.min.y * k, -depth),
    ]
    .map(|c| camera.cam2world_point(c))
}

/// What the analytic fragment stage does for one fragment: tile-local texture
/// coordinates, or `None` when the fragment lies outside `rect` and is discarded.
///
/// Assumes the camera sits at the sphere center.
pub fn shade_fragment(world_pos: DVec3, rect: &TileRect) -> Option<DVec2> {
    let uv = sphere_uv(world_pos);
    rect.contains(uv).then(|| rect.to_local(uv))
}

// ---------------------------------------------------------------------------
// Per-frame description for the render backend
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
}

#[derive(Debug, Clone)]
pub enum TileDraw<'a, S> {
    /// Draw the tile's prebuilt patch mesh.
    Patch { surface: &'a S },
    /// Draw the shared screen quad with this tile's boundary uniform.
    Analytic { surface: &'a S, boundary: [f32; 4] },
}

/// Everything the backend needs to draw one frame.
#[derive(Debug, Clone)]
pub struct Frame<'a, S> {
    pub world2cam: DMat4,
    pub projection: DMat4,
    /// Present for the analytic strategy only.
    pub screen_quad: Option<[DVec3; 4]>,
    pub tiles: Vec<TileDraw<'a, S>>,
}

impl<'a, S> Frame<'a, S> {
    pub fn describe(strategy: MappingStrategy, camera: &Camera, image: &'a TiledImage<S>) -> Self {
        let tiles = image
            .tiles()
            .map(|(info, surface)| match strategy {
                MappingStrategy::Tessellated => TileDraw::Patch { surface },
                MappingStrategy::Analytic => TileDraw::Analytic {
                    surface,
                    boundary: info.rect.to_uniform(),
                },
            })
            .collect();

        Self {
            world2cam: camera.world2cam(),
            projection: camera.projection(),
            screen_quad: (strategy == MappingStrategy::Analytic).then(|| screen_quad(camera)),
            tiles,
        }
    }

    pub fn camera_uniform(&self) -> CameraUniform {
        CameraUniform {
            view_proj: to_f32_cols(&(OPENGL_TO_WGPU * (self.projection * self.world2cam))),
        }
    }

    /// Boundary uniform to upload for every analytic draw, in draw order.
    pub fn analytic_boundaries(&self) -> impl Iterator<Item = (&'a S, &[f32; 4])> + '_ {
        self.tiles.iter().filter_map(|draw| match draw {
            TileDraw::Analytic { surface, boundary } => Some((*surface, boundary)),
            TileDraw::Patch { .. } => None,
        })
    }

    /// Screen quad as `f32` vertex positions.
    pub fn quad_vertices(&self) -> Option<[[f32; 3]; 4]> {
        self.screen_quad.map(|q| q.map(|c| c.as_vec3().to_array()))
    }
}
