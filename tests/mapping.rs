use panoview::camera::{Camera, ViewPort};
use panoview::mapping::{
    screen_quad, shade_fragment, tessellate_tile, Frame, MappingStrategy, TileDraw, TilePatch,
};
use panoview::math::{sphere_uv, to_f32_cols, DVec2, DVec3, DVec4, OPENGL_TO_WGPU};
use panoview::source::PixelBuffer;
use panoview::tiles::{TileBackend, TileInfo, TileRect, TiledImage};

const SAMPLING: u32 = 16;

/// Surfaces are just the tile descriptors; geometry is rebuilt the way the GPU backend does.
struct DescriptorBackend;

impl TileBackend for DescriptorBackend {
    type Surface = TileInfo;

    fn create_tile_surface(&mut self, info: &TileInfo, _pixels: &[u8]) -> TileInfo {
        *info
    }

    fn release_surfaces(&mut self, _surfaces: Vec<TileInfo>) {}
}

fn tiled_image(w: u32, h: u32, tile_size: u32) -> TiledImage<TileInfo> {
    let mut image = TiledImage::new(tile_size);
    image
        .load(PixelBuffer::black(w, h), &mut DescriptorBackend)
        .unwrap();
    image
}

/// Viewer-like camera at the sphere center, looking at the horizon.
fn horizon_camera(turn: f64, tilt: f64) -> Camera {
    let mut cam = Camera::new();
    cam.setup_pinhole(ViewPort::new(0.0, 0.0, 64.0, 48.0), 0.1, 10.0, 70.0);
    cam.set_orientation(DVec3::X, DVec3::Z, DVec3::NEG_Y);
    cam.pitch(tilt);
    cam.rotate_axis(DVec3::Z, turn);
    cam
}

/// World-space direction through the center of screen pixel `(px, py)`.
fn pixel_ray(cam: &Camera, px: f64, py: f64) -> DVec3 {
    let vp = cam.viewport();
    let f = cam.frustum();
    let sx = (px + 0.5) / vp.width();
    let sy = (py + 0.5) / vp.height();
    let p = DVec3::new(
        f.min.x + (f.max.x - f.min.x) * sx,
        f.max.y - (f.max.y - f.min.y) * sy,
        -f.znear(),
    );
    cam.cam2world_point(p) - cam.position()
}

/// Möller–Trumbore; returns `(t, b1, b2)` for a hit in front of the origin.
fn intersect(dir: DVec3, a: DVec3, b: DVec3, c: DVec3) -> Option<(f64, f64, f64)> {
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-14 {
        return None;
    }
    let inv = 1.0 / det;
    let s = -a;
    let b1 = s.dot(p) * inv;
    let q = s.cross(e1);
    let b2 = dir.dot(q) * inv;
    const EDGE: f64 = -1e-9;
    if b1 < EDGE || b2 < EDGE || b1 + b2 > 1.0 - EDGE {
        return None;
    }
    let t = e2.dot(q) * inv;
    (t > 0.0).then_some((t, b1, b2))
}

/// What the patch pipeline shows along `dir`: tile and image-space uv.
fn trace_patches(dir: DVec3, tiles: &[(TileInfo, TilePatch)]) -> Option<(u32, u32, DVec2)> {
    let mut best: Option<(f64, u32, u32, DVec2)> = None;
    for (info, patch) in tiles {
        let pos = |i: u32| glam::Vec3::from_array(patch.vertices[i as usize].position).as_dvec3();
        let tex = |i: u32| glam::Vec2::from_array(patch.vertices[i as usize].tex_coords).as_dvec2();
        for tri in patch.indices.chunks_exact(3) {
            let Some((t, b1, b2)) = intersect(dir, pos(tri[0]), pos(tri[1]), pos(tri[2])) else {
                continue;
            };
            if best.map_or(true, |(bt, ..)| t < bt) {
                let local = tex(tri[0]) * (1.0 - b1 - b2) + tex(tri[1]) * b1 + tex(tri[2]) * b2;
                best = Some((t, info.tx, info.ty, info.rect.to_image(local)));
            }
        }
    }
    best.map(|(_, tx, ty, uv)| (tx, ty, uv))
}

/// What the analytic pipeline shows along `dir`: the first tile that keeps the fragment.
fn trace_analytic(dir: DVec3, frame: &Frame<'_, TileInfo>) -> Option<(u32, u32, DVec2)> {
    frame.tiles.iter().find_map(|draw| match draw {
        TileDraw::Analytic { surface, .. } => shade_fragment(dir, &surface.rect)
            .map(|local| (surface.tx, surface.ty, surface.rect.to_image(local))),
        TileDraw::Patch { .. } => None,
    })
}

fn near_tile_edge(uv: DVec2, rects: &[TileRect], margin: f64) -> bool {
    rects.iter().any(|r| {
        [r.xmin, r.xmax].iter().any(|e| (uv.x - e).abs() < margin)
            || [r.ymin, r.ymax].iter().any(|e| (uv.y - e).abs() < margin)
    })
}

#[test]
fn strategies_agree_on_tile_and_texture_coordinate() {
    let image = tiled_image(400, 200, 128);
    assert_eq!((image.num_tiles_x(), image.num_tiles_y()), (4, 2));

    let rects: Vec<TileRect> = image.tiles().map(|(info, _)| info.rect).collect();
    let patches: Vec<(TileInfo, TilePatch)> = image
        .tiles()
        .map(|(info, _)| (info, tessellate_tile(&info.rect, SAMPLING)))
        .collect();

    let mut compared = 0;
    let orientations = [
        (0.0, 0.0),
        (0.9, 0.2),
        (2.0, -0.3),
        (-1.3, 0.4),
        (3.0, -0.1),
        (-2.6, 0.25),
    ];
    for (turn, tilt) in orientations {
        let cam = horizon_camera(turn, tilt);
        let frame = Frame::describe(MappingStrategy::Analytic, &cam, &image);
        for py in (0..48).step_by(4) {
            for px in (0..64).step_by(4) {
                let dir = pixel_ray(&cam, px as f64, py as f64);

                let (atx, aty, auv) =
                    trace_analytic(dir, &frame).expect("analytic covers the sphere");
                let (ptx, pty, puv) =
                    trace_patches(dir, &patches).expect("patches cover the sphere");

                let mut du = (auv.x - puv.x).abs();
                du = du.min(1.0 - du);
                let dv = (auv.y - puv.y).abs();
                assert!(
                    du < 2e-3 && dv < 2e-3,
                    "pixel ({px},{py}) turn {turn}: analytic {auv} vs patch {puv}"
                );
                if !near_tile_edge(auv, &rects, 2e-3) {
                    assert_eq!((atx, aty), (ptx, pty), "pixel ({px},{py}) turn {turn}");
                }
                compared += 1;
            }
        }
    }
    assert_eq!(compared, 6 * 12 * 16);
}

#[test]
fn neighbouring_patches_share_boundary_vertices() {
    let image = tiled_image(400, 200, 128);
    let left = image.normalized_tile_coordinates(1, 0).unwrap();
    let right = image.normalized_tile_coordinates(2, 0).unwrap();
    let below = image.normalized_tile_coordinates(1, 1).unwrap();

    let row = (SAMPLING + 1) as usize;
    let pl = tessellate_tile(&left, SAMPLING);
    let pr = tessellate_tile(&right, SAMPLING);
    let pb = tessellate_tile(&below, SAMPLING);
    for j in 0..row {
        // 右边一列 == 右侧分块左边一列
        assert_eq!(pl.vertices[j * row + row - 1].position, pr.vertices[j * row].position);
        // 底部一行 == 下方分块顶部一行
        assert_eq!(pl.vertices[(row - 1) * row + j].position, pb.vertices[j].position);
    }
}

#[test]
fn patch_vertices_map_back_into_their_tile() {
    let image = tiled_image(400, 200, 128);
    for (info, _) in image.tiles() {
        let patch = tessellate_tile(&info.rect, SAMPLING);
        for v in &patch.vertices {
            let p = glam::Vec3::from_array(v.position).as_dvec3();
            let uv = sphere_uv(p);
            let expected = info.rect.to_image(glam::Vec2::from_array(v.tex_coords).as_dvec2());
            // 极点处 u 无意义，只比较 v
            if p.z.abs() < 1.0 - 1e-6 {
                let mut du = (uv.x - expected.x).abs();
                du = du.min(1.0 - du);
                assert!(du < 1e-5, "{uv} vs {expected}");
            }
            assert!((uv.y - expected.y).abs() < 1e-5);
        }
    }
}

#[test]
fn frame_carries_strategy_specific_inputs() {
    let image = tiled_image(400, 200, 128);
    let cam = horizon_camera(0.4, 0.1);

    let patch = Frame::describe(MappingStrategy::Tessellated, &cam, &image);
    assert!(patch.screen_quad.is_none());
    assert!(patch.tiles.iter().all(|d| matches!(d, TileDraw::Patch { .. })));
    assert_eq!(patch.tiles.len(), 8);

    let analytic = Frame::describe(MappingStrategy::Analytic, &cam, &image);
    assert_eq!(analytic.screen_quad, Some(screen_quad(&cam)));
    for (draw, (info, _)) in analytic.tiles.iter().zip(image.tiles()) {
        match draw {
            TileDraw::Analytic { surface, boundary } => {
                assert_eq!(**surface, info);
                assert_eq!(*boundary, info.rect.to_uniform());
            }
            TileDraw::Patch { .. } => panic!("patch draw in analytic frame"),
        }
    }

    // 渲染端每帧上传的边界与分块矩形一致
    assert_eq!(patch.analytic_boundaries().count(), 0);
    let uploads: Vec<_> = analytic.analytic_boundaries().collect();
    assert_eq!(uploads.len(), 8);
    for ((surface, boundary), (info, _)) in uploads.into_iter().zip(image.tiles()) {
        assert_eq!(*surface, info);
        assert_eq!(*boundary, info.rect.to_uniform());
    }

    // 两种方式共用同一份相机矩阵
    assert_eq!(patch.world2cam, analytic.world2cam);
    assert_eq!(patch.projection, analytic.projection);
    assert_eq!(
        patch.camera_uniform().view_proj,
        to_f32_cols(&(OPENGL_TO_WGPU * cam.view_projection()))
    );
}

#[test]
fn screen_quad_covers_the_viewport() {
    let cam = horizon_camera(1.0, -0.2);
    let vp = cam.view_projection();
    let expected = [(1.0, -1.0), (1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0)];
    for (corner, (ex, ey)) in screen_quad(&cam).iter().zip(expected) {
        let clip = vp * DVec4::new(corner.x, corner.y, corner.z, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!((ndc.x - ex).abs() < 1e-9 && (ndc.y - ey).abs() < 1e-9, "{ndc}");
        assert!(ndc.z > -1.0 && ndc.z < 1.0);
    }
}
