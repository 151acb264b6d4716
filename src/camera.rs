// camera.rs — 相机：正交基 + 视锥，矩阵惰性计算并缓存
//
// 相机坐标系与 OpenGL 相同：X 向右，Y 向上，-Z 为视线方向。
//
// 相机 -> 世界:
//   w = O + cx*X + cy*Y + cz*Z = [X|Y|Z] * c + O
//
// X/Y/Z 是世界坐标下互相正交的单位向量，因此逆变换就是转置：
//   c = [X|Y|Z]^T * w - [X|Y|Z]^T * O

use crate::math::{rotate_vec, transform_point, DMat4, DVec2, DVec3, DVec4};
use std::cell::Cell;
use std::f64::consts::PI;
use std::fmt;

/// Screen-space rectangle (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPort {
    pub min: DVec2,
    pub max: DVec2,
}

impl ViewPort {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min: DVec2::new(x0, y0),
            max: DVec2::new(x1, y1),
        }
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }
}

impl fmt::Display for ViewPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} : {} x {}",
            self.min,
            self.max,
            self.width(),
            self.height()
        )
    }
}

/// Camera-space view volume.
///
/// `min.x..max.x`, `min.y..max.y` bound the near plane; `min.z` is znear, `max.z` is zfar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewFrustum {
    pub min: DVec3,
    pub max: DVec3,
}

impl ViewFrustum {
    #[inline]
    pub fn znear(&self) -> f64 {
        self.min.z
    }

    #[inline]
    pub fn zfar(&self) -> f64 {
        self.max.z
    }
}

/// A derived value recomputed on read when flagged dirty.
#[derive(Debug, Clone)]
struct Cached<T: Copy> {
    dirty: Cell<bool>,
    value: Cell<T>,
}

impl<T: Copy> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            dirty: Cell::new(true),
            value: Cell::new(value),
        }
    }

    #[inline]
    fn invalidate(&self) {
        self.dirty.set(true);
    }

    #[inline]
    fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    fn get_or_update(&self, compute: impl FnOnce() -> T) -> T {
        if self.dirty.get() {
            self.value.set(compute());
            self.dirty.set(false);
        }
        self.value.get()
    }
}

/// Viewer camera with an orthonormal basis and pinhole/orthographic frustum.
///
/// The basis is never re-orthonormalized: mutators only apply rigid rotations,
/// and `set_orientation` trusts its caller.
#[derive(Debug, Clone)]
pub struct Camera {
    origin: DVec3,
    x: DVec3,
    y: DVec3,
    z: DVec3,

    fov: f64,
    ortho: bool,
    frustum: ViewFrustum,
    viewport: ViewPort,

    projection: Cached<DMat4>,
    cam2world: Cached<DMat4>,
    world2cam: Cached<DMat4>,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

impl Camera {
    pub const DEFAULT_ZNEAR: f64 = 0.01;
    pub const DEFAULT_ZFAR: f64 = 100.0;
    pub const DEFAULT_FOV: f64 = 45.0;

    /// Pinhole camera at the origin looking down -Z over a 100x100 viewport.
    pub fn new() -> Self {
        let viewport = ViewPort::new(0.0, 0.0, 100.0, 100.0);
        let mut cam = Self {
            origin: DVec3::ZERO,
            x: DVec3::X,
            y: DVec3::Y,
            z: DVec3::Z,
            fov: Self::DEFAULT_FOV,
            ortho: false,
            frustum: ViewFrustum {
                min: DVec3::ZERO,
                max: DVec3::ZERO,
            },
            viewport,
            projection: Cached::new(DMat4::IDENTITY),
            cam2world: Cached::new(DMat4::IDENTITY),
            world2cam: Cached::new(DMat4::IDENTITY),
        };
        cam.setup_pinhole(viewport, Self::DEFAULT_ZNEAR, Self::DEFAULT_ZFAR, Self::DEFAULT_FOV);
        cam
    }

    #[inline]
    pub fn position(&self) -> DVec3 {
        self.origin
    }

    #[inline]
    pub fn x_axis(&self) -> DVec3 {
        self.x
    }

    #[inline]
    pub fn y_axis(&self) -> DVec3 {
        self.y
    }

    #[inline]
    pub fn z_axis(&self) -> DVec3 {
        self.z
    }

    /// View direction in world space (`-Z`).
    #[inline]
    pub fn forward(&self) -> DVec3 {
        -self.z
    }

    #[inline]
    pub fn fov(&self) -> f64 {
        self.fov
    }

    #[inline]
    pub fn is_ortho(&self) -> bool {
        self.ortho
    }

    #[inline]
    pub fn viewport(&self) -> ViewPort {
        self.viewport
    }

    #[inline]
    pub fn frustum(&self) -> ViewFrustum {
        self.frustum
    }

    fn invalidate_projection(&self) {
        self.projection.invalidate();
    }

    fn invalidate_transformation(&self) {
        self.cam2world.invalidate();
        self.world2cam.invalidate();
    }

    fn invalidate_matrices(&self) {
        self.invalidate_projection();
        self.invalidate_transformation();
    }

    // --- 视锥设置 ---

    /// Perspective frustum whose `fov` (degrees) spans the longer viewport axis.
    pub fn setup_pinhole(&mut self, vp: ViewPort, znear: f64, zfar: f64, fov: f64) {
        self.ortho = false;
        self.fov = fov;
        self.viewport = vp;

        let extent = znear * (fov * PI / 360.0).tan();
        let (w, h) = (vp.width(), vp.height());
        let (ex, ey) = if w >= h {
            (extent, extent * h / w)
        } else {
            (extent * w / h, extent)
        };
        self.frustum = ViewFrustum {
            min: DVec3::new(-ex, -ey, znear),
            max: DVec3::new(ex, ey, zfar),
        };
        self.invalidate_matrices();
    }

    /// Orthographic frustum equal to the viewport; y is flipped to turn the
    /// top-left viewport origin into a bottom-up frustum.
    pub fn setup_orthographic(&mut self, vp: ViewPort, znear: f64, zfar: f64) {
        self.ortho = true;
        self.fov = 0.0;
        self.viewport = vp;
        self.frustum = ViewFrustum {
            min: DVec3::new(vp.min.x, vp.max.y, znear),
            max: DVec3::new(vp.max.x, vp.min.y, zfar),
        };
        self.invalidate_matrices();
    }

    /// Orthographic camera with an explicit x/y frustum.
    pub fn setup_orthographic_with_frustum(
        &mut self,
        frustum: ViewFrustum,
        vp: ViewPort,
        znear: f64,
        zfar: f64,
    ) {
        self.ortho = true;
        self.viewport = vp;
        self.frustum = ViewFrustum {
            min: DVec3::new(frustum.min.x, frustum.min.y, znear),
            max: DVec3::new(frustum.max.x, frustum.max.y, zfar),
        };
        self.invalidate_matrices();
    }

    pub fn change_fov(&mut self, fov: f64) {
        let (vp, znear, zfar) = (self.viewport, self.frustum.znear(), self.frustum.zfar());
        self.setup_pinhole(vp, znear, zfar, fov);
    }

    /// Re-derives the frustum for a new viewport, keeping near/far/fov and the projection mode.
    pub fn change_viewport(&mut self, vp: ViewPort) {
        let (znear, zfar) = (self.frustum.znear(), self.frustum.zfar());
        if self.ortho {
            self.setup_orthographic(vp, znear, zfar);
        } else {
            self.setup_pinhole(vp, znear, zfar, self.fov);
        }
    }

    // --- 变换矩阵 ---

    /// Columns `[X | Y | Z | O]`.
    pub fn cam2world(&self) -> DMat4 {
        self.cam2world.get_or_update(|| {
            DMat4::from_cols(
                self.x.extend(0.0),
                self.y.extend(0.0),
                self.z.extend(0.0),
                self.origin.extend(1.0),
            )
        })
    }

    /// Inverse of [`Camera::cam2world`], built from the transposed basis.
    pub fn world2cam(&self) -> DMat4 {
        self.world2cam.get_or_update(|| {
            let (x, y, z, o) = (self.x, self.y, self.z, self.origin);
            DMat4::from_cols(
                DVec4::new(x.x, y.x, z.x, 0.0),
                DVec4::new(x.y, y.y, z.y, 0.0),
                DVec4::new(x.z, y.z, z.z, 0.0),
                DVec4::new(-x.dot(o), -y.dot(o), -z.dot(o), 1.0),
            )
        })
    }

    pub fn cam2world_point(&self, c: DVec3) -> DVec3 {
        transform_point(&self.cam2world(), c)
    }

    pub fn world2cam_point(&self, w: DVec3) -> DVec3 {
        transform_point(&self.world2cam(), w)
    }

    /// OpenGL-style (right-handed, clip z in [-1, 1]) projection for the current frustum.
    pub fn projection(&self) -> DMat4 {
        self.projection.get_or_update(|| {
            let (l, r) = (self.frustum.min.x, self.frustum.max.x);
            let (b, t) = (self.frustum.min.y, self.frustum.max.y);
            let (n, f) = (self.frustum.znear(), self.frustum.zfar());
            if self.ortho {
                DMat4::from_cols(
                    DVec4::new(2.0 / (r - l), 0.0, 0.0, 0.0),
                    DVec4::new(0.0, 2.0 / (t - b), 0.0, 0.0),
                    DVec4::new(0.0, 0.0, -2.0 / (f - n), 0.0),
                    DVec4::new(
                        -(r + l) / (r - l),
                        -(t + b) / (t - b),
                        -(f + n) / (f - n),
                        1.0,
                    ),
                )
            } else {
                DMat4::from_cols(
                    DVec4::new(2.0 * n / (r - l), 0.0, 0.0, 0.0),
                    DVec4::new(0.0, 2.0 * n / (t - b), 0.0, 0.0),
                    DVec4::new(
                        (r + l) / (r - l),
                        (t + b) / (t - b),
                        -(f + n) / (f - n),
                        -1.0,
                    ),
                    DVec4::new(0.0, 0.0, -2.0 * f * n / (f - n), 0.0),
                )
            }
        })
    }

    /// `projection * world2cam`.
    pub fn view_projection(&self) -> DMat4 {
        self.projection() * self.world2cam()
    }

    pub fn transforms_dirty(&self) -> bool {
        self.cam2world.is_dirty() || self.world2cam.is_dirty()
    }

    pub fn projection_dirty(&self) -> bool {
        self.projection.is_dirty()
    }

    // --- 移动 ---

    pub fn set_position(&mut self, pos: DVec3) {
        self.origin = pos;
        self.invalidate_transformation();
    }

    /// Replaces the basis. The axes must be orthonormal; this is not checked.
    pub fn set_orientation(&mut self, x: DVec3, y: DVec3, z: DVec3) {
        self.x = x;
        self.y = y;
        self.z = z;
        self.invalidate_transformation();
    }

    /// Translates along the camera's own axes.
    pub fn move_by(&mut self, m: DVec3) {
        self.origin += self.x * m.x + self.y * m.y + self.z * m.z;
        self.invalidate_transformation();
    }

    // --- 旋转 ---

    /// Rotates about the camera's Y axis.
    pub fn yaw(&mut self, angle: f64) {
        self.x = rotate_vec(self.x, self.y, angle);
        self.z = rotate_vec(self.z, self.y, angle);
        self.invalidate_transformation();
    }

    /// Rotates about the camera's X axis.
    pub fn pitch(&mut self, angle: f64) {
        self.y = rotate_vec(self.y, self.x, angle);
        self.z = rotate_vec(self.z, self.x, angle);
        self.invalidate_transformation();
    }

    /// Rotates about the camera's Z axis.
    pub fn roll(&mut self, angle: f64) {
        self.x = rotate_vec(self.x, self.z, angle);
        self.y = rotate_vec(self.y, self.z, angle);
        self.invalidate_transformation();
    }

    /// Rotates the whole basis about a world-space axis.
    pub fn rotate_axis(&mut self, axis: DVec3, angle: f64) {
        self.x = rotate_vec(self.x, axis, angle);
        self.y = rotate_vec(self.y, axis, angle);
        self.z = rotate_vec(self.z, axis, angle);
        self.invalidate_transformation();
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "O: {} X: {} Y: {} Z: {}",
            self.origin, self.x, self.y, self.z
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_camera_has_clean_defaults() {
        let cam = Camera::new();
        assert_eq!(cam.position(), DVec3::ZERO);
        assert!(!cam.is_ortho());
        assert_eq!(cam.fov(), 45.0);
        assert_eq!(cam.viewport(), ViewPort::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(cam.frustum().znear(), 0.01);
        assert_eq!(cam.frustum().zfar(), 100.0);
        assert!(cam.transforms_dirty());
        assert!(cam.projection_dirty());
    }

    #[test]
    fn accessors_clear_dirty_flags() {
        let cam = Camera::new();
        let _ = cam.cam2world();
        let _ = cam.world2cam();
        assert!(!cam.transforms_dirty());
        assert!(cam.projection_dirty());
        let _ = cam.projection();
        assert!(!cam.projection_dirty());
    }

    #[test]
    fn rotation_invalidates_transform_only() {
        let mut cam = Camera::new();
        let _ = (cam.cam2world(), cam.world2cam(), cam.projection());
        cam.yaw(0.3);
        assert!(cam.transforms_dirty());
        assert!(!cam.projection_dirty());
    }

    #[test]
    fn viewport_change_invalidates_everything() {
        let mut cam = Camera::new();
        let _ = (cam.cam2world(), cam.world2cam(), cam.projection());
        cam.change_viewport(ViewPort::new(0.0, 0.0, 100.0, 100.0));
        assert!(cam.transforms_dirty());
        assert!(cam.projection_dirty());
    }

    #[test]
    fn pinhole_frustum_matches_fov_on_square_viewport() {
        let mut cam = Camera::new();
        cam.setup_pinhole(ViewPort::new(0.0, 0.0, 100.0, 100.0), 1.0, 10.0, 90.0);
        let f = cam.frustum();
        assert!((f.max.x - 1.0).abs() < 1e-12);
        assert!((f.max.y - 1.0).abs() < 1e-12);
        assert_eq!(f.min.x, -f.max.x);
    }

    #[test]
    fn tall_viewport_keeps_fov_on_y() {
        let mut cam = Camera::new();
        cam.setup_pinhole(ViewPort::new(0.0, 0.0, 100.0, 200.0), 1.0, 10.0, 90.0);
        let f = cam.frustum();
        assert!((f.max.y - 1.0).abs() < 1e-12);
        assert!((f.max.x - 0.5).abs() < 1e-12);
    }

    #[test]
    fn orthographic_flips_y() {
        let mut cam = Camera::new();
        cam.setup_orthographic(ViewPort::new(0.0, 0.0, 640.0, 480.0), -1.0, 1.0);
        let f = cam.frustum();
        assert!(cam.is_ortho());
        assert_eq!(cam.fov(), 0.0);
        assert_eq!((f.min.y, f.max.y), (480.0, 0.0));
        assert_eq!((f.min.x, f.max.x), (0.0, 640.0));

        // 左上角像素映射到 NDC (-1, 1)
        let p = cam.projection() * DVec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((p.x + 1.0).abs() < 1e-12 && (p.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn change_viewport_keeps_projection_mode() {
        let mut cam = Camera::new();
        cam.setup_orthographic(ViewPort::new(0.0, 0.0, 10.0, 10.0), 0.5, 5.0);
        cam.change_viewport(ViewPort::new(0.0, 0.0, 20.0, 30.0));
        assert!(cam.is_ortho());
        assert_eq!(cam.frustum().max.x, 20.0);
        assert_eq!(cam.frustum().znear(), 0.5);
    }

    #[test]
    fn perspective_maps_near_and_far_to_clip_bounds() {
        let mut cam = Camera::new();
        cam.setup_pinhole(ViewPort::new(0.0, 0.0, 300.0, 200.0), 0.1, 10.0, 60.0);
        let p = cam.projection();
        let near = p * DVec4::new(0.0, 0.0, -0.1, 1.0);
        let far = p * DVec4::new(0.0, 0.0, -10.0, 1.0);
        assert!((near.z / near.w + 1.0).abs() < 1e-9);
        assert!((far.z / far.w - 1.0).abs() < 1e-9);

        let f = cam.frustum();
        let corner = p * DVec4::new(f.max.x, f.max.y, -0.1, 1.0);
        assert!((corner.x / corner.w - 1.0).abs() < 1e-9);
        assert!((corner.y / corner.w - 1.0).abs() < 1e-9);
    }

    #[test]
    fn move_by_uses_camera_axes() {
        let mut cam = Camera::new();
        cam.set_orientation(DVec3::X, DVec3::Z, -DVec3::Y);
        cam.move_by(DVec3::new(1.0, 2.0, 3.0));
        assert!(cam.position().abs_diff_eq(DVec3::new(1.0, -3.0, 2.0), 1e-12));
    }

    #[test]
    fn display_formats_basis() {
        let cam = Camera::new();
        assert!(cam.to_string().starts_with("O: "));
        assert_eq!(
            ViewPort::new(0.0, 0.0, 4.0, 2.0).to_string(),
            "[0, 0] | [4, 2] : 4 x 2"
        );
    }
}
