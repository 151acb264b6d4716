// math.rs — 向量/矩阵基础 (glam 双精度) 与球面坐标换算

pub use glam::{DMat4, DVec2, DVec3, DVec4};

use std::f64::consts::PI;

/// Converts clip-space coordinates from OpenGL conventions (Z in [-1, 1])
/// to wgpu conventions (Z in [0, 1]).
#[rustfmt::skip]
pub const OPENGL_TO_WGPU: DMat4 = DMat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
]);

/// Rotates `v` about `axis` by `angle` radians (Rodrigues' rotation formula).
///
/// `axis` is normalized here, so callers may pass any non-zero direction.
pub fn rotate_vec(v: DVec3, axis: DVec3, angle: f64) -> DVec3 {
    let k = axis.normalize();
    let (sin_a, cos_a) = angle.sin_cos();
    v * cos_a + k.cross(v) * sin_a + k * k.dot(v) * (1.0 - cos_a)
}

/// Equirectangular texture coordinates of a direction seen from the sphere center.
///
/// u = (atan2(y, -x) + π) / 2π, v = acos(z) / π
pub fn sphere_uv(dir: DVec3) -> DVec2 {
    let d = dir.normalize();
    let u = (d.y.atan2(-d.x) + PI) / (2.0 * PI);
    let v = d.z.clamp(-1.0, 1.0).acos() / PI;
    DVec2::new(u, v)
}

/// Point on the unit sphere for equirectangular coordinates `(u, v)`; inverse of [`sphere_uv`].
///
/// φ = 2πu − π, θ = πv
pub fn sphere_point(u: f64, v: f64) -> DVec3 {
    let phi = 2.0 * PI * u - PI;
    let theta = PI * v;
    let (sin_t, cos_t) = theta.sin_cos();
    let (sin_p, cos_p) = phi.sin_cos();
    // x 取反：与片元阶段 atan2(y, -x) 保持一致，否则全景左右镜像
    DVec3::new(-sin_t * cos_p, sin_t * sin_p, cos_t)
}

/// Transforms a point by a homogeneous matrix, dividing by w.
pub fn transform_point(m: &DMat4, p: DVec3) -> DVec3 {
    let h = *m * p.extend(1.0);
    h.truncate() / h.w
}

/// Column-major `f32` copy of a matrix, ready for a uniform buffer.
pub fn to_f32_cols(m: &DMat4) -> [[f32; 4]; 4] {
    m.as_mat4().to_cols_array_2d()
}
