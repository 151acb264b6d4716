// error.rs — 核心错误类型

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("tile size must be positive, got {0}")]
    InvalidTileSize(u32),
    #[error("source image is empty ({width}x{height})")]
    EmptySource {
        width: u32,
        height: u32,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("decoded image {0:?} has zero size")]
    Empty(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ExifError {
    #[error("not a JPEG stream")]
    NotJpeg,
    #[error("no EXIF segment found")]
    Missing,
    #[error("EXIF data truncated at offset {0}")]
    Truncated(usize),
    #[error("bad TIFF byte order marker {0:#06x}")]
    ByteOrder(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("clip planes must satisfy 0 < znear < 1 < zfar, got znear {znear}, zfar {zfar}")]
    ClipPlanes {
        znear: f64,
        zfar: f64,
    },
    #[error("fov must be a finite angle in degrees, got {0}")]
    Fov(f64),
}

#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error("cannot create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("no suitable graphics adapter found")]
    NoAdapter,
    #[error("cannot open device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}
