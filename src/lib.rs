// lib.rs — 分块等距柱状全景查看器核心

pub mod camera;
pub mod config;
pub mod error;
pub mod exif;
pub mod i18n;
pub mod mapping;
pub mod math;
pub mod metadata;
pub mod renderer;
pub mod source;
pub mod tiles;
pub mod viewer;

pub use camera::{Camera, ViewFrustum, ViewPort};
pub use mapping::{Frame, MappingStrategy};
pub use tiles::{TileBackend, TileGrid, TileRect, TiledImage};
