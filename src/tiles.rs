// tiles.rs — 大图分块：网格寻址 + 分块纹理生命周期
//
// 超过显卡纹理尺寸上限的全景图被切成不超过 tile_size 的方块，
// 每块单独上传；最后一行/列的块可能更小。

use crate::error::{LoadError, TileError};
use crate::math::DVec2;
use crate::metadata::FieldOfView;
use crate::source::{Panorama, PixelBuffer};
use std::path::PathBuf;

pub const DEFAULT_TILE_SIZE: u32 = 1024;

/// Normalized `[xmin,xmax] x [ymin,ymax]` rectangle of a tile within the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRect {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl TileRect {
    pub const FULL: TileRect = TileRect {
        xmin: 0.0,
        xmax: 1.0,
        ymin: 0.0,
        ymax: 1.0,
    };

    /// Inclusive on all four edges, like the fragment stage test.
    pub fn contains(&self, uv: DVec2) -> bool {
        uv.x >= self.xmin && uv.x <= self.xmax && uv.y >= self.ymin && uv.y <= self.ymax
    }

    /// Image-space `uv` to tile-local `[0,1]^2` texture coordinates.
    pub fn to_local(&self, uv: DVec2) -> DVec2 {
        DVec2::new(
            (uv.x - self.xmin) / (self.xmax - self.xmin),
            (uv.y - self.ymin) / (self.ymax - self.ymin),
        )
    }

    /// Tile-local texture coordinates back to image space.
    pub fn to_image(&self, local: DVec2) -> DVec2 {
        DVec2::new(
            self.xmin + local.x * (self.xmax - self.xmin),
            self.ymin + local.y * (self.ymax - self.ymin),
        )
    }

    /// `(xmin, xmax, ymin, ymax)` as uploaded to the analytic shader.
    pub fn to_uniform(&self) -> [f32; 4] {
        [
            self.xmin as f32,
            self.xmax as f32,
            self.ymin as f32,
            self.ymax as f32,
        ]
    }
}

/// Pixel rectangle of a tile: origin and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Addressing math for a `width x height` image cut into `tile_size` tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tile_size: u32,
    tiles_x: u32,
    tiles_y: u32,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Result<Self, TileError> {
        if tile_size == 0 {
            return Err(TileError::InvalidTileSize(tile_size));
        }
        if width == 0 || height == 0 {
            return Err(TileError::EmptySource { width, height });
        }
        Ok(Self {
            width,
            height,
            tile_size,
            tiles_x: width.div_ceil(tile_size),
            tiles_y: height.div_ceil(tile_size),
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    #[inline]
    pub fn num_tiles_x(&self) -> u32 {
        self.tiles_x
    }

    #[inline]
    pub fn num_tiles_y(&self) -> u32 {
        self.tiles_y
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tiles_x as usize * self.tiles_y as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major storage index of tile `(tx, ty)`.
    #[inline]
    pub fn index(&self, tx: u32, ty: u32) -> usize {
        ty as usize * self.tiles_x as usize + tx as usize
    }

    pub fn tile_width(&self, tx: u32) -> u32 {
        edge_len(tx, self.tiles_x, self.width, self.tile_size)
    }

    pub fn tile_height(&self, ty: u32) -> u32 {
        edge_len(ty, self.tiles_y, self.height, self.tile_size)
    }

    pub fn pixel_rect(&self, tx: u32, ty: u32) -> PixelRect {
        PixelRect {
            x: tx * self.tile_size,
            y: ty * self.tile_size,
            width: self.tile_width(tx),
            height: self.tile_height(ty),
        }
    }

    /// The tile's rectangle in normalized source-image space.
    ///
    /// Edges are computed from integer pixel offsets so neighbouring tiles share
    /// bit-identical boundaries and the last tile ends at exactly 1.0.
    pub fn normalized_rect(&self, tx: u32, ty: u32) -> TileRect {
        let r = self.pixel_rect(tx, ty);
        let w = self.width as f64;
        let h = self.height as f64;
        TileRect {
            xmin: r.x as f64 / w,
            xmax: (r.x + r.width) as f64 / w,
            ymin: r.y as f64 / h,
            ymax: (r.y + r.height) as f64 / h,
        }
    }

    pub fn info(&self, tx: u32, ty: u32) -> TileInfo {
        TileInfo {
            tx,
            ty,
            width: self.tile_width(tx),
            height: self.tile_height(ty),
            rect: self.normalized_rect(tx, ty),
        }
    }

    /// All tile coordinates in storage order.
    pub fn coords(&self) -> impl Iterator<Item = (u32, u32)> {
        let tiles_x = self.tiles_x;
        (0..self.tiles_y).flat_map(move |ty| (0..tiles_x).map(move |tx| (tx, ty)))
    }

    /// Copies tile `(tx, ty)` out of `src` row by row into a contiguous RGB buffer.
    pub fn extract(&self, src: &PixelBuffer, tx: u32, ty: u32) -> Vec<u8> {
        let r = self.pixel_rect(tx, ty);
        let row_bytes = r.width as usize * PixelBuffer::CHANNELS;
        let mut out = vec![0u8; row_bytes * r.height as usize];
        for (row, dst) in out.chunks_exact_mut(row_bytes).enumerate() {
            dst.copy_from_slice(src.row_span(r.x, r.y + row as u32, r.width));
        }
        out
    }
}

/// Size of tile `i` along one axis: `tile_size`, except the last one which
/// takes the remainder (or a full `tile_size` when the remainder is zero).
fn edge_len(i: u32, count: u32, dim: u32, tile_size: u32) -> u32 {
    if i + 1 == count {
        match dim % tile_size {
            0 => tile_size,
            rest => rest,
        }
    } else {
        tile_size
    }
}

/// Everything a backend needs to create one tile surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileInfo {
    pub tx: u32,
    pub ty: u32,
    pub width: u32,
    pub height: u32,
    pub rect: TileRect,
}

/// Render backend boundary for tile surfaces.
pub trait TileBackend {
    type Surface;

    /// Creates a surface from `info.width * info.height` tightly packed RGB pixels.
    fn create_tile_surface(&mut self, info: &TileInfo, pixels: &[u8]) -> Self::Surface;

    fn release_surfaces(&mut self, surfaces: Vec<Self::Surface>);
}

/// What `TiledImage::install` ended up showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Installed {
    /// The new panorama, tiled and with its EXIF field of view applied.
    Panorama(PathBuf),
    /// The load failed; the image already on screen stays.
    Kept,
    /// The load failed and nothing valid was on screen.
    Placeholder,
}

/// A panorama held in memory and mirrored as a grid of backend surfaces.
pub struct TiledImage<S> {
    base: PixelBuffer,
    tile_size: u32,
    grid: Option<TileGrid>,
    tiles: Vec<S>,
    fov: FieldOfView,
}

impl<S> Default for TiledImage<S> {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

impl<S> TiledImage<S> {
    pub fn new(tile_size: u32) -> Self {
        Self {
            base: PixelBuffer::default(),
            tile_size,
            grid: None,
            tiles: Vec::new(),
            fov: FieldOfView::default(),
        }
    }

    /// Whether the pixel buffer is usable (not whether tiles exist).
    pub fn is_valid(&self) -> bool {
        self.base.is_valid()
    }

    pub fn width(&self) -> u32 {
        self.base.width()
    }

    pub fn height(&self) -> u32 {
        self.base.height()
    }

    pub fn source(&self) -> &PixelBuffer {
        &self.base
    }

    /// Replaces the pixel buffer; tiles keep showing the old image until regenerated.
    ///
    /// An empty buffer is rejected and the current one kept, so `is_valid()`
    /// stays true while old tiles are still alive.
    pub fn set_source(&mut self, base: PixelBuffer) -> Result<(), TileError> {
        if !base.is_valid() {
            return Err(TileError::EmptySource {
                width: base.width(),
                height: base.height(),
            });
        }
        self.base = base;
        Ok(())
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn set_tile_size(&mut self, tile_size: u32) -> Result<(), TileError> {
        if tile_size == 0 {
            return Err(TileError::InvalidTileSize(tile_size));
        }
        self.tile_size = tile_size;
        Ok(())
    }

    /// Layout of the current tile collection.
    pub fn grid(&self) -> Option<&TileGrid> {
        self.grid.as_ref()
    }

    pub fn num_tiles_x(&self) -> u32 {
        self.grid.map_or(0, |g| g.num_tiles_x())
    }

    pub fn num_tiles_y(&self) -> u32 {
        self.grid.map_or(0, |g| g.num_tiles_y())
    }

    pub fn tile_width(&self, tx: u32) -> u32 {
        self.grid.map_or(0, |g| g.tile_width(tx))
    }

    pub fn tile_height(&self, ty: u32) -> u32 {
        self.grid.map_or(0, |g| g.tile_height(ty))
    }

    pub fn normalized_tile_coordinates(&self, tx: u32, ty: u32) -> Option<TileRect> {
        self.grid.map(|g| g.normalized_rect(tx, ty))
    }

    pub fn tile(&self, tx: u32, ty: u32) -> Option<&S> {
        let grid = self.grid.as_ref()?;
        if tx >= grid.num_tiles_x() || ty >= grid.num_tiles_y() {
            return None;
        }
        self.tiles.get(grid.index(tx, ty))
    }

    /// Every tile with its descriptor, in storage order.
    pub fn tiles(&self) -> impl Iterator<Item = (TileInfo, &S)> + '_ {
        self.grid
            .iter()
            .flat_map(|g| g.coords().map(move |(tx, ty)| g.info(tx, ty)))
            .zip(self.tiles.iter())
    }

    pub fn azimuth(&self) -> f64 {
        self.fov.azimuth
    }

    pub fn elevation(&self) -> f64 {
        self.fov.elevation
    }

    pub fn field_of_view(&self) -> FieldOfView {
        self.fov
    }

    pub fn apply_field_of_view(&mut self, fov: FieldOfView) {
        self.fov = fov;
    }

    /// Rebuilds the whole tile collection from the current pixel buffer.
    ///
    /// On error nothing changes: the previous tiles stay in place.
    pub fn regenerate_tiles<B>(&mut self, backend: &mut B) -> Result<(), TileError>
    where
        B: TileBackend<Surface = S>,
    {
        if !self.base.is_valid() {
            return Err(TileError::EmptySource {
                width: self.base.width(),
                height: self.base.height(),
            });
        }
        let grid = TileGrid::new(self.base.width(), self.base.height(), self.tile_size)?;

        // 先释放旧纹理，再整体生成新的一组
        self.release_tiles(backend);

        let mut tiles = Vec::with_capacity(grid.len());
        for (tx, ty) in grid.coords() {
            let pixels = grid.extract(&self.base, tx, ty);
            tiles.push(backend.create_tile_surface(&grid.info(tx, ty), &pixels));
        }
        self.tiles = tiles;
        self.grid = Some(grid);

        log::info!(
            "image {}x{}, tile size {}, using {}x{} tiles",
            grid.width(),
            grid.height(),
            grid.tile_size(),
            grid.num_tiles_x(),
            grid.num_tiles_y()
        );
        Ok(())
    }

    /// Installs a new pixel buffer and regenerates. The old buffer is restored
    /// if the new one cannot be tiled.
    pub fn load<B>(&mut self, base: PixelBuffer, backend: &mut B) -> Result<(), TileError>
    where
        B: TileBackend<Surface = S>,
    {
        let previous = std::mem::replace(&mut self.base, base);
        if let Err(e) = self.regenerate_tiles(backend) {
            self.base = previous;
            return Err(e);
        }
        self.fov = FieldOfView::default();
        Ok(())
    }

    /// Installs the result of a background load.
    ///
    /// Failures never leave the image invalid: the current panorama is kept,
    /// or the placeholder grid goes in when there is nothing to keep.
    pub fn install<B>(
        &mut self,
        result: Result<Panorama, LoadError>,
        backend: &mut B,
    ) -> Installed
    where
        B: TileBackend<Surface = S>,
    {
        match result {
            Ok(Panorama { path, pixels, tags }) => match self.load(pixels, backend) {
                Ok(()) => {
                    if let Some(fov) = FieldOfView::from_tags(&tags) {
                        log::info!(
                            "found FOV in EXIF comment: {} x {}",
                            fov.azimuth,
                            fov.elevation
                        );
                        self.apply_field_of_view(fov);
                    }
                    return Installed::Panorama(path);
                }
                Err(e) => log::error!("cannot tile {}: {}", path.display(), e),
            },
            Err(e) => log::error!("{}", e),
        }

        if self.is_valid() && self.tiles().next().is_some() {
            return Installed::Kept;
        }
        if let Err(e) = self.load(PixelBuffer::placeholder(), backend) {
            log::error!("cannot tile placeholder: {}", e);
        }
        Installed::Placeholder
    }

    /// Releases every surface and resets the field-of-view hint.
    pub fn cleanup<B>(&mut self, backend: &mut B)
    where
        B: TileBackend<Surface = S>,
    {
        self.fov = FieldOfView::default();
        self.release_tiles(backend);
    }

    fn release_tiles<B>(&mut self, backend: &mut B)
    where
        B: TileBackend<Surface = S>,
    {
        self.grid = None;
        if !self.tiles.is_empty() {
            backend.release_surfaces(std::mem::take(&mut self.tiles));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingBackend {
        created: usize,
        released: usize,
    }

    impl TileBackend for CountingBackend {
        type Surface = (TileInfo, Vec<u8>);

        fn create_tile_surface(&mut self, info: &TileInfo, pixels: &[u8]) -> Self::Surface {
            assert_eq!(pixels.len(), (info.width * info.height * 3) as usize);
            self.created += 1;
            (*info, pixels.to_vec())
        }

        fn release_surfaces(&mut self, surfaces: Vec<Self::Surface>) {
            self.released += surfaces.len();
        }
    }

    fn gradient(w: u32, h: u32) -> PixelBuffer {
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[(x % 251) as u8, (y % 251) as u8, ((x + y) % 7) as u8]);
            }
        }
        PixelBuffer::from_rgb(w, h, data).unwrap()
    }

    #[test]
    fn grid_rejects_bad_input() {
        assert!(matches!(TileGrid::new(10, 10, 0), Err(TileError::InvalidTileSize(0))));
        assert!(matches!(TileGrid::new(0, 10, 4), Err(TileError::EmptySource { .. })));
    }

    #[test]
    fn exact_division_keeps_full_edge_tiles() {
        let g = TileGrid::new(2048, 1024, 1024).unwrap();
        assert_eq!((g.num_tiles_x(), g.num_tiles_y()), (2, 1));
        assert_eq!(g.tile_width(1), 1024);
        assert_eq!(g.tile_height(0), 1024);
    }

    #[test]
    fn extract_copies_the_right_pixels() {
        let src = gradient(10, 7);
        let g = TileGrid::new(10, 7, 4).unwrap();
        let px = g.extract(&src, 2, 1);
        // tile (2,1): x 8..10, y 4..7
        assert_eq!(px.len(), 2 * 3 * 3);
        assert_eq!(&px[0..3], &src.pixel(8, 4));
        assert_eq!(&px[px.len() - 3..], &src.pixel(9, 6));
    }

    #[test]
    fn regenerate_replaces_and_releases() {
        let mut backend = CountingBackend::default();
        let mut img: TiledImage<(TileInfo, Vec<u8>)> = TiledImage::new(4);
        img.set_source(gradient(10, 7)).unwrap();
        img.regenerate_tiles(&mut backend).unwrap();
        assert_eq!((img.num_tiles_x(), img.num_tiles_y()), (3, 2));
        assert_eq!(backend.created, 6);

        img.set_tile_size(8).unwrap();
        img.regenerate_tiles(&mut backend).unwrap();
        assert_eq!(backend.released, 6);
        assert_eq!(backend.created, 6 + 2);
        assert_eq!(img.tiles().count(), 2);

        img.cleanup(&mut backend);
        assert_eq!(backend.released, backend.created);
        assert!(img.tile(0, 0).is_none());
    }

    #[test]
    fn empty_source_keeps_previous_tiles() {
        let mut backend = CountingBackend::default();
        let mut img = TiledImage::new(4);
        img.load(gradient(8, 8), &mut backend).unwrap();
        assert_eq!(backend.created, 4);

        let err = img.load(PixelBuffer::default(), &mut backend).unwrap_err();
        assert!(matches!(err, TileError::EmptySource { .. }));
        assert_eq!(backend.released, 0);
        assert_eq!(img.num_tiles_x(), 2);
        assert!(img.is_valid());
        assert!(img.tile(1, 1).is_some());
    }

    #[test]
    fn empty_source_is_rejected_while_tiles_are_alive() {
        let mut backend = CountingBackend::default();
        let mut img = TiledImage::new(4);
        img.load(gradient(8, 8), &mut backend).unwrap();

        let err = img.set_source(PixelBuffer::default()).unwrap_err();
        assert!(matches!(err, TileError::EmptySource { .. }));
        assert!(img.is_valid());
        assert_eq!((img.width(), img.height()), (8, 8));
        assert_eq!(img.tiles().count(), 4);

        // regenerating after the rejected swap still works from the kept buffer
        img.regenerate_tiles(&mut backend).unwrap();
        assert_eq!(backend.released, 4);
        assert_eq!(img.tiles().count(), 4);
    }

    #[test]
    fn zero_tile_size_is_rejected_before_regeneration() {
        let mut img: TiledImage<()> = TiledImage::new(16);
        assert!(img.set_tile_size(0).is_err());
        assert_eq!(img.tile_size(), 16);
    }

    #[test]
    fn tile_surfaces_line_up_with_descriptors() {
        let mut backend = CountingBackend::default();
        let mut img = TiledImage::new(3);
        img.load(gradient(7, 5), &mut backend).unwrap();
        for (info, (surface_info, _)) in img.tiles() {
            assert_eq!(&info, surface_info);
            assert_eq!(img.tile(info.tx, info.ty).map(|s| s.0), Some(info));
        }
    }

    #[test]
    fn field_of_view_hint_resets_on_cleanup() {
        let mut backend = CountingBackend::default();
        let mut img = TiledImage::new(4);
        img.load(gradient(4, 4), &mut backend).unwrap();
        img.apply_field_of_view(FieldOfView {
            azimuth: 120.0,
            elevation: 60.0,
        });
        assert_eq!(img.azimuth(), 120.0);
        img.cleanup(&mut backend);
        assert_eq!((img.azimuth(), img.elevation()), (360.0, 180.0));
    }
}
