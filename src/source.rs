// source.rs — 像素源：RGB 缓冲、占位网格图、图片解码

use crate::error::LoadError;
use crate::exif::{self, ExifTags};
use crate::metadata::FieldOfView;
use image::io::Reader as ImageReader;
use std::path::{Path, PathBuf};

/// Decoded 8-bit RGB pixels, row-major, no padding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub const CHANNELS: usize = 3;

    /// Wraps raw RGB data. Returns `None` when `data` does not hold exactly `width * height` pixels.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * Self::CHANNELS {
            return None;
        }
        Some(Self { width, height, data })
    }

    pub fn black(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * Self::CHANNELS],
        }
    }

    /// 512x512 black image with white grid lines every 32 pixels; shown whenever
    /// no panorama could be loaded.
    pub fn placeholder() -> Self {
        const SIZE: u32 = 512;
        const SPACING: u32 = 32;

        let mut img = Self::black(SIZE, SIZE);
        for y in 0..SIZE {
            for x in 0..SIZE {
                if x % SPACING == 0 || y % SPACING == 0 {
                    img.set_pixel(x, y, [0xFF, 0xFF, 0xFF]);
                }
            }
        }
        img
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
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * Self::CHANNELS
    }

    /// Bytes of one full image row.
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * Self::CHANNELS
    }

    /// `len` pixels of row `y` starting at column `x`.
    pub fn row_span(&self, x: u32, y: u32, len: u32) -> &[u8] {
        let start = y as usize * self.stride() + x as usize * Self::CHANNELS;
        &self.data[start..start + len as usize * Self::CHANNELS]
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let s = self.row_span(x, y, 1);
        [s[0], s[1], s[2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let start = y as usize * self.stride() + x as usize * Self::CHANNELS;
        self.data[start..start + Self::CHANNELS].copy_from_slice(&rgb);
    }
}

impl From<image::RgbImage> for PixelBuffer {
    fn from(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }
}

/// A decoded panorama plus whatever EXIF tags could be read from its file.
#[derive(Debug, Clone)]
pub struct Panorama {
    pub path: PathBuf,
    pub pixels: PixelBuffer,
    pub tags: ExifTags,
}

impl Panorama {
    pub fn field_of_view(&self) -> Option<FieldOfView> {
        FieldOfView::from_tags(&self.tags)
    }
}

/// Decodes an image file (JPEG, PNM, PNG, BMP ...) into RGB pixels and reads its EXIF tags.
pub fn load_panorama(path: &Path) -> Result<Panorama, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let decode_err = |source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = ImageReader::new(std::io::Cursor::new(&bytes))
        .with_guessed_format()
        .map_err(|e| decode_err(image::ImageError::IoError(e)))?;
    reader.no_limits();
    let img = reader.decode().map_err(decode_err)?;

    let pixels = PixelBuffer::from(img.to_rgb8());
    if !pixels.is_valid() {
        return Err(LoadError::Empty(path.to_path_buf()));
    }

    let tags = match exif::read_exif(&bytes) {
        Ok(tags) => tags,
        Err(e) => {
            log::debug!("no EXIF tags in {}: {}", path.display(), e);
            ExifTags::new()
        }
    };

    Ok(Panorama {
        path: path.to_path_buf(),
        pixels,
        tags,
    })
}

/// Background load bookkeeping: only the most recently requested load is
/// installed, and the loading flag stays up until that one arrives.
#[derive(Debug, Clone, Default)]
pub struct LoadTracker {
    latest: u64,
    pending: bool,
}

impl LoadTracker {
    /// Starts a request and returns its generation; earlier requests go stale.
    pub fn begin(&mut self) -> u64 {
        self.latest += 1;
        self.pending = true;
        self.latest
    }

    /// Whether a result tagged `generation` should be installed.
    pub fn finish(&mut self, generation: u64) -> bool {
        if generation != self.latest {
            log::debug!("dropping stale load {} (latest {})", generation, self.latest);
            return false;
        }
        self.pending = false;
        true
    }

    pub fn is_loading(&self) -> bool {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_has_grid_lines() {
        let p = PixelBuffer::placeholder();
        assert!(p.is_valid());
        assert_eq!((p.width(), p.height()), (512, 512));
        assert_eq!(p.pixel(0, 5), [0xFF; 3]);
        assert_eq!(p.pixel(64, 100), [0xFF; 3]);
        assert_eq!(p.pixel(100, 96), [0xFF; 3]);
        assert_eq!(p.pixel(5, 5), [0; 3]);
        assert_eq!(p.pixel(511, 511), [0; 3]);
    }

    #[test]
    fn from_rgb_rejects_short_buffers() {
        assert!(PixelBuffer::from_rgb(2, 2, vec![0; 11]).is_none());
        assert!(PixelBuffer::from_rgb(2, 2, vec![0; 12]).is_some());
    }

    #[test]
    fn default_buffer_is_invalid() {
        assert!(!PixelBuffer::default().is_valid());
    }

    #[test]
    fn loads_ppm_without_exif() {
        let dir = std::env::temp_dir().join(format!("panoview-src-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tiny.ppm");
        let mut bytes = b"P6\n2 1\n255\n".to_vec();
        bytes.extend_from_slice(&[255, 0, 0, 0, 0, 255]);
        std::fs::write(&path, bytes).unwrap();

        let pano = load_panorama(&path).unwrap();
        assert_eq!((pano.pixels.width(), pano.pixels.height()), (2, 1));
        assert_eq!(pano.pixels.pixel(1, 0), [0, 0, 255]);
        assert!(pano.tags.is_empty());
        assert!(pano.field_of_view().is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = load_panorama(Path::new("/definitely/not/here.jpg")).unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
    }

    #[test]
    fn only_the_latest_load_is_installed() {
        let mut loads = LoadTracker::default();
        assert!(!loads.is_loading());

        let big = loads.begin();
        let small = loads.begin();
        assert!(loads.is_loading());

        // 后请求的小文件先解码完成
        assert!(loads.finish(small));
        assert!(!loads.is_loading());
        // 先请求的大文件随后到达，必须丢弃
        assert!(!loads.finish(big));
        assert!(!loads.is_loading());
    }

    #[test]
    fn stale_result_keeps_loading_flag_up() {
        let mut loads = LoadTracker::default();
        let first = loads.begin();
        let second = loads.begin();
        assert!(!loads.finish(first));
        assert!(loads.is_loading());
        assert!(loads.finish(second));
        assert!(!loads.is_loading());
    }
}
