// exif.rs — 最小 EXIF 读取：只收集字符串类标签 (ASCII / UserComment)
//
// JPEG APP1 "Exif\0\0" -> TIFF header -> IFD0 -> Exif sub-IFD (0x8769)

use crate::error::ExifError;
use std::collections::BTreeMap;

/// Tag id -> string value.
pub type ExifTags = BTreeMap<u16, String>;

pub const IMAGE_DESCRIPTION: u16 = 0x010E;
pub const EXIF_IFD_POINTER: u16 = 0x8769;
pub const USER_COMMENT: u16 = 0x9286;

const FORMAT_ASCII: u16 = 2;
const FORMAT_UNDEFINED: u16 = 7;

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

struct Tiff<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> Tiff<'a> {
    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], ExifError> {
        self.data
            .get(offset..offset.checked_add(len).ok_or(ExifError::Truncated(offset))?)
            .ok_or(ExifError::Truncated(offset))
    }

    fn u16_at(&self, offset: usize) -> Result<u16, ExifError> {
        let b = self.bytes(offset, 2)?;
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes([b[0], b[1]]),
            ByteOrder::Big => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    fn u32_at(&self, offset: usize) -> Result<u32, ExifError> {
        let b = self.bytes(offset, 4)?;
        let arr = [b[0], b[1], b[2], b[3]];
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(arr),
            ByteOrder::Big => u32::from_be_bytes(arr),
        })
    }

    fn read_directory(
        &self,
        offset: usize,
        tags: &mut ExifTags,
        depth: u8,
    ) -> Result<(), ExifError> {
        // 防止恶意/损坏文件造成的 IFD 循环
        if depth > 4 {
            return Ok(());
        }
        let count = self.u16_at(offset)? as usize;
        for i in 0..count {
            let entry = offset + 2 + i * 12;
            let tag = self.u16_at(entry)?;
            let format = self.u16_at(entry + 2)?;
            let components = self.u32_at(entry + 4)? as usize;

            if tag == EXIF_IFD_POINTER {
                let sub = self.u32_at(entry + 8)? as usize;
                self.read_directory(sub, tags, depth + 1)?;
                continue;
            }

            // 不超过 4 字节的值直接存放在条目里
            let value_offset = if components <= 4 {
                entry + 8
            } else {
                self.u32_at(entry + 8)? as usize
            };

            match format {
                FORMAT_ASCII => {
                    let raw = self.bytes(value_offset, components)?;
                    tags.insert(tag, decode_text(raw));
                }
                FORMAT_UNDEFINED if tag == USER_COMMENT && components > 8 => {
                    // 前 8 字节是字符编码标识 (ASCII\0\0\0 / UNICODE\0 ...)
                    let raw = self.bytes(value_offset + 8, components - 8)?;
                    tags.insert(tag, decode_text(raw));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn decode_text(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

/// Parses a TIFF-structured EXIF block (the part after `Exif\0\0`).
pub fn read_tiff(data: &[u8]) -> Result<ExifTags, ExifError> {
    let marker = data.get(0..2).ok_or(ExifError::Truncated(0))?;
    let order = match marker {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        other => return Err(ExifError::ByteOrder(u16::from_be_bytes([other[0], other[1]]))),
    };
    let tiff = Tiff { data, order };
    let ifd0 = tiff.u32_at(4)? as usize;

    let mut tags = ExifTags::new();
    tiff.read_directory(ifd0, &mut tags, 0)?;
    Ok(tags)
}

/// Scans a JPEG stream for its APP1 EXIF segment and returns the string tags found.
pub fn read_exif(jpeg: &[u8]) -> Result<ExifTags, ExifError> {
    if !jpeg.starts_with(&[0xFF, 0xD8]) {
        return Err(ExifError::NotJpeg);
    }

    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            return Err(ExifError::Missing);
        }
        let marker = jpeg[pos + 1];
        // SOS / EOI: no more metadata segments
        if marker == 0xDA || marker == 0xD9 {
            break;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let body = jpeg
            .get(pos + 4..pos + 2 + len)
            .ok_or(ExifError::Truncated(pos))?;
        if marker == 0xE1 && body.starts_with(b"Exif\0\0") {
            return read_tiff(&body[6..]);
        }
        pos += 2 + len;
    }
    Err(ExifError::Missing)
}
