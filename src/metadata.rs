// metadata.rs — 从 EXIF 注释中解析视场 (Hugin 风格 "FOV: 360 x 180 Ev: ...")

use crate::exif::{ExifTags, USER_COMMENT};

/// Angular coverage of the panorama, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldOfView {
    pub azimuth: f64,
    pub elevation: f64,
}

impl Default for FieldOfView {
    /// Full sphere.
    fn default() -> Self {
        Self {
            azimuth: 360.0,
            elevation: 180.0,
        }
    }
}

impl FieldOfView {
    /// Reads the hint from the `UserComment` tag, if present and well formed.
    pub fn from_tags(tags: &ExifTags) -> Option<Self> {
        tags.get(&USER_COMMENT).and_then(|c| parse_fov_comment(c))
    }
}

/// Extracts `<azimuth> x <elevation>` following `FOV` in a free-form comment.
///
/// Values are taken as written; no range checking.
pub fn parse_fov_comment(comment: &str) -> Option<FieldOfView> {
    let start = comment.find("FOV")? + "FOV".len();
    let mut rest = &comment[start..];
    if let Some(ev) = rest.find("Ev") {
        rest = &rest[..ev];
    }
    let rest = rest.trim_start().trim_start_matches(':');

    let (az, el) = rest.split_once('x')?;
    let azimuth = az.trim().parse::<f64>().ok()?;
    let elevation = el.split_whitespace().next()?.parse::<f64>().ok()?;
    Some(FieldOfView { azimuth, elevation })
}
