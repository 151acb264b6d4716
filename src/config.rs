// config.rs — 命令行参数 + JSON 配置文件
//
// 查找顺序：--config / PANOVIEW_CONFIG → <exe 目录>/assets/panoview.json → ./assets/panoview.json → 默认值。
// 命令行参数覆盖文件中的值。

use crate::camera::Camera;
use crate::error::ConfigError;
use crate::mapping::DEFAULT_SPHERE_SAMPLING;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "panoview.json";

#[derive(Debug, Clone, Parser)]
#[command(name = "panoview", version, about = "Tiled equirectangular panorama viewer")]
pub struct Cli {
    /// Panorama image to open (JPEG, PNG, BMP, PNM)
    pub image: Option<PathBuf>,

    /// JSON config file
    #[arg(long, env = "PANOVIEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// UI language code, e.g. en, zh-Hans
    #[arg(long, env = "PANOVIEW_LANG")]
    pub lang: Option<String>,

    /// Maximum tile edge in pixels
    #[arg(long)]
    pub tile_size: Option<u32>,

    /// Force the tessellated render mode
    #[arg(long)]
    pub compat: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub tile_size: u32,
    pub sphere_sampling: u32,
    pub znear: f64,
    pub zfar: f64,
    pub fov: f64,
    pub window_width: u32,
    pub window_height: u32,
    pub lang: String,
    pub force_tessellated: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            tile_size: 2048,
            sphere_sampling: DEFAULT_SPHERE_SAMPLING,
            znear: 0.1,
            // 单位球必须落在远平面之内
            zfar: 10.0,
            fov: Camera::DEFAULT_FOV,
            window_width: 640,
            window_height: 480,
            lang: "en".to_string(),
            force_tessellated: false,
        }
    }
}

/// Finds `assets/<rel>` next to the executable, then under the working directory.
pub fn find_asset(rel: &Path) -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let p = dir.join("assets").join(rel);
            if p.exists() {
                return Some(p);
            }
        }
    }

    let p = PathBuf::from("assets").join(rel);
    p.exists().then_some(p)
}

impl ViewerConfig {
    pub fn from_json(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, path)
    }

    /// An explicit path must load; a discovered asset file or nothing at all falls back to defaults.
    pub fn locate(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            log::info!("using config {}", path.display());
            return Self::from_file(path);
        }

        match find_asset(Path::new(CONFIG_FILE_NAME)) {
            Some(path) => {
                log::info!("using config {}", path.display());
                Self::from_file(&path)
            }
            None => {
                log::debug!("no {} found, using defaults", CONFIG_FILE_NAME);
                Ok(Self::default())
            }
        }
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(lang) = &cli.lang {
            self.lang = lang.clone();
        }
        if let Some(n) = cli.tile_size {
            self.tile_size = n;
        }
        if cli.compat {
            self.force_tessellated = true;
        }
    }

    /// Camera settings the unit sphere can be viewed with: the near plane sits
    /// inside the sphere and the far plane outside it.
    pub fn check(&self) -> Result<(), ConfigError> {
        if !(self.znear > 0.0 && self.znear < 1.0 && self.zfar > 1.0 && self.zfar.is_finite()) {
            return Err(ConfigError::ClipPlanes {
                znear: self.znear,
                zfar: self.zfar,
            });
        }
        if !self.fov.is_finite() {
            return Err(ConfigError::Fov(self.fov));
        }
        Ok(())
    }

    /// Replaces invalid camera fields with their defaults. Returns `false` if anything was reset.
    pub fn validate(&mut self) -> bool {
        let mut ok = true;
        let defaults = Self::default();
        if let Err(e @ ConfigError::ClipPlanes { .. }) = self.check() {
            log::warn!("{}, using {} / {}", e, defaults.znear, defaults.zfar);
            self.znear = defaults.znear;
            self.zfar = defaults.zfar;
            ok = false;
        }
        if let Err(e) = self.check() {
            log::warn!("{}, using {}", e, defaults.fov);
            self.fov = defaults.fov;
            ok = false;
        }
        ok
    }

    /// File config with CLI overrides applied and camera fields validated.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut cfg = Self::locate(cli.config.as_deref())?;
        cfg.apply_cli(cli);
        cfg.validate();
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let text = r#"{ "tile_size": 512, "lang": "zh-Hans" }"#;
        let cfg = ViewerConfig::from_json(text, Path::new("t.json")).unwrap();
        assert_eq!(cfg.tile_size, 512);
        assert_eq!(cfg.lang, "zh-Hans");
        assert_eq!(cfg.sphere_sampling, 30);
        assert_eq!(cfg.zfar, 10.0);
        assert!(!cfg.force_tessellated);
    }

    #[test]
    fn malformed_json_reports_path() {
        let err = ViewerConfig::from_json("{ tile_size: }", Path::new("bad.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ViewerConfig::locate(Some(Path::new("/nonexistent/panoview.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn cli_flags_override_file_values() {
        let cli = Cli::parse_from([
            "panoview",
            "pano.jpg",
            "--tile-size",
            "256",
            "--compat",
            "--lang",
            "ja",
        ]);
        assert_eq!(cli.image.as_deref(), Some(Path::new("pano.jpg")));

        let mut cfg = ViewerConfig::default();
        cfg.apply_cli(&cli);
        assert_eq!(cfg.tile_size, 256);
        assert!(cfg.force_tessellated);
        assert_eq!(cfg.lang, "ja");
        assert_eq!(cfg.window_width, 640);
    }

    #[test]
    fn defaults_pass_validation() {
        let mut cfg = ViewerConfig::default();
        assert!(cfg.check().is_ok());
        assert!(cfg.validate());
        assert_eq!(cfg, ViewerConfig::default());
    }

    #[test]
    fn bad_clip_planes_fall_back_to_defaults() {
        for text in [
            r#"{ "znear": 0.0, "zfar": 10.0 }"#,
            r#"{ "znear": -0.5 }"#,
            r#"{ "znear": 5.0, "zfar": 1.0 }"#,
            r#"{ "znear": 1.5, "zfar": 20.0 }"#,
            r#"{ "znear": 0.1, "zfar": 0.5 }"#,
        ] {
            let mut cfg = ViewerConfig::from_json(text, Path::new("clip.json")).unwrap();
            assert!(matches!(cfg.check(), Err(ConfigError::ClipPlanes { .. })), "{text}");
            assert!(!cfg.validate());
            assert_eq!((cfg.znear, cfg.zfar), (0.1, 10.0), "{text}");
        }
    }

    #[test]
    fn validated_config_gives_a_finite_camera() {
        use crate::mapping::screen_quad;
        use crate::viewer::PanoramaViewer;

        let text = r#"{ "znear": 0.0, "fov": 60.0 }"#;
        let mut cfg = ViewerConfig::from_json(text, Path::new("c.json")).unwrap();
        cfg.validate();
        assert_eq!(cfg.fov, 60.0);

        let viewer = PanoramaViewer::new(&cfg, 640, 480);
        assert!(viewer.camera.projection().is_finite());
        assert!(screen_quad(&viewer.camera).iter().all(|c| c.is_finite()));
    }
}
