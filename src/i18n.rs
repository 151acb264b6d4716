// src/i18n.rs
//
// Lightweight runtime i18n for the on-screen overlay:
// - Built-in English strings are always present
// - Overrides live in either:
//   A) assets/i18n/<lang>.json
//   B) assets/i18n.json (single file, format: { "<lang>": { "key": "value" } })
// - Lookup: tr("key") / tr_with("key", &[("name", "...")]) with {name} placeholders
//
// Language selection comes from `--lang` / PANOVIEW_LANG (see config.rs).

use crate::config::find_asset;
use once_cell::sync::OnceCell;
use std::{collections::HashMap, path::Path, sync::RwLock};

const BUILTIN_EN: &[(&str, &str)] = &[
    ("app.title", "PanoView"),
    ("overlay.fps", "FPS: {fps}"),
    ("overlay.press_h", "press 'h' for help."),
    ("overlay.fov", "FOV: {fov}°"),
    ("overlay.image", "Image {w}x{h}, {tx}x{ty} tiles of {size}px"),
    ("overlay.coverage", "Panorama coverage: {az}° x {el}°"),
    ("overlay.strategy", "Render mode: {name}"),
    ("overlay.loading", "Loading image..."),
    ("help.pitch", "W, S : rotate view up/down"),
    ("help.yaw", "A, D : rotate view left/right"),
    ("help.fov", "Q, E : de-/increase field of view (zoom)"),
    ("help.help", "H : en-/disable help text"),
    ("help.strategy", "C : toggle compatibility render mode ({state})"),
    ("help.text", "SPACE : en-/disable all on-screen text"),
    ("help.open", "O : open image, or drop a file on the window"),
    ("help.mouse", "left drag : look around, right drag : fly"),
    ("state.on", "ON"),
    ("state.off", "OFF"),
    ("strategy.tessellated", "tessellated patches"),
    ("strategy.analytic", "per-fragment mapping"),
    ("file.filter.images", "Images"),
];

#[derive(Debug, Clone)]
pub struct I18n {
    pub lang: String,
    map: HashMap<String, String>,
}

static I18N: OnceCell<RwLock<I18n>> = OnceCell::new();

fn load_json_map(path: &Path) -> Option<HashMap<String, String>> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(map) => Some(map),
        Err(e) => {
            log::warn!("ignoring {}: {}", path.display(), e);
            None
        }
    }
}

fn load_multi_lang_json(path: &Path, lang: &str) -> Option<HashMap<String, String>> {
    let text = std::fs::read_to_string(path).ok()?;
    let all: HashMap<String, HashMap<String, String>> = serde_json::from_str(&text).ok()?;
    all.get(lang).cloned()
}

fn load_overrides(lang: &str) -> HashMap<String, String> {
    // First try per-lang file
    let per_lang = Path::new("i18n").join(format!("{}.json", lang));
    if let Some(m) = find_asset(&per_lang).and_then(|p| load_json_map(&p)) {
        return m;
    }

    // Then try single multi-lang file
    find_asset(Path::new("i18n.json"))
        .and_then(|p| load_multi_lang_json(&p, lang))
        .unwrap_or_default()
}

impl I18n {
    /// Built-in English only.
    pub fn builtin() -> Self {
        Self {
            lang: "en".to_string(),
            map: BUILTIN_EN
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Built-in English with `overrides` layered on top.
    pub fn with_overrides(lang: impl Into<String>, overrides: HashMap<String, String>) -> Self {
        let mut i = Self::builtin();
        i.lang = lang.into();
        i.map.extend(overrides);
        i
    }

    pub fn load(lang: &str) -> Self {
        Self::with_overrides(lang, load_overrides(lang))
    }

    /// Localized text, or the key itself when unknown.
    pub fn tr(&self, key: &str) -> String {
        self.map.get(key).cloned().unwrap_or_else(|| key.to_string())
    }

    /// Localized text with `{name}` placeholders substituted.
    /// Any placeholder not provided is kept as-is.
    pub fn tr_with(&self, key: &str, args: &[(&str, String)]) -> String {
        let mut s = self.tr(key);
        for (k, v) in args {
            let placeholder = format!("{{{}}}", k);
            s = s.replace(&placeholder, v);
        }
        s
    }
}

/// Initialize global i18n. Safe to call multiple times; later calls replace the strings.
pub fn init(lang: &str) {
    let i = I18n::load(lang);
    if let Some(lock) = I18N.get() {
        if let Ok(mut w) = lock.write() {
            *w = i;
        }
    } else {
        let _ = I18N.set(RwLock::new(i));
    }
}

pub fn tr(key: &str) -> String {
    match I18N.get().and_then(|l| l.read().ok()) {
        Some(i) => i.tr(key),
        None => key.to_string(),
    }
}

pub fn tr_with(key: &str, args: &[(&str, String)]) -> String {
    match I18N.get().and_then(|l| l.read().ok()) {
        Some(i) => i.tr_with(key, args),
        None => key.to_string(),
    }
}
