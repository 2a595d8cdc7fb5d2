use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    assets::decode::load_bitmap_or_empty,
    compositor::{matting::MattingSettings, parallax::LayerSlot},
    foundation::{
        core::{Bitmap, OutputSize},
        error::{CompositorError, CompositorResult},
    },
    gpu::device::{BackendKind, DeviceSettings},
};

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub render: RenderConfig,
    pub matting: MattingSettings,
    pub parallax: ParallaxAssets,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub backend: BackendKind,
    pub width: u32,
    pub height: u32,
    pub frame_interval_ms: u64,
    /// Cleared to this straight-alpha color before each frame; `null` keeps the previous frame.
    pub clear_rgba: Option<[u8; 4]>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Cpu,
            width: 720,
            height: 1280,
            frame_interval_ms: 16,
            clear_rgba: Some([0, 0, 0, 255]),
        }
    }
}

/// Parallax layer sources. Relative paths resolve against the config file.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParallaxAssets {
    pub background: Option<PathBuf>,
    pub depth: Option<PathBuf>,
    pub foreground: Option<PathBuf>,
}

impl ParallaxAssets {
    pub fn path(&self, slot: LayerSlot) -> Option<&Path> {
        match slot {
            LayerSlot::Background => self.background.as_deref(),
            LayerSlot::Depth => self.depth.as_deref(),
            LayerSlot::Foreground => self.foreground.as_deref(),
        }
    }

    /// Decode every layer; missing or unreadable layers become a transparent 1x1 bitmap.
    pub fn load(&self) -> [(LayerSlot, Bitmap); 3] {
        LayerSlot::ALL.map(|slot| (slot, load_bitmap_or_empty(self.path(slot))))
    }

    fn resolve_against(&mut self, root: &Path) {
        for path in [&mut self.background, &mut self.depth, &mut self.foreground]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> CompositorResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CompositorError::config(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> CompositorResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CompositorError::config(format!("read '{}': {e}", path.display())))?;
        let mut config = Self::from_json_str(&text)?;
        if let Some(root) = path.parent() {
            config.parallax.resolve_against(root);
        }
        Ok(config)
    }

    pub fn validate(&self) -> CompositorResult<()> {
        if self.render.width == 0 || self.render.height == 0 {
            return Err(CompositorError::config("render width and height must be non-zero"));
        }
        if self.render.frame_interval_ms == 0 {
            return Err(CompositorError::config("frame_interval_ms must be non-zero"));
        }
        let m = &self.matting;
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !m.key_color.iter().copied().all(in_unit) {
            return Err(CompositorError::config("matting.key_color components must be in [0, 1]"));
        }
        if !in_unit(m.similarity) || !in_unit(m.smoothness) {
            return Err(CompositorError::config(
                "matting.similarity and matting.smoothness must be in [0, 1]",
            ));
        }
        Ok(())
    }

    pub fn output_size(&self) -> OutputSize {
        OutputSize::new(self.render.width, self.render.height)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.render.frame_interval_ms)
    }

    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            size: self.output_size(),
            clear_rgba: self.render.clear_rgba,
        }
    }
}
