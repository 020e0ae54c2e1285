use serde::{Serialize, Deserialize};
use crate::error::EngineResult;
use crate::types::parse_hex_color;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrushSettings {
    pub size: f64,
    pub opacity: f64,
    /// 0.0 (soft) to 1.0 (hard).
    pub hardness: f64,
    /// How strongly pointer speed thins the stroke.
    pub sensitivity: f64,
    /// Percentage of the stroke length tapered at each end.
    pub taper: f64,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self { size: 20.0, opacity: 1.0, hardness: 0.9, sensitivity: 0.5, taper: 80.0 }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EraserSettings {
    pub size: f64,
    pub opacity: f64,
}

impl Default for EraserSettings {
    fn default() -> Self {
        Self { size: 40.0, opacity: 1.0 }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MagicWandSettings {
    pub tolerance: f64,
    pub contiguous: bool,
}

impl Default for MagicWandSettings {
    fn default() -> Self {
        Self { tolerance: 30.0, contiguous: true }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub brush: BrushSettings,
    pub eraser: EraserSettings,
    pub magic_wand: MagicWandSettings,
    pub fill_tolerance: f64,
    pub contour_tolerance: f64,
    pub primary_color: String,
    pub history_limit: usize,
    pub default_document_width: u32,
    pub default_document_height: u32,
    pub default_dpi: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            brush: BrushSettings::default(),
            eraser: EraserSettings::default(),
            magic_wand: MagicWandSettings::default(),
            fill_tolerance: 30.0,
            contour_tolerance: 1.5,
            primary_color: "#000000".to_string(),
            history_limit: 100,
            default_document_width: 1920,
            default_document_height: 1080,
            default_dpi: 72.0,
        }
    }
}

impl EngineConfig {
    /// Builds a config from a partial JSON object; missing keys keep their
    /// defaults.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let mut config: EngineConfig = serde_json::from_str(json)?;
        config.sanitize();
        Ok(config)
    }

    pub fn primary_rgb(&self) -> [u8; 3] {
        parse_hex_color(&self.primary_color).unwrap_or([0, 0, 0])
    }

    pub(crate) fn sanitize(&mut self) {
        self.brush.size = self.brush.size.max(0.1);
        self.brush.opacity = self.brush.opacity.clamp(0.0, 1.0);
        self.brush.hardness = self.brush.hardness.clamp(0.0, 1.0);
        self.brush.sensitivity = self.brush.sensitivity.max(0.0);
        self.brush.taper = self.brush.taper.clamp(0.0, 100.0);
        self.eraser.size = self.eraser.size.max(0.1);
        self.eraser.opacity = self.eraser.opacity.clamp(0.0, 1.0);
        self.magic_wand.tolerance = self.magic_wand.tolerance.max(0.0);
        self.fill_tolerance = self.fill_tolerance.max(0.0);
        self.contour_tolerance = self.contour_tolerance.max(0.0);
        self.history_limit = self.history_limit.max(1);
        if parse_hex_color(&self.primary_color).is_none() {
            log::warn!("invalid primary color {:?}, using black", self.primary_color);
            self.primary_color = "#000000".to_string();
        }
    }
}
