//! Render manifest handed to external map renderers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{EviError, EviResult};

/// Linear colour ramp from `min` to `max`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorScale {
    pub min: f64,
    pub max: f64,
    /// `#rrggbb` codes or CSS colour names, low to high
    pub palette: Vec<String>,
}

impl ColorScale {
    pub fn new(min: f64, max: f64, palette: &[&str]) -> Self {
        Self {
            min,
            max,
            palette: palette.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Red (decline) through white to green (growth), EVI per decade
    pub fn slope() -> Self {
        Self::new(-0.05, 0.05, &["#b2182b", "#f7f7f7", "#1a9850"])
    }

    pub fn evi_mean() -> Self {
        Self::new(0.15, 0.70, &["red", "orange", "yellow", "lightgreen", "green"])
    }

    pub fn std_dev() -> Self {
        Self::new(0.0, 0.1, &["white", "purple"])
    }

    pub fn cropland_mask() -> Self {
        Self::new(0.0, 1.0, &["#cdb33b"])
    }

    /// Standard scales keyed by layer name
    pub fn defaults() -> BTreeMap<String, ColorScale> {
        let mut scales = BTreeMap::new();
        scales.insert("slope".to_string(), Self::slope());
        scales.insert("mean".to_string(), Self::evi_mean());
        scales.insert("std_dev".to_string(), Self::std_dev());
        scales.insert("interval".to_string(), Self::evi_mean());
        scales.insert("cropland_mask".to_string(), Self::cropland_mask());
        scales
    }

    pub fn validate(&self) -> EviResult<()> {
        if !(self.min.is_finite() && self.max.is_finite() && self.min < self.max) {
            return Err(EviError::InvalidConfiguration(format!(
                "color scale range [{}, {}] is empty",
                self.min, self.max
            )));
        }
        if self.palette.is_empty() {
            return Err(EviError::InvalidConfiguration("color palette is empty".to_string()));
        }
        if let Some(bad) = self.palette.iter().find(|c| !is_color(c)) {
            return Err(EviError::InvalidConfiguration(format!("unrecognised color '{}'", bad)));
        }
        Ok(())
    }
}

fn is_color(c: &str) -> bool {
    match c.strip_prefix('#') {
        Some(hex) => hex.len() == 6 && hex.chars().all(|ch| ch.is_ascii_hexdigit()),
        None => !c.is_empty() && c.chars().all(|ch| ch.is_ascii_alphabetic()),
    }
}

/// One renderable artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestLayer {
    pub name: String,
    pub file: PathBuf,
    /// CSV column or raster band name holding the rendered values
    pub field: String,
    pub color_scale: ColorScale,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contour_levels: Option<Vec<f64>>,
}

/// Describes exported artifacts and how to colour them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderManifest {
    pub title: String,
    pub layers: Vec<ManifestLayer>,
}

impl RenderManifest {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), layers: Vec::new() }
    }

    pub fn add_layer(&mut self, layer: ManifestLayer) -> EviResult<()> {
        layer.color_scale.validate()?;
        if self.layers.iter().any(|l| l.name == layer.name) {
            return Err(EviError::InvalidConfiguration(format!("duplicate layer '{}'", layer.name)));
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> EviResult<()> {
        log::info!("Writing render manifest ({} layers) to {}", self.layers.len(), path.as_ref().display());
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn read_json<P: AsRef<Path>>(path: P) -> EviResult<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scales_are_valid() {
        for (name, scale) in ColorScale::defaults() {
            assert!(scale.validate().is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_invalid_scales() {
        assert!(ColorScale::new(0.1, 0.1, &["red"]).validate().is_err());
        assert!(ColorScale::new(0.0, 1.0, &[]).validate().is_err());
        assert!(ColorScale::new(0.0, 1.0, &["#12345"]).validate().is_err());
        assert!(ColorScale::new(0.0, 1.0, &["#1A9850", "light green"]).validate().is_err());
    }

    #[test]
    fn test_manifest_round_trip_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut manifest = RenderManifest::new("EVI slope");
        let layer = ManifestLayer {
            name: "slope".to_string(),
            file: PathBuf::from("trend_samples.csv"),
            field: "slope_per_decade".to_string(),
            color_scale: ColorScale::slope(),
            contour_levels: Some(vec![-0.05, 0.0, 0.05]),
        };
        manifest.add_layer(layer.clone()).unwrap();
        assert!(manifest.add_layer(layer).is_err());
        manifest.write_json(&path).unwrap();
        assert_eq!(RenderManifest::read_json(&path).unwrap(), manifest);
    }
}
