// src/presets.rs
//! Named discovery presets: the search vocabulary, sector filter, and
//! relevance floor a run is parameterized with. Loaded from TOML with a
//! seeded book compiled in, so `discover` works out of the box.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::warn;

pub const ENV_PRESETS_PATH: &str = "SCOUT_PRESETS_PATH";
pub const DEFAULT_PRESETS_PATH: &str = "config/presets.toml";

fn default_threshold() -> f32 {
    0.40
}

#[derive(Debug, Clone, Deserialize)]
pub struct Preset {
    /// Search terms sent to the connectors, one request per term.
    pub keywords: Vec<String>,
    /// Sectors this preset targets; informational for list output.
    #[serde(default)]
    pub sectors: Vec<String>,
    /// Two-letter state codes to weight toward.
    #[serde(default)]
    pub locations: Vec<String>,
    /// Minimum rescaled score (0..=1) a keyword-scored record must reach.
    #[serde(default = "default_threshold")]
    pub relevance_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresetBook {
    presets: BTreeMap<String, Preset>,
}

impl Default for PresetBook {
    fn default() -> Self {
        Self::from_toml_str(SEEDED_PRESETS).expect("seeded presets parse")
    }
}

impl PresetBook {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut book: PresetBook = toml::from_str(s).context("parse presets TOML")?;
        for (name, preset) in book.presets.iter_mut() {
            if preset.keywords.iter().all(|k| k.trim().is_empty()) {
                bail!("preset '{name}' has no keywords");
            }
            preset.relevance_threshold = preset.relevance_threshold.clamp(0.0, 1.0);
        }
        Ok(book)
    }

    /// Env path -> default path -> seeded book.
    pub fn load_default() -> Self {
        let path = std::env::var(ENV_PRESETS_PATH)
            .unwrap_or_else(|_| DEFAULT_PRESETS_PATH.to_string());
        match fs::read_to_string(&path) {
            Ok(raw) => match Self::from_toml_str(&raw) {
                Ok(book) => book,
                Err(e) => {
                    warn!(target: "presets", %path, error = %e, "invalid presets file; using seeded presets");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    /// Preset names in stable (sorted) order.
    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Preset)> {
        self.presets.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Built-in book. Mirrors config/presets.toml in the repo.
const SEEDED_PRESETS: &str = r#"
[presets.energy]
keywords = ["energy efficiency", "microgrid", "clean energy", "grid resilience"]
sectors = ["energy"]
locations = ["KY", "TN", "WV"]
relevance_threshold = 0.40

[presets.broadband]
keywords = ["rural broadband", "digital equity", "middle mile"]
sectors = ["broadband"]
locations = ["KY", "WV"]
relevance_threshold = 0.45

[presets.workforce]
keywords = ["workforce development", "apprenticeship", "reskilling"]
sectors = ["workforce", "education"]
locations = ["KY", "TN"]
relevance_threshold = 0.40

[presets.education]
keywords = ["community college", "stem education", "pell"]
sectors = ["education"]
locations = []
relevance_threshold = 0.35
"#;
