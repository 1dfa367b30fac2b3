use std::path::Path;

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::models::{DailyAggregate, UserProfile};

/// Ordered feature-name list shipped next to the model artifact. The
/// order defines the vector layout; it is configuration, not code.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureManifest {
    pub features: Vec<String>,
}

impl FeatureManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::ConfigMismatch(format!(
                "feature manifest missing at {}: {e}",
                path.display()
            ))
        })?;
        let manifest: FeatureManifest = serde_json::from_str(&raw)?;
        if manifest.is_empty() {
            return Err(PipelineError::ConfigMismatch(
                "feature manifest lists no features".to_string(),
            ));
        }
        Ok(manifest)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

fn gender_numeric(gender: Option<&str>) -> f64 {
    match gender {
        Some(g) if g.to_ascii_uppercase().starts_with('M') => 1.0,
        _ => 0.0,
    }
}

/// Maps the aggregate and profile onto the manifest order. Missing
/// numerics become 0.0 here; nothing past this point sees a gap. A name
/// the mapping does not know also yields 0.0.
pub fn build_vector(
    manifest: &FeatureManifest,
    agg: &DailyAggregate,
    user: &UserProfile,
) -> Vec<f32> {
    manifest
        .features
        .iter()
        .map(|name| {
            let value = match name.as_str() {
                "steps_total" => f64::from(agg.steps_total),
                "calories_total" => agg.calories_total,
                "sleep_hours_total" => agg.sleep_hours_total,
                "age" => user.age.map(f64::from).unwrap_or(0.0),
                "gender_numeric" => gender_numeric(user.gender.as_deref()),
                "height_cm" => user.height_cm.unwrap_or(0.0),
                "weight_kg" => user.weight_kg.unwrap_or(0.0),
                "d_sleep_7d" => agg.d_sleep_7d,
                "d_steps_7d" => agg.d_steps_7d,
                _ => 0.0,
            };
            value as f32
        })
        .collect()
}
