use std::path::Path;

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::features::FeatureManifest;

/// Serialized scaler + logistic-regression pipeline, exported by the
/// training side as JSON. `outputs` names the slots the engine emits,
/// in order.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub version: String,
    pub input_width: usize,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub outputs: Vec<String>,
}

/// One named output slot of a model run, one row per batch row.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub name: String,
    pub rows: Vec<Vec<f32>>,
}

impl ModelArtifact {
    fn validate(&self) -> Result<()> {
        if self.means.len() != self.input_width
            || self.scales.len() != self.input_width
            || self.coefficients.len() != self.input_width
        {
            return Err(PipelineError::ConfigMismatch(format!(
                "model {} {} declares input width {} but carries {} means, {} scales, {} coefficients",
                self.name,
                self.version,
                self.input_width,
                self.means.len(),
                self.scales.len(),
                self.coefficients.len()
            )));
        }
        if self.outputs.is_empty() {
            return Err(PipelineError::ConfigMismatch(format!(
                "model {} {} declares no output slots",
                self.name, self.version
            )));
        }
        Ok(())
    }

    /// Runs the pipeline over a batch. Emits the declared output slots;
    /// the probability slot carries [p(class 0), p(class 1)] per row.
    fn run(&self, batch: &[&[f32]]) -> Result<Vec<ModelOutput>> {
        let mut labels = Vec::with_capacity(batch.len());
        let mut probabilities = Vec::with_capacity(batch.len());

        for row in batch {
            if row.len() != self.input_width {
                return Err(PipelineError::Inference(format!(
                    "input row has {} values, model expects {}",
                    row.len(),
                    self.input_width
                )));
            }
            let mut z = self.intercept;
            for (i, value) in row.iter().enumerate() {
                let scale = if self.scales[i] > 0.0 { self.scales[i] } else { 1.0 };
                z += self.coefficients[i] * ((f64::from(*value) - self.means[i]) / scale);
            }
            let p1 = 1.0 / (1.0 + (-z).exp());
            labels.push(vec![if p1 >= 0.5 { 1.0 } else { 0.0 }]);
            probabilities.push(vec![(1.0 - p1) as f32, p1 as f32]);
        }

        let mut outputs = Vec::new();
        for (slot, name) in self.outputs.iter().enumerate() {
            let rows = if slot == 0 { labels.clone() } else { probabilities.clone() };
            outputs.push(ModelOutput {
                name: name.clone(),
                rows,
            });
        }
        Ok(outputs)
    }
}

/// Holds the model loaded once at startup together with the feature
/// manifest. Read-only after construction; safe to share across
/// concurrent aggregation calls.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    model: ModelArtifact,
    manifest: FeatureManifest,
}

impl InferenceClient {
    /// Startup precondition: both artifacts must be present and agree on
    /// the feature count. Callers treat a failure here as fatal.
    pub fn load(model_path: &Path, manifest_path: &Path) -> Result<Self> {
        let manifest = FeatureManifest::load(manifest_path)?;
        let raw = std::fs::read_to_string(model_path).map_err(|e| {
            PipelineError::NotFound(format!("model artifact {}: {e}", model_path.display()))
        })?;
        let model: ModelArtifact = serde_json::from_str(&raw)?;
        Self::new(model, manifest)
    }

    pub fn new(model: ModelArtifact, manifest: FeatureManifest) -> Result<Self> {
        model.validate()?;
        if manifest.len() != model.input_width {
            return Err(PipelineError::ConfigMismatch(format!(
                "manifest lists {} features, model {} {} expects {}",
                manifest.len(),
                model.name,
                model.version,
                model.input_width
            )));
        }
        Ok(Self { model, manifest })
    }

    pub fn manifest(&self) -> &FeatureManifest {
        &self.manifest
    }

    pub fn model_name(&self) -> &str {
        &self.model.name
    }

    pub fn model_version(&self) -> &str {
        &self.model.version
    }

    /// Scores one vector: wraps it into a single-row batch, runs the
    /// engine, and extracts the positive-class probability from the
    /// output slot named like a probability (second slot when no name
    /// matches). Stateless per call.
    pub fn predict(&self, vector: &[f32]) -> Result<f64> {
        if vector.len() != self.manifest.len() {
            return Err(PipelineError::ConfigMismatch(format!(
                "vector has {} values, manifest lists {} features",
                vector.len(),
                self.manifest.len()
            )));
        }

        let outputs = self.model.run(&[vector])?;

        let slot = outputs
            .iter()
            .position(|o| o.name.to_ascii_lowercase().contains("prob"))
            .or(if outputs.len() > 1 { Some(1) } else { None })
            .ok_or_else(|| {
                PipelineError::Inference(
                    "no probability output slot in model result".to_string(),
                )
            })?;

        let rows = &outputs[slot].rows;
        let row = match rows.as_slice() {
            [row] => row,
            _ => {
                return Err(PipelineError::Inference(format!(
                    "expected a single-row output, got {} rows",
                    rows.len()
                )))
            }
        };

        let probability = match row.as_slice() {
            [_, p1, ..] => f64::from(*p1),
            [p] => f64::from(*p),
            [] => {
                return Err(PipelineError::Inference(
                    "probability output row is empty".to_string(),
                ))
            }
        };

        if !(0.0..=1.0).contains(&probability) || !probability.is_finite() {
            return Err(PipelineError::Inference(format!(
                "probability {probability} outside [0, 1]"
            )));
        }
        Ok(probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(outputs: &[&str]) -> ModelArtifact {
        ModelArtifact {
            name: "fatigue_risk".to_string(),
            version: "v1".to_string(),
            input_width: 2,
            means: vec![0.0, 0.0],
            scales: vec![1.0, 1.0],
            coefficients: vec![1.0, -1.0],
            intercept: 0.0,
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn manifest() -> FeatureManifest {
        FeatureManifest {
            features: vec!["a".to_string(), "b".to_string()],
        }
    }

    #[test]
    fn predicts_sigmoid_of_weighted_sum() {
        let client = InferenceClient::new(artifact(&["label", "probabilities"]), manifest())
            .unwrap();
        // z = 1*2 - 1*0 = 2
        let p = client.predict(&[2.0, 0.0]).unwrap();
        let expected = 1.0 / (1.0 + (-2.0f64).exp());
        assert!((p - expected).abs() < 1e-6);

        // symmetric input lands exactly on the decision boundary
        let p = client.predict(&[1.0, 1.0]).unwrap();
        assert!((p - 0.5).abs() < 1e-6);
    }

    #[test]
    fn probability_slot_found_by_name() {
        let client = InferenceClient::new(artifact(&["output_probability", "label"]), manifest())
            .unwrap();
        // slot 0 is named like a probability but carries labels here,
        // so a confident positive input must read 1.0 from it
        let p = client.predict(&[5.0, 0.0]).unwrap();
        assert_eq!(p, 1.0);
    }

    #[test]
    fn falls_back_to_second_slot_when_no_name_matches() {
        let client = InferenceClient::new(artifact(&["out0", "out1"]), manifest()).unwrap();
        let p = client.predict(&[2.0, 0.0]).unwrap();
        let expected = 1.0 / (1.0 + (-2.0f64).exp());
        assert!((p - expected).abs() < 1e-6);
    }

    #[test]
    fn single_unnamed_slot_is_an_inference_error() {
        let client = InferenceClient::new(artifact(&["label"]), manifest()).unwrap();
        let err = client.predict(&[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, PipelineError::Inference(_)));
    }

    #[test]
    fn manifest_width_disagreement_is_config_mismatch() {
        let short = FeatureManifest {
            features: vec!["a".to_string()],
        };
        let err = InferenceClient::new(artifact(&["label", "probabilities"]), short).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigMismatch(_)));
    }

    #[test]
    fn wrong_vector_length_is_config_mismatch() {
        let client = InferenceClient::new(artifact(&["label", "probabilities"]), manifest())
            .unwrap();
        let err = client.predict(&[1.0]).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigMismatch(_)));
    }

    #[test]
    fn malformed_artifact_widths_rejected_at_load() {
        let mut bad = artifact(&["label", "probabilities"]);
        bad.coefficients = vec![1.0];
        let err = InferenceClient::new(bad, manifest()).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigMismatch(_)));
    }
}
