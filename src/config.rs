use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classical::ClassicalParams;
use crate::error::{EraserError, Result};
use crate::model;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyPreference {
	/// Learned engine if it resolves at startup, classical otherwise.
	#[default]
	Auto,
	Classical,
	/// Startup fails if the learned engine cannot be resolved.
	Learned
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
	#[default]
	Cpu,
	Gpu
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuBackend {
	/// Windows: DirectML, Linux: CUDA.
	#[default]
	Auto,
	Directml,
	Cuda
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
	pub model: String,
	pub device: Device,
	pub gpu_backend: GpuBackend,
	/// Binarize the predicted mask at this level (0-255).
	pub mask_threshold: Option<u8>,
	/// If false, a missing runtime or model makes the engine unavailable instead of downloading.
	pub allow_download: bool
}

impl Default for EngineOptions {
	fn default() -> Self {
		Self {
			model: model::DEFAULT_MODEL.to_string(),
			device: Device::Cpu,
			gpu_backend: GpuBackend::Auto,
			mask_threshold: None,
			allow_download: false
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EraserConfig {
	pub strategy: StrategyPreference,
	pub classical: ClassicalParams,
	pub engine: EngineOptions
}

impl EraserConfig {
	pub fn from_json_file(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path)
			.map_err(|e| EraserError::config(format!("read {}: {e}", path.display())))?;
		Self::from_json(&text).map_err(|e| match e {
			EraserError::Config { message } => EraserError::config(format!("{}: {message}", path.display())),
			other => other
		})
	}

	pub fn from_json(text: &str) -> Result<Self> {
		let cfg: Self = serde_json::from_str(text).map_err(|e| EraserError::config(e.to_string()))?;
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn validate(&self) -> Result<()> {
		self.classical
			.kernel_radius()
			.map_err(|e| EraserError::config(format!("classical.kernel_size: {e}")))?;

		if self.strategy != StrategyPreference::Classical {
			model::lookup(&self.engine.model).map_err(|e| EraserError::config(format!("engine.model: {e}")))?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_documented_constants() {
		let cfg = EraserConfig::default();
		assert_eq!(cfg.strategy, StrategyPreference::Auto);
		assert_eq!(cfg.classical.threshold, 240);
		assert_eq!(cfg.classical.kernel_size, 5);
		assert_eq!(cfg.engine.model, "u2netp");
		assert!(!cfg.engine.allow_download);
		cfg.validate().unwrap();
	}

	#[test]
	fn partial_json_keeps_defaults() {
		let cfg = EraserConfig::from_json(r#"{ "strategy": "classical", "classical": { "threshold": 200 } }"#).unwrap();
		assert_eq!(cfg.strategy, StrategyPreference::Classical);
		assert_eq!(cfg.classical.threshold, 200);
		assert_eq!(cfg.classical.kernel_size, 5);
	}

	#[test]
	fn even_kernel_is_rejected() {
		let err = EraserConfig::from_json(r#"{ "classical": { "kernel_size": 6 } }"#).unwrap_err();
		assert!(matches!(err, EraserError::Config { ref message } if message.contains("kernel_size")));
	}

	#[test]
	fn kernel_wider_than_morphology_supports_is_rejected() {
		assert!(EraserConfig::from_json(r#"{ "strategy": "classical", "classical": { "kernel_size": 509 } }"#).is_ok());
		assert!(EraserConfig::from_json(r#"{ "strategy": "classical", "classical": { "kernel_size": 511 } }"#).is_err());
	}

	#[test]
	fn unknown_model_is_rejected_unless_classical() {
		assert!(EraserConfig::from_json(r#"{ "engine": { "model": "nope" } }"#).is_err());
		assert!(EraserConfig::from_json(r#"{ "strategy": "classical", "engine": { "model": "nope" } }"#).is_ok());
	}

	#[test]
	fn engine_enums_are_lowercase() {
		let cfg = EraserConfig::from_json(r#"{ "engine": { "device": "gpu", "gpu_backend": "cuda", "mask_threshold": 128 } }"#).unwrap();
		assert_eq!(cfg.engine.device, Device::Gpu);
		assert_eq!(cfg.engine.gpu_backend, GpuBackend::Cuda);
		assert_eq!(cfg.engine.mask_threshold, Some(128));
	}
}
