use crate::config::{EngineOptions, EraserConfig, StrategyPreference};
use crate::download;
use crate::engine::SegmentationEngine;
use crate::error::{EraserError, Result};
use crate::strategy::BackgroundRemover;
use crate::u2net::U2NetEngine;

/// Whether the learned engine can be used in this process. Resolved once at startup.
pub enum Capability {
	Available(Box<dyn SegmentationEngine>),
	Unavailable { reason: String }
}

impl Capability {
	pub fn is_available(&self) -> bool {
		matches!(self, Self::Available(_))
	}

	pub fn into_engine(self) -> Option<Box<dyn SegmentationEngine>> {
		match self {
			Self::Available(engine) => Some(engine),
			Self::Unavailable { .. } => None
		}
	}
}

/// Resolves the capability with the bundled U2-Net engine.
pub fn resolve(config: &EraserConfig) -> Result<Capability> {
	resolve_with(config, |opts| {
		let engine = U2NetEngine::load(opts)?;
		Ok(Box::new(engine) as Box<dyn SegmentationEngine>)
	})
}

/// Same as [`resolve`] with a custom engine loader.
pub fn resolve_with<L>(config: &EraserConfig, load: L) -> Result<Capability>
where
	L: FnOnce(&EngineOptions) -> anyhow::Result<Box<dyn SegmentationEngine>>
{
	if config.strategy == StrategyPreference::Classical {
		return Ok(Capability::Unavailable {
			reason: "classical strategy requested".to_string()
		});
	}

	match load(&config.engine) {
		Ok(engine) => Ok(Capability::Available(engine)),
		Err(e) if config.strategy == StrategyPreference::Learned => {
			Err(EraserError::config(format!("learned engine requested but unavailable: {e:#}")))
		}
		Err(e) => {
			let reason = format!("{e:#}");
			if download::needs_download(&e) {
				tracing::warn!(%reason, "learned engine not installed and downloads are off, using classical segmentation");
			} else {
				tracing::warn!(%reason, "learned engine unavailable, using classical segmentation");
			}
			Ok(Capability::Unavailable { reason })
		}
	}
}

/// Builds the remover for the resolved capability.
pub fn remover(config: &EraserConfig, capability: Capability) -> BackgroundRemover {
	BackgroundRemover::new(capability.into_engine(), config.classical)
}
