//! Background removal for single images.
//!
//! [`BackgroundRemover`] hides the choice between a learned engine (U2-Net
//! family models through ONNX Runtime, see [`u2net`]) and the classical
//! threshold/morphology segmenter in [`classical`]. The choice is made once,
//! from a [`capability::Capability`] resolved at startup.
//!
//! ```no_run
//! use smart_eraser::{EraserConfig, capability, export};
//!
//! # fn main() -> smart_eraser::Result<()> {
//! let config = EraserConfig::default();
//! let remover = capability::remover(&config, capability::resolve(&config)?);
//!
//! let input = export::decode(&std::fs::read("photo.jpg").unwrap())?;
//! let rgba = remover.remove_background(&input)?;
//! let png = export::encode(&rgba, export::OutputFormat::Png)?;
//! # let _ = png;
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod capability;
pub mod classical;
pub mod cli;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod export;
pub mod model;
pub mod pypi;
pub mod runtime;
pub mod strategy;
pub mod u2net;

pub use canonical::{CanonicalImage, PixelMatrix, canonicalize};
pub use classical::{ClassicalParams, ClassicalSegmenter};
pub use config::EraserConfig;
pub use engine::SegmentationEngine;
pub use error::{EraserError, Result};
pub use strategy::{BackgroundRemover, SegmentationStrategy};
