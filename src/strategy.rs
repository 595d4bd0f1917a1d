use image::RgbaImage;

use crate::canonical::{PixelMatrix, canonicalize};
use crate::classical::{ClassicalParams, ClassicalSegmenter};
use crate::engine::SegmentationEngine;
use crate::error::{EraserError, Result};
use crate::export::{OutputFormat, encode_dynamic};

pub trait SegmentationStrategy {
	fn name(&self) -> &str;

	fn segment(&self, image: &PixelMatrix) -> Result<RgbaImage>;
}

pub struct ClassicalStrategy {
	segmenter: ClassicalSegmenter
}

impl ClassicalStrategy {
	pub fn new(params: ClassicalParams) -> Self {
		Self {
			segmenter: ClassicalSegmenter::new(params)
		}
	}
}

impl SegmentationStrategy for ClassicalStrategy {
	fn name(&self) -> &str {
		"classical"
	}

	// Only the channel layout can fail here; segmentation itself never does.
	fn segment(&self, image: &PixelMatrix) -> Result<RgbaImage> {
		let rgb = canonicalize(image)?;
		Ok(self.segmenter.segment(&rgb))
	}
}

pub struct LearnedStrategy {
	engine: Box<dyn SegmentationEngine>
}

impl LearnedStrategy {
	pub fn new(engine: Box<dyn SegmentationEngine>) -> Self {
		Self { engine }
	}
}

impl SegmentationStrategy for LearnedStrategy {
	fn name(&self) -> &str {
		self.engine.name()
	}

	fn segment(&self, image: &PixelMatrix) -> Result<RgbaImage> {
		let _span = tracing::debug_span!("learned_segment", engine = self.engine.name()).entered();

		// The engine sees the whole image as PNG, original channels included.
		let input = encode_dynamic(&image.to_dynamic()?, OutputFormat::Png)?;
		let output = self.engine.remove(&input).map_err(EraserError::engine)?;
		let decoded = image::load_from_memory(&output)
			.map_err(|e| EraserError::engine(anyhow::Error::new(e).context("decode engine output")))?;
		Ok(decoded.to_rgba8())
	}
}

/// Uniform `segment(image) -> RGBA` entry point. The strategy is fixed at construction.
pub struct BackgroundRemover {
	strategy: Box<dyn SegmentationStrategy>
}

impl BackgroundRemover {
	/// Learned strategy when an engine is supplied, classical otherwise.
	pub fn new(engine: Option<Box<dyn SegmentationEngine>>, params: ClassicalParams) -> Self {
		let strategy: Box<dyn SegmentationStrategy> = match engine {
			Some(engine) => Box::new(LearnedStrategy::new(engine)),
			None => Box::new(ClassicalStrategy::new(params))
		};
		tracing::debug!(strategy = strategy.name(), "background remover ready");
		Self { strategy }
	}

	pub fn classical(params: ClassicalParams) -> Self {
		Self::new(None, params)
	}

	pub fn with_strategy(strategy: Box<dyn SegmentationStrategy>) -> Self {
		Self { strategy }
	}

	pub fn strategy_name(&self) -> &str {
		self.strategy.name()
	}

	/// Reprocesses from scratch on every call. Engine errors propagate untouched.
	pub fn remove_background(&self, image: &PixelMatrix) -> Result<RgbaImage> {
		self.strategy.segment(image)
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;
	use std::rc::Rc;

	use image::{DynamicImage, Rgb, RgbImage, Rgba};

	use super::*;

	fn white(w: u32, h: u32) -> PixelMatrix {
		PixelMatrix::from(DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))))
	}

	#[test]
	fn no_engine_means_classical() {
		let remover = BackgroundRemover::new(None, ClassicalParams::default());
		assert_eq!(remover.strategy_name(), "classical");

		let out = remover.remove_background(&white(6, 4)).unwrap();
		assert_eq!(out.dimensions(), (6, 4));
		assert!(out.pixels().all(|p| p[3] == 0));
	}

	#[test]
	fn engine_receives_png_and_result_is_decoded() {
		let engine = |input: &[u8]| -> anyhow::Result<Vec<u8>> {
			let img = image::load_from_memory(input)?;
			assert_eq!(img.color(), image::ColorType::Rgb8);
			let out = RgbaImage::from_pixel(img.width(), img.height(), Rgba([1, 2, 3, 77]));
			Ok(crate::export::encode(&out, OutputFormat::Png)?)
		};
		let remover = BackgroundRemover::new(Some(Box::new(engine)), ClassicalParams::default());
		assert_eq!(remover.strategy_name(), "callback");

		let out = remover.remove_background(&white(3, 3)).unwrap();
		assert!(out.pixels().all(|p| p.0 == [1, 2, 3, 77]));
	}

	#[test]
	fn engine_failure_is_not_masked() {
		let calls = Rc::new(Cell::new(0));
		let seen = calls.clone();
		let engine = move |_: &[u8]| -> anyhow::Result<Vec<u8>> {
			seen.set(seen.get() + 1);
			anyhow::bail!("model not loaded")
		};
		let remover = BackgroundRemover::new(Some(Box::new(engine)), ClassicalParams::default());

		let err = remover.remove_background(&white(2, 2)).unwrap_err();
		assert!(matches!(err, EraserError::SegmentationEngine { .. }));
		assert_eq!(calls.get(), 1);
	}

	#[test]
	fn garbage_engine_output_is_an_engine_error() {
		let engine = |_: &[u8]| -> anyhow::Result<Vec<u8>> { Ok(b"definitely not png".to_vec()) };
		let remover = BackgroundRemover::new(Some(Box::new(engine)), ClassicalParams::default());
		assert!(matches!(
			remover.remove_background(&white(2, 2)),
			Err(EraserError::SegmentationEngine { .. })
		));
	}

	#[test]
	fn gray_alpha_input_reaches_the_engine() {
		let engine = |input: &[u8]| -> anyhow::Result<Vec<u8>> {
			let img = image::load_from_memory(input)?;
			assert_eq!(img.color(), image::ColorType::La8);
			let out = RgbaImage::from_pixel(img.width(), img.height(), Rgba([4, 4, 4, 200]));
			Ok(crate::export::encode(&out, OutputFormat::Png)?)
		};
		let la = image::ImageBuffer::from_pixel(5, 2, image::LumaA([30u8, 128]));
		let input = PixelMatrix::from(DynamicImage::ImageLumaA8(la));
		let remover = BackgroundRemover::new(Some(Box::new(engine)), ClassicalParams::default());

		let out = remover.remove_background(&input).unwrap();
		assert_eq!(out.dimensions(), (5, 2));
		assert!(out.pixels().all(|p| p.0 == [4, 4, 4, 200]));
	}

	#[test]
	fn classical_rejects_unsupported_layout() {
		let m = PixelMatrix::new(1, 1, 2, vec![0, 0]).unwrap();
		let remover = BackgroundRemover::classical(ClassicalParams::default());
		assert!(matches!(
			remover.remove_background(&m),
			Err(EraserError::UnsupportedChannelLayout { channels: 2 })
		));
	}
}
