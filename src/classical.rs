//! Threshold + morphology segmentation for plain light backgrounds.
//!
//! Pipeline: BT.601 luma, binary threshold, invert, closing then opening with a
//! square structuring element, alpha composite. Deterministic for a given input.

use image::{GrayImage, Luma, RgbImage, Rgba, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canonical::CanonicalImage;

pub const DEFAULT_THRESHOLD: u8 = 240;
pub const DEFAULT_KERNEL_SIZE: u32 = 5;
/// imageproc saturates distances at 255, so a radius of 255 would cover every pixel.
pub const MAX_KERNEL_SIZE: u32 = 509;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassicalParams {
	/// Pixels whose luma is at or above this value count as background.
	pub threshold: u8,
	/// Side length of the square structuring element. Must be odd.
	pub kernel_size: u32
}

impl Default for ClassicalParams {
	fn default() -> Self {
		Self {
			threshold: DEFAULT_THRESHOLD,
			kernel_size: DEFAULT_KERNEL_SIZE
		}
	}
}

impl ClassicalParams {
	/// Chebyshev radius of the structuring element (5x5 -> 2).
	pub fn kernel_radius(&self) -> Result<u8, SegmentError> {
		if self.kernel_size % 2 == 0 || self.kernel_size > MAX_KERNEL_SIZE {
			return Err(SegmentError::KernelSize(self.kernel_size));
		}
		u8::try_from(self.kernel_size / 2).map_err(|_| SegmentError::KernelSize(self.kernel_size))
	}
}

/// Internal faults. `ClassicalSegmenter::segment` swallows these.
#[derive(Debug, Error)]
pub enum SegmentError {
	#[error("structuring element must be odd and at most 509 wide, got {0}")]
	KernelSize(u32),

	#[error("mask is {mask:?}, image is {image:?}")]
	MaskSize { mask: (u32, u32), image: (u32, u32) },

	#[error("composite buffer does not match {0:?}")]
	Composite((u32, u32))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Segmented,
	/// Segmentation failed; the image was returned fully opaque.
	FellBack
}

#[derive(Debug, Clone, Default)]
pub struct ClassicalSegmenter {
	params: ClassicalParams
}

impl ClassicalSegmenter {
	pub fn new(params: ClassicalParams) -> Self {
		Self { params }
	}

	pub fn params(&self) -> &ClassicalParams {
		&self.params
	}

	/// Never fails: internal faults fall back to a fully opaque copy of `image`.
	pub fn segment(&self, image: &CanonicalImage) -> RgbaImage {
		self.segment_with_outcome(image).0
	}

	pub fn segment_with_outcome(&self, image: &CanonicalImage) -> (RgbaImage, Outcome) {
		let _span = tracing::debug_span!("classical_segment", width = image.width(), height = image.height()).entered();

		match self.try_segment(image) {
			Ok(rgba) => (rgba, Outcome::Segmented),
			Err(e) => {
				tracing::warn!(error = %e, "classical segmentation failed, returning image fully opaque");
				(opaque(image), Outcome::FellBack)
			}
		}
	}

	/// The cleaned single-channel mask: 255 foreground, 0 background.
	pub fn mask(&self, image: &CanonicalImage) -> Result<GrayImage, SegmentError> {
		let radius = self.params.kernel_radius()?;
		if image.width() == 0 || image.height() == 0 {
			return Ok(GrayImage::new(image.width(), image.height()));
		}
		let gray = luma(image);
		let mask = threshold_inverted(&gray, self.params.threshold);

		// Closing fills pinholes inside the subject, opening then drops isolated specks.
		let closed = erode(&dilate(&mask, radius), radius);
		Ok(dilate(&erode(&closed, radius), radius))
	}

	fn try_segment(&self, image: &CanonicalImage) -> Result<RgbaImage, SegmentError> {
		let mask = self.mask(image)?;
		composite(image, &mask)
	}
}

// imageproc's morphology reads "no pixel of the other kind" as distance
// `min(w + h, 255)`, which is within reach of a large kernel on a small image.
// A uniform mask is a fixed point of both operators, so it never reaches imageproc.

fn dilate(mask: &GrayImage, radius: u8) -> GrayImage {
	if mask.pixels().all(|p| p[0] == 0) {
		return mask.clone();
	}
	morphology::dilate(mask, Norm::LInf, radius)
}

fn erode(mask: &GrayImage, radius: u8) -> GrayImage {
	if mask.pixels().all(|p| p[0] == 255) {
		return mask.clone();
	}
	morphology::erode(mask, Norm::LInf, radius)
}

/// ITU-R BT.601 luma in 14-bit fixed point, rounded to nearest:
/// `Y = 0.299 R + 0.587 G + 0.114 B`.
pub fn luma(image: &RgbImage) -> GrayImage {
	const R: u32 = 4899;
	const G: u32 = 9617;
	const B: u32 = 1868;
	const SHIFT: u32 = 14;

	GrayImage::from_fn(image.width(), image.height(), |x, y| {
		let [r, g, b] = image.get_pixel(x, y).0;
		let y = (r as u32 * R + g as u32 * G + b as u32 * B + (1 << (SHIFT - 1))) >> SHIFT;
		Luma([y as u8])
	})
}

/// Bright pixels (`>= threshold`) become 0, everything else 255.
pub fn threshold_inverted(gray: &GrayImage, threshold: u8) -> GrayImage {
	GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
		let bright = if gray.get_pixel(x, y)[0] >= threshold { 255u8 } else { 0 };
		Luma([255 - bright])
	})
}

pub fn composite(image: &RgbImage, mask: &GrayImage) -> Result<RgbaImage, SegmentError> {
	if image.dimensions() != mask.dimensions() {
		return Err(SegmentError::MaskSize {
			mask: mask.dimensions(),
			image: image.dimensions()
		});
	}

	let data: Vec<u8> = image
		.pixels()
		.zip(mask.pixels())
		.flat_map(|(p, a)| [p[0], p[1], p[2], a[0]])
		.collect();

	RgbaImage::from_raw(image.width(), image.height(), data).ok_or(SegmentError::Composite(image.dimensions()))
}

fn opaque(image: &RgbImage) -> RgbaImage {
	RgbaImage::from_fn(image.width(), image.height(), |x, y| {
		let [r, g, b] = image.get_pixel(x, y).0;
		Rgba([r, g, b, 255])
	})
}
