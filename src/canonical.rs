use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};

use crate::error::{EraserError, Result};

/// RGB matrix every segmentation stage works on.
pub type CanonicalImage = RgbImage;

/// A decoded image with 1..=4 interleaved 8-bit channels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMatrix {
	width: u32,
	height: u32,
	channels: usize,
	data: Vec<u8>
}

impl PixelMatrix {
	pub fn new(width: u32, height: u32, channels: usize, data: Vec<u8>) -> Result<Self> {
		let expected = (width as usize)
			.checked_mul(height as usize)
			.and_then(|n| n.checked_mul(channels))
			.ok_or(EraserError::InvalidPixelBuffer {
				expected: usize::MAX,
				actual: data.len()
			})?;
		if data.len() != expected {
			return Err(EraserError::InvalidPixelBuffer {
				expected,
				actual: data.len()
			});
		}
		Ok(Self {
			width,
			height,
			channels,
			data
		})
	}

	pub fn width(&self) -> u32 {
		self.width
	}

	pub fn height(&self) -> u32 {
		self.height
	}

	pub fn channels(&self) -> usize {
		self.channels
	}

	pub fn as_raw(&self) -> &[u8] {
		&self.data
	}

	/// Re-packs into the matching `image` buffer, gray + alpha included.
	pub fn to_dynamic(&self) -> Result<DynamicImage> {
		let (w, h) = (self.width, self.height);
		let data = self.data.clone();
		let img = match self.channels {
			1 => GrayImage::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
			2 => GrayAlphaImage::from_raw(w, h, data).map(DynamicImage::ImageLumaA8),
			3 => RgbImage::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
			4 => RgbaImage::from_raw(w, h, data).map(DynamicImage::ImageRgba8),
			channels => return Err(EraserError::UnsupportedChannelLayout { channels })
		};
		img.ok_or(EraserError::InvalidPixelBuffer {
			expected: w as usize * h as usize * self.channels,
			actual: self.data.len()
		})
	}
}

impl From<DynamicImage> for PixelMatrix {
	/// Keeps the source channel count; deeper sample types are reduced to 8 bits.
	fn from(img: DynamicImage) -> Self {
		let (width, height) = (img.width(), img.height());
		let (channels, data) = match img {
			DynamicImage::ImageLuma8(b) => (1, b.into_raw()),
			DynamicImage::ImageLumaA8(b) => (2, b.into_raw()),
			DynamicImage::ImageRgb8(b) => (3, b.into_raw()),
			DynamicImage::ImageRgba8(b) => (4, b.into_raw()),
			other => match other.color().channel_count() {
				1 => (1, other.to_luma8().into_raw()),
				2 => (2, other.to_luma_alpha8().into_raw()),
				3 => (3, other.to_rgb8().into_raw()),
				_ => (4, other.to_rgba8().into_raw())
			}
		};
		Self {
			width,
			height,
			channels: channels as usize,
			data
		}
	}
}

/// Normalises any supported layout to 3-channel RGB. Existing alpha is discarded.
pub fn canonicalize(image: &PixelMatrix) -> Result<CanonicalImage> {
	let rgb: Vec<u8> = match image.channels {
		1 => image.data.iter().flat_map(|&l| [l, l, l]).collect(),
		3 => image.data.clone(),
		4 => image
			.data
			.chunks_exact(4)
			.flat_map(|px| [px[0], px[1], px[2]])
			.collect(),
		channels => return Err(EraserError::UnsupportedChannelLayout { channels })
	};

	RgbImage::from_raw(image.width, image.height, rgb).ok_or(EraserError::InvalidPixelBuffer {
		expected: image.width as usize * image.height as usize * image.channels,
		actual: image.data.len()
	})
}
