use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbaImage};

use crate::canonical::PixelMatrix;
use crate::error::{EraserError, Result};

/// Output encodings. Only lossless, alpha-preserving formats belong here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
	#[default]
	Png
}

impl OutputFormat {
	pub fn mime_type(self) -> &'static str {
		match self {
			Self::Png => "image/png"
		}
	}

	pub fn extension(self) -> &'static str {
		match self {
			Self::Png => "png"
		}
	}
}

pub fn encode(result: &RgbaImage, format: OutputFormat) -> Result<Vec<u8>> {
	encode_dynamic(&DynamicImage::ImageRgba8(result.clone()), format)
}

/// Alpha channel of `result` as a grayscale PNG.
pub fn encode_mask(result: &RgbaImage) -> Result<Vec<u8>> {
	let mask = GrayImage::from_fn(result.width(), result.height(), |x, y| image::Luma([result.get_pixel(x, y)[3]]));
	encode_dynamic(&DynamicImage::ImageLuma8(mask), OutputFormat::Png)
}

pub(crate) fn encode_dynamic(img: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>> {
	let (width, height) = (img.width(), img.height());
	if width == 0 || height == 0 {
		return Err(EraserError::Encoding {
			width,
			height,
			reason: "image has no pixels".to_string()
		});
	}

	let image_format = match format {
		OutputFormat::Png => ImageFormat::Png
	};
	let mut buf = Vec::new();
	img.write_to(&mut Cursor::new(&mut buf), image_format)
		.map_err(|e| EraserError::Encoding {
			width,
			height,
			reason: e.to_string()
		})?;
	Ok(buf)
}

/// Decodes caller-supplied bytes into a pixel matrix, keeping the channel layout.
pub fn decode(bytes: &[u8]) -> Result<PixelMatrix> {
	let img = image::load_from_memory(bytes).map_err(|source| EraserError::Decode { source })?;
	Ok(PixelMatrix::from(img))
}

#[cfg(test)]
mod tests {
	use image::Rgba;

	use super::*;

	#[test]
	fn png_round_trip_is_lossless() {
		let img = RgbaImage::from_fn(7, 5, |x, y| Rgba([x as u8 * 30, y as u8 * 40, 200, if x % 2 == 0 { 0 } else { 255 }]));
		let bytes = encode(&img, OutputFormat::Png).unwrap();
		assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");

		let back = image::load_from_memory(&bytes).unwrap().to_rgba8();
		assert_eq!(back, img);
	}

	#[test]
	fn degenerate_dimensions_fail() {
		for (w, h) in [(0, 0), (0, 4), (4, 0)] {
			let err = encode(&RgbaImage::new(w, h), OutputFormat::Png).unwrap_err();
			assert!(matches!(err, EraserError::Encoding { width, height, .. } if (width, height) == (w, h)));
		}
	}

	#[test]
	fn mask_png_is_alpha_channel() {
		let img = RgbaImage::from_fn(3, 1, |x, _| Rgba([9, 9, 9, [0, 128, 255][x as usize]]));
		let bytes = encode_mask(&img).unwrap();
		let back = image::load_from_memory(&bytes).unwrap();
		assert_eq!(back.color(), image::ColorType::L8);
		assert_eq!(back.to_luma8().as_raw(), &[0, 128, 255]);
	}

	#[test]
	fn decode_keeps_channels() {
		let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 3, image::Luma([40])));
		let bytes = encode_dynamic(&gray, OutputFormat::Png).unwrap();
		let m = decode(&bytes).unwrap();
		assert_eq!((m.width(), m.height(), m.channels()), (2, 3, 1));
	}

	#[test]
	fn decode_rejects_garbage() {
		assert!(matches!(decode(b"not an image"), Err(EraserError::Decode { .. })));
	}
}
