use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbImage, Rgba, RgbaImage};
use ndarray::{Array4, ArrayViewD};
use ort::ep;
use ort::session::Session;
use ort::value::TensorRef;

use crate::config::EngineOptions;
use crate::engine::SegmentationEngine;
use crate::runtime::{self, ExecutionProvider};
use crate::{download, model};

/// rembg-compatible engine: a U2-Net family model run through ONNX Runtime.
pub struct U2NetEngine {
	name: String,
	input_size: u32,
	mask_threshold: Option<u8>,
	session: Mutex<Session>
}

impl U2NetEngine {
	/// Resolves runtime and model (downloading only if `opts.allow_download`) and builds a session.
	pub fn load(opts: &EngineOptions) -> Result<Self> {
		let plan = runtime::plan(opts.device, opts.gpu_backend)?;
		let rt = runtime::ensure_runtime(&plan, opts.allow_download, download::log_progress)?;
		runtime::init_ort(&rt)?;

		let install = model::ensure_model(&opts.model, opts.allow_download, |p| download::log_progress(p.url, p.progress))?;
		let session = build_session(&install.path, plan.ep).with_context(|| format!("load model: {}", install.path.display()))?;

		tracing::info!(model = %opts.model, ep = ?plan.ep, "learned engine ready");
		Ok(Self {
			name: model::lookup(&opts.model)?.name.to_string(),
			input_size: install.input_size,
			mask_threshold: opts.mask_threshold,
			session: Mutex::new(session)
		})
	}

	pub fn predict_mask(&self, img: &RgbImage) -> Result<GrayImage> {
		let _span = tracing::debug_span!("u2net_predict", model = %self.name).entered();

		let size = self.input_size;
		let resized = image::imageops::resize(img, size, size, FilterType::Lanczos3);
		let input = to_nchw(&resized);

		let mut session = self.session.lock().map_err(|_| anyhow::anyhow!("session lock poisoned"))?;
		let outputs = session
			.run(ort::inputs![TensorRef::from_array_view(&input)?])
			.context("run inference")?;
		if outputs.len() == 0 {
			bail!("model produced no outputs");
		}
		let out = outputs[0].try_extract_array::<f32>().context("extract output tensor")?;
		let small = logits_to_mask(out)?;

		Ok(image::imageops::resize(&small, img.width(), img.height(), FilterType::Lanczos3))
	}
}

impl SegmentationEngine for U2NetEngine {
	fn name(&self) -> &str {
		&self.name
	}

	fn remove(&self, input: &[u8]) -> Result<Vec<u8>> {
		let rgb = image::load_from_memory(input).context("decode input image")?.to_rgb8();
		let mask = self.predict_mask(&rgb)?;
		let out = apply_alpha(&rgb, &mask, self.mask_threshold)?;

		let mut buf = Vec::new();
		DynamicImage::ImageRgba8(out)
			.write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
			.context("encode png")?;
		Ok(buf)
	}
}

fn build_session(model_path: &Path, provider: Option<ExecutionProvider>) -> Result<Session> {
	let cpu = || -> Result<Session> {
		Session::builder()
			.context("create ORT session builder")?
			.commit_from_file(model_path)
			.with_context(|| format!("load onnx model: {}", model_path.display()))
	};

	let accelerated = match provider {
		None => return cpu(),
		Some(ExecutionProvider::DirectML) => Session::builder()
			.context("create ORT session builder")?
			.with_execution_providers([ep::DirectML::default().build()])
			.context("configure DirectML EP")?
			.commit_from_file(model_path),
		Some(ExecutionProvider::Cuda) => Session::builder()
			.context("create ORT session builder")?
			.with_execution_providers([ep::CUDA::default().build()])
			.context("configure CUDA EP")?
			.commit_from_file(model_path)
	};

	match accelerated {
		Ok(session) => Ok(session),
		Err(e) => {
			tracing::warn!(?provider, error = %e, "GPU execution provider failed to initialise, falling back to CPU");
			cpu()
		}
	}
}

/// NCHW float tensor scaled to [-1, 1], the usual U2-Net export convention.
fn to_nchw(img: &RgbImage) -> Array4<f32> {
	let (w, h) = (img.width() as usize, img.height() as usize);
	Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
		let v = img.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
		(v - 0.5) / 0.5
	})
}

/// `(1, 1, H, W)` model output to an 8-bit mask.
fn logits_to_mask(out: ArrayViewD<'_, f32>) -> Result<GrayImage> {
	let shape = out.shape();
	if shape.len() != 4 {
		bail!("unexpected output rank: {} (expected 4)", shape.len());
	}
	let (n, c, h, w) = (shape[0], shape[1], shape[2], shape[3]);
	if n != 1 || c != 1 {
		bail!("unexpected output shape {shape:?} (expected [1, 1, H, W])");
	}

	// Some exports already emit probabilities; a second sigmoid would squash them into [0.5, 0.73].
	let (min_v, max_v) = out
		.iter()
		.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
	let is_prob = min_v >= -0.01 && max_v <= 1.01;

	Ok(GrayImage::from_fn(w as u32, h as u32, |x, y| {
		let v = out[[0, 0, y as usize, x as usize]];
		let p = if is_prob { v } else { 1.0 / (1.0 + (-v).exp()) };
		Luma([(p.clamp(0.0, 1.0) * 255.0).round() as u8])
	}))
}

fn apply_alpha(img: &RgbImage, mask: &GrayImage, threshold: Option<u8>) -> Result<RgbaImage> {
	if img.dimensions() != mask.dimensions() {
		bail!("mask is {:?}, image is {:?}", mask.dimensions(), img.dimensions());
	}
	Ok(RgbaImage::from_fn(img.width(), img.height(), |x, y| {
		let [r, g, b] = img.get_pixel(x, y).0;
		let a = mask.get_pixel(x, y)[0];
		let a = match threshold {
			Some(t) if a >= t => 255,
			Some(_) => 0,
			None => a
		};
		Rgba([r, g, b, a])
	}))
}

#[cfg(test)]
mod tests {
	use image::Rgb;
	use ndarray::Array;

	use super::*;

	#[test]
	fn tensor_is_scaled_and_channel_major() {
		let img = RgbImage::from_fn(2, 1, |x, _| if x == 0 { Rgb([0, 255, 0]) } else { Rgb([255, 0, 255]) });
		let t = to_nchw(&img);
		assert_eq!(t.shape(), &[1, 3, 1, 2]);
		assert_eq!(t[[0, 0, 0, 0]], -1.0);
		assert_eq!(t[[0, 1, 0, 0]], 1.0);
		assert_eq!(t[[0, 0, 0, 1]], 1.0);
		assert_eq!(t[[0, 2, 0, 1]], 1.0);
	}

	#[test]
	fn probabilities_are_not_squashed() {
		let out = Array::from_shape_vec((1, 1, 1, 3), vec![0.0f32, 0.5, 1.0]).unwrap().into_dyn();
		let mask = logits_to_mask(out.view()).unwrap();
		assert_eq!(mask.as_raw(), &[0, 128, 255]);
	}

	#[test]
	fn logits_go_through_sigmoid() {
		let out = Array::from_shape_vec((1, 1, 1, 3), vec![-20.0f32, 0.0, 20.0]).unwrap().into_dyn();
		let mask = logits_to_mask(out.view()).unwrap();
		assert_eq!(mask.as_raw(), &[0, 128, 255]);
	}

	#[test]
	fn wrong_output_shape_is_rejected() {
		let out = Array::<f32, _>::zeros((1, 2, 4, 4)).into_dyn();
		assert!(logits_to_mask(out.view()).is_err());
		let out = Array::<f32, _>::zeros((4, 4)).into_dyn();
		assert!(logits_to_mask(out.view()).is_err());
	}

	#[test]
	fn mask_threshold_binarizes_alpha() {
		let img = RgbImage::from_pixel(3, 1, Rgb([5, 6, 7]));
		let mask = GrayImage::from_raw(3, 1, vec![10, 127, 128]).unwrap();

		let soft = apply_alpha(&img, &mask, None).unwrap();
		assert_eq!(soft.pixels().map(|p| p[3]).collect::<Vec<_>>(), vec![10, 127, 128]);

		let hard = apply_alpha(&img, &mask, Some(128)).unwrap();
		assert_eq!(hard.pixels().map(|p| p[3]).collect::<Vec<_>>(), vec![0, 0, 255]);
		assert_eq!(hard.get_pixel(0, 0).0[..3], [5, 6, 7]);
	}
}
