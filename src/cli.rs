use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use crate::config::{Device, EraserConfig, GpuBackend, StrategyPreference};
use crate::error::EraserError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
	/// Use the AI model when it is available, otherwise the threshold method.
	Auto,
	/// Threshold + morphology; for subjects on plain light backgrounds.
	Classical,
	/// Require the AI model.
	Learned
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceArg {
	Cpu,
	/// Falls back to CPU if the GPU provider cannot start.
	Gpu
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GpuBackendArg {
	/// Platform default (Windows: DirectML, Linux: CUDA).
	Auto,
	/// Windows only, uses DirectML (DirectX 12).
	Directml,
	/// NVIDIA CUDA execution provider (Windows x64, Linux x64/aarch64).
	Cuda
}

#[derive(Debug, Parser)]
#[command(name = "smart-eraser", version, about = "Remove the background of an image and save it as a transparent PNG")]
pub struct Args {
	/// Input image path.
	pub input: PathBuf,

	/// Output PNG path (defaults to `<input>_background_removed.png` or `<input>_mask.png`).
	#[arg(short, long)]
	pub output: Option<PathBuf>,

	/// JSON settings file; flags below override it.
	#[arg(short, long)]
	pub config: Option<PathBuf>,

	#[arg(long, value_enum)]
	pub strategy: Option<StrategyArg>,

	/// Brightness (0-255) at or above which a pixel counts as background in classical mode.
	#[arg(long, value_parser = clap::value_parser!(u8))]
	pub threshold: Option<u8>,

	/// Odd side length of the cleanup kernel in classical mode.
	#[arg(long)]
	pub kernel_size: Option<u32>,

	/// Model name (u2netp, u2net, u2net_human_seg, u2net_cloth_seg, silueta, isnet-general-use, isnet-anime).
	#[arg(short = 'm', long)]
	pub model: Option<String>,

	#[arg(long, value_enum)]
	pub device: Option<DeviceArg>,

	/// Only relevant with `--device gpu`.
	#[arg(long, value_enum)]
	pub gpu_backend: Option<GpuBackendArg>,

	/// Binarize the model's mask: alpha becomes 0 or 255 based on this threshold (0-255).
	#[arg(long, value_parser = clap::value_parser!(u8))]
	pub mask_threshold: Option<u8>,

	/// Allow downloading ONNX Runtime and the model if they are not cached.
	#[arg(short = 'y', long)]
	pub yes: bool,

	/// If the AI model fails on this image, retry with the classical method instead of failing.
	#[arg(long)]
	pub fallback_to_classical: bool,

	/// Write just the mask (grayscale PNG), not the RGBA cutout.
	#[arg(long)]
	pub only_mask: bool,

	/// Debug logging (RUST_LOG takes precedence).
	#[arg(short, long)]
	pub verbose: bool
}

impl Args {
	/// Applies flags on top of `base`.
	pub fn apply(&self, mut base: EraserConfig) -> EraserConfig {
		if let Some(s) = self.strategy {
			base.strategy = match s {
				StrategyArg::Auto => StrategyPreference::Auto,
				StrategyArg::Classical => StrategyPreference::Classical,
				StrategyArg::Learned => StrategyPreference::Learned
			};
		}
		if let Some(t) = self.threshold {
			base.classical.threshold = t;
		}
		if let Some(k) = self.kernel_size {
			base.classical.kernel_size = k;
		}
		if let Some(m) = &self.model {
			base.engine.model = m.clone();
		}
		if let Some(d) = self.device {
			base.engine.device = match d {
				DeviceArg::Cpu => Device::Cpu,
				DeviceArg::Gpu => Device::Gpu
			};
		}
		if let Some(b) = self.gpu_backend {
			base.engine.gpu_backend = match b {
				GpuBackendArg::Auto => GpuBackend::Auto,
				GpuBackendArg::Directml => GpuBackend::Directml,
				GpuBackendArg::Cuda => GpuBackend::Cuda
			};
		}
		if self.mask_threshold.is_some() {
			base.engine.mask_threshold = self.mask_threshold;
		}
		if self.yes {
			base.engine.allow_download = true;
		}
		base
	}

	pub fn output_path(&self) -> PathBuf {
		match &self.output {
			Some(p) => p.clone(),
			None => default_output(&self.input, self.only_mask)
		}
	}
}

/// What the shell prints for a failed run. Details only go to the debug log.
pub fn failure_message(err: &anyhow::Error) -> String {
	const DETAILS: &str = "Run with --verbose for details.";
	match err.downcast_ref::<EraserError>() {
		Some(e @ EraserError::Config { .. }) => {
			format!("{} Check the settings file and flags. {DETAILS}", e.user_message())
		}
		Some(e) => format!("{} {DETAILS}", e.user_message()),
		None => format!("The image file could not be read or written. {DETAILS}")
	}
}

fn default_output(input: &Path, only_mask: bool) -> PathBuf {
	let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
	let suffix = if only_mask { "_mask.png" } else { "_background_removed.png" };
	input.with_file_name(format!("{stem}{suffix}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(args: &[&str]) -> Args {
		Args::try_parse_from(std::iter::once("smart-eraser").chain(args.iter().copied())).unwrap()
	}

	#[test]
	fn default_output_sits_next_to_input() {
		let a = parse(&["photos/cat.jpg"]);
		assert_eq!(a.output_path(), PathBuf::from("photos/cat_background_removed.png"));
		let a = parse(&["photos/cat.jpg", "--only-mask"]);
		assert_eq!(a.output_path(), PathBuf::from("photos/cat_mask.png"));
		let a = parse(&["cat.jpg", "-o", "x.png"]);
		assert_eq!(a.output_path(), PathBuf::from("x.png"));
	}

	#[test]
	fn flags_override_config() {
		let a = parse(&[
			"in.png",
			"--strategy",
			"learned",
			"--threshold",
			"200",
			"--kernel-size",
			"7",
			"-m",
			"isnet-anime",
			"--device",
			"gpu",
			"--gpu-backend",
			"cuda",
			"--mask-threshold",
			"100",
			"-y"
		]);
		let cfg = a.apply(EraserConfig::default());
		assert_eq!(cfg.strategy, StrategyPreference::Learned);
		assert_eq!(cfg.classical.threshold, 200);
		assert_eq!(cfg.classical.kernel_size, 7);
		assert_eq!(cfg.engine.model, "isnet-anime");
		assert_eq!(cfg.engine.device, Device::Gpu);
		assert_eq!(cfg.engine.gpu_backend, GpuBackend::Cuda);
		assert_eq!(cfg.engine.mask_threshold, Some(100));
		assert!(cfg.engine.allow_download);
	}

	#[test]
	fn absent_flags_keep_config() {
		let mut base = EraserConfig::default();
		base.classical.threshold = 222;
		base.engine.allow_download = true;
		let cfg = parse(&["in.png"]).apply(base.clone());
		assert_eq!(cfg, base);
	}

	#[test]
	fn failure_message_hides_paths() {
		let config = anyhow::Error::new(EraserError::config(
			"learned engine requested but unavailable: onnxruntime is not cached under /home/me/.cache"
		));
		let msg = failure_message(&config);
		assert!(msg.starts_with("Invalid settings."));
		assert!(!msg.contains("/home/me"));

		let io = anyhow::anyhow!("No such file").context("open image: /home/me/secret.png");
		assert!(!failure_message(&io).contains("secret"));

		let engine = anyhow::Error::new(EraserError::engine(anyhow::anyhow!("CUDA OOM")));
		assert!(failure_message(&engine).starts_with("Background removal failed"));
	}

	#[test]
	fn threshold_must_fit_a_byte() {
		assert!(Args::try_parse_from(["smart-eraser", "in.png", "--threshold", "300"]).is_err());
	}
}
