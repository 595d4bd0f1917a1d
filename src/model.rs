use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::download::{self, DownloadError};

pub const DEFAULT_MODEL: &str = "u2netp";

const RELEASE_BASE: &str = "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
	pub name: &'static str,
	/// Square edge the network expects.
	pub input_size: u32
}

impl ModelSpec {
	pub fn url(&self) -> String {
		format!("{RELEASE_BASE}/{}.onnx", self.name)
	}
}

// ISNet variants are trained at 1024; the U2-Net family at 320.
const MODELS: &[ModelSpec] = &[
	ModelSpec { name: "u2netp", input_size: 320 },
	ModelSpec { name: "u2net", input_size: 320 },
	ModelSpec { name: "u2net_human_seg", input_size: 320 },
	ModelSpec { name: "u2net_cloth_seg", input_size: 320 },
	ModelSpec { name: "silueta", input_size: 320 },
	ModelSpec { name: "isnet-general-use", input_size: 1024 },
	ModelSpec { name: "isnet-anime", input_size: 1024 }
];

pub fn lookup(name: &str) -> Result<&'static ModelSpec> {
	let key = name.trim().to_ascii_lowercase();
	match MODELS.iter().find(|m| m.name == key) {
		Some(m) => Ok(m),
		None => {
			let known: Vec<&str> = MODELS.iter().map(|m| m.name).collect();
			bail!("unsupported model: {key} (supported: {})", known.join(", "))
		}
	}
}

pub struct ModelInstall {
	pub path: PathBuf,
	pub input_size: u32
}

pub struct DownloadProgress<'a> {
	pub url: &'a str,
	pub progress: download::Progress
}

pub fn model_path(spec: &ModelSpec) -> Result<PathBuf> {
	Ok(models_dir()?.join(format!("{}.onnx", spec.name)))
}

pub fn ensure_model(
	name: &str,
	allow_download: bool,
	mut on_progress: impl FnMut(DownloadProgress<'_>)
) -> Result<ModelInstall> {
	let spec = lookup(name)?;
	let path = model_path(spec)?;

	if !path.exists() {
		let url = spec.url();
		if !allow_download {
			return Err(DownloadError::disabled(format!("model {} ({})", spec.name, path.display())).into());
		}

		tracing::info!(model = spec.name, %url, "downloading model");
		let bytes = download::fetch(&url, &path, None, |p| on_progress(DownloadProgress { url: &url, progress: p }))
			.with_context(|| format!("download model {}", spec.name))?;
		tracing::info!(model = spec.name, bytes, "model cached");
	}

	Ok(ModelInstall {
		path,
		input_size: spec.input_size
	})
}

/// `$U2NET_HOME` if set (shared with rembg installs), else the user cache.
fn models_dir() -> Result<PathBuf> {
	if let Some(home) = std::env::var_os("U2NET_HOME") {
		return Ok(PathBuf::from(home));
	}
	Ok(cache_base_dir()?.join("models"))
}

pub(crate) fn cache_base_dir() -> Result<PathBuf> {
	let dirs = directories::ProjectDirs::from("rs", "smart-eraser", "smart-eraser")
		.ok_or_else(|| anyhow::anyhow!("unable to resolve user cache directory"))?;
	Ok(dirs.cache_dir().to_path_buf())
}
