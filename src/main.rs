use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use smart_eraser::export::{self, OutputFormat};
use smart_eraser::{BackgroundRemover, EraserConfig, EraserError, capability, cli};

fn main() {
	// stdout stays clean; logs and errors go to stderr.
	if let Err(e) = run() {
		tracing::debug!("{e:?}");
		eprintln!("{}", cli::failure_message(&e));
		std::process::exit(1);
	}
}

fn run() -> Result<()> {
	let args = cli::Args::parse();
	init_tracing(args.verbose);

	let base = match &args.config {
		Some(path) => EraserConfig::from_json_file(path)?,
		None => EraserConfig::default()
	};
	let config = args.apply(base);
	config.validate()?;

	let remover = capability::remover(&config, capability::resolve(&config)?);
	tracing::info!(strategy = remover.strategy_name(), "segmentation strategy selected");

	let bytes = fs::read(&args.input).with_context(|| format!("open image: {}", args.input.display()))?;
	let input = export::decode(&bytes)?;

	let rgba = match remover.remove_background(&input) {
		Err(e @ EraserError::SegmentationEngine { .. }) if args.fallback_to_classical => {
			tracing::warn!(error = %e, "engine failed, retrying with classical segmentation");
			BackgroundRemover::classical(config.classical).remove_background(&input)?
		}
		other => other?
	};

	let png = if args.only_mask {
		export::encode_mask(&rgba)?
	} else {
		export::encode(&rgba, OutputFormat::Png)?
	};

	let out_path = args.output_path();
	write_replacing(&out_path, &png)?;
	tracing::info!(path = %out_path.display(), bytes = png.len(), "saved");
	Ok(())
}

fn init_tracing(verbose: bool) {
	let default = if verbose { "smart_eraser=debug,info" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

// A failed write leaves any previous result at `path` untouched.
fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;
	}

	let mut tmp: OsString = path.as_os_str().to_owned();
	tmp.push(".part");
	let tmp = PathBuf::from(tmp);

	fs::write(&tmp, bytes).with_context(|| format!("write image: {}", tmp.display()))?;
	fs::rename(&tmp, path).with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
	Ok(())
}
