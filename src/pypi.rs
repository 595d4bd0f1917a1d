//! Finds the ONNX Runtime wheel for this platform through the PyPI JSON API.

use std::collections::HashMap;
use std::io::Read;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::download::{self, DownloadError};

/// A wheel picked for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wheel {
	pub version: String,
	pub filename: String,
	pub url: String,
	pub sha256: String
}

// Only the fields wheel selection reads.
#[derive(Deserialize)]
struct Index {
	info: IndexInfo,
	releases: HashMap<String, Vec<IndexFile>>
}

#[derive(Deserialize)]
struct IndexInfo {
	version: String
}

#[derive(Deserialize)]
struct IndexFile {
	filename: String,
	url: String,
	packagetype: String,
	digests: IndexDigests
}

#[derive(Deserialize)]
struct IndexDigests {
	sha256: String
}

pub fn latest_wheel(package: &str, os: &str, arch: &str) -> Result<Wheel> {
	let url = format!("https://pypi.org/pypi/{package}/json");
	let (mut body, _) = download::open(&url)?;
	let mut json = String::new();
	body.read_to_string(&mut json)
		.map_err(|source| DownloadError::Io { target: url.clone(), source })?;
	select_wheel(&json, os, arch).with_context(|| format!("pick {package} wheel"))
}

/// Wheel of the latest release in a PyPI index document whose platform tag fits `os`/`arch`.
pub fn select_wheel(index_json: &str, os: &str, arch: &str) -> Result<Wheel> {
	let index: Index = serde_json::from_str(index_json).context("parse pypi json")?;
	let (family, arches) =
		platform_tags(os, arch).with_context(|| format!("no onnxruntime wheels are published for {os}/{arch}"))?;

	let version = &index.info.version;
	let files = index
		.releases
		.get(version)
		.with_context(|| format!("missing releases entry for version {version}"))?;

	files
		.iter()
		.filter(|f| f.packagetype == "bdist_wheel" && accepts(&f.filename, family, arches))
		.min_by(|a, b| a.filename.cmp(&b.filename))
		.map(|f| Wheel {
			version: version.clone(),
			filename: f.filename.clone(),
			url: f.url.clone(),
			sha256: f.digests.sha256.clone()
		})
		.with_context(|| format!("no wheel found for {os}/{arch} in {version}"))
}

/// Platform tag family and the architecture suffixes that can run on `os`/`arch`.
fn platform_tags(os: &str, arch: &str) -> Option<(&'static str, &'static [&'static str])> {
	match (os, arch) {
		("windows", "x86_64") => Some(("win", &["amd64"])),
		("windows", "aarch64") => Some(("win", &["arm64"])),
		("linux", "x86_64") => Some(("manylinux", &["x86_64"])),
		("linux", "aarch64") => Some(("manylinux", &["aarch64"])),
		("macos", "x86_64") => Some(("macosx", &["x86_64", "universal2"])),
		("macos", "aarch64") => Some(("macosx", &["arm64", "universal2"])),
		_ => None
	}
}

// Python tags don't matter, only the native library inside. The platform part may
// be a compressed set (`manylinux_2_27_x86_64.manylinux_2_28_x86_64`).
fn accepts(filename: &str, family: &str, arches: &[&str]) -> bool {
	let Some(platform) = filename.strip_suffix(".whl").and_then(|s| s.rsplit('-').next()) else {
		return false;
	};
	platform
		.split('.')
		.any(|tag| tag.starts_with(family) && arches.iter().any(|a| tag.ends_with(&format!("_{a}"))))
}
