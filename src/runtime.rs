//! Locates (or fetches) the ONNX Runtime shared library and loads it once per process.

use std::{
	env,
	io::{Read, Write},
	path::{Path, PathBuf},
	sync::OnceLock
};

use anyhow::{Context, Result, bail};

use crate::config::{Device, GpuBackend};
use crate::download::{self, DownloadError};
use crate::{model, pypi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
	DirectML,
	Cuda
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePlan {
	/// PyPI package carrying the native library.
	pub package: &'static str,
	pub ep: Option<ExecutionProvider>
}

pub struct RuntimeInstall {
	pub main_lib: PathBuf
}

static ORT_MAIN_LIB: OnceLock<PathBuf> = OnceLock::new();

pub fn plan(device: Device, backend: GpuBackend) -> Result<RuntimePlan> {
	plan_for(env::consts::OS, env::consts::ARCH, device, backend)
}

fn plan_for(os: &str, arch: &str, device: Device, backend: GpuBackend) -> Result<RuntimePlan> {
	if device == Device::Cpu {
		return Ok(RuntimePlan {
			package: "onnxruntime",
			ep: None
		});
	}

	let backend = match (backend, os) {
		(GpuBackend::Auto, "windows") => GpuBackend::Directml,
		(GpuBackend::Auto, "linux") => GpuBackend::Cuda,
		(other, _) => other
	};

	match backend {
		GpuBackend::Directml if os == "windows" => Ok(RuntimePlan {
			package: "onnxruntime-directml",
			ep: Some(ExecutionProvider::DirectML)
		}),
		GpuBackend::Directml => bail!("DirectML backend is only supported on Windows"),
		GpuBackend::Cuda => {
			let ok = (os == "windows" && arch == "x86_64") || (os == "linux" && (arch == "x86_64" || arch == "aarch64"));
			if !ok {
				bail!("CUDA backend not supported on this platform ({os}/{arch})");
			}
			Ok(RuntimePlan {
				package: "onnxruntime-gpu",
				ep: Some(ExecutionProvider::Cuda)
			})
		}
		GpuBackend::Auto => bail!("GPU backend not supported on this platform ({os}/{arch})")
	}
}

/// Returns the cached runtime library, downloading the platform wheel first if allowed.
pub fn ensure_runtime(
	plan: &RuntimePlan,
	allow_download: bool,
	mut on_progress: impl FnMut(&str, download::Progress)
) -> Result<RuntimeInstall> {
	let os = env::consts::OS;
	let pkg_dir = model::cache_base_dir()?.join("onnxruntime").join(plan.package);

	if let Some(main_lib) = find_installed_lib(os, &pkg_dir)? {
		tracing::debug!(lib = %main_lib.display(), "using cached onnxruntime");
		return Ok(RuntimeInstall { main_lib });
	}
	if !allow_download {
		return Err(DownloadError::disabled(format!("onnxruntime ({}) under {}", plan.package, pkg_dir.display())).into());
	}

	let wheel = pypi::latest_wheel(plan.package, os, env::consts::ARCH)?;

	let base = pkg_dir.join(&wheel.version);
	let wheel_path = base.join(&wheel.filename);
	let lib_dir = base.join("lib");

	if !wheel_path.exists() {
		tracing::info!(package = plan.package, version = %wheel.version, "downloading onnxruntime");
		download::fetch(&wheel.url, &wheel_path, Some(&wheel.sha256), |p| on_progress(&wheel.url, p))
			.with_context(|| format!("download wheel: {}", wheel.filename))?;
	}

	extract_libs(&wheel_path, &lib_dir)?;

	let main_lib = find_main_lib(os, &lib_dir)
		.ok_or_else(|| anyhow::anyhow!("no onnxruntime library in {} after extraction", lib_dir.display()))?;
	Ok(RuntimeInstall { main_lib })
}

/// Loads the library into `ort`. A second call must name the same library.
pub fn init_ort(rt: &RuntimeInstall) -> Result<()> {
	if let Some(p) = ORT_MAIN_LIB.get() {
		if p != &rt.main_lib {
			bail!(
				"onnxruntime is already initialized with {}; restart to switch to {}",
				p.display(),
				rt.main_lib.display()
			);
		}
		return Ok(());
	}

	// Must happen before any `Session` is built.
	let builder = ort::init_from(&rt.main_lib).with_context(|| format!("load onnxruntime from {}", rt.main_lib.display()))?;
	builder.commit();
	let _ = ORT_MAIN_LIB.set(rt.main_lib.clone());
	Ok(())
}

fn main_lib_name(os: &str) -> &'static str {
	match os {
		"windows" => "onnxruntime.dll",
		"macos" => "libonnxruntime.dylib",
		_ => "libonnxruntime.so"
	}
}

fn is_main_lib(os: &str, name: &str) -> bool {
	match os {
		"windows" => name == "onnxruntime.dll",
		"macos" => name.starts_with("libonnxruntime") && name.ends_with(".dylib"),
		_ => name.starts_with("libonnxruntime.so")
	}
}

fn find_main_lib(os: &str, lib_dir: &Path) -> Option<PathBuf> {
	let exact = lib_dir.join(main_lib_name(os));
	if exact.exists() {
		return Some(exact);
	}

	// Versioned names (libonnxruntime.so.1.20.1): take the largest file.
	std::fs::read_dir(lib_dir)
		.ok()?
		.flatten()
		.filter(|ent| {
			let name = ent.file_name().to_string_lossy().to_ascii_lowercase();
			is_main_lib(os, &name)
		})
		.map(|ent| (ent.metadata().map(|m| m.len()).unwrap_or(0), ent.path()))
		.max_by_key(|(len, _)| *len)
		.map(|(_, p)| p)
}

fn is_runtime_lib_file(name: &str) -> bool {
	let lower = name.to_ascii_lowercase();
	lower.ends_with(".dll") || lower.ends_with(".so") || lower.contains(".so.") || lower.ends_with(".dylib")
}

fn extract_libs(wheel_path: &Path, lib_dir: &Path) -> Result<()> {
	std::fs::create_dir_all(lib_dir).with_context(|| format!("create lib dir: {}", lib_dir.display()))?;

	let file = std::fs::File::open(wheel_path).with_context(|| format!("open wheel: {}", wheel_path.display()))?;
	let mut zip = zip::ZipArchive::new(file).context("open zip archive")?;

	for i in 0..zip.len() {
		let mut entry = zip.by_index(i).context("read zip entry")?;
		let name = entry.name().replace('\\', "/");
		if entry.is_dir() || !name.contains("/capi/") || !is_runtime_lib_file(&name) {
			continue;
		}

		let base = Path::new(&name)
			.file_name()
			.ok_or_else(|| anyhow::anyhow!("invalid zip entry name: {name}"))?;
		let dst = lib_dir.join(base);
		if dst.exists() {
			continue;
		}

		let mut bytes = Vec::new();
		entry.read_to_end(&mut bytes).context("read zip entry bytes")?;
		let mut out = std::fs::File::create(&dst).with_context(|| format!("create file: {}", dst.display()))?;
		out.write_all(&bytes).context("write extracted file")?;
	}
	Ok(())
}

fn find_installed_lib(os: &str, pkg_dir: &Path) -> Result<Option<PathBuf>> {
	if !pkg_dir.exists() {
		return Ok(None);
	}

	let mut versions: Vec<PathBuf> = std::fs::read_dir(pkg_dir)
		.with_context(|| format!("read cache dir: {}", pkg_dir.display()))?
		.flatten()
		.map(|ent| ent.path())
		.filter(|p| p.is_dir())
		.collect();
	versions.sort_by(|a, b| cmp_versions(dir_name(b), dir_name(a)));

	for vdir in versions {
		let lib_dir = vdir.join("lib");
		if let Some(main) = find_main_lib(os, &lib_dir) {
			return Ok(Some(main));
		}

		// Wheel downloaded but never extracted (interrupted run).
		if let Some(wheel) = find_wheel(&vdir)? {
			extract_libs(&wheel, &lib_dir)?;
			if let Some(main) = find_main_lib(os, &lib_dir) {
				return Ok(Some(main));
			}
		}
	}
	Ok(None)
}

fn find_wheel(dir: &Path) -> Result<Option<PathBuf>> {
	let found = std::fs::read_dir(dir)
		.with_context(|| format!("read dir: {}", dir.display()))?
		.flatten()
		.map(|ent| ent.path())
		.find(|p| {
			p.is_file()
				&& p.extension()
					.and_then(|s| s.to_str())
					.is_some_and(|ext| ext.eq_ignore_ascii_case("whl"))
		});
	Ok(found)
}

fn dir_name(p: &Path) -> &str {
	p.file_name().and_then(|s| s.to_str()).unwrap_or("")
}

fn cmp_versions(a: &str, b: &str) -> std::cmp::Ordering {
	let (pa, pb) = (numeric_prefix(a), numeric_prefix(b));
	let len = pa.len().max(pb.len());
	let padded = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);

	(0..len)
		.map(|i| padded(&pa, i).cmp(&padded(&pb, i)))
		.find(|o| o.is_ne())
		.unwrap_or_else(|| a.cmp(b))
}

/// `1.24.1.post1` -> `[1, 24, 1]`.
fn numeric_prefix(s: &str) -> Vec<u64> {
	s.split('.')
		.map(|part| part.chars().take_while(char::is_ascii_digit).collect::<String>())
		.take_while(|digits| !digits.is_empty())
		.map_while(|digits| digits.parse::<u64>().ok())
		.collect()
}

#[cfg(test)]
mod tests {
	use std::cmp::Ordering;

	use super::*;

	#[test]
	fn cpu_always_uses_plain_runtime() {
		for os in ["windows", "linux", "macos"] {
			let p = plan_for(os, "x86_64", Device::Cpu, GpuBackend::Cuda).unwrap();
			assert_eq!(p.package, "onnxruntime");
			assert_eq!(p.ep, None);
		}
	}

	#[test]
	fn gpu_auto_picks_platform_backend() {
		let win = plan_for("windows", "x86_64", Device::Gpu, GpuBackend::Auto).unwrap();
		assert_eq!(win.ep, Some(ExecutionProvider::DirectML));
		let linux = plan_for("linux", "aarch64", Device::Gpu, GpuBackend::Auto).unwrap();
		assert_eq!(linux.package, "onnxruntime-gpu");
		assert!(plan_for("macos", "aarch64", Device::Gpu, GpuBackend::Auto).is_err());
	}

	#[test]
	fn directml_off_windows_fails() {
		assert!(plan_for("linux", "x86_64", Device::Gpu, GpuBackend::Directml).is_err());
	}

	#[test]
	fn versions_compare_numerically() {
		assert_eq!(cmp_versions("1.10.0", "1.9.2"), Ordering::Greater);
		assert_eq!(cmp_versions("1.20", "1.20.0"), Ordering::Less);
		assert_eq!(numeric_prefix("1.24.1.post1"), vec![1, 24, 1]);
		assert_eq!(numeric_prefix("dev"), Vec::<u64>::new());
	}

	#[test]
	fn lib_name_matching() {
		assert!(is_main_lib("linux", "libonnxruntime.so.1.20.1"));
		assert!(!is_main_lib("linux", "libonnxruntime_providers_cuda.so"));
		assert!(is_main_lib("macos", "libonnxruntime.1.20.1.dylib"));
		assert!(is_runtime_lib_file("onnxruntime/capi/onnxruntime.DLL"));
	}
}
