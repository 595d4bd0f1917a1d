//! Fetches cache artifacts (model files, runtime wheels) over HTTPS.

use std::{
	fs::{self, File},
	io::{self, Read, Write},
	path::{Path, PathBuf},
	time::{Duration, Instant}
};

use sha2::{Digest as _, Sha256};
use thiserror::Error;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);
const CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DownloadError {
	/// The artifact is missing and fetching it was not allowed.
	#[error("{artifact} is not cached and downloads are disabled")]
	Disabled { artifact: String },

	#[error("request to {url} failed")]
	Request {
		url: String,
		#[source]
		source: ureq::Error
	},

	#[error("{url} answered HTTP {status}")]
	Status { url: String, status: u16 },

	#[error("i/o error on {target}")]
	Io {
		target: String,
		#[source]
		source: io::Error
	},

	#[error("sha256 mismatch: expected {expected}, got {actual}")]
	Checksum { expected: String, actual: String }
}

impl DownloadError {
	pub fn disabled(artifact: impl Into<String>) -> Self {
		Self::Disabled {
			artifact: artifact.into()
		}
	}
}

/// Whether `err` failed only because a download was needed but not allowed.
pub fn needs_download(err: &anyhow::Error) -> bool {
	err.chain()
		.any(|e| matches!(e.downcast_ref::<DownloadError>(), Some(DownloadError::Disabled { .. })))
}

#[derive(Debug, Clone, Copy)]
pub struct Progress {
	pub downloaded: u64,
	pub total: Option<u64>,
	pub elapsed: Duration,
	pub done: bool
}

impl Progress {
	pub fn percent(&self) -> Option<f64> {
		match self.total {
			Some(t) if t > 0 => Some(self.downloaded as f64 * 100.0 / t as f64),
			_ => None
		}
	}
}

/// Starts a GET. Returns the body and its advertised length.
pub fn open(url: &str) -> Result<(ureq::BodyReader<'static>, Option<u64>), DownloadError> {
	let resp = ureq::get(url).call().map_err(|source| match source {
		ureq::Error::StatusCode(status) => DownloadError::Status {
			url: url.to_string(),
			status
		},
		source => DownloadError::Request {
			url: url.to_string(),
			source
		}
	})?;

	let total = resp
		.headers()
		.get(ureq::http::header::CONTENT_LENGTH)
		.and_then(|v| v.to_str().ok())
		.and_then(|s| s.parse::<u64>().ok());
	Ok((resp.into_body().into_reader(), total))
}

/// Downloads `url` to `dst`, checking `sha256` when given. Returns the byte count.
pub fn fetch(url: &str, dst: &Path, sha256: Option<&str>, on_progress: impl FnMut(Progress)) -> Result<u64, DownloadError> {
	let (body, total) = open(url)?;
	save(body, total, dst, sha256, on_progress)
}

/// Streams `body` into `<dst>.part` and renames it to `dst` once the digest matches.
/// Nothing is left behind on failure.
pub fn save(
	mut body: impl Read,
	total: Option<u64>,
	dst: &Path,
	sha256: Option<&str>,
	mut on_progress: impl FnMut(Progress)
) -> Result<u64, DownloadError> {
	if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(io_err(parent))?;
	}

	let tmp = part_path(dst);
	let copied = copy_hashed(&mut body, total, &tmp, &mut on_progress).and_then(|(n, digest)| match sha256 {
		Some(expected) if !eq_hex(expected, &digest) => Err(DownloadError::Checksum {
			expected: expected.to_string(),
			actual: digest
		}),
		_ => Ok(n)
	});

	match copied {
		Ok(n) => {
			fs::rename(&tmp, dst).map_err(io_err(dst))?;
			Ok(n)
		}
		Err(e) => {
			let _ = fs::remove_file(&tmp);
			Err(e)
		}
	}
}

fn copy_hashed(
	body: &mut impl Read,
	total: Option<u64>,
	tmp: &Path,
	on_progress: &mut impl FnMut(Progress)
) -> Result<(u64, String), DownloadError> {
	let mut file = File::create(tmp).map_err(io_err(tmp))?;
	let mut hasher = Sha256::new();
	let mut buf = vec![0u8; CHUNK];
	let mut downloaded = 0u64;
	let start = Instant::now();
	let mut last = start;

	loop {
		let n = match body.read(&mut buf) {
			Ok(0) => break,
			Ok(n) => n,
			Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(source) => {
				return Err(DownloadError::Io {
					target: "response body".to_string(),
					source
				});
			}
		};
		hasher.update(&buf[..n]);
		file.write_all(&buf[..n]).map_err(io_err(tmp))?;
		downloaded += n as u64;

		if last.elapsed() >= PROGRESS_INTERVAL {
			on_progress(Progress {
				downloaded,
				total,
				elapsed: start.elapsed(),
				done: false
			});
			last = Instant::now();
		}
	}
	file.flush().map_err(io_err(tmp))?;

	on_progress(Progress {
		downloaded,
		total,
		elapsed: start.elapsed(),
		done: true
	});
	Ok((downloaded, hex::encode(hasher.finalize())))
}

/// Default progress sink: a `tracing` line per tick.
pub fn log_progress(url: &str, p: Progress) {
	let mib = |b: u64| b as f64 / (1024.0 * 1024.0);
	let secs = p.elapsed.as_secs_f64();
	let speed = if secs > 0.0 { mib(p.downloaded) / secs } else { 0.0 };
	match p.percent() {
		Some(pct) => tracing::info!(url, done = p.done, "{:.1} MiB ({pct:.0}%) {speed:.1} MiB/s", mib(p.downloaded)),
		None => tracing::info!(url, done = p.done, "{:.1} MiB {speed:.1} MiB/s", mib(p.downloaded))
	}
}

fn part_path(dst: &Path) -> PathBuf {
	let mut name = dst.as_os_str().to_owned();
	name.push(".part");
	PathBuf::from(name)
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> DownloadError + '_ {
	move |source| DownloadError::Io {
		target: path.display().to_string(),
		source
	}
}

fn eq_hex(a: &str, b: &str) -> bool {
	a.trim().trim_start_matches("0x").eq_ignore_ascii_case(b.trim().trim_start_matches("0x"))
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use anyhow::Context;

	use super::*;

	const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

	#[test]
	fn save_moves_verified_body_into_place() {
		let dir = tempfile::tempdir().unwrap();
		let dst = dir.path().join("models").join("u2netp.onnx");
		let mut ticks = Vec::new();

		let n = save(Cursor::new(b"abc"), Some(3), &dst, Some(&ABC_SHA256.to_uppercase()), |p| ticks.push(p)).unwrap();

		assert_eq!(n, 3);
		assert_eq!(fs::read(&dst).unwrap(), b"abc");
		assert!(!part_path(&dst).exists());
		let last = ticks.last().unwrap();
		assert!(last.done);
		assert_eq!(last.downloaded, 3);
		assert_eq!(last.percent(), Some(100.0));
	}

	#[test]
	fn checksum_mismatch_leaves_nothing_behind() {
		let dir = tempfile::tempdir().unwrap();
		let dst = dir.path().join("runtime.whl");

		let err = save(Cursor::new(b"tampered"), None, &dst, Some(ABC_SHA256), |_| {}).unwrap_err();

		assert!(matches!(err, DownloadError::Checksum { ref expected, .. } if expected == ABC_SHA256));
		assert!(!dst.exists());
		assert!(!part_path(&dst).exists());
	}

	#[test]
	fn failing_body_is_an_io_error() {
		struct Broken;
		impl Read for Broken {
			fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
				Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
			}
		}

		let dir = tempfile::tempdir().unwrap();
		let dst = dir.path().join("model.onnx");
		let err = save(Broken, None, &dst, None, |_| {}).unwrap_err();
		assert!(matches!(err, DownloadError::Io { .. }));
		assert!(!part_path(&dst).exists());
	}

	#[test]
	fn disabled_download_is_recognised_through_context() {
		let err = Err::<(), _>(DownloadError::disabled("model u2netp"))
			.context("load engine")
			.unwrap_err();
		assert!(needs_download(&err));
		assert!(!needs_download(&anyhow::anyhow!("session failed")));
	}

	#[test]
	fn hex_comparison_ignores_case_and_prefix() {
		assert!(eq_hex("0xABcd01", "abcd01"));
		assert!(eq_hex(" ff ", "FF"));
		assert!(!eq_hex("ff", "fe"));
	}
}
