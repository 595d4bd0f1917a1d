use anyhow::Result;

/// A learned background-removal engine, treated as an opaque `bytes -> bytes` function.
///
/// Input is any encoded image the `image` crate can read; output must be an
/// encoded RGBA PNG with the background made transparent.
pub trait SegmentationEngine {
	fn name(&self) -> &str;

	fn remove(&self, input: &[u8]) -> Result<Vec<u8>>;
}

impl<F> SegmentationEngine for F
where
	F: Fn(&[u8]) -> Result<Vec<u8>>
{
	fn name(&self) -> &str {
		"callback"
	}

	fn remove(&self, input: &[u8]) -> Result<Vec<u8>> {
		self(input)
	}
}
