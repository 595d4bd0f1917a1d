use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum EraserError {
	#[error("unsupported channel layout: {channels} channel(s) (expected 1, 3 or 4)")]
	UnsupportedChannelLayout { channels: usize },

	#[error("pixel buffer has {actual} bytes, expected {expected}")]
	InvalidPixelBuffer { expected: usize, actual: usize },

	/// The learned engine failed or could not be reached. Never retried locally.
	#[error("segmentation engine failed")]
	SegmentationEngine {
		#[source]
		source: BoxError
	},

	#[error("cannot encode {width}x{height} image: {reason}")]
	Encoding { width: u32, height: u32, reason: String },

	#[error("cannot decode input image")]
	Decode {
		#[source]
		source: image::ImageError
	},

	#[error("configuration error: {message}")]
	Config { message: String }
}

pub type Result<T> = std::result::Result<T, EraserError>;

impl EraserError {
	pub(crate) fn engine(err: anyhow::Error) -> Self {
		Self::SegmentationEngine { source: err.into() }
	}

	pub(crate) fn config(message: impl Into<String>) -> Self {
		Self::Config { message: message.into() }
	}

	/// Short text for shells. Leaves out paths, sources and engine internals.
	pub fn user_message(&self) -> &'static str {
		match self {
			Self::UnsupportedChannelLayout { .. } => "This image format is not supported (unexpected color channels).",
			Self::InvalidPixelBuffer { .. } | Self::Decode { .. } => "The image could not be read.",
			Self::SegmentationEngine { .. } => "Background removal failed in the AI engine.",
			Self::Encoding { .. } => "The result could not be saved as PNG.",
			Self::Config { .. } => "Invalid settings."
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn engine_error_keeps_source_chain() {
		let inner = anyhow::anyhow!("session exploded").context("run model");
		let err = EraserError::engine(inner);

		let source = std::error::Error::source(&err).expect("source");
		assert!(source.to_string().contains("run model"));
	}

	#[test]
	fn user_message_hides_details() {
		let err = EraserError::config("kernel_size must be odd, got 4");
		assert!(!err.user_message().contains("kernel_size"));
		assert!(err.to_string().contains("kernel_size"));
	}
}
