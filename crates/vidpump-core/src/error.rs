//! Typed error taxonomy for the pump.
//!
//! Uses `thiserror` for library-grade errors.  The two non-fatal engine
//! outcomes (the engine wants more input, the engine is drained) are not
//! errors at all: they are [`Receive::Starved`](crate::codec_traits::Receive)
//! and [`Receive::Exhausted`](crate::codec_traits::Receive) and never leave
//! the pumps.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`PumpError::error_code`]
//! for structured logging without string parsing.

/// All fatal errors originating from the pump and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    // ── Bitstream ────────────────────────────────────────────────────
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    // ── Engine ───────────────────────────────────────────────────────
    #[error("Engine rejected input: {0}")]
    EngineRejected(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    // ── Device ───────────────────────────────────────────────────────
    #[error("Device transfer failed: {0}")]
    TransferFailure(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhaustion(String),

    // ── Startup ──────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── I/O ──────────────────────────────────────────────────────────
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context} (code {code}): {message}")]
    Ffmpeg {
        context: String,
        code: i32,
        message: String,
    },
}

impl PumpError {
    /// Wrap an I/O error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable integer error code for structured logging.
    ///
    /// Codes are grouped by category:
    /// - 1xx: bitstream
    /// - 2xx: engine
    /// - 3xx: device transfer
    /// - 4xx: resources
    /// - 5xx: configuration
    /// - 6xx: I/O
    /// - 7xx: FFmpeg backend
    pub fn error_code(&self) -> u32 {
        match self {
            Self::MalformedInput(_) => 100,
            Self::EngineRejected(_) => 200,
            Self::Decode(_) => 201,
            Self::Encode(_) => 202,
            Self::TransferFailure(_) => 300,
            Self::ResourceExhaustion(_) => 400,
            Self::Configuration(_) => 500,
            Self::Io { .. } => 600,
            Self::Ffmpeg { .. } => 700,
        }
    }

    /// Whether the error can only happen before the first packet is pumped.
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PumpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_category() {
        assert_eq!(PumpError::MalformedInput("x".into()).error_code(), 100);
        assert_eq!(PumpError::EngineRejected("x".into()).error_code(), 200);
        assert_eq!(PumpError::TransferFailure("x".into()).error_code(), 300);
        assert_eq!(PumpError::Configuration("x".into()).error_code(), 500);
        let io = PumpError::io(
            "open input",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(io.error_code(), 600);
        assert_eq!(io.to_string(), "open input: gone");
    }

    #[test]
    fn only_configuration_is_startup() {
        assert!(PumpError::Configuration("no codec".into()).is_startup());
        assert!(!PumpError::Decode("bad".into()).is_startup());
    }
}
