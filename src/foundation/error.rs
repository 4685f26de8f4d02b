use std::path::PathBuf;

use crate::foundation::core::Tile;

/// Convenience result type used across lumosaic.
pub type MosaicResult<T> = Result<T, MosaicError>;

/// Top-level error taxonomy.
///
/// Tile- and frame-level variants, and the per-image decode/encode errors they wrap, are contained
/// by the compositor and the frame pool and only surface as aggregate counts. Everything else is
/// fatal to a run.
#[derive(thiserror::Error, Debug)]
pub enum MosaicError {
    /// Invalid user-provided configuration or arguments.
    #[error("validation error: {0}")]
    Validation(String),

    /// An image could not be read or decoded.
    #[error("decode error for '{}': {message}", .path.display())]
    Decode { path: PathBuf, message: String },

    /// An image could not be encoded or written.
    #[error("encode error for '{}': {message}", .path.display())]
    Encode { path: PathBuf, message: String },

    /// Mean brightness was requested for a zero-length buffer.
    #[error("brightness input is empty")]
    EmptyBrightnessInput,

    /// The catalog could not be built. `path` is the failing reference, output directory, or
    /// manifest.
    #[error("catalog build failed at '{}': {source}", .path.display())]
    CatalogBuild {
        path: PathBuf,
        #[source]
        source: Box<MosaicError>,
    },

    /// One tile could not be extracted, matched, or resized.
    #[error("tile ({}, {}, {}x{}) failed: {source}", .tile.x, .tile.y, .tile.width, .tile.height)]
    TileProcessing {
        tile: Tile,
        #[source]
        source: Box<MosaicError>,
    },

    /// A whole frame could not be read, composited, or written.
    #[error("frame '{}' failed: {source}", .path.display())]
    FrameProcessing {
        path: PathBuf,
        #[source]
        source: Box<MosaicError>,
    },

    /// The final video assembly failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Frame extraction or probing of the source video failed.
    #[error("media error: {0}")]
    Media(String),

    /// The run was stopped through its cancel token.
    #[error("run was cancelled")]
    Cancelled,

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MosaicError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn decode(path: impl Into<PathBuf>, msg: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            message: msg.to_string(),
        }
    }

    pub fn encode(path: impl Into<PathBuf>, msg: impl ToString) -> Self {
        Self::Encode {
            path: path.into(),
            message: msg.to_string(),
        }
    }

    pub fn catalog_build(path: impl Into<PathBuf>, source: MosaicError) -> Self {
        Self::CatalogBuild {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub fn tile(tile: Tile, source: MosaicError) -> Self {
        Self::TileProcessing {
            tile,
            source: Box::new(source),
        }
    }

    pub fn frame(path: impl Into<PathBuf>, source: MosaicError) -> Self {
        Self::FrameProcessing {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media(msg.into())
    }

    /// Whether this error must terminate the whole run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Decode { .. }
                | Self::Encode { .. }
                | Self::EmptyBrightnessInput
                | Self::TileProcessing { .. }
                | Self::FrameProcessing { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            MosaicError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            MosaicError::decode("a.png", "bad header")
                .to_string()
                .contains("decode error for 'a.png'")
        );
        assert!(
            MosaicError::encoding("x")
                .to_string()
                .contains("encoding error:")
        );
        assert!(MosaicError::media("x").to_string().contains("media error:"));
    }

    #[test]
    fn nested_errors_keep_the_inner_message() {
        let tile = Tile {
            x: 16,
            y: 0,
            width: 2,
            height: 16,
        };
        let err = MosaicError::tile(tile, MosaicError::EmptyBrightnessInput);
        let msg = err.to_string();
        assert!(msg.contains("(16, 0, 2x16)"));
        assert!(msg.contains("brightness input is empty"));

        let err = MosaicError::catalog_build("refs/x.png", MosaicError::decode("refs/x.png", "eof"));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("eof"));
    }

    #[test]
    fn tile_and_frame_errors_are_not_fatal() {
        let frame = MosaicError::frame("f.png", MosaicError::decode("f.png", "eof"));
        assert!(!frame.is_fatal());
        assert!(!MosaicError::EmptyBrightnessInput.is_fatal());
        assert!(!MosaicError::decode("f.png", "eof").is_fatal());
    }

    #[test]
    fn unclassified_and_cancelled_errors_are_fatal() {
        let io = MosaicError::Other(anyhow::anyhow!("disk full"));
        assert!(io.is_fatal());
        assert!(MosaicError::Cancelled.is_fatal());
        assert_eq!(MosaicError::Cancelled.to_string(), "run was cancelled");
        assert!(MosaicError::validation("x").is_fatal());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = MosaicError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
