//! Typed failures for the per-image and per-crop stages.
//!
//! Setup errors (bad config, unwritable output directory, unopenable metadata
//! file) are plain `anyhow::Error`s and end the run. The types here describe
//! failures the batch recovers from, so the orchestrator can match on them.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a proposal generator produced no result for an image.
#[derive(Error, Debug)]
pub enum ScoreError {
    /// The scorer ran but declined to produce proposals (`ok = false`).
    /// Check `ProposalGenerator::is_unready` to tell a missing model from a bad image.
    #[error("scorer rejected the image: {reason}")]
    Rejected { reason: String },

    /// The scorer process could not be started.
    #[error("failed to launch scorer `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("scorer did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("scorer produced unreadable output: {0}")]
    Output(String),

    #[error("scorer panicked: {0}")]
    Panicked(String),

    #[error("scorer io")]
    Io(#[from] std::io::Error),
}

impl ScoreError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Failure writing one crop file.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("crop {width}x{height} at ({x}, {y}) exceeds image {image_width}x{image_height}")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("failed to create {path}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
