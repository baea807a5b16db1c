pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod proposals;

pub use config::{BatchConfig, ScorerConfig};
pub use error::{ExportError, ScoreError};
pub use models::{BatchCounters, ClippedBox, CropRecord, ProposalBox, SourceImage};
pub use pipeline::{
    BatchSummary, CropOutcome, CropPipeline, DebugConfig, ImageOutcome, ImageReport,
    enumerate_images, run_batch, run_single,
};
pub use proposals::{ProposalGenerator, ScorerParams, clip_to_image, select_top_k};
