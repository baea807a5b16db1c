mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from proposal_cropper for tests
pub use proposal_cropper::{
    BatchConfig, BatchSummary, CropOutcome, CropPipeline, ImageOutcome, ProposalBox,
    ProposalGenerator, ScoreError, SourceImage,
};
pub use proposal_cropper::export::{MetadataSchema, MetadataWriter, OutputFormat};
