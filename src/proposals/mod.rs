pub mod clip;
pub mod command;
pub mod contours;
pub mod select;

pub use clip::clip_to_image;
pub use command::{BoxFormat, CommandGenerator};
pub use contours::ContourGenerator;
pub use select::select_top_k;

use crate::error::ScoreError;
use crate::models::{ProposalBox, SourceImage};

/// Fixed tuning parameters handed to the scorer once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScorerParams {
    /// Base for the window size quantisation.
    pub base: u32,
    /// Normalised gradient window edge length.
    pub window: u32,
    /// Non-maximal suppression size.
    pub nss: u32,
}

impl Default for ScorerParams {
    fn default() -> Self {
        Self {
            base: 2,
            window: 8,
            nss: 2,
        }
    }
}

/// An objectness scorer: one decoded image in, ranked candidate boxes out.
///
/// Implementations are built once per run and shared by reference across
/// every image, possibly from several threads.
pub trait ProposalGenerator: Send + Sync {
    /// Score one image.
    ///
    /// `Ok` with an empty vector means "nothing salient" and is not an error.
    /// Boxes must already be ordered best-first; callers never re-sort them.
    fn propose(&self, image: &SourceImage) -> Result<Vec<ProposalBox>, ScoreError>;

    /// True when the scorer's model never loaded, so every call will be rejected.
    fn is_unready(&self) -> bool {
        false
    }

    /// Human-readable name for log output.
    fn name(&self) -> &str;
}
