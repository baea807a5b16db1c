use image::{GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ScoreError;
use crate::models::{EdgeComponent, ProposalBox, SourceImage};
use crate::proposals::ProposalGenerator;

/// Settings for the built-in edge-component scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContourSettings {
    pub sigma: f32,
    pub low_threshold: f32,
    pub high_threshold: f32,
    /// Components with fewer edge pixels are ignored.
    pub min_area: u32,
    /// Pixels added around each component's bounding box.
    pub padding: u32,
    pub max_proposals: usize,
}

impl Default for ContourSettings {
    fn default() -> Self {
        Self {
            sigma: 1.5,
            low_threshold: 50.0,
            high_threshold: 100.0,
            min_area: 10,
            padding: 10,
            max_proposals: 1000,
        }
    }
}

/// Fallback scorer that needs no model files.
///
/// Runs blur and Canny, labels 8-connected edge components, and proposes one
/// box per component, largest component first.
pub struct ContourGenerator {
    settings: ContourSettings,
}

impl ContourGenerator {
    pub fn new(settings: ContourSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ContourSettings {
        &self.settings
    }
}

impl Default for ContourGenerator {
    fn default() -> Self {
        Self::new(ContourSettings::default())
    }
}

impl ProposalGenerator for ContourGenerator {
    fn propose(&self, source: &SourceImage) -> Result<Vec<ProposalBox>, ScoreError> {
        let gray = source.image.to_luma8();
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(ScoreError::rejected("image has no pixels"));
        }

        let blurred = gaussian_blur_f32(&gray, self.settings.sigma);
        let edges = canny(
            &blurred,
            self.settings.low_threshold,
            self.settings.high_threshold,
        );

        let mut components = find_components(&edges, self.settings.min_area);
        rank_components(&mut components);

        let boxes = components
            .iter()
            .take(self.settings.max_proposals)
            .map(|c| c.padded_box(self.settings.padding, width, height))
            .collect();

        Ok(boxes)
    }

    fn name(&self) -> &str {
        "edge contours"
    }
}

/// Collect the extent of every 8-connected edge group with at least `min_edge_pixels` pixels.
pub fn find_components(edges: &GrayImage, min_edge_pixels: u32) -> Vec<EdgeComponent> {
    let labelled = connected_components(edges, Connectivity::Eight, Luma([0]));

    let mut by_label: HashMap<u32, EdgeComponent> = HashMap::new();
    for (x, y, &Luma([label])) in labelled.enumerate_pixels() {
        if label != 0 {
            by_label
                .entry(label)
                .or_insert_with(|| EdgeComponent::at(x, y))
                .absorb(x, y);
        }
    }

    by_label
        .into_values()
        .filter(|c| c.edge_pixels >= min_edge_pixels)
        .collect()
}

/// Most edge pixels first. Ties fall back to position and size so hashing never shows.
pub fn rank_components(components: &mut [EdgeComponent]) {
    components.sort_by_key(|c| {
        (
            std::cmp::Reverse(c.edge_pixels),
            c.top,
            c.left,
            c.span(),
        )
    });
}
