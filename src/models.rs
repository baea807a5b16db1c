use image::DynamicImage;
use std::path::{Path, PathBuf};

/// Candidate box as returned by a proposal generator.
///
/// Coordinates are signed: scorers routinely return boxes that hang over
/// the image border, and those are only trimmed later by clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProposalBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ProposalBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Build a box from two opposite corners `(x1, y1)` and `(x2, y2)`.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2.saturating_sub(x1),
            height: y2.saturating_sub(y1),
        }
    }
}

/// A proposal trimmed to the image rectangle. Always non-empty and in bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClippedBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ClippedBox {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// One decoded input image plus the names derived from its path.
pub struct SourceImage {
    pub path: PathBuf,
    pub image: DynamicImage,
    /// File name with extension stripped, used to name crops.
    pub base_name: String,
    /// File name as found on disk, written to the metadata.
    pub file_name: String,
    pub label: bool,
}

impl SourceImage {
    pub fn new(path: impl Into<PathBuf>, image: DynamicImage, label_marker: Option<&str>) -> Self {
        let path = path.into();
        let file_name = file_name_of(&path);
        let base_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        let label = label_marker
            .map(|marker| has_label_marker(&file_name, marker))
            .unwrap_or(false);

        Self {
            path,
            image,
            base_name,
            file_name,
            label,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Case-insensitive substring test on the file name. An empty marker never matches.
pub fn has_label_marker(file_name: &str, marker: &str) -> bool {
    if marker.is_empty() {
        return false;
    }
    file_name.to_uppercase().contains(&marker.to_uppercase())
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Metadata for one exported crop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropRecord {
    pub file_name: String,
    /// Position within the selected proposals, not among the surviving ones.
    pub crop_index: usize,
    pub bbox: ClippedBox,
    pub label: bool,
    /// Crop file path relative to the output base directory, `/`-separated.
    pub relative_path: String,
}

/// Run-wide counters. Only ever incremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounters {
    pub images_seen: usize,
    pub images_processed: usize,
    pub crops_saved: usize,
    pub images_failed: usize,
    pub images_unready: usize,
}

/// Bounding extent of one connected group of edge pixels. Edges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeComponent {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub edge_pixels: u32,
}

impl EdgeComponent {
    /// Empty component anchored at one pixel; `absorb` that pixel to count it.
    pub fn at(x: u32, y: u32) -> Self {
        Self {
            left: x,
            top: y,
            right: x,
            bottom: y,
            edge_pixels: 0,
        }
    }

    pub fn absorb(&mut self, x: u32, y: u32) {
        self.left = self.left.min(x);
        self.top = self.top.min(y);
        self.right = self.right.max(x);
        self.bottom = self.bottom.max(y);
        self.edge_pixels += 1;
    }

    /// Width and height of the extent in pixels.
    pub fn span(&self) -> (u32, u32) {
        (self.right - self.left + 1, self.bottom - self.top + 1)
    }

    /// Extent grown by `padding` on every side, kept inside `img_width` x `img_height`.
    pub fn padded_box(&self, padding: u32, img_width: u32, img_height: u32) -> ProposalBox {
        let x = self.left.saturating_sub(padding);
        let y = self.top.saturating_sub(padding);
        let right = self.right.saturating_add(padding).min(img_width.saturating_sub(1));
        let bottom = self.bottom.saturating_add(padding).min(img_height.saturating_sub(1));

        ProposalBox::new(x as i32, y as i32, (right - x + 1) as i32, (bottom - y + 1) as i32)
    }
}
