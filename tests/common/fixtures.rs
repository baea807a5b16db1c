use image::{ImageBuffer, Rgb};
use proposal_cropper::{ProposalBox, ProposalGenerator, ScoreError, SourceImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Writes a `width` x `height` RGB gradient to `dir/name`; format follows the extension.
pub fn write_test_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128u8])
    });
    let path = dir.join(name);
    img.save(&path).expect("Failed to save test image");
    path
}

/// Writes bytes that no decoder accepts, under an image extension.
pub fn write_corrupt_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"definitely not an image").expect("Failed to write corrupt image");
    path
}

/// `count` distinct 10x10 boxes laid out left to right, top to bottom, all inside
/// an image of at least 200x200.
pub fn grid_boxes(count: usize) -> Vec<ProposalBox> {
    (0..count)
        .map(|i| {
            let col = (i % 10) as i32;
            let row = (i / 10) as i32;
            ProposalBox::new(col * 15, row * 15, 10, 10)
        })
        .collect()
}

/// What the scripted scorer does for one file name.
#[derive(Clone, Debug)]
pub enum Script {
    Boxes(Vec<ProposalBox>),
    Reject,
    Fail,
    Panic,
    /// Model drops out on this image: rejected, and every later call too.
    Unready,
}

/// Fake scorer answering from a per-file script.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: HashMap<String, Script>,
    fallback: Vec<ProposalBox>,
    unready: AtomicBool,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same boxes for every image without a script.
    pub fn with_fallback(mut self, boxes: Vec<ProposalBox>) -> Self {
        self.fallback = boxes;
        self
    }

    pub fn with_script(mut self, file_name: &str, script: Script) -> Self {
        self.scripts.insert(file_name.to_string(), script);
        self
    }

    /// Model never loaded: every call is rejected and `is_unready` is true.
    pub fn unready() -> Self {
        Self {
            unready: AtomicBool::new(true),
            ..Self::default()
        }
    }
}

impl ProposalGenerator for ScriptedGenerator {
    fn propose(&self, image: &SourceImage) -> Result<Vec<ProposalBox>, ScoreError> {
        if self.is_unready() {
            return Err(ScoreError::rejected("model empty"));
        }
        match self.scripts.get(&image.file_name) {
            Some(Script::Boxes(boxes)) => Ok(boxes.clone()),
            Some(Script::Reject) => Err(ScoreError::rejected("scripted rejection")),
            Some(Script::Fail) => Err(ScoreError::Output("scripted failure".to_string())),
            Some(Script::Panic) => panic!("scripted scorer panic"),
            Some(Script::Unready) => {
                self.unready.store(true, Ordering::SeqCst);
                Err(ScoreError::rejected("model unloaded"))
            }
            None => Ok(self.fallback.clone()),
        }
    }

    fn is_unready(&self) -> bool {
        self.unready.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Reads a CSV written by `MetadataWriter` (no quoted fields) into header + rows.
pub fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let text = std::fs::read_to_string(path).expect("Failed to read CSV");
    let mut lines = text.lines().map(|l| l.split(',').map(str::to_string).collect::<Vec<_>>());
    let header = lines.next().unwrap_or_default();
    (header, lines.collect())
}

/// Regular files directly inside `dir`, by file name, sorted.
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Batch config rooted in a temp directory, writing PNG crops.
pub fn batch_config(root: &Path, top_k: i64) -> proposal_cropper::BatchConfig {
    let images_dir = root.join("images");
    std::fs::create_dir_all(&images_dir).expect("Failed to create images dir");
    proposal_cropper::BatchConfig {
        images_dir,
        output_dir: root.join("output"),
        model_dir: root.join("models"),
        top_k,
        output_format: proposal_cropper::export::OutputFormat::Png,
        ..Default::default()
    }
}
