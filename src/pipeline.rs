use anyhow::{Context, Result};
use image::{DynamicImage, ImageReader, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use rayon::prelude::*;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::config::BatchConfig;
use crate::error::ScoreError;
use crate::export::{CropExporter, MetadataSchema, MetadataWriter, OutputFormat};
use crate::models::{BatchCounters, CropRecord, ProposalBox, SourceImage};
use crate::proposals::{ProposalGenerator, clip_to_image, select_top_k};

/// Where an image ended up in the per-image state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    /// Could not be opened or decoded.
    Unreadable(String),
    /// The scorer errored, panicked, or rejected this image.
    Failed(String),
    /// The scorer's model never loaded.
    Unready,
    /// Scored fine, nothing proposed.
    Empty,
    /// Proposals were selected; see the per-crop outcomes.
    Cropped { proposed: usize, selected: usize },
    /// Skipped: an earlier image with the same stem already owns its crop file names.
    NameClash { first: String },
    /// Not attempted because the batch was stopped.
    Halted,
}

impl ImageOutcome {
    /// Counts towards `images_processed`.
    pub fn is_processed(&self) -> bool {
        matches!(self, ImageOutcome::Empty | ImageOutcome::Cropped { .. })
    }
}

/// Fate of one selected proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CropOutcome {
    /// Nothing left after clipping to the image.
    Discarded { index: usize },
    ExportFailed { index: usize, reason: String },
    /// File written, row not yet appended.
    Exported(CropRecord),
    /// File written and row appended.
    Recorded(CropRecord),
    /// File written but the row could not be appended; the file was removed again.
    RecordFailed { index: usize, reason: String },
}

impl CropOutcome {
    pub fn index(&self) -> usize {
        match self {
            CropOutcome::Discarded { index }
            | CropOutcome::ExportFailed { index, .. }
            | CropOutcome::RecordFailed { index, .. } => *index,
            CropOutcome::Exported(record) | CropOutcome::Recorded(record) => record.crop_index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageReport {
    pub path: PathBuf,
    pub file_name: String,
    pub outcome: ImageOutcome,
    pub crops: Vec<CropOutcome>,
}

impl ImageReport {
    fn new(path: &Path, outcome: ImageOutcome) -> Self {
        Self {
            path: path.to_path_buf(),
            file_name: crate::models::file_name_of(path),
            outcome,
            crops: Vec::new(),
        }
    }

    /// Records whose rows made it into the metadata file.
    pub fn recorded(&self) -> impl Iterator<Item = &CropRecord> {
        self.crops.iter().filter_map(|c| match c {
            CropOutcome::Recorded(record) => Some(record),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub counters: BatchCounters,
    pub reports: Vec<ImageReport>,
    /// True if the batch stopped early on an unready scorer.
    pub halted: bool,
}

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Directory receiving one proposal overlay per image
    pub output_dir: PathBuf,
}

/// Drives images through score → select → clip → export → record.
pub struct CropPipeline<'g> {
    generator: &'g dyn ProposalGenerator,
    exporter: CropExporter,
    crops_prefix: String,
    top_k: i64,
    label_marker: Option<String>,
    parallel: bool,
    abort_on_unready: bool,
    debug: Option<DebugConfig>,
}

impl<'g> CropPipeline<'g> {
    /// Crops land in `output_dir/crops_subdir`; metadata paths are relative to `output_dir`.
    pub fn new(
        generator: &'g dyn ProposalGenerator,
        output_dir: impl AsRef<Path>,
        crops_subdir: &str,
        format: OutputFormat,
    ) -> Self {
        Self {
            generator,
            exporter: CropExporter::new(output_dir.as_ref().join(crops_subdir), format),
            crops_prefix: crops_subdir.replace('\\', "/").trim_end_matches('/').to_string(),
            top_k: crate::config::DEFAULT_TOP_K,
            label_marker: None,
            parallel: false,
            abort_on_unready: false,
            debug: None,
        }
    }

    /// Pipeline configured the way a batch config describes.
    pub fn from_config(generator: &'g dyn ProposalGenerator, config: &BatchConfig) -> Self {
        Self::new(
            generator,
            &config.output_dir,
            &config.crops_subdir,
            config.output_format,
        )
        .with_top_k(config.top_k)
        .with_label_marker(config.label_marker.clone())
        .with_parallel(config.parallel)
        .with_abort_on_unready(config.abort_on_unready)
    }

    pub fn with_top_k(mut self, top_k: i64) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_label_marker(mut self, marker: Option<String>) -> Self {
        self.label_marker = marker.filter(|m| !m.is_empty());
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_abort_on_unready(mut self, abort: bool) -> Self {
        self.abort_on_unready = abort;
        self
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.debug = Some(DebugConfig { output_dir });
        Ok(self)
    }

    pub fn exporter(&self) -> &CropExporter {
        &self.exporter
    }

    /// Create the crops directory. Failing here is a setup error.
    pub fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(self.exporter.crops_dir()).with_context(|| {
            format!(
                "Failed to create crops directory {}",
                self.exporter.crops_dir().display()
            )
        })
    }

    /// Load one image from disk.
    pub fn load(&self, path: &Path) -> Result<SourceImage> {
        let image = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))?;
        Ok(SourceImage::new(path, image, self.label_marker.as_deref()))
    }

    /// Run every image through the pipeline and append rows to `sink`.
    ///
    /// Per-image and per-crop problems are logged and skipped; only a broken
    /// metadata sink ends the run early with an error.
    pub fn run(&self, paths: &[PathBuf], sink: &mut MetadataWriter) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();

        if self.abort_on_unready && self.generator.is_unready() {
            error!(
                "Scorer '{}' is unready before the first image; stopping batch",
                self.generator.name()
            );
            summary.halted = true;
            return Ok(summary);
        }

        let halt = AtomicBool::new(false);
        let clashes = stem_clashes(paths);

        if self.parallel {
            let reports: Vec<ImageReport> = paths
                .par_iter()
                .zip(clashes.par_iter())
                .map(|(path, clash)| self.process_path(path, clash.as_deref(), &halt))
                .collect();
            for mut report in reports {
                if report.outcome == ImageOutcome::Halted {
                    continue;
                }
                self.record(&mut report, sink)?;
                sink.flush()?;
                tally(&mut summary.counters, &report);
                summary.reports.push(report);
            }
        } else {
            for (path, clash) in paths.iter().zip(&clashes) {
                if halt.load(Ordering::SeqCst) {
                    break;
                }
                let mut report = self.process_path(path, clash.as_deref(), &halt);
                self.record(&mut report, sink)?;
                sink.flush()?;
                tally(&mut summary.counters, &report);
                summary.reports.push(report);
            }
        }

        summary.halted = halt.load(Ordering::SeqCst);
        Ok(summary)
    }

    fn process_path(&self, path: &Path, clash: Option<&str>, halt: &AtomicBool) -> ImageReport {
        if halt.load(Ordering::SeqCst) {
            return ImageReport::new(path, ImageOutcome::Halted);
        }
        if let Some(first) = clash {
            warn!(
                "Skipping {}: crops would overwrite those of {}",
                path.display(),
                first
            );
            let outcome = ImageOutcome::NameClash {
                first: first.to_string(),
            };
            return ImageReport::new(path, outcome);
        }

        info!("Processing: {}", path.display());
        let source = match self.load(path) {
            Ok(source) => source,
            Err(e) => {
                warn!("Could not read image {}: {:#}", path.display(), e);
                return ImageReport::new(path, ImageOutcome::Unreadable(format!("{:#}", e)));
            }
        };

        let report = self.process_source(&source);
        if report.outcome == ImageOutcome::Unready && self.abort_on_unready {
            error!("Stopping batch: scorer model is not loaded");
            halt.store(true, Ordering::SeqCst);
        }
        report
    }

    /// Score, select, clip and export one decoded image. No metadata is written here.
    pub fn process_source(&self, source: &SourceImage) -> ImageReport {
        let mut report = ImageReport::new(&source.path, ImageOutcome::Empty);
        report.file_name = source.file_name.clone();

        let boxes = match self.score(source) {
            Ok(boxes) => boxes,
            Err(ScoreError::Rejected { reason }) if self.generator.is_unready() => {
                error!(
                    "Scorer '{}' is unready (model not loaded), skipping {}: {}",
                    self.generator.name(),
                    source.file_name,
                    reason
                );
                report.outcome = ImageOutcome::Unready;
                return report;
            }
            Err(e) => {
                warn!("Scoring failed for {}: {}", source.file_name, e);
                report.outcome = ImageOutcome::Failed(e.to_string());
                return report;
            }
        };

        if boxes.is_empty() {
            info!("No proposals found for {}", source.file_name);
            return report;
        }

        let selected = select_top_k(&boxes, self.top_k);
        debug!(
            "{}: {} proposals, {} selected",
            source.file_name,
            boxes.len(),
            selected.len()
        );

        report.crops = selected
            .iter()
            .enumerate()
            .map(|(index, bbox)| self.export_one(source, index, bbox))
            .collect();
        report.outcome = ImageOutcome::Cropped {
            proposed: boxes.len(),
            selected: selected.len(),
        };

        if let Some(debug) = &self.debug {
            if let Err(e) = save_overlay(debug, source, selected, &report.crops) {
                warn!("Failed to save debug overlay for {}: {:#}", source.file_name, e);
            }
        }

        report
    }

    fn score(&self, source: &SourceImage) -> Result<Vec<ProposalBox>, ScoreError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.generator.propose(source)))
            .unwrap_or_else(|payload| Err(ScoreError::Panicked(panic_message(payload.as_ref()))))
    }

    fn export_one(&self, source: &SourceImage, index: usize, bbox: &ProposalBox) -> CropOutcome {
        let Some(clipped) = clip_to_image(bbox, source.width(), source.height()) else {
            debug!("{}: proposal {} lies outside the image", source.file_name, index);
            return CropOutcome::Discarded { index };
        };

        let destination = self.exporter.destination(&source.base_name, index);
        if let Err(e) = self.exporter.export(&source.image, &clipped, &destination) {
            warn!("Failed to write crop {}: {}", destination.display(), e);
            remove_partial(&destination);
            return CropOutcome::ExportFailed {
                index,
                reason: e.to_string(),
            };
        }

        let file_name = destination
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative_path = if self.crops_prefix.is_empty() {
            file_name
        } else {
            format!("{}/{}", self.crops_prefix, file_name)
        };

        CropOutcome::Exported(CropRecord {
            file_name: source.file_name.clone(),
            crop_index: index,
            bbox: clipped,
            label: source.label,
            relative_path,
        })
    }

    fn crop_path(&self, record: &CropRecord) -> PathBuf {
        let file_name = record
            .relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&record.relative_path);
        self.exporter.crops_dir().join(file_name)
    }

    /// Append rows for every exported crop of `report`.
    ///
    /// A row that cannot be written takes its crop file with it, so files and
    /// rows stay one-to-one.
    pub fn record(&self, report: &mut ImageReport, sink: &mut MetadataWriter) -> Result<()> {
        for crop in report.crops.iter_mut() {
            let CropOutcome::Exported(record) = crop else {
                continue;
            };
            let next = match sink.append(record) {
                Ok(()) => CropOutcome::Recorded(record.clone()),
                Err(e) => {
                    error!("Failed to record crop {}: {:#}", record.relative_path, e);
                    remove_partial(&self.crop_path(record));
                    CropOutcome::RecordFailed {
                        index: record.crop_index,
                        reason: format!("{:#}", e),
                    }
                }
            };
            *crop = next;
        }

        if let ImageOutcome::Cropped { selected, .. } = report.outcome {
            info!(
                "{}: saved {} of {} selected crops",
                report.file_name,
                report.recorded().count(),
                selected
            );
        }
        Ok(())
    }
}

fn tally(counters: &mut BatchCounters, report: &ImageReport) {
    counters.images_seen += 1;
    match &report.outcome {
        ImageOutcome::Unreadable(_) | ImageOutcome::Failed(_) | ImageOutcome::NameClash { .. } => {
            counters.images_failed += 1
        }
        ImageOutcome::Unready => counters.images_unready += 1,
        ImageOutcome::Empty | ImageOutcome::Cropped { .. } => counters.images_processed += 1,
        ImageOutcome::Halted => {}
    }
    counters.crops_saved += report.recorded().count();
}

/// For each path, the file name of an earlier path whose crops would share its
/// names, if any. Stems compare case-insensitively.
fn stem_clashes(paths: &[PathBuf]) -> Vec<Option<String>> {
    let mut owners: HashMap<String, String> = HashMap::new();
    paths
        .iter()
        .map(|path| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            match owners.entry(stem) {
                Entry::Occupied(owner) => Some(owner.get().clone()),
                Entry::Vacant(slot) => {
                    slot.insert(crate::models::file_name_of(path));
                    None
                }
            }
        })
        .collect()
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Draw the selected proposals onto a copy of the image: green for saved
/// crops, red for crops that failed to export. Discarded proposals are skipped.
fn save_overlay(
    debug: &DebugConfig,
    source: &SourceImage,
    selected: &[ProposalBox],
    crops: &[CropOutcome],
) -> Result<()> {
    let mut canvas = source.image.to_rgb8();
    for (bbox, crop) in selected.iter().zip(crops) {
        let color = match crop {
            CropOutcome::Exported(_) | CropOutcome::Recorded(_) => Rgb([0u8, 255, 0]),
            CropOutcome::ExportFailed { .. } | CropOutcome::RecordFailed { .. } => {
                Rgb([255u8, 0, 0])
            }
            CropOutcome::Discarded { .. } => continue,
        };
        if let Some(clipped) = clip_to_image(bbox, source.width(), source.height()) {
            let rect = Rect::at(clipped.x as i32, clipped.y as i32)
                .of_size(clipped.width, clipped.height);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }

    let path = debug
        .output_dir
        .join(format!("{}_proposals.png", source.base_name));
    DynamicImage::ImageRgb8(canvas)
        .save(&path)
        .map_err(|e| anyhow::anyhow!("Failed to save debug image: {}", e))?;
    debug!("Debug: saved {}", path.display());
    Ok(())
}

/// List the regular files in `dir` whose extension matches one of
/// `extensions` (case-insensitive), sorted by file name.
pub fn enumerate_images(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read images directory {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false);
        if matches {
            paths.push(path);
        }
    }

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Batch mode: every matching image in `config.images_dir`, corner-schema metadata.
pub fn run_batch(
    config: &BatchConfig,
    generator: &dyn ProposalGenerator,
    debug_dir: Option<PathBuf>,
) -> Result<BatchSummary> {
    let mut pipeline = CropPipeline::from_config(generator, config);
    if let Some(dir) = debug_dir {
        pipeline = pipeline.with_debug(dir)?;
    }
    pipeline.prepare()?;

    let metadata_path = config.metadata_path();
    let mut sink = MetadataWriter::create(&metadata_path, MetadataSchema::Corners)?;

    let paths = enumerate_images(&config.images_dir, &config.normalized_extensions())?;
    info!(
        "Found {} images in {} (scorer: {}, top_k: {})",
        paths.len(),
        config.images_dir.display(),
        generator.name(),
        config.top_k
    );

    let summary = pipeline.run(&paths, &mut sink)?;
    sink.finish()?;
    Ok(summary)
}

/// Single-image mode: one input, compact-schema metadata in `output_dir/bing_meta.csv`.
///
/// The output layout and metadata file are set up before the image is read;
/// an unreadable image is an error for this mode.
pub fn run_single(
    image_path: &Path,
    count: i64,
    output_dir: &Path,
    generator: &dyn ProposalGenerator,
    format: OutputFormat,
) -> Result<BatchSummary> {
    let pipeline = CropPipeline::new(generator, output_dir, SINGLE_CROPS_SUBDIR, format)
        .with_top_k(count);
    pipeline.prepare()?;

    let mut sink = MetadataWriter::create(
        output_dir.join(SINGLE_METADATA_FILE),
        MetadataSchema::Compact,
    )?;

    let source = pipeline
        .load(image_path)
        .with_context(|| format!("Could not read image {}", image_path.display()))?;

    let mut report = pipeline.process_source(&source);
    pipeline.record(&mut report, &mut sink)?;
    sink.finish()?;

    let mut summary = BatchSummary::default();
    tally(&mut summary.counters, &report);
    summary.reports.push(report);
    Ok(summary)
}

pub const SINGLE_CROPS_SUBDIR: &str = "crops";
pub const SINGLE_METADATA_FILE: &str = "bing_meta.csv";
