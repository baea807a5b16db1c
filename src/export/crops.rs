use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::ExportError;
use crate::models::ClippedBox;

/// Encoding used for every crop in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum OutputFormat {
    Jpeg { quality: u8 },
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Jpeg { quality: 90 }
    }
}

/// `<base_name>_crop<index>.<ext>`
pub fn crop_file_name(base_name: &str, index: usize, format: OutputFormat) -> String {
    format!("{}_crop{}.{}", base_name, index, format.extension())
}

/// Writes crop files into one directory.
#[derive(Debug, Clone)]
pub struct CropExporter {
    crops_dir: PathBuf,
    format: OutputFormat,
}

impl CropExporter {
    pub fn new(crops_dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            crops_dir: crops_dir.into(),
            format,
        }
    }

    pub fn crops_dir(&self) -> &Path {
        &self.crops_dir
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Where crop `index` of `base_name` lands.
    pub fn destination(&self, base_name: &str, index: usize) -> PathBuf {
        self.crops_dir
            .join(crop_file_name(base_name, index, self.format))
    }

    /// Cut `bbox` out of `image` and write it to `destination`.
    pub fn export(
        &self,
        image: &DynamicImage,
        bbox: &ClippedBox,
        destination: &Path,
    ) -> Result<(), ExportError> {
        if bbox.right() > image.width() || bbox.bottom() > image.height() {
            return Err(ExportError::OutOfBounds {
                x: bbox.x,
                y: bbox.y,
                width: bbox.width,
                height: bbox.height,
                image_width: image.width(),
                image_height: image.height(),
            });
        }

        let crop = image.crop_imm(bbox.x, bbox.y, bbox.width, bbox.height);

        let encode_err = |source| ExportError::Encode {
            path: destination.to_path_buf(),
            source,
        };

        match self.format {
            OutputFormat::Jpeg { quality } => {
                let file = File::create(destination).map_err(|source| ExportError::Create {
                    path: destination.to_path_buf(),
                    source,
                })?;
                let mut writer = BufWriter::new(file);
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgb8(crop.to_rgb8());
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
                    .map_err(encode_err)?;
                writer.into_inner().map_err(|e| ExportError::Write {
                    path: destination.to_path_buf(),
                    source: e.into_error(),
                })?;
            }
            OutputFormat::Png => {
                crop.save_with_format(destination, ImageFormat::Png)
                    .map_err(encode_err)?;
            }
        }

        Ok(())
    }
}
