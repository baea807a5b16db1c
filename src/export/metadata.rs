use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::models::CropRecord;

/// Column layout of a metadata file. Fixed for the life of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSchema {
    /// One row per crop with all four corners and the label column.
    Corners,
    /// `relative_crop_path,x,y,width,height`
    Compact,
}

impl MetadataSchema {
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            MetadataSchema::Corners => &[
                "file_name",
                "crop_index",
                "top_left_x",
                "top_left_y",
                "top_right_x",
                "top_right_y",
                "bottom_left_x",
                "bottom_left_y",
                "bottom_right_x",
                "bottom_right_y",
                "WRONG",
            ],
            MetadataSchema::Compact => &["relative_crop_path", "x", "y", "width", "height"],
        }
    }

    pub fn row(&self, record: &CropRecord) -> Vec<String> {
        let b = &record.bbox;
        match self {
            MetadataSchema::Corners => vec![
                record.file_name.clone(),
                record.crop_index.to_string(),
                b.x.to_string(),
                b.y.to_string(),
                b.right().to_string(),
                b.y.to_string(),
                b.x.to_string(),
                b.bottom().to_string(),
                b.right().to_string(),
                b.bottom().to_string(),
                if record.label { "TRUE" } else { "FALSE" }.to_string(),
            ],
            MetadataSchema::Compact => vec![
                record.relative_path.clone(),
                b.x.to_string(),
                b.y.to_string(),
                b.width.to_string(),
                b.height.to_string(),
            ],
        }
    }
}

/// Append-only CSV sink. The header goes out on creation; rows are only ever added.
pub struct MetadataWriter {
    path: PathBuf,
    schema: MetadataSchema,
    writer: BufWriter<File>,
    rows: usize,
}

impl MetadataWriter {
    /// Create (or truncate) `path` and write the header row.
    pub fn create(path: impl AsRef<Path>, schema: MetadataSchema) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("Failed to open metadata file {}", path.display()))?;

        let mut writer = Self {
            path,
            schema,
            writer: BufWriter::new(file),
            rows: 0,
        };
        let header: Vec<String> = schema.header().iter().map(|s| s.to_string()).collect();
        writer.write_line(&header)?;
        writer.flush()?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> MetadataSchema {
        self.schema
    }

    /// Data rows written so far, header excluded.
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn append(&mut self, record: &CropRecord) -> Result<()> {
        let row = self.schema.row(record);
        self.write_line(&row)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))
    }

    /// Flush and close the sink.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        Ok(self.rows)
    }

    fn write_line(&mut self, fields: &[String]) -> Result<()> {
        let line = fields
            .iter()
            .map(|f| escape_field(f))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(self.writer, "{}", line)
            .with_context(|| format!("Failed to write to {}", self.path.display()))
    }
}

/// Quote a CSV field if it contains a separator, quote, or line break.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
