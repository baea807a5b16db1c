pub mod crops;
pub mod metadata;

pub use crops::{CropExporter, OutputFormat, crop_file_name};
pub use metadata::{MetadataSchema, MetadataWriter};
