pub mod extractor;
pub mod image_extractor;
pub mod job;
pub mod write_pool;

pub use extractor::BaseExtractor;
pub use image_extractor::ImageExtractor;
pub use job::{ExtractionJob, ExtractionSummary, JobOverrides, NamingScheme};
