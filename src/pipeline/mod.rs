//! Label scanning: upload checks, recognition cache, single-image scans and
//! sequential batches.

pub mod cache;
pub mod queue;
pub mod report;
pub mod scan;
pub mod upload;
pub mod worker;

pub use cache::{image_key, ScanCache};
pub use queue::CancellationFlag;
pub use scan::{RecognizedText, ScanPipeline, ScanReport};
pub use upload::{validate_upload, ImageUpload};
pub use worker::{run_batch, BatchSlot};
