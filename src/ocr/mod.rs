pub mod engine;
pub mod preprocess;
pub mod setup;

pub use engine::{PassKind, Recognition, RecognizeOptions, TesseractRecognizer, TextRecognizer};
pub use preprocess::{Degradation, Preprocessor, ProcessedRaster, Roi};
pub use setup::ensure_tessdata;
