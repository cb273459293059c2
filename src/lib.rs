//! Supplement label checker.
//!
//! Reads a photographed supplement label with OCR, matches the text against
//! a registry of banned and restricted substances and marks every match by
//! severity.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod ocr;
pub mod paths;
pub mod pipeline;
pub mod registry;
pub mod substance;
