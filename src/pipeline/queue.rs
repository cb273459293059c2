//! Work queue feeding the batch scan worker.
//!
//! Uses std::sync::mpsc channel for single-producer, single-consumer communication.
//! The caller queues uploads in input order; the worker scans them one at a time.

use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use super::upload::ImageUpload;

/// A work item for the scan worker thread.
#[derive(Debug, Clone)]
pub struct ScanWorkItem {
    /// Position in the batch (0-based); results are stored at this slot
    pub index: usize,
    pub upload: ImageUpload,
    /// Timestamp when the item was queued
    pub queued_at: DateTime<Local>,
}

impl ScanWorkItem {
    pub fn new(index: usize, upload: ImageUpload) -> Self {
        Self {
            index,
            upload,
            queued_at: Local::now(),
        }
    }
}

/// Creates a new work queue.
///
/// The channel is unbounded: the whole batch is queued up front.
pub fn create_work_queue() -> (Sender<ScanWorkItem>, Receiver<ScanWorkItem>) {
    channel()
}

/// Shared "stop after the current image" signal.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
