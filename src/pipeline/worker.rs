//! Batch scanning on a dedicated worker thread.
//!
//! Images are scanned strictly one after another. Results are addressed by
//! input index so slot `i` always belongs to upload `i`, and a cancellation
//! request stops the batch before the next image starts.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

use super::queue::{create_work_queue, CancellationFlag, ScanWorkItem};
use super::scan::{ScanPipeline, ScanReport};
use super::upload::ImageUpload;
use crate::error::PipelineError;

/// Outcome for one image of a batch.
#[derive(Debug)]
pub enum BatchSlot {
    Completed(ScanReport),
    Failed(PipelineError),
    /// Not started because the batch was cancelled
    Cancelled,
}

impl BatchSlot {
    pub fn report(&self) -> Option<&ScanReport> {
        match self {
            BatchSlot::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Runs the worker loop.
///
/// Processes items from the queue until the channel closes or `cancel` is
/// set. Each finished item is sent back with its index.
pub fn run_scan_worker(
    receiver: Receiver<ScanWorkItem>,
    results: Sender<(usize, BatchSlot)>,
    pipeline: Arc<ScanPipeline>,
    cancel: CancellationFlag,
) {
    info!("Scan worker started");

    while let Ok(item) = receiver.recv() {
        if cancel.is_cancelled() {
            warn!("Scan worker: batch cancelled before item {}", item.index + 1);
            break;
        }

        info!(
            "Scan worker: processing item {} ({}, queued {})",
            item.index + 1,
            item.upload.name,
            item.queued_at.format("%H:%M:%S")
        );

        let slot = match pipeline.scan(&item.upload) {
            Ok(report) => BatchSlot::Completed(report),
            Err(e) => {
                error!("Scan worker: item {} failed: {}", item.index + 1, e);
                BatchSlot::Failed(e)
            }
        };

        if results.send((item.index, slot)).is_err() {
            warn!("Scan worker: result receiver dropped, exiting");
            break;
        }
    }

    info!("Scan worker finished");
}

/// Scans `uploads` in order on a worker thread.
///
/// `on_slot` is called as each image finishes. The returned vector has one
/// slot per upload; images never started are [`BatchSlot::Cancelled`].
pub fn run_batch<F>(
    pipeline: Arc<ScanPipeline>,
    uploads: Vec<ImageUpload>,
    cancel: &CancellationFlag,
    mut on_slot: F,
) -> Vec<BatchSlot>
where
    F: FnMut(usize, &BatchSlot),
{
    let total = uploads.len();
    let (sender, receiver) = create_work_queue();
    let (result_sender, result_receiver) = channel();

    for (index, upload) in uploads.into_iter().enumerate() {
        // The receiver is alive until the worker starts
        let _ = sender.send(ScanWorkItem::new(index, upload));
    }
    drop(sender);

    let worker_cancel = cancel.clone();
    let handle = thread::spawn(move || run_scan_worker(receiver, result_sender, pipeline, worker_cancel));

    let mut slots: Vec<BatchSlot> = (0..total).map(|_| BatchSlot::Cancelled).collect();
    for (index, slot) in result_receiver {
        on_slot(index, &slot);
        if let Some(target) = slots.get_mut(index) {
            *target = slot;
        }
    }

    if handle.join().is_err() {
        error!("Scan worker thread panicked");
    }

    let done = slots.iter().filter(|s| !matches!(s, BatchSlot::Cancelled)).count();
    info!("Batch finished: {}/{} images processed", done, total);
    slots
}
