use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dedupe_index_common::{ChunkName, IndexError, IndexPageSummary, PhysicalChapterNumber, Vcn};
use tokio::sync::{mpsc, watch};

use crate::physical::PhysicalVolume;

/// A fully assembled, closed chapter waiting to be written out.
struct CloseChapterJob {
    physical_chapter: PhysicalChapterNumber,
    vcn: Vcn,
    index_pages: Vec<IndexPageSummary>,
    record_pages: Vec<Vec<ChunkName>>,
    bytes: u64,
}

fn job_bytes(index_pages: &[IndexPageSummary], record_pages: &[Vec<ChunkName>]) -> u64 {
    let index_bytes = index_pages.len() as u64 * std::mem::size_of::<IndexPageSummary>() as u64;
    let record_bytes: u64 = record_pages
        .iter()
        .map(|page| page.len() as u64 * dedupe_index_common::CHUNK_NAME_SIZE as u64)
        .sum();
    index_bytes + record_bytes
}

/// Hands a closed chapter's pages off to a background task so the zone
/// thread that closed it can start filling the next open chapter
/// immediately. Grounded on the teacher's `WalWriter` (buffered,
/// checksummed writes handed to a dedicated writer), generalized from a
/// synchronous buffered writer to an async background drain so `save()`
/// can await completion without blocking a zone.
///
/// Jobs are drained one at a time, in submission order, by a single
/// `tokio::spawn`ed task — this is what lets a zone trust that "my
/// chapter was handed to the writer" implies "it will land on disk
/// before any chapter closed after it."
///
/// Idle tracking uses a `watch` channel rather than `Notify`: a `watch`
/// receiver that starts waiting *after* the value already changed still
/// observes that change on its first `changed().await`, while
/// `Notify::notify_waiters` only wakes tasks already parked at the time
/// it fires. A caller that calls `wait_for_idle` just after the last job
/// was submitted must not miss the completion signal.
pub struct ChapterWriter {
    tx: mpsc::UnboundedSender<CloseChapterJob>,
    submitted: Arc<AtomicU64>,
    completed: watch::Receiver<u64>,
    bytes_in_flight: Arc<AtomicU64>,
}

impl ChapterWriter {
    pub fn spawn(volume: Arc<PhysicalVolume>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<CloseChapterJob>();
        let submitted = Arc::new(AtomicU64::new(0));
        let (completed_tx, completed_rx) = watch::channel(0u64);
        let bytes_in_flight = Arc::new(AtomicU64::new(0));
        let bytes_in_flight_task = Arc::clone(&bytes_in_flight);

        tokio::spawn(async move {
            let mut done = 0u64;
            while let Some(job) = rx.recv().await {
                if let Err(error) = volume.write_chapter(
                    job.physical_chapter,
                    job.vcn,
                    &job.index_pages,
                    &job.record_pages,
                ) {
                    tracing::error!(
                        physical_chapter = job.physical_chapter,
                        vcn = job.vcn,
                        %error,
                        "failed to write closed chapter"
                    );
                }
                bytes_in_flight_task.fetch_sub(job.bytes, Ordering::SeqCst);
                done += 1;
                // A send error only means every receiver (i.e. every
                // waiter) has been dropped; the writer keeps running.
                let _ = completed_tx.send(done);
            }
        });

        Self { tx, submitted, completed: completed_rx, bytes_in_flight }
    }

    /// Queue a closed chapter for persistence. Returns immediately.
    pub fn submit(
        &self,
        physical_chapter: PhysicalChapterNumber,
        vcn: Vcn,
        index_pages: Vec<IndexPageSummary>,
        record_pages: Vec<Vec<ChunkName>>,
    ) -> Result<(), IndexError> {
        let bytes = job_bytes(&index_pages, &record_pages);
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.bytes_in_flight.fetch_add(bytes, Ordering::SeqCst);
        self.tx
            .send(CloseChapterJob { physical_chapter, vcn, index_pages, record_pages, bytes })
            .map_err(|_| IndexError::ShuttingDown)
    }

    /// Block until every chapter submitted so far has been written.
    pub async fn wait_for_idle(&self) -> Result<(), IndexError> {
        let mut completed = self.completed.clone();
        loop {
            let target = self.submitted.load(Ordering::SeqCst);
            if *completed.borrow() >= target {
                return Ok(());
            }
            if completed.changed().await.is_err() {
                return Err(IndexError::ShuttingDown);
            }
        }
    }

    /// Approximate bytes queued for chapters not yet durably written.
    /// Backs the `get_memory_allocated` collaborator contract (spec §6),
    /// surfaced through `Index::stats()`.
    pub fn memory_allocated(&self) -> u64 {
        self.bytes_in_flight.load(Ordering::SeqCst)
    }
}
