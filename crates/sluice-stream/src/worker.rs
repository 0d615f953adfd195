//! Per-stream download worker.
//!
//! One task per [`crate::AdaptiveStream`]. The worker claims the next
//! undownloaded slot, streams its payload from the network, and routes
//! every chunk through the tree's decryption hook. Encrypted payloads are
//! fed to the hook block-aligned, with the final block held back until end
//! of stream so padding removal sees it last. Failures never cross the
//! task boundary: they are recorded in slot state and observed by the
//! reader on its next wakeup.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use sluice_manifest::{RepAddress, SegmentRequest, SharedTree};
use sluice_net::{Headers, Net};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::{
    buffer::{Ring, SlotState},
    error::{StreamError, StreamResult},
};

/// AES block size; encrypted chunks are aligned to this.
const BLOCK: usize = 16;

pub(crate) struct StreamShared {
    pub ring: Mutex<Ring>,
    pub reader_wake: Notify,
    pub worker_wake: Notify,
    pub cancel: CancellationToken,
    pub media_headers: Headers,
}

impl StreamShared {
    pub fn new(media_headers: Headers) -> Self {
        Self {
            ring: Mutex::new(Ring::default()),
            reader_wake: Notify::new(),
            worker_wake: Notify::new(),
            cancel: CancellationToken::new(),
            media_headers,
        }
    }
}

pub(crate) struct WorkerContext {
    pub shared: Arc<StreamShared>,
    pub tree: SharedTree,
    pub net: Arc<dyn Net>,
}

struct Job {
    request: SegmentRequest,
    rep: RepAddress,
    is_init: bool,
}

pub(crate) async fn run(ctx: WorkerContext) {
    loop {
        let Some(job) = claim_next(&ctx).await else {
            debug!("worker: stopping");
            return;
        };

        let number = job.request.segment_number;
        match download_one(&ctx, &job).await {
            Ok(()) => {
                trace!(number, is_init = job.is_init, "worker: segment ready");
            }
            Err(StreamError::Stopped) => {
                // Slot vanished (seek / switch / stop): drop the partial
                // payload silently.
                debug!(number, "worker: download abandoned");
            }
            Err(error) => {
                warn!(number, %error, "worker: segment download failed");
                let mut ring = ctx.shared.ring.lock();
                if let Some(slot) = ring.find_slot_mut(number, job.rep, job.is_init) {
                    slot.state = SlotState::Failed;
                }
            }
        }
        ctx.shared.reader_wake.notify_waiters();
    }
}

/// Wait until there is an undownloaded slot, or the stream stops.
async fn claim_next(ctx: &WorkerContext) -> Option<Job> {
    loop {
        let notified = ctx.shared.worker_wake.notified();
        tokio::pin!(notified);

        {
            let mut ring = ctx.shared.ring.lock();
            if ring.stopped {
                return None;
            }
            if let Some((request, rep, is_init)) = ring.claim_download() {
                return Some(Job {
                    request,
                    rep,
                    is_init,
                });
            }
        }

        tokio::select! {
            _ = ctx.shared.cancel.cancelled() => return None,
            _ = &mut notified => {}
        }
    }
}

async fn download_one(ctx: &WorkerContext, job: &Job) -> StreamResult<()> {
    let url: Url = job
        .request
        .url
        .parse()
        .map_err(|_| StreamError::InvalidUrl(job.request.url.clone()))?;

    let mut body = ctx
        .net
        .stream(url, &ctx.shared.media_headers, job.request.range)
        .await?;

    let encrypted = job.request.pssh_set != 0;
    let number = job.request.segment_number;
    let mut iv = [0u8; 16];
    let mut carry: Vec<u8> = Vec::new();
    let mut first_chunk = true;

    while let Some(chunk) = body.next().await {
        if ctx.shared.cancel.is_cancelled() {
            return Err(StreamError::Stopped);
        }
        let chunk = chunk?;

        if !encrypted {
            append(ctx, job, &chunk)?;
            continue;
        }

        // Hold back at least one block so the final one is decrypted with
        // padding handling once the body ends.
        carry.extend_from_slice(&chunk);
        let held_back = carry.len().saturating_sub(BLOCK);
        let aligned = held_back - held_back % BLOCK;
        if aligned == 0 {
            continue;
        }
        let block: Vec<u8> = carry.drain(..aligned).collect();
        let plain = ctx
            .tree
            .on_data_arrived(
                job.rep.period,
                number,
                job.request.pssh_set,
                &mut iv,
                &block,
                first_chunk,
                false,
            )
            .await?;
        first_chunk = false;
        append(ctx, job, &plain)?;
    }

    if encrypted && !carry.is_empty() {
        let plain = ctx
            .tree
            .on_data_arrived(
                job.rep.period,
                number,
                job.request.pssh_set,
                &mut iv,
                &carry,
                first_chunk,
                true,
            )
            .await?;
        append(ctx, job, &plain)?;
    }

    let mut ring = ctx.shared.ring.lock();
    let slot = ring
        .find_slot_mut(number, job.rep, job.is_init)
        .ok_or(StreamError::Stopped)?;
    slot.state = SlotState::Ready;
    Ok(())
}

/// Append decrypted bytes to the job's slot; errors out when the slot was
/// dropped underneath the download.
fn append(ctx: &WorkerContext, job: &Job, bytes: &[u8]) -> StreamResult<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let mut ring = ctx.shared.ring.lock();
    let slot = ring
        .find_slot_mut(job.request.segment_number, job.rep, job.is_init)
        .ok_or(StreamError::Stopped)?;
    slot.payload.extend_from_slice(bytes);
    drop(ring);
    ctx.shared.reader_wake.notify_waiters();
    Ok(())
}
