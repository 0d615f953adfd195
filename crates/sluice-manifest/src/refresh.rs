//! Live playlist refresh task.
//!
//! One task per tree while the manifest is refreshable. Cadence follows
//! `update_interval_ms` (1.5× the smallest target duration seen); a poke
//! forces an immediate cycle, e.g. when a reader hits the live edge.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{shared::SharedTree, tree::RepFlags};

/// Fallback cadence until a target duration has been parsed.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) fn spawn(shared: SharedTree) -> JoinHandle<()> {
    tokio::spawn(run(shared))
}

async fn run(shared: SharedTree) {
    loop {
        let interval = shared.with_tree(|tree| {
            if tree.update_interval_ms == u64::MAX {
                DEFAULT_INTERVAL
            } else {
                Duration::from_millis(tree.update_interval_ms)
            }
        });

        tokio::select! {
            _ = shared.inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
            _ = shared.inner.refresh_poke.notified() => {
                debug!("refresh: poked");
            }
        }
        if shared.inner.cancel.is_cancelled() {
            break;
        }

        refresh_all(&shared).await;
    }
    debug!("refresh: task stopped");
}

/// Re-fetch every enabled representation's media playlist, preserving
/// reader positions. Transient errors are logged and retried next tick.
pub(crate) async fn refresh_all(shared: &SharedTree) {
    let refreshable = shared.with_tree(|tree| tree.refresh_playlist);
    if !refreshable {
        return;
    }

    let enabled = shared.with_tree(|tree| tree.representations_with_flag(RepFlags::ENABLED));
    for addr in enabled {
        match shared.prepare_representation(addr, true).await {
            Ok(_) => {}
            Err(error) => {
                warn!(?addr, %error, "refresh: playlist update failed, retrying next tick");
            }
        }
    }

    shared.inner.segments_updated.notify_waiters();
}
