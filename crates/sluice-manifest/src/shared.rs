//! Shared handle around the manifest tree.
//!
//! All tree access goes through [`SharedTree`]: the parser fills it under
//! the lock, the refresh task re-fills it, and segment workers route
//! downloaded chunks through [`SharedTree::on_data_arrived`] for
//! decryption. The lock is never held across an await; network rounds
//! snapshot what they need, then re-acquire to publish.

use std::sync::Arc;

use parking_lot::Mutex;
use sluice_drm::{Decrypter, LicenseConfig};
use sluice_net::{Headers, Net};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{ManifestError, ManifestResult},
    hls,
    refresh,
    resolve,
    tree::{EncryptionState, KidState, RepAddress, RepFlags, Tree},
};

/// Options for opening a manifest.
#[derive(Clone, Debug, Default)]
pub struct TreeOptions {
    /// Headers sent with every manifest / playlist / key request.
    pub manifest_headers: Headers,
    /// Refresh strategy token (`full` re-downloads media playlists).
    pub update_parameter: String,
    /// Query suffix appended to playlist URLs under the manifest base.
    pub manifest_parameter: String,
}

pub(crate) struct SharedTreeInner {
    pub(crate) tree: Mutex<Tree>,
    pub(crate) net: Arc<dyn Net>,
    pub(crate) decrypter: Option<Arc<dyn Decrypter>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) refresh_poke: Notify,
    pub(crate) segments_updated: Notify,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle owning the manifest tree and its refresh task.
#[derive(Clone)]
pub struct SharedTree {
    pub(crate) inner: Arc<SharedTreeInner>,
}

impl SharedTree {
    /// Fetch and parse the manifest at `url`.
    ///
    /// Records the post-redirect base so later downloads hit the same edge,
    /// and computes `base_url` / `base_domain` for link resolution.
    pub async fn open(
        url: &str,
        options: TreeOptions,
        net: Arc<dyn Net>,
        decrypter: Option<Arc<dyn Decrypter>>,
    ) -> ManifestResult<Self> {
        let parsed: Url = url
            .parse()
            .map_err(|_| ManifestError::InvalidUrl(url.to_string()))?;
        let fetched = net.get(parsed, &options.manifest_headers).await?;
        let body = std::str::from_utf8(&fetched.bytes)
            .map_err(|_| ManifestError::InvalidEncoding)?
            .to_string();

        let mut tree = Tree::new();
        tree.manifest_url = url.to_string();
        let (base_url, base_domain) = resolve::split_manifest_url(url);
        tree.base_url = base_url;
        tree.base_domain = base_domain;
        tree.manifest_headers = options.manifest_headers;
        tree.update_parameter = options.update_parameter;
        tree.manifest_parameter = options.manifest_parameter;

        let effective = fetched.effective_url.as_str();
        if effective != url {
            let (effective_base, _) = resolve::split_manifest_url(effective);
            tree.effective_url = effective_base;
            tree.effective_filename = effective
                .split('?')
                .next()
                .unwrap_or("")
                .rsplit('/')
                .next()
                .unwrap_or("")
                .to_string();
            debug!(url, effective, "manifest: redirected");
        }

        tree.master_body = body.clone();
        hls::parse_master(&mut tree, &body, url)?;

        Ok(Self {
            inner: Arc::new(SharedTreeInner {
                tree: Mutex::new(tree),
                net,
                decrypter,
                cancel: CancellationToken::new(),
                refresh_poke: Notify::new(),
                segments_updated: Notify::new(),
                refresh_task: Mutex::new(None),
            }),
        })
    }

    /// Run a closure against the locked tree.
    pub fn with_tree<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&self.inner.tree.lock())
    }

    /// Run a mutating closure against the locked tree.
    pub fn with_tree_mut<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        f(&mut self.inner.tree.lock())
    }

    /// Ensure the representation's media playlist is loaded.
    ///
    /// With `is_update` the reader's current sequence number is preserved
    /// across the refresh: still-available numbers keep their position,
    /// numbers that fell out of the window clamp to the first available
    /// segment, and numbers past the window clamp to the last.
    ///
    /// Returns `Ok(false)` when the representation has nothing to stream.
    pub async fn prepare_representation(
        &self,
        addr: RepAddress,
        is_update: bool,
    ) -> ManifestResult<bool> {
        let (source_url, downloaded, segment_id, headers) = {
            let tree = self.inner.tree.lock();
            let rep =
                tree.representation(addr)
                    .ok_or(ManifestError::UnknownRepresentation {
                        period: addr.period,
                        adaptation: addr.adaptation,
                        representation: addr.representation,
                    })?;
            (
                rep.source_url.clone(),
                rep.flags.contains(RepFlags::DOWNLOADED),
                rep.current_segment_number(),
                tree.manifest_headers.clone(),
            )
        };

        if source_url.is_empty() {
            return Ok(false);
        }

        if !downloaded {
            let download_url = {
                let tree = self.inner.tree.lock();
                resolve::rewrite_effective(&source_url, &tree.base_url, &tree.effective_url)
            };
            let parsed: Url = download_url
                .parse()
                .map_err(|_| ManifestError::InvalidUrl(download_url.clone()))?;
            let fetched = self.inner.net.get(parsed, &headers).await?;
            let body = std::str::from_utf8(&fetched.bytes)
                .map_err(|_| ManifestError::InvalidEncoding)?
                .to_string();

            let parsed_ok = {
                let mut tree = self.inner.tree.lock();
                hls::parse_media(
                    &mut tree,
                    addr,
                    &body,
                    self.inner.decrypter.as_deref(),
                )?
            };
            if !parsed_ok {
                return Ok(false);
            }
        }

        if is_update {
            let mut tree = self.inner.tree.lock();
            if let Some(rep) = tree.representation_mut(addr) {
                match segment_id {
                    None => rep.current_segment = None,
                    Some(number) => {
                        let start = rep.start_number;
                        let len = rep.segments.len() as u64;
                        // Stalled readers restart at the first available
                        // segment; readers past the window clamp to the end.
                        let clamped = number.max(start).min(start + len.saturating_sub(1));
                        rep.current_segment = Some((clamped - start) as usize);
                    }
                }
                let has_next = rep
                    .current_segment
                    .map(|index| rep.has_next_segment(index))
                    .unwrap_or(!rep.segments.is_empty());
                if rep.flags.contains(RepFlags::WAIT_FOR_SEGMENT) && has_next {
                    rep.flags -= RepFlags::WAIT_FOR_SEGMENT;
                    debug!(?addr, "manifest: live window advanced, reader released");
                }
            }
        } else {
            self.start_refresh_task();
        }

        Ok(true)
    }

    /// Decryption hook on the segment download path.
    ///
    /// Resolves the PSSH set's key on first contact (with one renewal
    /// retry when the license config allows), seeds the IV on a segment's
    /// first chunk, and chains CBC across chunks by copying the trailing
    /// ciphertext block into `iv`. Chunks must be block-aligned except the
    /// last. Periods whose key system is handled downstream pass bytes
    /// through untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn on_data_arrived(
        &self,
        period: usize,
        segment_number: u64,
        pssh_set: u16,
        iv: &mut [u8; 16],
        chunk: &[u8],
        first_chunk: bool,
        is_last: bool,
    ) -> ManifestResult<Vec<u8>> {
        if pssh_set == 0 {
            return Ok(chunk.to_vec());
        }

        let passthrough = self.with_tree(|tree| {
            tree.period(period)
                .map(|p| p.encryption_state == EncryptionState::Supported)
                .unwrap_or(true)
        });
        if passthrough {
            return Ok(chunk.to_vec());
        }

        let decrypter = self
            .inner
            .decrypter
            .as_ref()
            .ok_or_else(|| ManifestError::UnsupportedEncryption("no decrypter".to_string()))?
            .clone();

        let key = match self.resolve_key(period, pssh_set, &decrypter).await? {
            KidState::Resolved(key) => key,
            // Permanently failed key: black frames / silence instead of a
            // broken pipeline.
            _ => return Ok(vec![0; chunk.len()]),
        };

        if first_chunk {
            let stored_iv = self.with_tree(|tree| {
                tree.period(period)
                    .and_then(|p| p.pssh_sets.get(pssh_set as usize))
                    .map(|set| set.iv.clone())
                    .unwrap_or_default()
            });
            if stored_iv.is_empty() {
                *iv = decrypter.iv_from_sequence(segment_number);
            } else {
                iv.fill(0);
                let len = stored_iv.len().min(16);
                iv[..len].copy_from_slice(&stored_iv[..len]);
            }
        }

        let plain = decrypter.decrypt(&key, iv, chunk, is_last)?;
        if chunk.len() >= 16 {
            iv.copy_from_slice(&chunk[chunk.len() - 16..]);
        }
        Ok(plain)
    }

    /// Resolve the default key for a PSSH set, caching the outcome.
    async fn resolve_key(
        &self,
        period: usize,
        pssh_set: u16,
        decrypter: &Arc<dyn Decrypter>,
    ) -> ManifestResult<KidState> {
        // Fast path plus cross-lookup: another set in the period may have
        // already resolved the same URL.
        let pssh_url = {
            let mut tree = self.inner.tree.lock();
            let Some(period_ref) = tree.periods.get_mut(period) else {
                return Ok(KidState::Failed);
            };
            let Some(set) = period_ref.pssh_sets.get(pssh_set as usize) else {
                return Ok(KidState::Failed);
            };
            match &set.kid {
                KidState::Resolved(key) => return Ok(KidState::Resolved(key.clone())),
                KidState::Failed => return Ok(KidState::Failed),
                KidState::Pending => {}
            }
            let url = set.pssh.clone();
            let resolved_elsewhere = period_ref
                .pssh_sets
                .iter()
                .find(|other| {
                    other.pssh == url && matches!(other.kid, KidState::Resolved(_))
                })
                .map(|other| other.kid.clone());
            if let Some(state) = resolved_elsewhere {
                period_ref.pssh_sets[pssh_set as usize].kid = state.clone();
                return Ok(state);
            }
            url
        };

        let config = LicenseConfig::parse(&decrypter.license_key());
        let request_url = {
            let tree = self.inner.tree.lock();
            let mut url = pssh_url.clone();
            if !config.query.is_empty() {
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&config.query);
            }
            resolve::rewrite_effective(&url, &tree.base_url, &tree.effective_url)
        };
        let headers: Headers = config.headers.iter().cloned().collect();

        let mut renewed = false;
        let state = loop {
            let parsed: Url = match request_url.parse() {
                Ok(parsed) => parsed,
                Err(_) => break KidState::Failed,
            };
            match self.inner.net.get(parsed, &headers).await {
                Ok(fetched) => break KidState::Resolved(fetched.bytes.to_vec()),
                Err(error) => {
                    warn!(url = %request_url, %error, "manifest: key fetch failed");
                    if !renewed {
                        if let Some(token) = &config.renewal_token {
                            if decrypter.renew_license(token).await {
                                renewed = true;
                                continue;
                            }
                        }
                    }
                    break KidState::Failed;
                }
            }
        };

        let mut tree = self.inner.tree.lock();
        if let Some(set) = tree
            .periods
            .get_mut(period)
            .and_then(|p| p.pssh_sets.get_mut(pssh_set as usize))
        {
            set.kid = state.clone();
        }
        Ok(state)
    }

    /// Spawn the live refresh task if the playlist calls for one.
    /// Idempotent.
    pub fn start_refresh_task(&self) {
        let wanted = self.with_tree(|tree| tree.refresh_playlist && tree.has_timeshift_buffer);
        if !wanted {
            return;
        }
        let mut guard = self.inner.refresh_task.lock();
        if guard.is_some() {
            return;
        }
        debug!("manifest: starting live refresh task");
        *guard = Some(refresh::spawn(self.clone()));
    }

    /// Ask the refresh task to run a cycle now.
    pub fn poke_refresh(&self) {
        self.inner.refresh_poke.notify_one();
    }

    /// Wait until the next refresh cycle publishes updated segment lists.
    pub async fn segments_updated(&self) {
        self.inner.segments_updated.notified().await;
    }

    /// Cancel the refresh task and wait for it to exit.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let task = self.inner.refresh_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
