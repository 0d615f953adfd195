//! `AdaptiveStream`: the byte-level reader over a segmented stream.
//!
//! One stream per active adaptation set. The reader sees one contiguous
//! elementary stream; segment boundaries, period transitions, live
//! refreshes and bitrate switches all happen underneath `read`. A single
//! worker task downloads ahead into the bounded ring; the reader consumes
//! the front slot and rotates.
//!
//! Lock discipline: the ring lock and the tree lock are never held at the
//! same time, and neither is held across an await.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use sluice_manifest::{RepAddress, RepFlags, SharedTree, StreamKind};
use sluice_net::Net;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::debug;

use crate::{
    buffer::{SegmentBuffer, SlotState},
    error::{StreamError, StreamResult},
    events::StreamEvent,
    options::StreamOptions,
    worker::{self, StreamShared, WorkerContext},
};

/// Result of a time-based seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekOutcome {
    /// A segment containing the target was found.
    pub found: bool,
    /// The demuxer must be flushed (segment, period or representation
    /// changed).
    pub needs_reset: bool,
}

enum Step {
    Data,
    Advance,
    Wait,
    Empty,
    Failed,
    Stopped,
}

pub struct AdaptiveStream {
    tree: SharedTree,
    net: Arc<dyn Net>,
    options: StreamOptions,
    shared: Arc<StreamShared>,
    worker: Option<JoinHandle<()>>,
    addr: RepAddress,
    read_pos: usize,
    absolute_position: u64,
    current_pts: u64,
    absolute_pts_offset: u64,
    started: bool,
    eos: bool,
    waiting: bool,
    last_segment_change: Instant,
    events_tx: broadcast::Sender<StreamEvent>,
}

impl AdaptiveStream {
    pub fn new(
        tree: SharedTree,
        net: Arc<dyn Net>,
        addr: RepAddress,
        options: StreamOptions,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(options.event_capacity.max(1));
        let shared = Arc::new(StreamShared::new(options.media_headers.clone()));
        Self {
            tree,
            net,
            options,
            shared,
            worker: None,
            addr,
            read_pos: 0,
            absolute_position: 0,
            current_pts: 0,
            absolute_pts_offset: 0,
            started: false,
            eos: false,
            waiting: false,
            last_segment_change: Instant::now(),
            events_tx,
        }
    }

    /// Subscribe to stream events.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events_tx.subscribe()
    }

    pub fn representation_address(&self) -> RepAddress {
        self.addr
    }

    /// Stream kind of the adaptation set this stream reads.
    pub fn kind(&self) -> Option<StreamKind> {
        self.tree
            .with_tree(|t| t.adaptation_set(self.addr).map(|set| set.kind))
    }

    /// Presentation length in milliseconds.
    pub fn max_time_ms(&self) -> u64 {
        self.tree.with_tree(|t| t.overall_seconds) * 1000
    }

    /// Start PTS of the segment currently being read, in the
    /// representation's timescale.
    pub fn current_pts_offset(&self) -> u64 {
        self.current_pts
    }

    /// Start PTS of the very first segment.
    pub fn absolute_pts_offset(&self) -> u64 {
        self.absolute_pts_offset
    }

    /// Whether the reader is stalled at the live edge (transient) rather
    /// than terminally done. With `check_time` the stall only counts while
    /// a refresh can still plausibly deliver new segments.
    pub fn waiting_for_segment(&self, check_time: bool) -> bool {
        if !self.waiting {
            return false;
        }
        if !check_time {
            return true;
        }
        let interval_ms = self.tree.with_tree(|t| t.update_interval_ms);
        let bound = if interval_ms == u64::MAX {
            Duration::from_secs(8)
        } else {
            Duration::from_millis((interval_ms.saturating_mul(3)).clamp(4_000, 30_000))
        };
        self.last_segment_change.elapsed() < bound
    }

    /// Initialise the stream: load the playlist, pick the first segment
    /// (live: near the live edge; VOD: the beginning), queue the lookahead
    /// and spawn the worker.
    pub async fn start(&mut self) -> StreamResult<()> {
        if self.started {
            return Ok(());
        }
        if self.shared.cancel.is_cancelled() {
            // Restart after stop(): fresh handshake state.
            self.shared = Arc::new(StreamShared::new(self.options.media_headers.clone()));
        }

        let prepared = self.tree.prepare_representation(self.addr, false).await?;
        if !prepared {
            return Err(StreamError::NothingToStream);
        }

        let addr = self.addr;
        let live_edge_offset = self.options.live_edge_offset.max(1);
        let play_timeshift = self.options.play_timeshift_buffer;

        let info = self.tree.with_tree_mut(|t| {
            let live = t.has_timeshift_buffer;
            let rep = t
                .representation_mut(addr)
                .ok_or(StreamError::NothingToStream)?;
            if rep.segments.is_empty() {
                return Err(StreamError::NothingToStream);
            }
            rep.flags |= RepFlags::ENABLED;
            let index = if live && !play_timeshift {
                rep.segments.len().saturating_sub(live_edge_offset)
            } else {
                0
            };
            rep.current_segment = Some(index);
            Ok((
                rep.start_number + index as u64,
                rep.segments[index].start_pts.unwrap_or(0),
                rep.segments[0].start_pts.unwrap_or(0),
            ))
        })?;
        let (start_number, current_pts, absolute_pts) = info;

        self.current_pts = current_pts;
        self.absolute_pts_offset = absolute_pts;
        self.read_pos = 0;
        self.absolute_position = 0;
        self.eos = false;
        self.waiting = false;

        {
            let mut ring = self.shared.ring.lock();
            ring.clear();
            ring.next_number = start_number;
            ring.stopped = false;
        }
        self.queue_init_slot();
        self.top_up();

        let ctx = WorkerContext {
            shared: self.shared.clone(),
            tree: self.tree.clone(),
            net: self.net.clone(),
        };
        self.worker = Some(tokio::spawn(worker::run(ctx)));
        self.started = true;
        self.last_segment_change = Instant::now();
        debug!(addr = ?self.addr, start_number, "stream: started");
        Ok(())
    }

    /// Copy bytes out of the current segment buffer, transparently
    /// crossing segment and period boundaries.
    ///
    /// Returns `Ok(0)` at end of stream or on a live-edge stall; the two
    /// are distinguished by [`Self::waiting_for_segment`].
    pub async fn read(&mut self, buf: &mut [u8]) -> StreamResult<usize> {
        if !self.started {
            return Err(StreamError::NotStarted);
        }
        if buf.is_empty() {
            // Position-sync no-op (`tell`).
            self.ensure_segment().await?;
            return Ok(0);
        }

        loop {
            if !self.ensure_segment().await? {
                return Ok(0);
            }

            let mut copied = 0;
            {
                let ring = self.shared.ring.lock();
                if let Some(front) = ring.slots.front() {
                    let available = front.payload.len().saturating_sub(self.read_pos);
                    if available > 0 {
                        copied = available.min(buf.len());
                        buf[..copied]
                            .copy_from_slice(&front.payload[self.read_pos..self.read_pos + copied]);
                    }
                }
            }
            if copied > 0 {
                self.read_pos += copied;
                self.absolute_position += copied as u64;
                return Ok(copied);
            }
        }
    }

    /// Current absolute byte position (after syncing across an exhausted
    /// segment boundary).
    pub async fn tell(&mut self) -> StreamResult<u64> {
        self.read(&mut []).await?;
        Ok(self.absolute_position)
    }

    /// Byte-addressed seek within the current segment's downloaded bytes.
    /// Cross-segment positioning goes through [`Self::seek_time`].
    pub fn seek(&mut self, position: u64) -> bool {
        let segment_start = self.absolute_position.saturating_sub(self.read_pos as u64);
        if position < segment_start {
            return false;
        }
        let delta = (position - segment_start) as usize;
        {
            let ring = self.shared.ring.lock();
            let Some(front) = ring.slots.front() else {
                return false;
            };
            if delta > front.payload.len() {
                return false;
            }
        }
        self.read_pos = delta;
        self.absolute_position = position;
        true
    }

    /// Locate the segment whose PTS window contains `seconds` and
    /// reposition there. `preceding` keeps the earlier segment when the
    /// target falls mid-segment.
    pub async fn seek_time(&mut self, seconds: f64, preceding: bool) -> StreamResult<SeekOutcome> {
        if !self.started {
            return Err(StreamError::NotStarted);
        }

        let addr = self.addr;
        let located = self.tree.with_tree(|t| {
            let mut period_start = 0.0_f64;
            let mut chosen: Option<(usize, f64)> = None;
            for (index, period) in t.periods.iter().enumerate() {
                let duration = if period.timescale == 0 {
                    0.0
                } else {
                    period.duration as f64 / period.timescale as f64
                };
                if seconds < period_start + duration || index + 1 == t.periods.len() {
                    chosen = Some((index, period_start));
                    break;
                }
                period_start += duration;
            }
            let (period_index, period_start) = chosen?;
            let target = RepAddress {
                period: period_index,
                ..addr
            };
            let rep = t.representation(target)?;
            if rep.segments.is_empty() {
                return None;
            }
            let local_pts = ((seconds - period_start).max(0.0) * rep.timescale as f64) as u64;
            let index = rep.find_segment_for_pts(local_pts, preceding)?;
            Some((
                target,
                index,
                rep.current_segment,
                rep.start_number + index as u64,
                rep.segments[index].start_pts,
            ))
        });

        let Some((target, index, current, number, pts)) = located else {
            return Ok(SeekOutcome {
                found: false,
                needs_reset: false,
            });
        };

        let needs_reset = target.period != self.addr.period || current != Some(index);
        if !needs_reset {
            return Ok(SeekOutcome {
                found: true,
                needs_reset: false,
            });
        }

        self.reposition(target, index, number, pts);
        Ok(SeekOutcome {
            found: true,
            needs_reset: true,
        })
    }

    /// Switch to another representation of the same adaptation set. The
    /// current and in-flight buffers drain at the old quality; queued
    /// prefetch is re-targeted.
    pub async fn switch_representation(&mut self, representation: usize) -> StreamResult<()> {
        if representation == self.addr.representation {
            return Ok(());
        }
        let new_addr = RepAddress {
            representation,
            ..self.addr
        };
        if !self.started {
            self.addr = new_addr;
            return Ok(());
        }

        let prepared = self.tree.prepare_representation(new_addr, false).await?;
        if !prepared {
            return Err(StreamError::NothingToStream);
        }

        let next_number = self.shared.ring.lock().next_number;
        let old_addr = self.addr;
        let switched = self.tree.with_tree_mut(|t| {
            if let Some(old) = t.representation_mut(old_addr) {
                old.flags -= RepFlags::ENABLED;
            }
            let rep = t.representation_mut(new_addr)?;
            if rep.segments.is_empty() {
                return None;
            }
            rep.flags |= RepFlags::ENABLED;
            let clamped = next_number.max(rep.start_number);
            let index =
                ((clamped - rep.start_number) as usize).min(rep.segments.len().saturating_sub(1));
            rep.current_segment = Some(index);
            Some((rep.bandwidth, clamped))
        });
        let Some((bandwidth, clamped)) = switched else {
            return Err(StreamError::NothingToStream);
        };

        self.addr = new_addr;
        {
            let mut ring = self.shared.ring.lock();
            // Keep the front and anything already downloading; drop the
            // rest of the prefetch so it re-queues at the new quality.
            while ring.slots.len() > ring.valid {
                ring.slots.pop_back();
            }
            ring.next_number = clamped;
            ring.eos = false;
        }
        self.eos = false;
        self.queue_init_slot();
        self.top_up();
        debug!(?new_addr, bandwidth, "stream: representation switched");
        let _ = self.events_tx.send(StreamEvent::StreamChanged { bandwidth });
        Ok(())
    }

    /// Stop the worker and disable the representation. Terminal until
    /// [`Self::start`] is called again.
    pub async fn stop(&mut self) {
        self.shared.cancel.cancel();
        {
            let mut ring = self.shared.ring.lock();
            ring.stopped = true;
        }
        self.shared.worker_wake.notify_waiters();
        self.shared.reader_wake.notify_waiters();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        let addr = self.addr;
        self.tree.with_tree_mut(|t| {
            if let Some(rep) = t.representation_mut(addr) {
                rep.flags -= RepFlags::ENABLED;
            }
        });
        self.started = false;
        debug!(addr = ?self.addr, "stream: stopped");
    }

    /// Drop all buffered payload and reset the reader position within the
    /// stream (the segment cursor is untouched).
    pub fn clear(&mut self) {
        self.shared.ring.lock().clear();
        self.read_pos = 0;
    }

    /// Make sure the front slot has readable bytes, advancing across
    /// segments and periods as needed. `false` means end of stream or a
    /// live-edge stall.
    async fn ensure_segment(&mut self) -> StreamResult<bool> {
        loop {
            if self.shared.cancel.is_cancelled() || self.eos {
                return Ok(false);
            }

            let step = {
                let ring = self.shared.ring.lock();
                if ring.stopped {
                    Step::Stopped
                } else {
                    match ring.slots.front() {
                        None => Step::Empty,
                        Some(front) => match front.state {
                            SlotState::Failed => Step::Failed,
                            _ if self.read_pos < front.payload.len() => Step::Data,
                            SlotState::Ready => Step::Advance,
                            _ => Step::Wait,
                        },
                    }
                }
            };

            match step {
                Step::Data => {
                    self.waiting = false;
                    return Ok(true);
                }
                Step::Stopped => return Ok(false),
                Step::Failed => {
                    self.eos = true;
                    self.waiting = false;
                    let _ = self.events_tx.send(StreamEvent::EndOfStream);
                    return Ok(false);
                }
                Step::Advance => {
                    self.shared.ring.lock().pop_front();
                    self.read_pos = 0;
                    self.activate_front();
                    self.top_up();
                }
                Step::Wait => {
                    let notified = self.shared.reader_wake.notified();
                    tokio::pin!(notified);
                    // Re-check after registering so a wakeup between the
                    // two locks is not lost.
                    let changed = {
                        let ring = self.shared.ring.lock();
                        match ring.slots.front() {
                            Some(front) => {
                                ring.stopped
                                    || self.read_pos < front.payload.len()
                                    || matches!(front.state, SlotState::Ready | SlotState::Failed)
                            }
                            None => true,
                        }
                    };
                    if !changed {
                        tokio::select! {
                            _ = self.shared.cancel.cancelled() => return Ok(false),
                            _ = &mut notified => {}
                        }
                    }
                }
                Step::Empty => {
                    if !self.advance_or_stall().await? {
                        return Ok(false);
                    }
                    // The ring was empty, so whatever got queued is a new
                    // current segment.
                    self.activate_front();
                }
            }
        }
    }

    /// The ring is empty: queue more of the current representation, cross
    /// into the next period, or report stall / end of stream.
    async fn advance_or_stall(&mut self) -> StreamResult<bool> {
        let next_number = self.shared.ring.lock().next_number;
        let addr = self.addr;

        let (have_next, clamped_next, live, period_count) = self.tree.with_tree(|t| {
            let live = t.has_timeshift_buffer;
            let count = t.periods.len();
            match t.representation(addr) {
                Some(rep) => {
                    // A reader that fell out of the live window restarts at
                    // the first available segment.
                    let clamped = next_number.max(rep.start_number);
                    let index = (clamped - rep.start_number) as usize;
                    (index < rep.segments.len(), clamped, live, count)
                }
                None => (false, next_number, live, count),
            }
        });

        if have_next {
            if clamped_next != next_number {
                self.shared.ring.lock().next_number = clamped_next;
            }
            self.top_up();
            return Ok(true);
        }

        if self.addr.period + 1 < period_count {
            if self.enter_period(self.addr.period + 1).await? {
                return Ok(true);
            }
        }

        if live {
            self.tree.with_tree_mut(|t| {
                if let Some(rep) = t.representation_mut(addr) {
                    rep.flags |= RepFlags::WAIT_FOR_SEGMENT;
                }
            });
            self.tree.poke_refresh();
            if !self.waiting {
                debug!(?addr, "stream: waiting at the live edge");
                let _ = self.events_tx.send(StreamEvent::WaitingForSegment);
            }
            self.waiting = true;
            return Ok(false);
        }

        self.eos = true;
        self.waiting = false;
        let _ = self.events_tx.send(StreamEvent::EndOfStream);
        Ok(false)
    }

    /// Cross into `period`, keeping the adaptation/representation indices.
    async fn enter_period(&mut self, period: usize) -> StreamResult<bool> {
        let target = RepAddress {
            period,
            ..self.addr
        };

        let needs_prepare = self.tree.with_tree(|t| {
            t.representation(target)
                .map(|rep| rep.segments.is_empty() && !rep.source_url.is_empty())
                .unwrap_or(false)
        });
        if needs_prepare {
            self.tree.prepare_representation(target, false).await?;
        }

        let old_addr = self.addr;
        let entered = self.tree.with_tree_mut(|t| {
            let start_number = match t.representation(target) {
                Some(rep) if !rep.segments.is_empty() => rep.start_number,
                _ => return None,
            };
            if let Some(old) = t.representation_mut(old_addr) {
                old.flags -= RepFlags::ENABLED;
            }
            if let Some(rep) = t.representation_mut(target) {
                rep.flags |= RepFlags::ENABLED;
                rep.current_segment = Some(0);
            }
            t.current_period = period;
            Some(start_number)
        });

        let Some(start_number) = entered else {
            return Ok(false);
        };

        self.addr = target;
        self.shared.ring.lock().next_number = start_number;
        self.queue_init_slot();
        self.top_up();
        debug!(period, "stream: crossed into next period");
        Ok(true)
    }

    /// Clear everything and restart the pipeline at a specific segment.
    fn reposition(&mut self, target: RepAddress, index: usize, number: u64, pts: Option<u64>) {
        let old_addr = self.addr;
        self.tree.with_tree_mut(|t| {
            if target != old_addr {
                if let Some(old) = t.representation_mut(old_addr) {
                    old.flags -= RepFlags::ENABLED;
                }
            }
            if let Some(rep) = t.representation_mut(target) {
                rep.flags |= RepFlags::ENABLED;
                rep.current_segment = Some(index);
            }
            t.current_period = target.period;
        });

        self.addr = target;
        {
            let mut ring = self.shared.ring.lock();
            ring.clear();
            ring.next_number = number;
        }
        self.read_pos = 0;
        self.absolute_position = 0;
        self.eos = false;
        self.waiting = false;
        if let Some(pts) = pts {
            self.current_pts = pts;
        }
        self.last_segment_change = Instant::now();

        self.queue_init_slot();
        self.top_up();
        let _ = self.events_tx.send(StreamEvent::SegmentChanged {
            segment_number: number,
            period: target.period,
        });
    }

    /// Queue the representation's initialization segment, if it has one.
    fn queue_init_slot(&self) {
        let request = self.tree.with_tree(|t| t.initialization_request(self.addr));
        if let Some(request) = request {
            {
                let mut ring = self.shared.ring.lock();
                if ring.has_room() {
                    ring.slots
                        .push_back(SegmentBuffer::queued(request, self.addr, None, true));
                }
            }
            self.shared.worker_wake.notify_one();
        }
    }

    /// Fill the ring with upcoming segment descriptors up to the bound.
    fn top_up(&self) {
        loop {
            let next_number = {
                let ring = self.shared.ring.lock();
                if !ring.has_room() || ring.stopped {
                    break;
                }
                ring.next_number
            };

            let allocated = self.tree.with_tree(|t| {
                let rep = t.representation(self.addr)?;
                let index = next_number.checked_sub(rep.start_number)? as usize;
                let start_pts = rep.segment(index)?.start_pts;
                let request = t.segment_request(self.addr, index)?;
                Some((request, start_pts))
            });

            match allocated {
                Some((request, start_pts)) => {
                    {
                        let mut ring = self.shared.ring.lock();
                        ring.slots.push_back(SegmentBuffer::queued(
                            request, self.addr, start_pts, false,
                        ));
                        ring.next_number = next_number + 1;
                    }
                    self.shared.worker_wake.notify_one();
                }
                None => break,
            }
        }
    }

    /// A new front slot became current: move the segment cursor, note the
    /// PTS and tell observers.
    fn activate_front(&mut self) {
        let front = {
            let ring = self.shared.ring.lock();
            ring.slots
                .front()
                .map(|f| (f.request.segment_number, f.start_pts, f.is_init, f.rep))
        };
        let Some((number, pts, is_init, rep_addr)) = front else {
            return;
        };
        if is_init {
            return;
        }

        self.tree.with_tree_mut(|t| {
            t.current_period = rep_addr.period;
            if let Some(rep) = t.representation_mut(rep_addr) {
                if let Some(index) = number.checked_sub(rep.start_number) {
                    if (index as usize) < rep.segments.len() {
                        rep.current_segment = Some(index as usize);
                    }
                }
            }
        });

        if let Some(pts) = pts {
            self.current_pts = pts;
        }
        self.last_segment_change = Instant::now();
        let _ = self.events_tx.send(StreamEvent::SegmentChanged {
            segment_number: number,
            period: rep_addr.period,
        });
    }
}

impl Drop for AdaptiveStream {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        self.shared.worker_wake.notify_waiters();
        self.shared.reader_wake.notify_waiters();
    }
}
