//! Bounded ring of segment buffers shared between the reader and the
//! download worker.
//!
//! Accounting: `slots.len()` counts segments whose metadata is known
//! ("available"), `valid` counts slots whose download has completed or is
//! in flight. Always `slots.len() >= valid`, and the ring never exceeds
//! [`MAX_SEGMENT_BUFFERS`]. The reader consumes the front slot and pops it
//! once exhausted; the worker always downloads slot `valid`.

use std::collections::VecDeque;

use sluice_manifest::{RepAddress, SegmentRequest};

/// Lookahead bound: at most this many segments are buffered or in flight.
pub const MAX_SEGMENT_BUFFERS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Metadata known, download not started.
    Queued,
    /// Worker is streaming bytes into the payload.
    Downloading,
    /// Payload complete.
    Ready,
    /// Download failed; terminal for the reader.
    Failed,
}

#[derive(Debug)]
pub(crate) struct SegmentBuffer {
    pub payload: Vec<u8>,
    pub state: SlotState,
    pub request: SegmentRequest,
    pub rep: RepAddress,
    /// Start PTS of the segment, for reader bookkeeping.
    pub start_pts: Option<u64>,
    /// Initialization segments ride the same ring but don't move the
    /// segment cursor.
    pub is_init: bool,
}

impl SegmentBuffer {
    pub fn queued(
        request: SegmentRequest,
        rep: RepAddress,
        start_pts: Option<u64>,
        is_init: bool,
    ) -> Self {
        Self {
            payload: Vec::new(),
            state: SlotState::Queued,
            request,
            rep,
            start_pts,
            is_init,
        }
    }

    pub fn matches(&self, segment_number: u64, rep: RepAddress, is_init: bool) -> bool {
        self.request.segment_number == segment_number && self.rep == rep && self.is_init == is_init
    }
}

#[derive(Debug, Default)]
pub(crate) struct Ring {
    pub slots: VecDeque<SegmentBuffer>,
    /// Number of leading slots downloaded or downloading.
    pub valid: usize,
    /// Absolute number of the next media segment to queue.
    pub next_number: u64,
    /// No further segments will ever be queued.
    pub eos: bool,
    pub stopped: bool,
}

impl Ring {
    pub fn has_room(&self) -> bool {
        self.slots.len() < MAX_SEGMENT_BUFFERS
    }

    /// Take the next undownloaded slot for the worker, marking it
    /// downloading. Returns its request snapshot.
    pub fn claim_download(&mut self) -> Option<(SegmentRequest, RepAddress, bool)> {
        if self.valid >= self.slots.len() {
            return None;
        }
        let index = self.valid;
        let slot = &mut self.slots[index];
        slot.state = SlotState::Downloading;
        self.valid += 1;
        Some((slot.request.clone(), slot.rep, slot.is_init))
    }

    pub fn find_slot_mut(
        &mut self,
        segment_number: u64,
        rep: RepAddress,
        is_init: bool,
    ) -> Option<&mut SegmentBuffer> {
        self.slots
            .iter_mut()
            .find(|slot| slot.matches(segment_number, rep, is_init))
    }

    /// Drop the front slot after the reader consumed it.
    pub fn pop_front(&mut self) -> Option<SegmentBuffer> {
        let slot = self.slots.pop_front()?;
        self.valid = self.valid.saturating_sub(1);
        Some(slot)
    }

    /// Drop everything (seek, representation switch, stop).
    pub fn clear(&mut self) {
        self.slots.clear();
        self.valid = 0;
        self.eos = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(number: u64) -> SegmentRequest {
        SegmentRequest {
            url: format!("https://cdn.example/seg{number}.ts"),
            range: None,
            pssh_set: 0,
            segment_number: number,
        }
    }

    fn addr() -> RepAddress {
        RepAddress {
            period: 0,
            adaptation: 0,
            representation: 0,
        }
    }

    #[test]
    fn claim_walks_queued_slots_in_order() {
        let mut ring = Ring::default();
        for number in 0..3 {
            ring.slots
                .push_back(SegmentBuffer::queued(request(number), addr(), Some(0), false));
        }

        let (first, _, _) = ring.claim_download().unwrap();
        let (second, _, _) = ring.claim_download().unwrap();
        assert_eq!(first.segment_number, 0);
        assert_eq!(second.segment_number, 1);
        assert_eq!(ring.valid, 2);

        let (third, _, _) = ring.claim_download().unwrap();
        assert_eq!(third.segment_number, 2);
        assert!(ring.claim_download().is_none());
    }

    #[test]
    fn pop_front_keeps_valid_consistent() {
        let mut ring = Ring::default();
        for number in 0..2 {
            ring.slots
                .push_back(SegmentBuffer::queued(request(number), addr(), Some(0), false));
        }
        ring.claim_download();
        ring.claim_download();

        ring.pop_front();
        assert_eq!(ring.valid, 1);
        assert_eq!(ring.slots.len(), 1);
        assert_eq!(ring.slots[0].request.segment_number, 1);
    }

    #[test]
    fn ring_never_exceeds_bound() {
        let mut ring = Ring::default();
        for number in 0..MAX_SEGMENT_BUFFERS as u64 {
            assert!(ring.has_room());
            ring.slots
                .push_back(SegmentBuffer::queued(request(number), addr(), Some(0), false));
        }
        assert!(!ring.has_room());
    }
}
