//! In-memory manifest tree: Periods → AdaptationSets → Representations →
//! Segments, plus the per-period PSSH tables.
//!
//! The tree is pure data. All mutation happens behind the lock owned by
//! [`crate::SharedTree`]; nothing here holds references across that
//! boundary. Positions are index triples ([`RepAddress`]) and segment
//! cursors are indices into the owning representation's `segments` vector.

use std::collections::HashMap;

use bitflags::bitflags;
use sluice_net::{Headers, RangeSpec};

use crate::resolve;

/// Ticks per second used for HLS PTS arithmetic.
pub const DEFAULT_TIMESCALE: u64 = 1_000_000;

/// Stream kind of an adaptation set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

bitflags! {
    /// Stream kinds muxed into another stream of the period (no own URL).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct IncludedKinds: u8 {
        const VIDEO = 1 << 0;
        const AUDIO = 1 << 1;
        const SUBTITLE = 1 << 2;
    }
}

impl IncludedKinds {
    pub fn bit(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Video => Self::VIDEO,
            StreamKind::Audio => Self::AUDIO,
            StreamKind::Subtitle => Self::SUBTITLE,
        }
    }
}

/// Container format inferred from segment URLs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContainerKind {
    #[default]
    NoType,
    Ts,
    Adts,
    Mp4,
    Invalid,
}

/// Period-level encryption state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum EncryptionState {
    /// No key tags seen.
    #[default]
    Clear,
    /// Encrypted; the engine decrypts inline (AES-128).
    Encrypted,
    /// Encrypted with a key system the host handles downstream (Widevine);
    /// payload bytes pass through untouched.
    Supported,
}

impl EncryptionState {
    /// States only ever escalate; a Supported period never goes back.
    pub fn upgrade(&mut self, to: EncryptionState) {
        if to > *self {
            *self = to;
        }
    }
}

/// Resolution state of a PSSH set's default key id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum KidState {
    /// Not fetched yet.
    #[default]
    Pending,
    /// Fetch failed permanently; affected bytes are zero-filled.
    Failed,
    /// Key material, as served by the key URI.
    Resolved(Vec<u8>),
}

/// De-duplicated encryption descriptor. Index 0 of every period's table is
/// the reserved "clear" entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PsshSet {
    /// Key-system blob or license/key URL.
    pub pssh: String,
    /// Default key id: 16 bytes once resolved.
    pub kid: KidState,
    /// Initialization vector from the playlist, up to 16 bytes; empty means
    /// "derive from the segment sequence number".
    pub iv: Vec<u8>,
    /// KEYID attribute bytes for key systems that carry one inline.
    pub default_kid_hint: Vec<u8>,
}

/// One independently fetchable media unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Segment {
    /// Owned URL when the representation uses per-segment URLs.
    pub url: Option<String>,
    /// Inclusive byte range into the representation's single file.
    pub range: Option<(u64, u64)>,
    /// Start PTS in the representation's timescale; `None` while the
    /// segment is under construction in the parser.
    pub start_pts: Option<u64>,
    /// Index into the owning period's PSSH table; 0 = clear.
    pub pssh_set: u16,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RepFlags: u16 {
        /// Has an initialization segment.
        const INITIALIZATION = 1 << 0;
        /// Segments carry their own URLs (no shared byte-ranged file).
        const URL_SEGMENTS = 1 << 1;
        /// Muxed into another stream; nothing to download.
        const INCLUDED_STREAM = 1 << 2;
        /// VOD playlist fully parsed; never re-fetch.
        const DOWNLOADED = 1 << 3;
        /// Reader ran off the live edge and waits for a refresh.
        const WAIT_FOR_SEGMENT = 1 << 4;
        /// An active stream reads this representation.
        const ENABLED = 1 << 5;
        /// Subtitle side stream.
        const SUBTITLE_STREAM = 1 << 6;
    }
}

/// DASH-style segment template carried so a sibling parser can populate the
/// same tree; `$Number$` / `$Time$` substitution happens at fetch time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentTemplate {
    pub media: String,
    pub initialization: Option<String>,
    pub timescale: u64,
    pub duration: u64,
}

/// A single encoded variant of an adaptation set.
#[derive(Clone, Debug, Default)]
pub struct Representation {
    pub codecs: String,
    pub bandwidth: u32,
    pub width: u16,
    pub height: u16,
    pub fps_rate: u32,
    pub fps_scale: u32,
    pub channel_count: u8,
    pub container: ContainerKind,
    /// Media playlist URL.
    pub source_url: String,
    /// Segment file URL when all segments are byte ranges of one file.
    pub url: String,
    /// Index into the owning period's PSSH table; 0 = clear.
    pub pssh_set: u16,
    pub flags: RepFlags,
    pub timescale: u64,
    /// Ordered segment cache; `start_number` is the absolute sequence
    /// number of `segments[0]`.
    pub segments: Vec<Segment>,
    pub start_number: u64,
    pub initialization: Option<Segment>,
    /// Reader cursor into `segments`.
    pub current_segment: Option<usize>,
    pub segment_template: Option<SegmentTemplate>,
}

impl Representation {
    pub fn new(timescale: u64) -> Self {
        Self {
            timescale,
            fps_scale: 1,
            ..Self::default()
        }
    }

    /// Absolute sequence number of the reader's current segment.
    pub fn current_segment_number(&self) -> Option<u64> {
        self.current_segment
            .map(|idx| self.start_number + idx as u64)
    }

    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    /// Whether a segment exists after `index`.
    pub fn has_next_segment(&self, index: usize) -> bool {
        index + 1 < self.segments.len()
    }

    /// Index of the segment whose `[start_pts, next.start_pts)` window
    /// contains `pts`. With `preceding` unset the search rounds up to the
    /// next segment when `pts` falls mid-segment, so a demuxer restart
    /// lands on a segment boundary at or after the target.
    pub fn find_segment_for_pts(&self, pts: u64, preceding: bool) -> Option<usize> {
        if self.segments.is_empty() {
            return None;
        }
        let upper = self
            .segments
            .partition_point(|s| s.start_pts.unwrap_or(u64::MAX) <= pts);
        let mut index = upper.saturating_sub(1);
        if !preceding
            && self.segments[index].start_pts.is_some_and(|start| start < pts)
            && index + 1 < self.segments.len()
        {
            index += 1;
        }
        Some(index)
    }

    /// Whether this representation can be streamed at all.
    pub fn is_streamable(&self) -> bool {
        !self.flags.contains(RepFlags::INCLUDED_STREAM)
            && (!self.source_url.is_empty()
                || !self.segments.is_empty()
                || self.segment_template.is_some())
    }
}

/// A group of interchangeable representations of one kind and language.
#[derive(Clone, Debug)]
pub struct AdaptationSet {
    pub kind: StreamKind,
    pub language: String,
    pub name: String,
    pub default: bool,
    pub mime_type: String,
    pub timescale: u64,
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    pub fn new(kind: StreamKind, timescale: u64) -> Self {
        Self {
            kind,
            language: String::new(),
            name: String::new(),
            default: false,
            mime_type: String::new(),
            timescale,
            representations: Vec::new(),
        }
    }
}

/// A temporally contiguous chunk of the presentation.
#[derive(Clone, Debug)]
pub struct Period {
    pub timescale: u64,
    /// Duration in `timescale` ticks.
    pub duration: u64,
    pub included_kinds: IncludedKinds,
    pub encryption_state: EncryptionState,
    /// Period-local base URL override.
    pub base_url: Option<String>,
    /// PSSH table; index 0 is the reserved clear entry.
    pub pssh_sets: Vec<PsshSet>,
    pub adaptation_sets: Vec<AdaptationSet>,
}

impl Period {
    pub fn new(timescale: u64) -> Self {
        Self {
            timescale,
            duration: 0,
            included_kinds: IncludedKinds::empty(),
            encryption_state: EncryptionState::Clear,
            base_url: None,
            pssh_sets: vec![PsshSet::default()],
            adaptation_sets: Vec::new(),
        }
    }

    /// De-duplicate `(pssh, kid hint, iv)` into the table; returns the index.
    pub fn insert_pssh_set(&mut self, pssh: &str, default_kid_hint: &[u8], iv: &[u8]) -> u16 {
        if let Some(existing) = self.pssh_sets.iter().skip(1).position(|set| {
            set.pssh == pssh && set.default_kid_hint == default_kid_hint && set.iv == iv
        }) {
            return (existing + 1) as u16;
        }
        self.pssh_sets.push(PsshSet {
            pssh: pssh.to_string(),
            kid: KidState::Pending,
            iv: iv.to_vec(),
            default_kid_hint: default_kid_hint.to_vec(),
        });
        (self.pssh_sets.len() - 1) as u16
    }
}

/// Index triple addressing a representation; safe to hold across refreshes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RepAddress {
    pub period: usize,
    pub adaptation: usize,
    pub representation: usize,
}

/// Audio ext-group bucket built while parsing a master playlist; linked
/// into the period once all variants are known.
#[derive(Debug, Default)]
pub(crate) struct ExtGroup {
    pub codec: String,
    pub sets: Vec<AdaptationSet>,
}

impl ExtGroup {
    pub fn set_codec(&mut self, codec: &str) {
        self.codec = codec.to_string();
        for set in &mut self.sets {
            for rep in &mut set.representations {
                rep.codecs = codec.to_string();
            }
        }
    }
}

/// Fully materialised download request for one segment.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentRequest {
    pub url: String,
    pub range: Option<RangeSpec>,
    pub pssh_set: u16,
    pub segment_number: u64,
}

/// Root of the manifest model. One per open manifest.
#[derive(Debug, Default)]
pub struct Tree {
    pub manifest_url: String,
    /// Everything up to and including the last `/` of the manifest URL.
    pub base_url: String,
    /// `scheme://host` of the manifest URL.
    pub base_domain: String,
    /// Post-redirect base directory; empty when not redirected.
    pub effective_url: String,
    /// Filename part of the post-redirect URL.
    pub effective_filename: String,
    pub manifest_headers: Headers,
    /// Refresh strategy token handed to `open`.
    pub update_parameter: String,
    /// Query suffix appended to URLs under `base_url` that carry no query.
    pub manifest_parameter: String,
    /// Raw master playlist, kept for re-parsing on discontinuity overflow.
    pub(crate) master_body: String,
    pub has_timeshift_buffer: bool,
    /// Whether media playlists are re-fetched on a cadence.
    pub refresh_playlist: bool,
    /// Live refresh cadence in milliseconds (1.5× the smallest target
    /// duration seen); `u64::MAX` until a target duration is known.
    pub update_interval_ms: u64,
    pub overall_seconds: u64,
    pub periods: Vec<Period>,
    /// Period the parser / pipeline is positioned in.
    pub current_period: usize,
    /// Audio codec of muxed audio, pending the dummy representation.
    pub(crate) audio_codec: String,
    pub(crate) ext_groups: HashMap<String, ExtGroup>,
}

impl Tree {
    pub fn new() -> Self {
        Self {
            update_interval_ms: u64::MAX,
            ..Self::default()
        }
    }

    pub fn period(&self, index: usize) -> Option<&Period> {
        self.periods.get(index)
    }

    pub fn representation(&self, addr: RepAddress) -> Option<&Representation> {
        self.periods
            .get(addr.period)?
            .adaptation_sets
            .get(addr.adaptation)?
            .representations
            .get(addr.representation)
    }

    pub fn representation_mut(&mut self, addr: RepAddress) -> Option<&mut Representation> {
        self.periods
            .get_mut(addr.period)?
            .adaptation_sets
            .get_mut(addr.adaptation)?
            .representations
            .get_mut(addr.representation)
    }

    pub fn adaptation_set(&self, addr: RepAddress) -> Option<&AdaptationSet> {
        self.periods.get(addr.period)?.adaptation_sets.get(addr.adaptation)
    }

    /// Addresses of all representations with the given flag set.
    pub fn representations_with_flag(&self, flag: RepFlags) -> Vec<RepAddress> {
        let mut out = Vec::new();
        for (p, period) in self.periods.iter().enumerate() {
            for (a, set) in period.adaptation_sets.iter().enumerate() {
                for (r, rep) in set.representations.iter().enumerate() {
                    if rep.flags.contains(flag) {
                        out.push(RepAddress {
                            period: p,
                            adaptation: a,
                            representation: r,
                        });
                    }
                }
            }
        }
        out
    }

    /// Recompute `overall_seconds` from period durations.
    pub fn recompute_overall_seconds(&mut self) {
        self.overall_seconds = self
            .periods
            .iter()
            .map(|p| {
                if p.timescale == 0 {
                    0
                } else {
                    p.duration / p.timescale
                }
            })
            .sum();
    }

    /// Resolve a link against this tree's bases (see [`resolve::resolve`]).
    pub fn resolve_link(&self, link: &str) -> String {
        resolve::resolve(&self.base_domain, &self.base_url, link)
    }

    /// Build the concrete download request for one media segment,
    /// substituting `$Number$` / `$Time$` templates and rewriting the
    /// redirected base.
    pub fn segment_request(
        &self,
        addr: RepAddress,
        segment_index: usize,
    ) -> Option<SegmentRequest> {
        let rep = self.representation(addr)?;
        let segment = rep.segment(segment_index)?;
        let segment_number = rep.start_number + segment_index as u64;

        let mut url = match &segment.url {
            Some(url) => url.clone(),
            None => {
                if let Some(template) = &rep.segment_template {
                    let with_number =
                        resolve::substitute_template(&template.media, "Number", segment_number);
                    resolve::substitute_template(
                        &with_number,
                        "Time",
                        segment.start_pts.unwrap_or(0),
                    )
                } else {
                    rep.url.clone()
                }
            }
        };
        url = resolve::rewrite_effective(&url, &self.base_url, &self.effective_url);

        Some(SegmentRequest {
            url,
            range: segment.range.map(|(begin, end)| RangeSpec::new(begin, Some(end))),
            pssh_set: segment.pssh_set,
            segment_number,
        })
    }

    /// Download request for the representation's initialization segment.
    pub fn initialization_request(&self, addr: RepAddress) -> Option<SegmentRequest> {
        let rep = self.representation(addr)?;
        if !rep.flags.contains(RepFlags::INITIALIZATION) {
            return None;
        }
        let init = rep.initialization.as_ref()?;

        let mut url = match &init.url {
            Some(url) => url.clone(),
            None => rep.url.clone(),
        };
        url = resolve::rewrite_effective(&url, &self.base_url, &self.effective_url);

        Some(SegmentRequest {
            url,
            range: init.range.map(|(begin, end)| RangeSpec::new(begin, Some(end))),
            pssh_set: init.pssh_set,
            segment_number: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep_with_pts(starts: &[u64]) -> Representation {
        let mut rep = Representation::new(DEFAULT_TIMESCALE);
        rep.segments = starts
            .iter()
            .map(|&pts| Segment {
                start_pts: Some(pts),
                ..Segment::default()
            })
            .collect();
        rep
    }

    #[test]
    fn pssh_sets_deduplicate_per_period() {
        let mut period = Period::new(DEFAULT_TIMESCALE);
        let kid = [0xAB_u8; 16];
        let first = period.insert_pssh_set("skd://key", &kid, &[]);
        let second = period.insert_pssh_set("skd://key", &kid, &[]);
        let third = period.insert_pssh_set("skd://other", &kid, &[]);

        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(third, 2);
        assert_eq!(period.pssh_sets.len(), 3);
    }

    #[test]
    fn pssh_index_zero_is_clear() {
        let period = Period::new(DEFAULT_TIMESCALE);
        assert_eq!(period.pssh_sets.len(), 1);
        assert_eq!(period.pssh_sets[0].kid, KidState::Pending);
        assert!(period.pssh_sets[0].pssh.is_empty());
    }

    #[test]
    fn encryption_state_only_escalates() {
        let mut state = EncryptionState::Clear;
        state.upgrade(EncryptionState::Encrypted);
        assert_eq!(state, EncryptionState::Encrypted);
        state.upgrade(EncryptionState::Supported);
        assert_eq!(state, EncryptionState::Supported);
        state.upgrade(EncryptionState::Encrypted);
        assert_eq!(state, EncryptionState::Supported);
    }

    #[test]
    fn segment_lookup_by_pts() {
        let rep = rep_with_pts(&[0, 6_000_000, 12_000_000]);

        assert_eq!(rep.find_segment_for_pts(0, true), Some(0));
        assert_eq!(rep.find_segment_for_pts(5_999_999, true), Some(0));
        // Mid-segment with preceding unset rounds up to the next boundary.
        assert_eq!(rep.find_segment_for_pts(7_000_000, false), Some(2));
        assert_eq!(rep.find_segment_for_pts(7_000_000, true), Some(1));
        // Exact boundary picks the segment starting there.
        assert_eq!(rep.find_segment_for_pts(6_000_000, false), Some(1));
        // Past the end clamps to the last segment.
        assert_eq!(rep.find_segment_for_pts(90_000_000, false), Some(2));
    }

    #[test]
    fn current_segment_number_tracks_start_number() {
        let mut rep = rep_with_pts(&[0, 1, 2]);
        rep.start_number = 100;
        rep.current_segment = Some(2);
        assert_eq!(rep.current_segment_number(), Some(102));

        rep.current_segment = None;
        assert_eq!(rep.current_segment_number(), None);
    }

    #[test]
    fn segment_request_substitutes_template_number() {
        let mut tree = Tree::new();
        let mut period = Period::new(DEFAULT_TIMESCALE);
        let mut set = AdaptationSet::new(StreamKind::Video, DEFAULT_TIMESCALE);
        let mut rep = rep_with_pts(&[0]);
        rep.start_number = 487_050;
        rep.segment_template = Some(SegmentTemplate {
            media: "https://cdn.example/segment_$Number$.m4s".to_string(),
            initialization: None,
            timescale: 90_000,
            duration: 0,
        });
        set.representations.push(rep);
        period.adaptation_sets.push(set);
        tree.periods.push(period);

        let addr = RepAddress {
            period: 0,
            adaptation: 0,
            representation: 0,
        };
        let request = tree.segment_request(addr, 0).unwrap();
        assert_eq!(request.url, "https://cdn.example/segment_487050.m4s");
        assert_eq!(request.segment_number, 487_050);
    }
}
