//! Line-oriented HLS playlist parsing.
//!
//! Master playlists create the period/adaptation-set/representation
//! skeleton; media playlists fill and refresh segment lists. A
//! `#EXT-X-DISCONTINUITY` closes the current period's segment run and
//! advances to the next period, re-parsing the master playlist when more
//! discontinuities show up than periods exist.

use std::collections::HashMap;

use sluice_drm::Decrypter;
use tracing::{debug, warn};

use crate::{
    error::{ManifestError, ManifestResult},
    resolve,
    tree::{
        AdaptationSet, ContainerKind, EncryptionState, IncludedKinds, RepAddress, RepFlags,
        Representation, Segment, StreamKind, Tree, DEFAULT_TIMESCALE,
    },
};

/// Widevine key-system UUID used in `KEYFORMAT` attributes.
pub const WIDEVINE_KEY_SYSTEM: &str = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";

/// Length of the `data:text/plain;base64,` prefix on Widevine key URIs.
const DATA_URI_PREFIX_LEN: usize = 23;

/// Parse an attribute list: comma-separated `KEY=value` pairs where values
/// may be double-quoted (commas inside quotes don't split).
pub(crate) fn parse_attributes(input: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let bytes = input.as_bytes();
    let mut offset = 0;

    while offset < bytes.len() {
        while offset < bytes.len() && bytes[offset] == b' ' {
            offset += 1;
        }
        let Some(eq_rel) = input[offset..].find('=') else {
            break;
        };
        let eq = offset + eq_rel;
        let key = input[offset..eq].trim().to_string();

        let mut end = eq + 1;
        if end < bytes.len() && bytes[end] == b'"' {
            end += 1;
            let start = end;
            while end < bytes.len() && bytes[end] != b'"' {
                end += 1;
            }
            map.insert(key, input[start..end].to_string());
            while end < bytes.len() && bytes[end] != b',' {
                end += 1;
            }
        } else {
            let start = end;
            while end < bytes.len() && bytes[end] != b',' {
                end += 1;
            }
            map.insert(key, input[start..end].to_string());
        }
        offset = end + 1;
    }

    map
}

/// Resolve the video codec family from a `CODECS` attribute.
fn video_codec(codecs: &str) -> &'static str {
    if codecs.is_empty() || codecs.contains("avc1.") {
        "h264"
    } else if codecs.contains("hvc1.") {
        "hvc1"
    } else if codecs.contains("hev1.") {
        "hev1"
    } else {
        ""
    }
}

/// Resolve the audio codec family from a `CODECS` attribute.
fn audio_codec(codecs: &str) -> &'static str {
    if codecs.contains("ec-3") {
        "ec-3"
    } else if codecs.contains("ac-3") {
        "ac-3"
    } else {
        "aac"
    }
}

/// Parse a `KEYID=0x<32 hex chars>` attribute into 16 bytes.
fn parse_keyid(raw: &str) -> ManifestResult<Vec<u8>> {
    let stripped = if raw.len() >= 2 { &raw[2..] } else { raw };
    let bytes = hex::decode(stripped)
        .map_err(|_| ManifestError::InvalidAttribute(format!("KEYID={raw}")))?;
    if bytes.len() != 16 {
        return Err(ManifestError::InvalidAttribute(format!("KEYID={raw}")));
    }
    Ok(bytes)
}

fn parse_resolution(value: &str) -> (u16, u16) {
    match value.split_once('x') {
        Some((w, h)) => (
            w.trim().parse().unwrap_or(0),
            h.trim().parse().unwrap_or(0),
        ),
        None => (0, 0),
    }
}

fn trim_line(raw: &str) -> &str {
    raw.trim_end_matches(['\r', '\n', ' '])
}

/// Parse a master playlist into a fresh period appended to the tree.
///
/// Also called re-entrantly from [`parse_media`] when a media playlist
/// contains more discontinuities than the tree has periods.
pub(crate) fn parse_master(
    tree: &mut Tree,
    body: &str,
    request_url: &str,
) -> ManifestResult<()> {
    let mut started = false;

    tree.periods.push(crate::tree::Period::new(DEFAULT_TIMESCALE));
    tree.current_period = tree.periods.len() - 1;
    let period_index = tree.current_period;

    // Indices into the current period's adaptation sets.
    let mut video_set: Option<usize> = None;
    let mut current_rep: Option<(usize, usize)> = None;

    for raw in body.lines() {
        if !started {
            if raw.starts_with("#EXTM3U") {
                started = true;
            }
            continue;
        }
        let line = trim_line(raw);

        if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA:") {
            let attrs = parse_attributes(rest);
            let kind = match attrs.get("TYPE").map(String::as_str) {
                Some("AUDIO") => StreamKind::Audio,
                // Subtitle renditions are not materialised yet.
                _ => continue,
            };
            let Some(group_id) = attrs.get("GROUP-ID") else {
                continue;
            };

            let mut set = AdaptationSet::new(kind, DEFAULT_TIMESCALE);
            set.language = attrs.get("LANGUAGE").cloned().unwrap_or_default();
            set.name = attrs.get("NAME").cloned().unwrap_or_default();
            set.default = attrs.get("DEFAULT").map(String::as_str) == Some("YES");

            let mut rep = Representation::new(DEFAULT_TIMESCALE);
            if let Some(uri) = attrs.get("URI") {
                let resolved = resolve::resolve(&tree.base_domain, &tree.base_url, uri);
                rep.source_url = resolve::with_manifest_parameter(
                    resolved,
                    &tree.base_url,
                    &tree.manifest_parameter,
                );
            } else {
                rep.flags |= RepFlags::INCLUDED_STREAM;
                tree.periods[period_index].included_kinds |= IncludedKinds::bit(kind);
            }
            if let Some(channels) = attrs.get("CHANNELS") {
                rep.channel_count = channels.split('/').next().unwrap_or("").parse().unwrap_or(0);
            }

            let group = tree.ext_groups.entry(group_id.clone()).or_default();
            rep.codecs = group.codec.clone();
            set.representations.push(rep);
            group.sets.push(set);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let attrs = parse_attributes(rest);
            current_rep = None;

            let Some(bandwidth) = attrs.get("BANDWIDTH") else {
                continue;
            };

            let set_index = match video_set {
                Some(index) => index,
                None => {
                    tree.periods[period_index]
                        .adaptation_sets
                        .push(AdaptationSet::new(StreamKind::Video, DEFAULT_TIMESCALE));
                    let index = tree.periods[period_index].adaptation_sets.len() - 1;
                    video_set = Some(index);
                    index
                }
            };

            let codecs = attrs.get("CODECS").map(String::as_str).unwrap_or("");
            let mut rep = Representation::new(DEFAULT_TIMESCALE);
            rep.codecs = video_codec(codecs).to_string();
            rep.bandwidth = bandwidth.parse().unwrap_or(0);
            if let Some(resolution) = attrs.get("RESOLUTION") {
                let (width, height) = parse_resolution(resolution);
                rep.width = width;
                rep.height = height;
            }
            if let Some(frame_rate) = attrs.get("FRAME-RATE") {
                if let Ok(fps) = frame_rate.parse::<f64>() {
                    rep.fps_rate = (fps * 1000.0).round() as u32;
                    rep.fps_scale = 1000;
                }
            }

            if let Some(audio_group) = attrs.get("AUDIO") {
                tree.ext_groups
                    .entry(audio_group.clone())
                    .or_default()
                    .set_codec(audio_codec(codecs));
            } else {
                // No alternate audio rendition: assume audio is muxed in.
                tree.periods[period_index].included_kinds |= IncludedKinds::AUDIO;
                tree.audio_codec = audio_codec(codecs).to_string();
            }

            let set = &mut tree.periods[period_index].adaptation_sets[set_index];
            set.representations.push(rep);
            current_rep = Some((set_index, set.representations.len() - 1));
        } else if line.starts_with("#EXTINF:") {
            // Not a multi-variant playlist after all: this URL is itself a
            // media playlist. Synthesise a single video representation and
            // let prepare_representation parse the segments.
            let mut set = AdaptationSet::new(StreamKind::Video, DEFAULT_TIMESCALE);
            let mut rep = Representation::new(DEFAULT_TIMESCALE);
            rep.codecs = video_codec("").to_string();
            rep.source_url = if tree.effective_url.is_empty() {
                request_url.to_string()
            } else {
                format!("{}{}", tree.effective_url, tree.effective_filename)
            };
            set.representations.push(rep);
            tree.periods[period_index].adaptation_sets.push(set);

            tree.periods[period_index].included_kinds |= IncludedKinds::AUDIO;
            tree.audio_codec = audio_codec("").to_string();
            break;
        } else if !line.is_empty() && !line.starts_with('#') {
            let Some((set_index, rep_index)) = current_rep else {
                continue;
            };
            let resolved = resolve::resolve(&tree.base_domain, &tree.base_url, line);
            let source_url = resolve::with_manifest_parameter(
                resolved,
                &tree.base_url,
                &tree.manifest_parameter,
            );

            let set = &mut tree.periods[period_index].adaptation_sets[set_index];
            let duplicate = set
                .representations
                .iter()
                .enumerate()
                .any(|(i, rep)| i != rep_index && rep.source_url == source_url);
            if duplicate {
                debug!(url = %source_url, "hls: discarding duplicate variant");
                set.representations.truncate(rep_index);
                current_rep = None;
            } else {
                set.representations[rep_index].source_url = source_url;
            }
        } else if let Some(rest) = line.strip_prefix("#EXT-X-SESSION-KEY:") {
            let attrs = parse_attributes(rest);
            let method = attrs.get("METHOD").map(String::as_str).unwrap_or("NONE");
            if method == "NONE" {
                continue;
            }
            if method != "AES-128" && method != "SAMPLE-AES-CTR" {
                return Err(ManifestError::UnsupportedEncryption(method.to_string()));
            }
            let uri = attrs.get("URI").map(String::as_str).unwrap_or("");
            if uri.is_empty() {
                return Err(ManifestError::UnsupportedEncryption(method.to_string()));
            }
            if attrs.get("KEYFORMAT").map(String::as_str) == Some(WIDEVINE_KEY_SYSTEM) {
                let kid = match attrs.get("KEYID") {
                    Some(raw) => parse_keyid(raw)?,
                    None => Vec::new(),
                };
                let pssh = &uri[DATA_URI_PREFIX_LEN.min(uri.len())..];
                let period = &mut tree.periods[period_index];
                period.insert_pssh_set(pssh, &kid, &[]);
                period.encryption_state.upgrade(EncryptionState::Supported);
            }
        }
    }

    if !started {
        // Roll back the period we optimistically appended.
        tree.periods.pop();
        tree.current_period = tree.periods.len().saturating_sub(1);
        return Err(ManifestError::MissingHeader);
    }

    // Materialise the dummy representation for muxed audio.
    if !tree.audio_codec.is_empty() {
        let mut set = AdaptationSet::new(StreamKind::Audio, DEFAULT_TIMESCALE);
        let mut rep = Representation::new(DEFAULT_TIMESCALE);
        rep.codecs = std::mem::take(&mut tree.audio_codec);
        rep.flags |= RepFlags::INCLUDED_STREAM;
        set.representations.push(rep);
        tree.periods[period_index].adaptation_sets.push(set);
    }

    // Register alternate-media groups collected along the way.
    let groups: Vec<_> = {
        let mut keys: Vec<_> = tree.ext_groups.keys().cloned().collect();
        keys.sort();
        keys
    };
    for key in groups {
        if let Some(group) = tree.ext_groups.remove(&key) {
            tree.periods[period_index].adaptation_sets.extend(group.sets);
        }
    }
    tree.ext_groups.clear();

    for set in &mut tree.periods[period_index].adaptation_sets {
        set.representations.sort_by_key(|rep| rep.bandwidth);
    }

    // Live until a media playlist proves otherwise.
    tree.has_timeshift_buffer = true;
    tree.refresh_playlist = true;
    if tree.update_parameter.is_empty() {
        tree.update_parameter = "full".to_string();
    }

    Ok(())
}

/// Encryption context while walking a media playlist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeyKind {
    Clear,
    Aes128,
    Widevine,
}

fn rep_mut(tree: &mut Tree, addr: RepAddress) -> ManifestResult<&mut Representation> {
    tree.representation_mut(addr)
        .ok_or(ManifestError::UnknownRepresentation {
            period: addr.period,
            adaptation: addr.adaptation,
            representation: addr.representation,
        })
}

/// Parse a media playlist body into the representation at `addr`.
///
/// Returns `Ok(false)` when the playlist yields no segments (the
/// representation is disabled), `Ok(true)` on success.
pub(crate) fn parse_media(
    tree: &mut Tree,
    addr: RepAddress,
    body: &str,
    decrypter: Option<&dyn Decrypter>,
) -> ManifestResult<bool> {
    let mut addr = addr;
    let starting_period = tree.current_period;

    // Playlist-local base: the source URL up to its last path slash.
    let playlist_base = {
        let rep = tree
            .representation(addr)
            .ok_or(ManifestError::UnknownRepresentation {
                period: addr.period,
                adaptation: addr.adaptation,
                representation: addr.representation,
            })?;
        let (base, _) = resolve::split_manifest_url(&rep.source_url);
        base
    };

    let mut started = false;
    let mut new_segments: Vec<Segment> = Vec::new();
    let mut new_start_number: u64 = 0;
    let mut new_init: Option<Segment> = None;
    let mut map_url: Option<String> = None;
    let mut byte_range = false;
    let mut pts: u64 = 0;
    let mut discont_count: usize = 0;

    let mut pending_pts: Option<u64> = None;
    let mut pending_range: Option<(u64, u64)> = None;
    let mut pending_pssh: u16 = 0;

    let mut current_pssh: Option<String> = None;
    let mut current_iv: Vec<u8> = Vec::new();
    let mut key_kind = KeyKind::Clear;

    for raw in body.lines() {
        if !started {
            if raw.starts_with("#EXTM3U") {
                started = true;
            }
            continue;
        }
        let line = trim_line(raw);

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let duration: f64 = rest
                .split(',')
                .next()
                .unwrap_or("")
                .trim()
                .parse()
                .unwrap_or(0.0);
            let timescale = tree
                .representation(addr)
                .map(|rep| rep.timescale)
                .unwrap_or(DEFAULT_TIMESCALE);
            pending_pts = Some(pts);
            pts += (duration * timescale as f64).ceil() as u64;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-BYTERANGE:") {
            let (length, offset) = match rest.split_once('@') {
                Some((length, offset)) => (
                    length.trim().parse::<u64>().unwrap_or(0),
                    Some(offset.trim().parse::<u64>().unwrap_or(0)),
                ),
                None => (rest.trim().parse::<u64>().unwrap_or(0), None),
            };
            let begin = offset
                .or_else(|| pending_range.map(|(_, end)| end + 1))
                .unwrap_or(0);
            pending_range = Some((begin, begin + length.saturating_sub(1)));
            byte_range = true;
        } else if !line.is_empty() && !line.starts_with('#') {
            if pending_pts.is_none() {
                continue;
            }
            let rep = rep_mut(tree, addr)?;

            if rep.container == ContainerKind::NoType {
                rep.container = infer_container(line);
                if rep.container == ContainerKind::Invalid {
                    continue;
                }
            }

            if !byte_range || rep.url.is_empty() {
                let url = resolve::resolve(&tree.base_domain, &playlist_base, line);
                let rep = rep_mut(tree, addr)?;
                if byte_range {
                    rep.url = url;
                    new_segments.push(Segment {
                        url: None,
                        range: pending_range,
                        start_pts: pending_pts.take(),
                        pssh_set: pending_pssh,
                    });
                } else {
                    new_segments.push(Segment {
                        url: Some(url),
                        range: None,
                        start_pts: pending_pts.take(),
                        pssh_set: pending_pssh,
                    });
                }
            } else {
                new_segments.push(Segment {
                    url: None,
                    range: pending_range,
                    start_pts: pending_pts.take(),
                    pssh_set: pending_pssh,
                });
            }
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            new_start_number = rest.trim().parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-PLAYLIST-TYPE:") {
            if rest.trim() == "VOD" {
                tree.refresh_playlist = false;
                tree.has_timeshift_buffer = false;
            }
        } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            let target_seconds: u64 = rest.trim().parse().unwrap_or(0);
            let interval_ms = target_seconds * 1500;
            if interval_ms < tree.update_interval_ms {
                tree.update_interval_ms = interval_ms;
            }
        } else if line.starts_with("#EXT-X-DISCONTINUITY") {
            if new_segments.is_empty() {
                continue;
            }
            let first_pts = new_segments[0].start_pts.unwrap_or(0);
            tree.periods[tree.current_period].duration = pts - first_pts;

            {
                let rep = rep_mut(tree, addr)?;
                if !byte_range {
                    rep.flags |= RepFlags::URL_SEGMENTS;
                }
                apply_implicit_init(rep, byte_range, &new_segments);
                rep.segments = std::mem::take(&mut new_segments);
                rep.start_number = new_start_number;
                if let Some(init) = new_init.take() {
                    rep.initialization = Some(init);
                    rep.flags |= RepFlags::INITIALIZATION;
                }
            }
            // The EXT-X-MAP init URL persists into the next period until a
            // new tag overrides it.
            if let Some(map) = &map_url {
                new_init = Some(Segment {
                    url: Some(map.clone()),
                    ..Segment::default()
                });
            }

            discont_count += 1;
            if tree.periods.len() == discont_count {
                let master_body = tree.master_body.clone();
                let manifest_url = tree.manifest_url.clone();
                parse_master(tree, &master_body, &manifest_url)?;
            } else {
                tree.current_period = discont_count;
            }
            addr = RepAddress {
                period: tree.current_period,
                ..addr
            };

            // Re-attach the active key context to the new period's table.
            if let Some(pssh) = &current_pssh {
                let period = &mut tree.periods[tree.current_period];
                match key_kind {
                    KeyKind::Widevine => {
                        let index = period.insert_pssh_set(pssh, &[], &[]);
                        period.encryption_state.upgrade(EncryptionState::Supported);
                        if let Some(rep) = tree.representation_mut(addr) {
                            rep.pssh_set = index;
                        }
                    }
                    KeyKind::Aes128 => {
                        pending_pssh = period.insert_pssh_set(pssh, &[], &current_iv);
                        period.encryption_state.upgrade(EncryptionState::Encrypted);
                    }
                    KeyKind::Clear => pending_pssh = 0,
                }
            } else {
                pending_pssh = 0;
            }

            pending_pts = None;
            pending_range = None;
            new_start_number = 0;
            pts = 0;

            if map_url.is_some() {
                if let Some(rep) = tree.representation_mut(addr) {
                    rep.flags |= RepFlags::INITIALIZATION;
                    rep.container = ContainerKind::Mp4;
                }
            }
        } else if let Some(rest) = line.strip_prefix("#EXT-X-KEY:") {
            let already_bound = tree
                .representation(addr)
                .map(|rep| rep.pssh_set != 0)
                .unwrap_or(false);
            if already_bound {
                continue;
            }
            let attrs = parse_attributes(rest);
            let method = attrs.get("METHOD").map(String::as_str).unwrap_or("NONE");
            if method == "NONE" {
                current_pssh = None;
                key_kind = KeyKind::Clear;
                pending_pssh = 0;
                continue;
            }
            if method != "AES-128" && method != "SAMPLE-AES-CTR" {
                return Err(ManifestError::UnsupportedEncryption(method.to_string()));
            }
            let uri = attrs.get("URI").map(String::as_str).unwrap_or("");
            if uri.is_empty() {
                return Err(ManifestError::UnsupportedEncryption(method.to_string()));
            }

            if attrs.get("KEYFORMAT").map(String::as_str) == Some(WIDEVINE_KEY_SYSTEM) {
                let kid = match attrs.get("KEYID") {
                    Some(raw) => parse_keyid(raw)?,
                    None => Vec::new(),
                };
                let pssh = uri[DATA_URI_PREFIX_LEN.min(uri.len())..].to_string();
                let period = &mut tree.periods[tree.current_period];
                let index = period.insert_pssh_set(&pssh, &kid, &[]);
                period.encryption_state.upgrade(EncryptionState::Supported);
                if let Some(rep) = tree.representation_mut(addr) {
                    rep.pssh_set = index;
                }
                current_pssh = Some(pssh);
                key_kind = KeyKind::Widevine;
            } else {
                // URI-based key (AES-128 or CTR with a plain key server).
                let key_url = resolve::resolve(&tree.base_domain, &playlist_base, uri);
                current_iv = match attrs.get("IV") {
                    Some(raw) => match decrypter {
                        Some(decrypter) => decrypter.convert_iv(raw)?,
                        None => hex_iv(raw)?,
                    },
                    None => Vec::new(),
                };
                let period = &mut tree.periods[tree.current_period];
                pending_pssh = period.insert_pssh_set(&key_url, &[], &current_iv);
                period.encryption_state.upgrade(EncryptionState::Encrypted);
                current_pssh = Some(key_url);
                key_kind = KeyKind::Aes128;
            }
        } else if line.starts_with("#EXT-X-ENDLIST") {
            tree.refresh_playlist = false;
            tree.has_timeshift_buffer = false;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MAP:") {
            let attrs = parse_attributes(rest);
            let Some(uri) = attrs.get("URI").filter(|uri| !uri.is_empty()) else {
                continue;
            };
            if attrs.contains_key("BYTERANGE") {
                warn!("hls: byte-ranged EXT-X-MAP is not supported, skipping");
                continue;
            }
            let resolved = resolve::resolve(&tree.base_domain, &playlist_base, uri);
            map_url = Some(resolved.clone());
            new_init = Some(Segment {
                url: Some(resolved),
                ..Segment::default()
            });
            if let Some(rep) = tree.representation_mut(addr) {
                rep.flags |= RepFlags::INITIALIZATION;
                rep.container = ContainerKind::Mp4;
            }
        }
    }

    if !started {
        return Err(ManifestError::MissingHeader);
    }

    {
        let rep = rep_mut(tree, addr)?;
        if !byte_range {
            rep.flags |= RepFlags::URL_SEGMENTS;
        }
        apply_implicit_init(rep, byte_range, &new_segments);

        if new_segments.is_empty() {
            rep.source_url.clear();
            return Ok(false);
        }
    }

    let first_pts = new_segments[0].start_pts.unwrap_or(0);
    {
        let rep = rep_mut(tree, addr)?;
        rep.segments = new_segments;
        rep.start_number = new_start_number;
        if let Some(init) = new_init.take() {
            rep.initialization = Some(init);
            rep.flags |= RepFlags::INITIALIZATION;
        }
    }

    let vod = !tree.has_timeshift_buffer && !tree.refresh_playlist;
    if discont_count > 0 {
        tree.periods[tree.current_period].duration = pts - first_pts;
        if vod {
            for period in &mut tree.periods {
                if let Some(rep) = period
                    .adaptation_sets
                    .get_mut(addr.adaptation)
                    .and_then(|set| set.representations.get_mut(addr.representation))
                {
                    rep.flags |= RepFlags::DOWNLOADED;
                }
            }
        }
        tree.current_period = starting_period;
    } else {
        tree.periods[tree.current_period].duration = pts - first_pts;
        if vod {
            let rep = rep_mut(tree, addr)?;
            rep.flags |= RepFlags::DOWNLOADED;
        }
    }
    tree.recompute_overall_seconds();

    Ok(true)
}

/// Byte-ranged MP4 playlists with a leading gap imply an init segment
/// covering `[0, first_range_begin - 1]`.
fn apply_implicit_init(rep: &mut Representation, byte_range: bool, segments: &[Segment]) {
    if rep.container != ContainerKind::Mp4 || !byte_range {
        return;
    }
    let Some((begin, _)) = segments.first().and_then(|s| s.range) else {
        return;
    };
    if begin > 0 {
        rep.flags |= RepFlags::INITIALIZATION;
        rep.initialization = Some(Segment {
            url: None,
            range: Some((0, begin - 1)),
            start_pts: None,
            pssh_set: 0,
        });
    }
}

fn infer_container(line: &str) -> ContainerKind {
    let path = line.split('?').next().unwrap_or(line);
    match path.rfind('.') {
        Some(dot) => {
            let ext = &path[dot..];
            if ext.starts_with(".ts") {
                ContainerKind::Ts
            } else if ext.starts_with(".aac") {
                ContainerKind::Adts
            } else if ext.starts_with(".mp4") || ext.starts_with(".m4s") {
                ContainerKind::Mp4
            } else {
                ContainerKind::Invalid
            }
        }
        // No extension: assume transport stream.
        None => ContainerKind::Ts,
    }
}

/// Parse an IV attribute without a decrypter (`0x` + hex).
fn hex_iv(raw: &str) -> ManifestResult<Vec<u8>> {
    let stripped = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    hex::decode(stripped).map_err(|_| ManifestError::InvalidAttribute(format!("IV={raw}")))
}
