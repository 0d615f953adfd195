//! Session-level tests: open, live refresh, key resolution.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sluice_drm::Aes128CbcDecrypter;
use sluice_manifest::{RepAddress, RepFlags, SharedTree, TreeOptions};
use sluice_net::{ByteStream, Fetched, Headers, Net, NetError, NetResult, RangeSpec};
use url::Url;

/// In-memory transport: URL → body, with optional redirect targets.
#[derive(Default)]
struct StubNet {
    bodies: Mutex<HashMap<String, Bytes>>,
    redirects: Mutex<HashMap<String, String>>,
}

impl StubNet {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn serve(&self, url: &str, body: impl Into<Bytes>) {
        self.bodies.lock().insert(url.to_string(), body.into());
    }

    fn redirect(&self, from: &str, to: &str) {
        self.redirects.lock().insert(from.to_string(), to.to_string());
    }
}

#[async_trait]
impl Net for StubNet {
    async fn get(&self, url: Url, _headers: &Headers) -> NetResult<Fetched> {
        let requested = url.to_string();
        let effective = self
            .redirects
            .lock()
            .get(&requested)
            .cloned()
            .unwrap_or(requested);
        let bytes = self.bodies.lock().get(&effective).cloned().ok_or_else(|| {
            NetError::Status {
                status: 404,
                url: url.clone(),
            }
        })?;
        Ok(Fetched {
            bytes,
            effective_url: effective.parse().unwrap(),
        })
    }

    async fn stream(
        &self,
        url: Url,
        headers: &Headers,
        _range: Option<RangeSpec>,
    ) -> NetResult<ByteStream> {
        let fetched = self.get(url, headers).await?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(fetched.bytes)])))
    }
}

const MASTER_URL: &str = "https://foo.bar/hls/master.m3u8";

const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=1280000,CODECS=\"avc1.42c01e,mp4a.40.2\"\n\
media.m3u8\n";

fn live_playlist(sequence: u64, count: usize) -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:4\n");
    body.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{sequence}\n"));
    for number in sequence..sequence + count as u64 {
        body.push_str(&format!("#EXTINF:4.0,\nseg{number}.ts\n"));
    }
    body
}

fn addr0() -> RepAddress {
    RepAddress {
        period: 0,
        adaptation: 0,
        representation: 0,
    }
}

#[tokio::test]
async fn open_computes_base_urls() {
    let net = StubNet::new();
    net.serve(MASTER_URL, MASTER);

    let tree = SharedTree::open(MASTER_URL, TreeOptions::default(), net, None)
        .await
        .unwrap();

    tree.with_tree(|t| {
        assert_eq!(t.base_url, "https://foo.bar/hls/");
        assert_eq!(t.base_domain, "https://foo.bar");
        assert!(t.effective_url.is_empty());
    });
}

#[tokio::test]
async fn open_records_redirected_base() {
    let net = StubNet::new();
    net.redirect(MASTER_URL, "https://edge-7.foo.bar/hls/master.m3u8");
    net.serve("https://edge-7.foo.bar/hls/master.m3u8", MASTER);

    let tree = SharedTree::open(MASTER_URL, TreeOptions::default(), net, None)
        .await
        .unwrap();

    tree.with_tree(|t| {
        assert_eq!(t.base_url, "https://foo.bar/hls/");
        assert_eq!(t.effective_url, "https://edge-7.foo.bar/hls/");
        assert_eq!(t.effective_filename, "master.m3u8");
    });
}

#[tokio::test]
async fn open_fails_on_missing_playlist() {
    let net = StubNet::new();
    let result = SharedTree::open(MASTER_URL, TreeOptions::default(), net, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn prepare_loads_media_playlist() {
    let net = StubNet::new();
    net.serve(MASTER_URL, MASTER);
    net.serve("https://foo.bar/hls/media.m3u8", live_playlist(100, 5));

    let tree = SharedTree::open(MASTER_URL, TreeOptions::default(), net, None)
        .await
        .unwrap();
    let loaded = tree.prepare_representation(addr0(), false).await.unwrap();
    assert!(loaded);

    tree.with_tree(|t| {
        let rep = t.representation(addr0()).unwrap();
        assert_eq!(rep.start_number, 100);
        assert_eq!(rep.segments.len(), 5);
        assert!(t.has_timeshift_buffer);
        assert!(t.update_interval_ms <= 6_000);
    });
}

#[tokio::test]
async fn refresh_preserves_reader_position() {
    let net = StubNet::new();
    net.serve(MASTER_URL, MASTER);
    net.serve("https://foo.bar/hls/media.m3u8", live_playlist(100, 5));

    let tree = SharedTree::open(MASTER_URL, TreeOptions::default(), net.clone(), None)
        .await
        .unwrap();
    tree.prepare_representation(addr0(), true).await.unwrap();

    // Reader sits at sequence number 103.
    tree.with_tree_mut(|t| {
        let rep = t.representation_mut(addr0()).unwrap();
        rep.current_segment = Some(3);
        assert_eq!(rep.current_segment_number(), Some(103));
    });

    // Live window slides forward by two segments.
    net.serve("https://foo.bar/hls/media.m3u8", live_playlist(102, 5));
    tree.prepare_representation(addr0(), true).await.unwrap();

    tree.with_tree(|t| {
        let rep = t.representation(addr0()).unwrap();
        assert_eq!(rep.start_number, 102);
        assert_eq!(rep.current_segment_number(), Some(103));
        assert_eq!(rep.current_segment, Some(1));
    });
}

#[tokio::test]
async fn refresh_clamps_stalled_reader_to_window_start() {
    let net = StubNet::new();
    net.serve(MASTER_URL, MASTER);
    net.serve("https://foo.bar/hls/media.m3u8", live_playlist(100, 5));

    let tree = SharedTree::open(MASTER_URL, TreeOptions::default(), net.clone(), None)
        .await
        .unwrap();
    tree.prepare_representation(addr0(), true).await.unwrap();

    tree.with_tree_mut(|t| {
        t.representation_mut(addr0()).unwrap().current_segment = Some(0);
    });

    // The window advanced past the reader entirely.
    net.serve("https://foo.bar/hls/media.m3u8", live_playlist(200, 5));
    tree.prepare_representation(addr0(), true).await.unwrap();

    tree.with_tree(|t| {
        let rep = t.representation(addr0()).unwrap();
        assert_eq!(rep.current_segment_number(), Some(200));
    });
}

#[tokio::test]
async fn refresh_releases_wait_for_segment() {
    let net = StubNet::new();
    net.serve(MASTER_URL, MASTER);
    net.serve("https://foo.bar/hls/media.m3u8", live_playlist(100, 3));

    let tree = SharedTree::open(MASTER_URL, TreeOptions::default(), net.clone(), None)
        .await
        .unwrap();
    tree.prepare_representation(addr0(), true).await.unwrap();

    tree.with_tree_mut(|t| {
        let rep = t.representation_mut(addr0()).unwrap();
        rep.current_segment = Some(2);
        rep.flags |= RepFlags::WAIT_FOR_SEGMENT;
    });

    net.serve("https://foo.bar/hls/media.m3u8", live_playlist(100, 5));
    tree.prepare_representation(addr0(), true).await.unwrap();

    tree.with_tree(|t| {
        let rep = t.representation(addr0()).unwrap();
        assert!(!rep.flags.contains(RepFlags::WAIT_FOR_SEGMENT));
        assert_eq!(rep.current_segment_number(), Some(102));
    });
}

mod decryption {
    use super::*;
    use aes::Aes128;
    use cbc::{
        cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit},
        Encryptor,
    };

    const KEY: [u8; 16] = [0x42; 16];
    const IV: [u8; 16] = [0x07; 16];

    fn encrypt(plaintext: &[u8]) -> Vec<u8> {
        let padded = plaintext.len() + (16 - plaintext.len() % 16);
        let mut buf = vec![0u8; padded];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        Encryptor::<Aes128>::new(&KEY.into(), &IV.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .unwrap()
            .to_vec()
    }

    const ENCRYPTED_MEDIA: &str = "#EXTM3U\n\
#EXT-X-PLAYLIST-TYPE:VOD\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x07070707070707070707070707070707\n\
#EXTINF:6.0,\n\
seg0.ts\n\
#EXT-X-ENDLIST\n";

    async fn encrypted_tree(net: Arc<StubNet>) -> SharedTree {
        net.serve(MASTER_URL, MASTER);
        net.serve("https://foo.bar/hls/media.m3u8", ENCRYPTED_MEDIA);
        let tree = SharedTree::open(
            MASTER_URL,
            TreeOptions::default(),
            net,
            Some(Arc::new(Aes128CbcDecrypter::new())),
        )
        .await
        .unwrap();
        tree.prepare_representation(addr0(), false).await.unwrap();
        tree
    }

    #[tokio::test]
    async fn data_hook_decrypts_with_fetched_key() {
        let net = StubNet::new();
        net.serve("https://foo.bar/hls/key.bin", KEY.to_vec());
        let tree = encrypted_tree(net).await;

        let plaintext = b"ts packet payload bytes".to_vec();
        let ciphertext = encrypt(&plaintext);

        let mut iv = [0u8; 16];
        let out = tree
            .on_data_arrived(0, 100, 1, &mut iv, &ciphertext, true, true)
            .await
            .unwrap();
        assert_eq!(out, plaintext);
    }

    #[tokio::test]
    async fn data_hook_zero_fills_on_failed_key() {
        // No key served: the fetch 404s and the PSSH set fails permanently.
        let net = StubNet::new();
        let tree = encrypted_tree(net).await;

        let ciphertext = encrypt(b"whatever");
        let mut iv = [0u8; 16];
        let out = tree
            .on_data_arrived(0, 100, 1, &mut iv, &ciphertext, true, true)
            .await
            .unwrap();
        assert_eq!(out, vec![0u8; ciphertext.len()]);

        // Second call takes the cached failure, still zero-filled.
        let out = tree
            .on_data_arrived(0, 101, 1, &mut iv, &ciphertext, true, true)
            .await
            .unwrap();
        assert_eq!(out, vec![0u8; ciphertext.len()]);
    }

    #[tokio::test]
    async fn clear_chunks_pass_through() {
        let net = StubNet::new();
        let tree = encrypted_tree(net).await;

        let mut iv = [0u8; 16];
        let out = tree
            .on_data_arrived(0, 100, 0, &mut iv, b"clear bytes", true, true)
            .await
            .unwrap();
        assert_eq!(out, b"clear bytes");
    }
}
