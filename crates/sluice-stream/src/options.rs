use sluice_net::Headers;

/// Per-stream configuration.
#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Headers sent with every segment request.
    pub media_headers: Headers,
    /// Start live playback at the window start instead of the live edge.
    pub play_timeshift_buffer: bool,
    /// How many segments back from the live edge playback starts.
    pub live_edge_offset: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            media_headers: Headers::new(),
            play_timeshift_buffer: false,
            live_edge_offset: 3,
            event_capacity: 32,
        }
    }
}

impl StreamOptions {
    pub fn with_media_headers(mut self, headers: Headers) -> Self {
        self.media_headers = headers;
        self
    }

    pub fn with_play_timeshift_buffer(mut self, play: bool) -> Self {
        self.play_timeshift_buffer = play;
        self
    }

    pub fn with_live_edge_offset(mut self, segments: usize) -> Self {
        self.live_edge_offset = segments;
        self
    }
}
