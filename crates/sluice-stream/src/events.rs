//! Stream events for observers (player shell, ABR policy, UI).

/// Events emitted on the stream's broadcast channel.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// The reader moved to a new segment.
    SegmentChanged { segment_number: u64, period: usize },
    /// The active representation changed (bitrate switch).
    StreamChanged { bandwidth: u32 },
    /// The reader caught up with the live edge and waits for a refresh.
    WaitingForSegment,
    /// Terminal end of stream (or terminal segment failure).
    EndOfStream,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_fit_a_broadcast_channel() {
        use tokio::sync::broadcast;

        let (tx, mut rx) = broadcast::channel::<StreamEvent>(8);
        tx.send(StreamEvent::SegmentChanged {
            segment_number: 42,
            period: 0,
        })
        .unwrap();
        tx.send(StreamEvent::EndOfStream).unwrap();

        assert!(matches!(
            rx.try_recv(),
            Ok(StreamEvent::SegmentChanged {
                segment_number: 42,
                ..
            })
        ));
        assert!(matches!(rx.try_recv(), Ok(StreamEvent::EndOfStream)));
    }
}
