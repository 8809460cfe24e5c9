//! Playback sequencer — restores generation order over concurrently
//! synthesized audio chunks and tracks playback marks.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use voxbridge_core::protocol::OutboundFrame;
use voxbridge_engine::EngineShared;

/// Buffers audio chunks keyed by response index and releases them to the
/// transport strictly in order. One mark is enqueued per released chunk;
/// the transport echoes mark names back as the audio starts playing.
///
/// Chunks are tagged with the epoch they were generated under; a chunk from
/// a superseded epoch (a synthesis task that outlived a barge-in) is
/// silently discarded.
pub struct PlaybackSequencer {
    shared: Arc<EngineShared>,
    out_tx: mpsc::UnboundedSender<String>,
    stream_sid: Option<String>,
    next_index: u64,
    pending: BTreeMap<u64, Vec<u8>>,
    marks: VecDeque<String>,
    mark_seq: u64,
}

impl PlaybackSequencer {
    pub fn new(shared: Arc<EngineShared>, out_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            shared,
            out_tx,
            stream_sid: None,
            next_index: 0,
            pending: BTreeMap::new(),
            marks: VecDeque::new(),
            mark_seq: 0,
        }
    }

    pub fn set_stream_sid(&mut self, sid: impl Into<String>) {
        self.stream_sid = Some(sid.into());
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    /// Accept a synthesized chunk, possibly out of order. Released to the
    /// transport once every lower index has been released.
    pub fn push(&mut self, epoch: u64, index: u64, audio: Vec<u8>) {
        if epoch != self.shared.epoch() {
            debug!(index, "Discarding chunk from superseded epoch");
            return;
        }
        if index < self.next_index {
            debug!(index, "Discarding already-released index");
            return;
        }
        self.pending.insert(index, audio);
        self.release_ready();
    }

    /// Advance past an index whose synthesis failed, so later chunks are
    /// not held behind the gap.
    pub fn skip(&mut self, epoch: u64, index: u64) {
        self.push(epoch, index, Vec::new());
    }

    fn release_ready(&mut self) {
        while let Some(audio) = self.pending.remove(&self.next_index) {
            self.next_index += 1;
            if audio.is_empty() {
                continue;
            }
            let Some(sid) = self.stream_sid.clone() else {
                debug!("No stream sid yet, dropping chunk");
                continue;
            };

            let label = format!("seg-{}", self.mark_seq);
            self.mark_seq += 1;
            self.marks.push_back(label.clone());

            let media = OutboundFrame::Media {
                stream_sid: sid.clone(),
                payload: audio,
            };
            let mark = OutboundFrame::Mark {
                stream_sid: sid,
                name: label,
            };
            let _ = self.out_tx.send(media.to_json());
            let _ = self.out_tx.send(mark.to_json());
        }
    }

    /// Remove an acknowledged mark by value. Acks may arrive in any order;
    /// removing an unknown label is a no-op.
    pub fn ack_mark(&mut self, name: &str) {
        if let Some(pos) = self.marks.iter().position(|m| m == name) {
            self.marks.remove(pos);
        }
    }

    /// Whether transmitted audio is still awaiting playback.
    pub fn has_outstanding_marks(&self) -> bool {
        !self.marks.is_empty()
    }

    pub fn outstanding_marks(&self) -> Vec<String> {
        self.marks.iter().cloned().collect()
    }

    /// Cancel buffered playback: drop unreleased chunks, forget marks, and
    /// advance the shared epoch so in-flight producers are invalidated.
    /// Idempotent — a second call observes the same empty state.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.marks.clear();
        self.next_index = 0;
        self.shared.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer() -> (
        PlaybackSequencer,
        mpsc::UnboundedReceiver<String>,
        Arc<EngineShared>,
    ) {
        let shared = Arc::new(EngineShared::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut seq = PlaybackSequencer::new(shared.clone(), tx);
        seq.set_stream_sid("MZ1");
        (seq, rx, shared)
    }

    fn released_payloads(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            if value["event"] == "media" {
                payloads.push(value["media"]["payload"].as_str().unwrap().to_string());
            }
        }
        payloads
    }

    #[test]
    fn test_out_of_order_chunks_release_in_order() {
        let (mut seq, mut rx, shared) = sequencer();
        let epoch = shared.epoch();

        // Arbitrary permutation of 0..5.
        for index in [3u64, 0, 4, 1, 2] {
            seq.push(epoch, index, vec![index as u8 + 1]);
        }

        use base64::Engine as _;
        let released: Vec<u8> = released_payloads(&mut rx)
            .iter()
            .map(|p| base64::engine::general_purpose::STANDARD.decode(p).unwrap()[0])
            .collect();
        assert_eq!(released, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_gap_holds_later_chunks() {
        let (mut seq, mut rx, shared) = sequencer();
        let epoch = shared.epoch();

        seq.push(epoch, 1, vec![2]);
        assert!(released_payloads(&mut rx).is_empty());

        seq.push(epoch, 0, vec![1]);
        assert_eq!(released_payloads(&mut rx).len(), 2);
    }

    #[test]
    fn test_skip_fills_gap_without_emitting() {
        let (mut seq, mut rx, shared) = sequencer();
        let epoch = shared.epoch();

        seq.push(epoch, 1, vec![2]);
        seq.skip(epoch, 0);

        use base64::Engine as _;
        let released = released_payloads(&mut rx);
        assert_eq!(released.len(), 1);
        assert_eq!(
            base64::engine::general_purpose::STANDARD
                .decode(&released[0])
                .unwrap(),
            vec![2]
        );
    }

    #[test]
    fn test_mark_removed_by_value_in_any_order() {
        let (mut seq, _rx, shared) = sequencer();
        let epoch = shared.epoch();
        for index in 0..3u64 {
            seq.push(epoch, index, vec![1]);
        }
        assert_eq!(seq.outstanding_marks(), vec!["seg-0", "seg-1", "seg-2"]);

        // The transport acks the last chunk first.
        seq.ack_mark("seg-2");
        assert_eq!(seq.outstanding_marks(), vec!["seg-0", "seg-1"]);

        // Unknown labels are a no-op.
        seq.ack_mark("seg-99");
        assert_eq!(seq.outstanding_marks().len(), 2);

        seq.ack_mark("seg-0");
        seq.ack_mark("seg-1");
        assert!(!seq.has_outstanding_marks());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (mut seq, mut rx, shared) = sequencer();
        let epoch = shared.epoch();
        seq.push(epoch, 1, vec![2]);
        seq.push(epoch, 0, vec![1]);
        released_payloads(&mut rx);

        seq.reset();
        let pending_after_one = seq.pending.len();
        let marks_after_one = seq.marks.len();
        seq.reset();
        assert_eq!(seq.pending.len(), pending_after_one);
        assert_eq!(seq.marks.len(), marks_after_one);
        assert!(seq.pending.is_empty());
        assert!(seq.marks.is_empty());
        assert_eq!(seq.next_index, 0);
    }

    #[test]
    fn test_stale_epoch_chunk_discarded_after_reset() {
        let (mut seq, mut rx, shared) = sequencer();
        let stale_epoch = shared.epoch();

        seq.push(stale_epoch, 0, vec![1]);
        assert_eq!(released_payloads(&mut rx).len(), 1);

        seq.reset();

        // A synthesis task from before the reset completes late.
        seq.push(stale_epoch, 1, vec![9]);
        assert!(released_payloads(&mut rx).is_empty());
        assert!(!seq.has_outstanding_marks());

        // The new epoch starts over at index 0.
        seq.push(shared.epoch(), 0, vec![7]);
        assert_eq!(released_payloads(&mut rx).len(), 1);
    }

    #[test]
    fn test_mark_labels_unique_across_reset() {
        let (mut seq, _rx, shared) = sequencer();
        seq.push(shared.epoch(), 0, vec![1]);
        let before: Vec<String> = seq.outstanding_marks();
        seq.reset();
        seq.push(shared.epoch(), 0, vec![1]);
        let after = seq.outstanding_marks();
        assert_ne!(before, after);
    }
}
