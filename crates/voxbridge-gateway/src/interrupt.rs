//! Interruption controller — detects barge-in and cancels playback.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::info;

use voxbridge_core::protocol::OutboundFrame;

use crate::playback::PlaybackSequencer;

/// Watches finalized utterances against outstanding playback marks.
///
/// The barge-in signal is the conjunction: the user said something
/// non-trivial *and* the system is still mid-playback. On barge-in the
/// transport's buffer is flushed with a `clear` directive and the
/// sequencer (and with it the engine's epoch state) is reset.
pub struct InterruptionController {
    sequencer: Arc<Mutex<PlaybackSequencer>>,
    out_tx: mpsc::UnboundedSender<String>,
}

impl InterruptionController {
    pub fn new(
        sequencer: Arc<Mutex<PlaybackSequencer>>,
        out_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self { sequencer, out_tx }
    }

    /// Handle one finalized utterance. Returns whether an interruption
    /// fired. Partial utterances must never reach this path.
    pub fn on_utterance(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }

        let mut sequencer = match self.sequencer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !sequencer.has_outstanding_marks() {
            return false;
        }

        info!("Barge-in detected, clearing playback");
        if let Some(sid) = sequencer.stream_sid() {
            let clear = OutboundFrame::Clear {
                stream_sid: sid.to_string(),
            };
            let _ = self.out_tx.send(clear.to_json());
        }
        sequencer.reset();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxbridge_engine::EngineShared;

    fn setup() -> (
        InterruptionController,
        Arc<Mutex<PlaybackSequencer>>,
        mpsc::UnboundedReceiver<String>,
        Arc<EngineShared>,
    ) {
        let shared = Arc::new(EngineShared::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sequencer = PlaybackSequencer::new(shared.clone(), tx.clone());
        sequencer.set_stream_sid("MZ1");
        let sequencer = Arc::new(Mutex::new(sequencer));
        let controller = InterruptionController::new(sequencer.clone(), tx);
        (controller, sequencer, rx, shared)
    }

    fn frames(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[test]
    fn test_whitespace_utterance_never_interrupts() {
        let (controller, sequencer, mut rx, shared) = setup();
        sequencer.lock().unwrap().push(shared.epoch(), 0, vec![1]);
        frames(&mut rx);

        assert!(!controller.on_utterance("   "));
        assert!(sequencer.lock().unwrap().has_outstanding_marks());
        assert!(frames(&mut rx).is_empty());
    }

    #[test]
    fn test_no_marks_never_interrupts() {
        let (controller, _sequencer, mut rx, _shared) = setup();
        assert!(!controller.on_utterance("wait stop"));
        assert!(frames(&mut rx).is_empty());
    }

    #[test]
    fn test_conjunction_fires_clear_and_reset() {
        let (controller, sequencer, mut rx, shared) = setup();
        sequencer.lock().unwrap().push(shared.epoch(), 0, vec![1]);
        frames(&mut rx);

        assert!(controller.on_utterance("wait stop"));

        let emitted = frames(&mut rx);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0]["event"], "clear");
        assert_eq!(emitted[0]["streamSid"], "MZ1");
        assert!(!sequencer.lock().unwrap().has_outstanding_marks());
    }
}
