//! The completion engine — drives one streaming model exchange per finalized
//! user transcript: incremental sentence chunking, tool-call detection and
//! execution, and loop prevention for side-effecting tools.

pub mod engine;
pub mod sentence;
pub mod shared;

pub use engine::{CompletionEngine, TurnOrigin};
pub use shared::EngineShared;

/// A sentence-level text chunk bound for synthesis and ordered playback.
///
/// `epoch` tags the interruption generation the chunk belongs to; chunks
/// from a superseded epoch are discarded by the playback sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment {
    pub epoch: u64,
    pub index: u64,
    pub text: String,
}
