//! Media collaborators — live speech-to-text bridge and text-to-speech
//! synthesis.

pub mod stt;
pub mod tts;

pub use stt::{SttEvent, Transcriber, TranscriberHandle};
pub use tts::SpeechSynthesizer;
