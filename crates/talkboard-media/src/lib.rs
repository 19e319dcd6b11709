//! Speech media: transcription of uploaded recordings and speech synthesis.

pub mod speech;
pub mod stt;

pub use speech::{SpeechAudio, SpeechBody, SpeechSynthesizer};
pub use stt::Transcriber;
