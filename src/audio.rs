//! Audio sub-controller: voice I/O for a session.
//!
//! Thin delegation to the transcription and synthesis adapters, recording
//! each voice turn as an [`AudioEvent`] so the conversation transcript
//! reflects what was heard and said.

use std::sync::Arc;

use crate::model::{AudioDirection, AudioEvent};
use crate::provider::{ProviderError, SynthesisProvider, TranscriptionProvider};

/// Voice configuration plus the adapters that do the actual work.
pub struct AudioController {
    transcription: Arc<dyn TranscriptionProvider>,
    synthesis: Arc<dyn SynthesisProvider>,
    voice_id: String,
    speed: f32,
    language: Option<String>,
}

impl AudioController {
    pub fn new(
        transcription: Arc<dyn TranscriptionProvider>,
        synthesis: Arc<dyn SynthesisProvider>,
        voice_id: impl Into<String>,
    ) -> Self {
        Self {
            transcription,
            synthesis,
            voice_id: voice_id.into(),
            speed: 1.0,
            language: None,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Transcribe recorded input, returning the text and the audio event
    /// to append to the conversation.
    pub async fn listen(&self, audio: Vec<u8>) -> Result<(String, AudioEvent), ProviderError> {
        let text = self
            .transcription
            .transcribe(audio, self.language.as_deref())
            .await?;
        let event = AudioEvent::new(AudioDirection::Input).with_transcript(text.clone());
        Ok((text, event))
    }

    /// Synthesize a reply, returning the audio bytes and the audio event
    /// to append to the conversation.
    pub async fn speak(&self, text: &str) -> Result<(Vec<u8>, AudioEvent), ProviderError> {
        let audio = self
            .synthesis
            .synthesize(text, &self.voice_id, self.speed)
            .await?;
        let event = AudioEvent::new(AudioDirection::Output).with_transcript(text);
        Ok((audio, event))
    }
}
