//! Non-realtime fallback path: one complete tutoring turn per request.
//!
//! When the client sends a pre-recorded clip or plain text outside of an
//! active realtime stream, this pipeline transcribes the clip if needed,
//! generates a reply and synthesizes it as voice, returning everything as
//! one response unit. The whole path is best-effort: a failing stage
//! degrades the turn (empty transcript, apology reply, silent audio)
//! instead of failing it.

use crate::instructions::build_instructions;
use crate::session::SessionState;
use crate::speech::SpeechModel;
use std::sync::Arc;
use tracing::warn;

/// Reply used when generation fails, matching the spoken-language policy.
const TECHNICAL_PROBLEM_REPLY: &str =
    "Desculpe, tive um problema técnico ao gerar a resposta. Podemos tentar novamente?";

/// The result of one fallback turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TutorTurn {
    /// What the student said (the transcript for audio input, or the text
    /// itself for text input).
    pub transcript: String,
    /// The reply, synthesized as audio. Empty if synthesis failed.
    pub audio: Vec<u8>,
    /// Which agent produced the turn.
    pub agent: String,
}

/// Drives the transcribe → reply → synthesize sequence for one turn.
pub struct TutorPipeline {
    speech: Arc<dyn SpeechModel>,
}

impl TutorPipeline {
    pub fn new(speech: Arc<dyn SpeechModel>) -> Self {
        Self { speech }
    }

    /// Processes one user turn given audio bytes, text, or both (audio wins).
    ///
    /// Appends the user/assistant exchange to the session's short-term
    /// history.
    pub async fn respond(
        &self,
        audio: Option<Vec<u8>>,
        text: Option<String>,
        session: &mut SessionState,
    ) -> TutorTurn {
        let mut transcript = String::new();
        let mut user_text = text.unwrap_or_default();

        if let Some(audio) = audio {
            transcript = match self.speech.transcribe(audio).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = ?e, "transcription failed, continuing with empty text");
                    String::new()
                }
            };
            user_text = transcript.clone();
        }

        let instructions = build_instructions(session);
        let reply = match self.speech.generate_reply(&instructions, &user_text).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = ?e, "reply generation failed, using fallback reply");
                TECHNICAL_PROBLEM_REPLY.to_string()
            }
        };

        let audio_out = match self.speech.synthesize(&reply).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(error = ?e, "voice synthesis failed, returning silent turn");
                Vec::new()
            }
        };

        session.add_message("user", &user_text);
        session.add_message("assistant", &reply);

        TutorTurn {
            transcript: if transcript.is_empty() {
                user_text
            } else {
                transcript
            },
            audio: audio_out,
            agent: "tutor".to_string(),
        }
    }
}
