//! Speech-model capability used by the non-realtime fallback path.

use anyhow::{Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        AudioInput, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateSpeechRequestArgs, CreateTranscriptionRequestArgs,
        SpeechModel as OpenAISpeechModelId, Voice,
    },
};
use async_trait::async_trait;

/// Contract for the transcription/generation/synthesis calls the fallback
/// path needs. Realtime sessions never go through this trait.
#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Transcribes a complete pre-recorded audio clip to text.
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String>;

    /// Generates the tutor's textual reply for one user turn.
    async fn generate_reply(&self, instructions: &str, user_text: &str) -> Result<String>;

    /// Synthesizes the reply as spoken audio.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// `SpeechModel` backed by an OpenAI-compatible API.
pub struct OpenAISpeechModel {
    client: Client<OpenAIConfig>,
    chat_model: String,
    stt_model: String,
    tts_model: String,
    voice: String,
}

impl OpenAISpeechModel {
    pub fn new(
        api_key: &str,
        base_url: &str,
        chat_model: String,
        stt_model: String,
        tts_model: String,
        voice: String,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            chat_model,
            stt_model,
            tts_model,
            voice,
        }
    }

    fn voice_id(&self) -> Voice {
        match self.voice.as_str() {
            "echo" => Voice::Echo,
            "fable" => Voice::Fable,
            "onyx" => Voice::Onyx,
            "nova" => Voice::Nova,
            "shimmer" => Voice::Shimmer,
            _ => Voice::Alloy,
        }
    }

    fn tts_model_id(&self) -> OpenAISpeechModelId {
        match self.tts_model.as_str() {
            "tts-1-hd" => OpenAISpeechModelId::Tts1Hd,
            _ => OpenAISpeechModelId::Tts1,
        }
    }
}

#[async_trait]
impl SpeechModel for OpenAISpeechModel {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String> {
        // The browser records WEBM/OPUS clips for the fallback path.
        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8("audio.webm".to_string(), audio))
            .model(&self.stt_model)
            .build()?;
        let response = self.client.audio().transcribe(request).await?;
        Ok(response.text.trim().to_string())
    }

    async fn generate_reply(&self, instructions: &str, user_text: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(instructions)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_text)
                    .build()?
                    .into(),
            ])
            .build()?;
        let response = self.client.chat().create(request).await?;
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("model reply had no text content"))?;
        Ok(content.trim().to_string())
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .model(self.tts_model_id())
            .voice(self.voice_id())
            .build()?;
        let response = self.client.audio().speech(request).await?;
        Ok(response.bytes.to_vec())
    }
}
