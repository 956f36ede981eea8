use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{SpeechModel, Voice};
use async_openai::Client;
use clap::ValueEnum;

use crate::session::Credential;

pub(crate) const DEFAULT_PROMPT: &str = "This video showcases a cooking show. Create a narration script that is engaging and descriptive of the cooking process.";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o";
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 500;
pub(crate) const DEFAULT_STRIDE: usize = 50;
pub(crate) const DEFAULT_RESIZE: u32 = 768;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum NarrationVoice {
    Alloy,
    Echo,
    #[default]
    Fable,
    Onyx,
    Nova,
    Shimmer,
}

impl From<NarrationVoice> for Voice {
    fn from(voice: NarrationVoice) -> Self {
        match voice {
            NarrationVoice::Alloy => Voice::Alloy,
            NarrationVoice::Echo => Voice::Echo,
            NarrationVoice::Fable => Voice::Fable,
            NarrationVoice::Onyx => Voice::Onyx,
            NarrationVoice::Nova => Voice::Nova,
            NarrationVoice::Shimmer => Voice::Shimmer,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum NarrationModel {
    #[default]
    #[value(name = "tts-1")]
    Tts1,
    #[value(name = "tts-1-hd")]
    Tts1Hd,
}

impl From<NarrationModel> for SpeechModel {
    fn from(model: NarrationModel) -> Self {
        match model {
            NarrationModel::Tts1 => SpeechModel::Tts1,
            NarrationModel::Tts1Hd => SpeechModel::Tts1Hd,
        }
    }
}

/// Knobs for the generation and synthesis requests.
#[derive(Debug, Clone)]
pub(crate) struct NarratorConfig {
    /// Overrides the OpenAI endpoint, e.g. for a compatible proxy.
    pub(crate) api_base: Option<String>,
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    /// Every `stride`-th frame is sent to the model, starting with the first.
    pub(crate) stride: usize,
    /// Longest side, in pixels, of frames sent to the model.
    pub(crate) resize: u32,
    pub(crate) prompt: String,
    pub(crate) voice: NarrationVoice,
    pub(crate) speech_model: NarrationModel,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            model: DEFAULT_MODEL.to_owned(),
            max_tokens: DEFAULT_MAX_TOKENS,
            stride: DEFAULT_STRIDE,
            resize: DEFAULT_RESIZE,
            prompt: DEFAULT_PROMPT.to_owned(),
            voice: NarrationVoice::default(),
            speech_model: NarrationModel::default(),
        }
    }
}

impl NarratorConfig {
    pub(crate) fn client(&self, credential: &Credential) -> Client<OpenAIConfig> {
        let mut config = OpenAIConfig::new().with_api_key(credential.expose());
        if let Some(api_base) = &self.api_base {
            config = config.with_api_base(api_base);
        }
        Client::with_config(config).with_backoff(no_retries())
    }
}

/// Gives up after the first attempt, so a 429 or 5xx surfaces at once.
fn no_retries() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build()
}
