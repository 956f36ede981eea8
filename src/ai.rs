use std::io::Write;
use std::path::Path;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateSpeechRequestArgs,
    ImageUrlArgs,
};
use async_openai::Client;
use futures::StreamExt;
use image::imageops::FilterType;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{encode_jpeg, EncodedFrame};
use crate::config::NarratorConfig;
use crate::error::NarratorError;

pub(crate) const AUDIO_MIME: &str = "audio/mpeg";

const FRAGMENT_BUFFER: usize = 64;

/// Every `stride`-th element, starting at index 0.
pub(crate) fn sample_frames<T>(frames: &[T], stride: usize) -> Vec<&T> {
    frames.iter().step_by(stride.max(1)).collect()
}

/// Scales a frame down so its longest side is at most `max_side` pixels.
pub(crate) fn resize_for_upload(
    frame: &EncodedFrame,
    max_side: u32,
) -> Result<EncodedFrame, NarratorError> {
    let jpeg_data = frame.decode()?;
    let image = image::load_from_memory_with_format(&jpeg_data, image::ImageFormat::Jpeg)?;
    if image.width().max(image.height()) <= max_side {
        return Ok(frame.clone());
    }
    let resized = image
        .resize(max_side, max_side, FilterType::Triangle)
        .to_rgb8();
    Ok(EncodedFrame::from_jpeg(&encode_jpeg(&resized)?))
}

pub(crate) fn script_request(
    config: &NarratorConfig,
    frames: &[EncodedFrame],
) -> Result<CreateChatCompletionRequest, NarratorError> {
    let sampled = sample_frames(frames, config.stride);
    debug!(
        total = frames.len(),
        sampled = sampled.len(),
        stride = config.stride,
        "building script request"
    );

    let images = sampled
        .into_iter()
        .map(|frame| -> Result<_, NarratorError> {
            let frame = resize_for_upload(frame, config.resize)?;
            Ok(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(ImageUrlArgs::default().url(frame.data_url()).build()?)
                    .build()?,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let request = CreateChatCompletionRequestArgs::default()
        .model(config.model.as_str())
        .max_tokens(config.max_tokens)
        .messages([ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(
                    [
                        vec![ChatCompletionRequestUserMessageContentPart::Text(
                            ChatCompletionRequestMessageContentPartTextArgs::default()
                                .text(config.prompt.as_str())
                                .build()?,
                        )],
                        images,
                    ]
                    .concat(),
                ))
                .build()?,
        )])
        .build()?;
    Ok(request)
}

/// Incremental narration text from a streaming completion.
///
/// A background task forwards text fragments in arrival order. Cancelling the
/// token, or dropping the stream, stops that task and the HTTP request with
/// it.
pub(crate) struct ScriptStream {
    fragments: mpsc::Receiver<Result<String, NarratorError>>,
    cancel: CancellationToken,
}

impl ScriptStream {
    pub(crate) async fn next_fragment(&mut self) -> Option<Result<String, NarratorError>> {
        self.fragments.recv().await
    }

    /// Concatenates every fragment, handing `on_partial` the new fragment and
    /// the script so far after each one.
    pub(crate) async fn collect_with<F>(mut self, mut on_partial: F) -> Result<String, NarratorError>
    where
        F: FnMut(&str, &str),
    {
        let mut script = String::new();
        while let Some(fragment) = self.next_fragment().await {
            let fragment = fragment?;
            script.push_str(&fragment);
            on_partial(&fragment, &script);
        }
        Ok(script)
    }
}

impl Drop for ScriptStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub(crate) fn stream_script(
    client: Client<OpenAIConfig>,
    request: CreateChatCompletionRequest,
    cancel: &CancellationToken,
) -> ScriptStream {
    let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
    let cancel = cancel.child_token();
    let producer_cancel = cancel.clone();

    tokio::spawn(async move {
        let outcome = tokio::select! {
            biased;
            _ = producer_cancel.cancelled() => Err(NarratorError::Cancelled),
            result = forward_fragments(&client, request, &tx) => result,
        };
        if let Err(err) = outcome {
            let _ = tx.send(Err(err)).await;
        }
    });

    ScriptStream {
        fragments: rx,
        cancel,
    }
}

async fn forward_fragments(
    client: &Client<OpenAIConfig>,
    request: CreateChatCompletionRequest,
    tx: &mpsc::Sender<Result<String, NarratorError>>,
) -> Result<(), NarratorError> {
    let mut stream = client
        .chat()
        .create_stream(request)
        .await
        .map_err(generation_error)?;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(generation_error)?;
        for choice in chunk.choices {
            let Some(content) = choice.delta.content else {
                continue;
            };
            if content.is_empty() {
                continue;
            }
            if tx.send(Ok(content)).await.is_err() {
                debug!("script consumer went away, stopping stream");
                return Ok(());
            }
        }
    }
    Ok(())
}

fn generation_error(err: OpenAIError) -> NarratorError {
    NarratorError::Generation(err.to_string())
}

/// MP3 bytes returned by the speech endpoint.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct NarrationAudio(Vec<u8>);

impl NarrationAudio {
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Debug for NarrationAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NarrationAudio({} bytes)", self.0.len())
    }
}

pub(crate) async fn audio_speech(
    client: &Client<OpenAIConfig>,
    config: &NarratorConfig,
    text: &str,
) -> Result<NarrationAudio, NarratorError> {
    let request = CreateSpeechRequestArgs::default()
        .input(text)
        .voice(config.voice)
        .model(config.speech_model)
        .build()?;

    match client.audio().speech(request).await {
        Ok(response) => {
            info!(bytes = response.bytes.len(), "narration audio received");
            Ok(NarrationAudio(response.bytes.to_vec()))
        }
        Err(OpenAIError::ApiError(err)) => {
            warn!(code = ?err.code, message = %err.message, "speech request rejected");
            Err(NarratorError::Synthesis(err.message))
        }
        Err(err) => {
            warn!(error = %err, "speech request failed");
            Err(NarratorError::Synthesis(err.to_string()))
        }
    }
}

/// Persists the audio at `output_path`.
///
/// Bytes go to a temporary file next to the destination first, which is then
/// renamed into place; on failure the temporary file is removed and nothing
/// is left at `output_path`.
pub(crate) fn save_audio(audio: &NarrationAudio, output_path: &Path) -> Result<(), NarratorError> {
    let dir = output_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut audio_file = tempfile::Builder::new()
        .prefix(".narration-")
        .suffix(".mp3")
        .tempfile_in(dir)?;
    audio_file.write_all(audio.as_bytes())?;
    audio_file.flush()?;
    audio_file
        .persist(output_path)
        .map_err(|err| NarratorError::Io(err.error))?;
    Ok(())
}
