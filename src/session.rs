//! Per-user pipeline state and the gates between its steps.
//!
//! A [`Session`] owns everything one user has produced so far: the upload,
//! the decoded frames, the narration script. Each step checks its gate via
//! [`Session::available_actions`] before running, so a step can only follow
//! the one that feeds it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai::{self, NarrationAudio};
use crate::cache::{CachedFrames, FrameCache, Frames};
use crate::capture::{self, EncodedFrame};
use crate::config::NarratorConfig;
use crate::error::NarratorError;

const SUPPORTED_CONTAINER: &str = "mp4";

/// The OpenAI API key. Never printed.
#[derive(Clone, Default)]
pub(crate) struct Credential(String);

impl Credential {
    pub(crate) fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub(crate) fn is_present(&self) -> bool {
        !self.0.trim().is_empty()
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.trim()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_present() {
            f.write_str("Credential(<redacted>)")
        } else {
            f.write_str("Credential(<empty>)")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    ProcessVideo,
    CreateScript,
    ProduceAudio,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::ProcessVideo => write!(f, "Process Video"),
            Action::CreateScript => write!(f, "Create Script"),
            Action::ProduceAudio => write!(f, "Produce Audio"),
        }
    }
}

/// A video file handed to the session.
#[derive(Clone)]
pub(crate) struct VideoUpload {
    pub(crate) name: String,
    pub(crate) bytes: Arc<[u8]>,
}

impl VideoUpload {
    pub(crate) fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub(crate) async fn from_path(path: &Path) -> Result<Self, NarratorError> {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .unwrap_or_default();
        if !extension.eq_ignore_ascii_case(SUPPORTED_CONTAINER) {
            return Err(NarratorError::UnsupportedContainer(extension.to_owned()));
        }
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, bytes))
    }
}

impl fmt::Debug for VideoUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoUpload")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct Session {
    config: NarratorConfig,
    credential: Credential,
    upload: Option<VideoUpload>,
    frames: Frames,
    /// Why decoding of the current frames stopped early, if it did.
    truncated: Option<String>,
    script: String,
    cache: FrameCache,
}

impl Session {
    pub(crate) fn new(config: NarratorConfig, credential: Credential) -> Self {
        Self {
            config,
            credential,
            upload: None,
            frames: Arc::new(Vec::new()),
            truncated: None,
            script: String::new(),
            cache: FrameCache::default(),
        }
    }

    pub(crate) fn available_actions(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.credential.is_present() {
            return actions;
        }
        if self.upload.is_some() {
            actions.push(Action::ProcessVideo);
        }
        if !self.frames.is_empty() {
            actions.push(Action::CreateScript);
        }
        if !self.script.is_empty() {
            actions.push(Action::ProduceAudio);
        }
        actions
    }

    fn require(&self, action: Action) -> Result<(), NarratorError> {
        if !self.credential.is_present() {
            return Err(NarratorError::MissingCredential);
        }
        if !self.available_actions().contains(&action) {
            return Err(NarratorError::ActionUnavailable(action));
        }
        Ok(())
    }

    pub(crate) fn upload(&mut self, upload: VideoUpload) -> Result<(), NarratorError> {
        if !self.credential.is_present() {
            return Err(NarratorError::MissingCredential);
        }
        debug!(name = %upload.name, bytes = upload.bytes.len(), "video uploaded");
        self.upload = Some(upload);
        Ok(())
    }

    pub(crate) fn has_credential(&self) -> bool {
        self.credential.is_present()
    }

    pub(crate) fn current_upload(&self) -> Option<&VideoUpload> {
        self.upload.as_ref()
    }

    pub(crate) fn frames(&self) -> &[EncodedFrame] {
        &self.frames
    }

    pub(crate) fn truncation(&self) -> Option<&str> {
        self.truncated.as_deref()
    }

    pub(crate) fn script(&self) -> &str {
        &self.script
    }

    pub(crate) fn cached_uploads(&self) -> usize {
        self.cache.len()
    }

    /// Drops cached frames for the current upload so the next
    /// [`process_video`](Self::process_video) decodes it again.
    pub(crate) fn forget_current_upload(&mut self) -> bool {
        match &self.upload {
            Some(upload) => self.cache.invalidate(&FrameCache::key_for(&upload.bytes)),
            None => false,
        }
    }

    /// Decodes the current upload into frames, replacing any earlier ones.
    ///
    /// Returns the number of frames now held by the session.
    pub(crate) async fn process_video(&mut self) -> Result<usize, NarratorError> {
        self.require(Action::ProcessVideo)?;
        let Some(upload) = &self.upload else {
            return Err(NarratorError::ActionUnavailable(Action::ProcessVideo));
        };

        let key = FrameCache::key_for(&upload.bytes);
        let entry = match self.cache.get(&key) {
            Some(entry) => {
                debug!(%key, "frame cache hit");
                entry
            }
            None => {
                let payload = Arc::clone(&upload.bytes);
                let extraction =
                    tokio::task::spawn_blocking(move || capture::extract_frames(&payload))
                        .await??;
                if extraction.frames.is_empty() {
                    return Err(NarratorError::NoFrames);
                }
                let entry = CachedFrames {
                    frames: Arc::new(extraction.frames),
                    truncated: extraction.truncated,
                };
                self.cache.insert(key, entry.clone());
                entry
            }
        };

        if let Some(reason) = &entry.truncated {
            warn!(
                decoded = entry.frames.len(),
                %reason,
                "video decoding stopped early, keeping the frames decoded so far"
            );
        }
        info!(name = %upload.name, frames = entry.frames.len(), "video processed");
        self.frames = entry.frames;
        self.truncated = entry.truncated;
        Ok(self.frames.len())
    }

    /// Streams a narration script for the current frames.
    ///
    /// `on_partial` sees each fragment and the script so far as they arrive.
    /// The stored script is only replaced once generation completes.
    pub(crate) async fn create_script<F>(
        &mut self,
        cancel: &CancellationToken,
        on_partial: F,
    ) -> Result<&str, NarratorError>
    where
        F: FnMut(&str, &str),
    {
        self.require(Action::CreateScript)?;
        let request = ai::script_request(&self.config, &self.frames)?;
        let client = self.config.client(&self.credential);

        let script = ai::stream_script(client, request, cancel)
            .collect_with(on_partial)
            .await?;
        info!(chars = script.len(), "script generated");
        self.script = script;
        Ok(&self.script)
    }

    pub(crate) async fn produce_audio(&self) -> Result<NarrationAudio, NarratorError> {
        self.require(Action::ProduceAudio)?;
        let client = self.config.client(&self.credential);
        ai::audio_speech(&client, &self.config, &self.script).await
    }
}
