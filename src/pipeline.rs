//! Background load and bulk-cache workers and the messages they report.

use crate::{
    cache,
    canonical::CanonicalImage,
    config::PipelineConfig,
    decoder::DicomDecoder,
    error::{Error, Result},
};

use futures::{Stream, stream};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use web_time::Instant;

pub const FILE_DOES_NOT_EXIST: &str = "the file does not exist";

/// Progress, result and failure notifications of one request, in order:
/// an optional `Started`, any number of updates, then one terminal message.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineMessage {
    /// Decoding began. Carries the number of files for a batch.
    Started { expected_total: Option<usize> },
    ProgressUpdate { current: usize },
    /// A single load delivers its image; a batch finishes without one.
    Finished { image: Option<CanonicalImage> },
    /// One file of a batch failed. The batch goes on.
    RecoverableError { path: PathBuf, reason: String },
    FatalError { reason: String },
    OutOfMemory { path: PathBuf },
}

impl PipelineMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineMessage::Finished { .. }
                | PipelineMessage::FatalError { .. }
                | PipelineMessage::OutOfMemory { .. }
        )
    }
}

/// Progress of a single image load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    TryingCache,
    Decoding,
    CachingResult,
    Finished,
    Failed,
}

/// Spawns one blocking worker per request.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load one image, from its cache when possible.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn load(&self, path: impl Into<PathBuf>) -> PipelineHandle {
        let path = path.into();
        let config = Arc::clone(&self.config);
        PipelineHandle::spawn(move |sender| {
            LoadTask::new(path, sender).run(&config);
        })
    }

    /// Decode and cache every candidate file of `dir`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn cache_directory(&self, dir: impl Into<PathBuf>) -> PipelineHandle {
        let dir = dir.into();
        let config = Arc::clone(&self.config);
        PipelineHandle::spawn(move |sender| {
            cache_directory(&dir, &config, &Messenger(sender));
        })
    }
}

/// Receiving end of a request.
#[derive(Debug)]
pub struct PipelineHandle {
    receiver: UnboundedReceiver<PipelineMessage>,
    worker: JoinHandle<()>,
}

impl PipelineHandle {
    fn spawn<F>(work: F) -> Self
    where
        F: FnOnce(UnboundedSender<PipelineMessage>) + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::task::spawn_blocking(move || work(sender));
        Self { receiver, worker }
    }

    /// Next message, or `None` once the worker is done.
    pub async fn next_message(&mut self) -> Option<PipelineMessage> {
        self.receiver.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = PipelineMessage> {
        stream::unfold(self.receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (message, receiver))
        })
    }

    /// Collect the remaining messages and wait for the worker to exit.
    pub async fn wait(mut self) -> Vec<PipelineMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.receiver.recv().await {
            messages.push(message);
        }
        if let Err(e) = self.worker.await {
            warn!("pipeline worker did not complete: {e}");
        }
        messages
    }
}

struct Messenger(UnboundedSender<PipelineMessage>);

impl Messenger {
    /// `None` once nobody is listening.
    fn send(&self, message: PipelineMessage) -> Option<()> {
        if self.0.send(message).is_err() {
            debug!("pipeline receiver dropped");
            return None;
        }
        Some(())
    }
}

struct LoadTask {
    path: PathBuf,
    state: LoadState,
    messenger: Messenger,
    started_at: Instant,
}

impl LoadTask {
    fn new(path: PathBuf, sender: UnboundedSender<PipelineMessage>) -> Self {
        Self {
            path,
            state: LoadState::Idle,
            messenger: Messenger(sender),
            started_at: Instant::now(),
        }
    }

    fn enter(&mut self, state: LoadState) {
        debug!(path = %self.path.display(), from = ?self.state, to = ?state, "load state");
        self.state = state;
    }

    fn run(mut self, config: &PipelineConfig) {
        if !self.path.is_file() {
            return self.fail(PipelineMessage::FatalError {
                reason: FILE_DOES_NOT_EXIST.to_string(),
            });
        }

        self.enter(LoadState::TryingCache);
        match cache::read(&self.path, config) {
            Ok(image) => {
                debug!(path = %self.path.display(), "cache hit");
                return self.finish(image);
            }
            Err(e) if e.is_out_of_memory() => return self.out_of_memory(),
            Err(Error::CorruptCache(reason)) => {
                warn!(path = %self.path.display(), "ignoring corrupt cache: {reason}");
            }
            Err(e) if e.is_cache_fallthrough() => {}
            Err(e) => warn!(path = %self.path.display(), "could not read cache: {e}"),
        }

        self.enter(LoadState::Decoding);
        self.messenger.send(PipelineMessage::Started {
            expected_total: None,
        });
        let image = match DicomDecoder::decode_image(&self.path, config) {
            Ok(image) => image,
            Err(e) if e.is_out_of_memory() => return self.out_of_memory(),
            Err(e) => {
                return self.fail(PipelineMessage::FatalError { reason: e.reason() });
            }
        };

        self.enter(LoadState::CachingResult);
        if let Err(e) = cache::write(&self.path, &image, config) {
            warn!(path = %self.path.display(), "could not write cache: {e}");
        }
        self.finish(image);
    }

    fn finish(mut self, image: CanonicalImage) {
        self.enter(LoadState::Finished);
        debug!(
            path = %self.path.display(),
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "image loaded"
        );
        self.messenger.send(PipelineMessage::Finished { image: Some(image) });
    }

    fn out_of_memory(self) {
        let path = self.path.clone();
        self.fail(PipelineMessage::OutOfMemory { path });
    }

    fn fail(mut self, message: PipelineMessage) {
        self.enter(LoadState::Failed);
        warn!(path = %self.path.display(), "load failed: {message:?}");
        self.messenger.send(message);
    }
}

/// Returns `None` when the receiver went away before the batch ended.
fn cache_directory(dir: &Path, config: &PipelineConfig, messenger: &Messenger) -> Option<()> {
    let files = match list_candidates(dir, config) {
        Ok(files) => files,
        Err(e) => return messenger.send(PipelineMessage::FatalError { reason: e.reason() }),
    };

    let started_at = Instant::now();
    messenger.send(PipelineMessage::Started {
        expected_total: Some(files.len()),
    })?;

    let mut failures = 0;
    for (index, path) in files.iter().enumerate() {
        match cache_file(path, config) {
            Ok(()) => {}
            Err(e) if e.is_out_of_memory() => {
                warn!(path = %path.display(), "batch caching aborted: {e}");
                return messenger.send(PipelineMessage::OutOfMemory { path: path.clone() });
            }
            Err(e) => {
                failures += 1;
                debug!(path = %path.display(), "skipping file: {e}");
                messenger.send(PipelineMessage::RecoverableError {
                    path: path.clone(),
                    reason: e.reason(),
                })?;
            }
        }
        messenger.send(PipelineMessage::ProgressUpdate { current: index + 1 })?;
    }

    info!(
        dir = %dir.display(),
        files = files.len(),
        failures,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "batch caching finished"
    );
    messenger.send(PipelineMessage::Finished { image: None })
}

fn cache_file(path: &Path, config: &PipelineConfig) -> Result<()> {
    let image = DicomDecoder::decode_image(path, config)?;
    cache::write(path, &image, config)?;
    Ok(())
}

/// Files of `dir` worth trying to decode: not hidden, with no extension or
/// the DICOM extension. Sorted by name, ignoring case.
pub fn list_candidates(dir: impl AsRef<Path>, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let candidate = match path.extension() {
            None => true,
            Some(ext) => ext
                .to_string_lossy()
                .eq_ignore_ascii_case(config.dicom_extension()),
        };
        if candidate {
            files.push((name.to_lowercase(), path));
        }
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    InFlight,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Another request is still in flight")]
    Busy,
}

/// One viewer's requests: at most one in flight at a time.
#[derive(Debug)]
pub struct ViewerSession {
    pipeline: Pipeline,
    current: Option<PipelineHandle>,
}

impl ViewerSession {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            current: None,
        }
    }

    pub fn state(&self) -> RequestState {
        match self.current {
            Some(_) => RequestState::InFlight,
            None => RequestState::Idle,
        }
    }

    pub fn open(&mut self, path: impl Into<PathBuf>) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.current = Some(self.pipeline.load(path));
        Ok(())
    }

    pub fn cache_directory(&mut self, dir: impl Into<PathBuf>) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.current = Some(self.pipeline.cache_directory(dir));
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.state() {
            RequestState::Idle => Ok(()),
            RequestState::InFlight => Err(SessionError::Busy),
        }
    }

    /// Next message of the request in flight. The session is idle again
    /// once the terminal message has been handed out.
    pub async fn next_message(&mut self) -> Option<PipelineMessage> {
        let handle = self.current.as_mut()?;
        let message = handle.next_message().await;
        if message.as_ref().is_none_or(PipelineMessage::is_terminal) {
            self.current = None;
        }
        message
    }

    /// Drop the rest of the request in flight and wait for its worker to exit.
    pub async fn abandon(&mut self) {
        if let Some(handle) = self.current.take() {
            let skipped = handle.wait().await.len();
            debug!(skipped, "abandoned request");
        }
    }
}
