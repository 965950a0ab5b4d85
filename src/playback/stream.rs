// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Audio resources that download an episode and play it on an output
//!
//! Each bound resource gets its own audio thread. The thread owns the
//! output, applies commands from the resource handle, and reports metadata,
//! progress, end of stream and load failures through the resource's
//! [`EventSink`]. The download runs on the tokio runtime and hands the body
//! to the thread once it is complete.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::PlaybackError;
use crate::http::HttpClient;

use super::engine::{AudioBackend, AudioResource, EventSink, ResourceEvent};

/// How often a playing output reports its position
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// A sound output playing one decoded episode at a time
///
/// Outputs live on their audio thread and need not be `Send`.
pub trait AudioOutput {
    /// Decode `audio` and queue it paused, replacing anything queued before
    ///
    /// Returns the total duration when the container reports one.
    fn load(&mut self, audio: Bytes) -> Result<Option<Duration>, String>;

    fn play(&mut self);

    fn pause(&mut self);

    fn seek(&mut self, position: Duration) -> Result<(), String>;

    /// Effective gain; 0.0 while muted
    fn set_volume(&mut self, volume: f32);

    fn position(&self) -> Duration;

    fn is_paused(&self) -> bool;

    /// Everything queued has been played
    fn finished(&self) -> bool;

    fn stop(&mut self);
}

type PlayReply = oneshot::Sender<Result<(), PlaybackError>>;

enum Command {
    Loaded(Bytes),
    LoadFailed(String),
    Play(PlayReply),
    Pause,
    Seek(f64),
    Volume(f32),
    Muted(bool),
    Release,
}

/// Backend downloading episodes through an [`HttpClient`] and playing them
/// on outputs created by `open_output`
pub struct StreamingBackend<C, F> {
    client: Arc<C>,
    open_output: Arc<F>,
    progress_interval: Duration,
}

impl<C, F> StreamingBackend<C, F> {
    pub fn new(client: C, open_output: F) -> Self {
        Self {
            client: Arc::new(client),
            open_output: Arc::new(open_output),
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

impl<C, F, O> AudioBackend for StreamingBackend<C, F>
where
    C: HttpClient + 'static,
    F: Fn() -> Result<O, String> + Send + Sync + 'static,
    O: AudioOutput + 'static,
{
    fn open(
        &mut self,
        url: &str,
        events: EventSink,
    ) -> Result<Box<dyn AudioResource>, PlaybackError> {
        let unsupported = |reason: String| PlaybackError::Unsupported {
            url: url.to_string(),
            reason,
        };
        let parsed = Url::parse(url).map_err(|e| unsupported(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(unsupported(format!("cannot stream {} URLs", parsed.scheme())));
        }

        let runtime = Handle::try_current().map_err(|e| PlaybackError::Failed {
            reason: e.to_string(),
        })?;

        let (commands, inbox) = mpsc::channel();

        let open_output = Arc::clone(&self.open_output);
        let interval = self.progress_interval;
        let source = url.to_string();
        thread::Builder::new()
            .name("podstage-audio".to_string())
            .spawn(move || match (*open_output)() {
                Ok(output) => OutputLoop::new(source, output, events).run(inbox, interval),
                Err(reason) => refuse_all(inbox, events, reason),
            })
            .map_err(|e| PlaybackError::Failed {
                reason: e.to_string(),
            })?;

        let client = Arc::clone(&self.client);
        let target = url.to_string();
        let loaded = commands.clone();
        let download = runtime.spawn(async move {
            let command = match fetch_audio(client.as_ref(), &target).await {
                Ok(audio) => Command::Loaded(audio),
                Err(reason) => Command::LoadFailed(reason),
            };
            // The resource may already be released
            let _ = loaded.send(command);
        });

        tracing::debug!(url, "opened streaming audio resource");
        Ok(Box::new(StreamedResource {
            commands,
            download,
            released: false,
        }))
    }
}

async fn fetch_audio<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, String> {
    let response = client.get(url).await.map_err(|e| e.to_string())?;
    if !response.is_success() {
        return Err(format!("HTTP status {}", response.status));
    }
    if response.body.is_empty() {
        return Err("empty audio body".to_string());
    }
    Ok(response.body)
}

struct StreamedResource {
    commands: Sender<Command>,
    download: JoinHandle<()>,
    released: bool,
}

impl StreamedResource {
    fn send(&self, command: Command) {
        // A closed inbox means the audio thread already stopped
        let _ = self.commands.send(command);
    }
}

fn output_closed() -> PlaybackError {
    PlaybackError::Failed {
        reason: "audio output closed".to_string(),
    }
}

#[async_trait]
impl AudioResource for StreamedResource {
    async fn play(&mut self) -> Result<(), PlaybackError> {
        let (reply, accepted) = oneshot::channel();
        self.commands
            .send(Command::Play(reply))
            .map_err(|_| output_closed())?;
        accepted.await.map_err(|_| output_closed())?
    }

    fn pause(&mut self) {
        self.send(Command::Pause);
    }

    fn set_position(&mut self, seconds: f64) {
        self.send(Command::Seek(seconds));
    }

    fn set_volume(&mut self, volume: f32) {
        self.send(Command::Volume(volume));
    }

    fn set_muted(&mut self, muted: bool) {
        self.send(Command::Muted(muted));
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.download.abort();
        self.send(Command::Release);
    }
}

impl Drop for StreamedResource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Audio thread body when no output could be opened
fn refuse_all(inbox: Receiver<Command>, events: EventSink, reason: String) {
    tracing::warn!(%reason, "no audio output available");
    events.emit(ResourceEvent::LoadError {
        reason: reason.clone(),
    });

    while let Ok(command) = inbox.recv() {
        match command {
            Command::Play(reply) => {
                let _ = reply.send(Err(PlaybackError::Failed {
                    reason: reason.clone(),
                }));
            }
            Command::Release => break,
            _ => {}
        }
    }
}

struct OutputLoop<O> {
    url: String,
    output: O,
    events: EventSink,
    audio: Option<Bytes>,
    failure: Option<PlaybackError>,
    waiting: Vec<PlayReply>,
    pending_seek: Option<f64>,
    volume: f32,
    muted: bool,
    ended: bool,
}

impl<O: AudioOutput> OutputLoop<O> {
    fn new(url: String, output: O, events: EventSink) -> Self {
        Self {
            url,
            output,
            events,
            audio: None,
            failure: None,
            waiting: Vec::new(),
            pending_seek: None,
            volume: 1.0,
            muted: false,
            ended: false,
        }
    }

    fn run(mut self, inbox: Receiver<Command>, interval: Duration) {
        loop {
            match inbox.recv_timeout(interval) {
                Ok(Command::Release) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(command) => self.apply(command),
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.report_progress();
        }

        self.output.stop();
        for reply in self.waiting.drain(..) {
            let _ = reply.send(Err(output_closed()));
        }
        tracing::debug!(url = %self.url, "audio output stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Loaded(audio) => self.load(audio),
            Command::LoadFailed(reason) => self.fail(
                PlaybackError::Failed {
                    reason: reason.clone(),
                },
                reason,
            ),
            Command::Play(reply) => {
                if let Some(failure) = &self.failure {
                    let _ = reply.send(Err(failure.clone()));
                } else if self.audio.is_some() {
                    self.start();
                    let _ = reply.send(Ok(()));
                } else {
                    self.waiting.push(reply);
                }
            }
            Command::Pause => self.output.pause(),
            Command::Seek(seconds) => {
                if self.audio.is_some() {
                    self.seek(seconds);
                } else {
                    self.pending_seek = Some(seconds);
                }
            }
            Command::Volume(volume) => {
                self.volume = volume;
                self.apply_volume();
            }
            Command::Muted(muted) => {
                self.muted = muted;
                self.apply_volume();
            }
            Command::Release => {}
        }
    }

    fn load(&mut self, audio: Bytes) {
        let duration = match self.output.load(audio.clone()) {
            Ok(duration) => duration,
            Err(reason) => {
                let error = PlaybackError::Unsupported {
                    url: self.url.clone(),
                    reason: reason.clone(),
                };
                return self.fail(error, reason);
            }
        };

        tracing::debug!(url = %self.url, bytes = audio.len(), ?duration, "audio loaded");
        self.audio = Some(audio);
        self.apply_volume();
        if let Some(seconds) = self.pending_seek.take() {
            self.seek(seconds);
        }
        self.events.emit(ResourceEvent::MetadataReady {
            duration_seconds: duration.map_or(0.0, |d| d.as_secs_f64()),
        });

        let waiting = std::mem::take(&mut self.waiting);
        if !waiting.is_empty() {
            self.start();
        }
        for reply in waiting {
            let _ = reply.send(Ok(()));
        }
    }

    fn fail(&mut self, error: PlaybackError, reason: String) {
        tracing::warn!(url = %self.url, %reason, "audio could not be loaded");
        self.events.emit(ResourceEvent::LoadError { reason });
        for reply in self.waiting.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        self.failure = Some(error);
    }

    fn start(&mut self) {
        self.requeue_if_finished();
        self.ended = false;
        self.output.play();
    }

    fn seek(&mut self, seconds: f64) {
        if !seconds.is_finite() {
            return;
        }
        self.requeue_if_finished();
        if let Err(reason) = self.output.seek(Duration::from_secs_f64(seconds.max(0.0))) {
            tracing::warn!(url = %self.url, %reason, seconds, "seek failed");
        }
    }

    // A finished output has consumed its source; queue the episode again
    fn requeue_if_finished(&mut self) {
        if !self.output.finished() {
            return;
        }
        if let Some(audio) = self.audio.clone() {
            if let Err(reason) = self.output.load(audio) {
                tracing::warn!(url = %self.url, %reason, "could not requeue audio");
            }
            self.apply_volume();
        }
    }

    fn apply_volume(&mut self) {
        let gain = if self.muted { 0.0 } else { self.volume };
        self.output.set_volume(gain);
    }

    fn report_progress(&mut self) {
        if self.audio.is_none() || self.ended || self.output.is_paused() {
            return;
        }

        if self.output.finished() {
            self.ended = true;
            self.output.pause();
            self.events.emit(ResourceEvent::Ended);
        } else {
            self.events.emit(ResourceEvent::Progress {
                position_seconds: self.output.position().as_secs_f64(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::feed::Episode;
    use crate::http::testing::StaticClient;
    use crate::playback::{EngineEvent, PlaybackEngine, PlaybackSession, SessionOptions, TransportState};

    const EPISODE_URL: &str = "https://example.com/ep1.mp3";

    #[derive(Default)]
    struct FakeState {
        loads: usize,
        playing: bool,
        position: Duration,
        finished: bool,
        volume: f32,
        refuse_decode: bool,
        stopped: bool,
    }

    /// Output that plays nothing and records what it was told
    #[derive(Clone, Default)]
    struct FakeOutput {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeOutput {
        fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
            f(&mut self.state.lock().unwrap())
        }
    }

    impl AudioOutput for FakeOutput {
        fn load(&mut self, _audio: Bytes) -> Result<Option<Duration>, String> {
            self.with(|state| {
                if state.refuse_decode {
                    return Err("unrecognized format".to_string());
                }
                state.loads += 1;
                state.playing = false;
                state.finished = false;
                state.position = Duration::ZERO;
                Ok(Some(Duration::from_secs(90)))
            })
        }

        fn play(&mut self) {
            self.with(|state| state.playing = true);
        }

        fn pause(&mut self) {
            self.with(|state| state.playing = false);
        }

        fn seek(&mut self, position: Duration) -> Result<(), String> {
            self.with(|state| state.position = position);
            Ok(())
        }

        fn set_volume(&mut self, volume: f32) {
            self.with(|state| state.volume = volume);
        }

        fn position(&self) -> Duration {
            self.with(|state| state.position)
        }

        fn is_paused(&self) -> bool {
            self.with(|state| !state.playing)
        }

        fn finished(&self) -> bool {
            self.with(|state| state.finished)
        }

        fn stop(&mut self) {
            self.with(|state| {
                state.playing = false;
                state.stopped = true;
            });
        }
    }

    fn backend(
        client: StaticClient,
        output: &FakeOutput,
    ) -> StreamingBackend<StaticClient, impl Fn() -> Result<FakeOutput, String> + Send + Sync + 'static>
    {
        let output = output.clone();
        StreamingBackend::new(client, move || Ok(output.clone()))
            .with_progress_interval(Duration::from_millis(10))
    }

    async fn next_event(rx: &mut UnboundedReceiver<EngineEvent>) -> ResourceEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no resource event within 2s")
            .expect("event channel closed")
            .event
    }

    /// Skip progress reports until something else arrives
    async fn next_non_progress(rx: &mut UnboundedReceiver<EngineEvent>) -> ResourceEvent {
        loop {
            match next_event(rx).await {
                ResourceEvent::Progress { .. } => continue,
                other => return other,
            }
        }
    }

    async fn eventually(output: &FakeOutput, check: impl Fn(&FakeState) -> bool) {
        for _ in 0..200 {
            if output.with(|state| check(state)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("output never reached the expected state");
    }

    #[tokio::test]
    async fn downloads_then_plays_and_reports() {
        let output = FakeOutput::default();
        let (mut engine, mut rx) = PlaybackEngine::new(backend(StaticClient::new(200, "ID3 audio"), &output));

        engine.bind(EPISODE_URL, 0.5, false).unwrap();
        engine.play().await.unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            ResourceEvent::MetadataReady {
                duration_seconds: 90.0
            }
        );
        assert!(output.with(|state| state.playing));
        assert_eq!(output.with(|state| state.volume), 0.5);

        output.with(|state| state.position = Duration::from_secs(12));
        loop {
            match next_event(&mut rx).await {
                ResourceEvent::Progress { position_seconds } if position_seconds == 12.0 => break,
                ResourceEvent::Progress { .. } => continue,
                other => panic!("expected progress, got {other:?}"),
            }
        }

        engine.set_muted(true);
        eventually(&output, |state| state.volume == 0.0).await;

        output.with(|state| state.finished = true);
        assert_eq!(next_non_progress(&mut rx).await, ResourceEvent::Ended);
        assert!(!output.with(|state| state.playing));
    }

    #[tokio::test]
    async fn replay_after_end_requeues_audio() {
        let output = FakeOutput::default();
        let (mut engine, mut rx) = PlaybackEngine::new(backend(StaticClient::new(200, "ID3 audio"), &output));

        engine.bind(EPISODE_URL, 1.0, false).unwrap();
        engine.play().await.unwrap();
        output.with(|state| state.finished = true);
        assert_eq!(next_non_progress(&mut rx).await, ResourceEvent::MetadataReady { duration_seconds: 90.0 });
        assert_eq!(next_non_progress(&mut rx).await, ResourceEvent::Ended);

        engine.seek(0.0);
        engine.play().await.unwrap();
        assert_eq!(output.with(|state| state.loads), 2);
        assert!(output.with(|state| state.playing));
    }

    #[tokio::test]
    async fn failed_download_is_a_load_error() {
        let output = FakeOutput::default();
        let (mut engine, mut rx) = PlaybackEngine::new(backend(StaticClient::new(404, ""), &output));

        engine.bind(EPISODE_URL, 1.0, false).unwrap();
        assert!(matches!(engine.play().await, Err(PlaybackError::Failed { .. })));
        assert!(matches!(
            next_event(&mut rx).await,
            ResourceEvent::LoadError { reason } if reason.contains("404")
        ));
    }

    #[tokio::test]
    async fn undecodable_audio_is_unsupported() {
        let output = FakeOutput::default();
        output.with(|state| state.refuse_decode = true);
        let (mut engine, mut rx) = PlaybackEngine::new(backend(StaticClient::new(200, "<html>"), &output));

        engine.bind(EPISODE_URL, 1.0, false).unwrap();
        assert!(matches!(engine.play().await, Err(PlaybackError::Unsupported { .. })));
        assert!(matches!(next_event(&mut rx).await, ResourceEvent::LoadError { .. }));
    }

    #[tokio::test]
    async fn only_http_urls_can_be_opened() {
        let output = FakeOutput::default();
        let (mut engine, _rx) = PlaybackEngine::new(backend(StaticClient::new(200, "ID3"), &output));

        for url in ["file:///tmp/ep1.mp3", "not a url"] {
            assert!(matches!(
                engine.bind(url, 1.0, false),
                Err(PlaybackError::Unsupported { .. })
            ));
        }
        assert!(!engine.is_bound());
    }

    #[tokio::test]
    async fn teardown_stops_the_output() {
        let output = FakeOutput::default();
        let (mut engine, _rx) = PlaybackEngine::new(backend(StaticClient::new(200, "ID3 audio"), &output));

        engine.bind(EPISODE_URL, 1.0, false).unwrap();
        engine.play().await.unwrap();
        engine.teardown();

        eventually(&output, |state| state.stopped).await;
    }

    #[tokio::test]
    async fn missing_output_device_fails_playback() {
        let backend = StreamingBackend::new(StaticClient::new(200, "ID3 audio"), || {
            Err::<FakeOutput, _>("no default output device".to_string())
        });
        let (mut engine, mut rx) = PlaybackEngine::new(backend);

        engine.bind(EPISODE_URL, 1.0, false).unwrap();
        assert!(engine.play().await.is_err());
        assert!(matches!(next_event(&mut rx).await, ResourceEvent::LoadError { .. }));
    }

    #[tokio::test]
    async fn session_reaches_playing_with_known_duration() {
        let output = FakeOutput::default();
        let mut session = PlaybackSession::new(
            backend(StaticClient::new(200, "ID3 audio"), &output),
            SessionOptions::default(),
        );
        let episode = Episode {
            id: "ep1".to_string(),
            title: "Pilot".to_string(),
            description: String::new(),
            duration: "1:30".to_string(),
            published_date: "Jan 1, 2024".to_string(),
            audio_url: EPISODE_URL.to_string(),
            image_url: "/podcast-cover.png".to_string(),
            featured: true,
        };

        session.select_episode(episode);
        session.toggle().await.unwrap();
        assert_eq!(session.transport_state(), TransportState::Playing);

        let event = tokio::time::timeout(Duration::from_secs(2), session.next_event())
            .await
            .unwrap()
            .unwrap();
        assert!(session.handle_event(event));
        assert_eq!(session.duration_seconds(), Some(90.0));
        assert_eq!(session.transport_state(), TransportState::Playing);
    }
}
