//! Engine service
//!
//! Runs an [`Engine`] on a single tokio task. Front-ends talk to it through a
//! cloneable [`EngineHandle`]: commands go in over an mpsc queue, events come
//! out over a broadcast channel. The position tick is only armed while the
//! transport is playing, so an idle engine does no periodic work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};

use crate::audio::buffer::AudioBuffer;
use crate::codec::AssetLoader;
use crate::constants::{COMMAND_QUEUE_CAPACITY, EVENT_CHANNEL_CAPACITY};
use crate::engine::{Engine, LoadReport};
use crate::error::{DecodeError, Error, Result};
use crate::protocol::{ControlMessage, EngineEvent, EngineSnapshot};
use crate::transport::EndOfMedia;

enum Request {
    Control(ControlMessage),
    Snapshot(oneshot::Sender<EngineSnapshot>),
    Bind {
        results: Vec<(u8, std::result::Result<AudioBuffer, DecodeError>)>,
        reply: oneshot::Sender<Vec<LoadReport>>,
    },
    Shutdown,
}

/// Handle for sending commands to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<EngineEvent>,
    sources: Arc<Vec<(u8, String)>>,
}

impl EngineHandle {
    /// Queue a command
    pub async fn send(&self, message: ControlMessage) -> Result<()> {
        self.requests
            .send(Request::Control(message))
            .await
            .map_err(|_| Error::ServiceClosed)
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Snapshot(tx))
            .await
            .map_err(|_| Error::ServiceClosed)?;
        rx.await.map_err(|_| Error::ServiceClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Decode every track on the blocking pool and bind the results
    ///
    /// Sources decode in parallel. The engine keeps serving commands while
    /// they do; its duration is computed once every track has settled.
    pub async fn load_tracks(&self, loader: Arc<dyn AssetLoader>) -> Result<Vec<LoadReport>> {
        let jobs: Vec<_> = self
            .sources
            .iter()
            .map(|(id, source)| {
                let loader = loader.clone();
                let source = source.clone();
                let id = *id;
                (id, tokio::task::spawn_blocking(move || loader.load_buffer(&source)))
            })
            .collect();

        let mut results = Vec::with_capacity(jobs.len());
        for (id, job) in jobs {
            let result = job
                .await
                .unwrap_or_else(|e| Err(DecodeError::DecodingFailed(e.to_string())));
            results.push((id, result));
        }

        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Bind { results, reply: tx })
            .await
            .map_err(|_| Error::ServiceClosed)?;
        rx.await.map_err(|_| Error::ServiceClosed)
    }

    /// Stop the service; the engine is handed back through its join handle
    pub async fn shutdown(&self) -> Result<()> {
        self.requests
            .send(Request::Shutdown)
            .await
            .map_err(|_| Error::ServiceClosed)
    }
}

pub struct EngineService {
    engine: Engine,
    requests: mpsc::Receiver<Request>,
    events: broadcast::Sender<EngineEvent>,
    tick_period: Duration,
    tick: Option<Interval>,
}

impl EngineService {
    /// Start the service task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(engine: Engine) -> (EngineHandle, JoinHandle<Engine>) {
        let (service, handle) = Self::new(engine);
        (handle, tokio::spawn(service.run()))
    }

    fn new(engine: Engine) -> (Self, EngineHandle) {
        let (request_tx, request_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let tick_period = Duration::from_millis(engine.config().tick_interval_ms.max(1));

        let handle = EngineHandle {
            requests: request_tx,
            events: event_tx.clone(),
            sources: Arc::new(engine.sources()),
        };
        let service = Self {
            engine,
            requests: request_rx,
            events: event_tx,
            tick_period,
            tick: None,
        };
        (service, handle)
    }

    async fn run(mut self) -> Engine {
        tracing::info!("Engine service started");

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown) | None => break,
                    Some(request) => self.handle(request),
                },
                _ = next_tick(&mut self.tick) => self.on_tick(),
            }
            self.sync_tick();
        }

        self.engine.pause();
        tracing::info!("Engine service stopped");
        self.engine
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Control(message) => match self.engine.apply(message) {
                Ok(events) => events.into_iter().for_each(|e| self.publish(e)),
                Err(e) => {
                    tracing::warn!("Command rejected: {}", e);
                    self.publish(EngineEvent::Rejected {
                        error: e.to_string(),
                    });
                }
            },
            Request::Snapshot(reply) => {
                let _ = reply.send(self.engine.snapshot());
            }
            Request::Bind { results, reply } => {
                let mut reports = Vec::with_capacity(results.len());
                for (id, result) in results {
                    match self.engine.bind_buffer(id, result) {
                        Ok(report) => {
                            self.publish(report.to_event());
                            reports.push(report);
                        }
                        Err(e) => tracing::warn!("Dropping load result: {}", e),
                    }
                }
                let duration = self.engine.finish_loading();
                self.publish(EngineEvent::Ready { duration });
                let _ = reply.send(reports);
            }
            Request::Shutdown => {}
        }
    }

    fn on_tick(&mut self) {
        let outcome = self.engine.tick();
        match outcome.end {
            Some(EndOfMedia::Looped { position }) => {
                self.publish(EngineEvent::Looped { position });
            }
            Some(EndOfMedia::Stopped) => {
                self.publish(EngineEvent::Ended);
                self.publish(EngineEvent::StateChanged {
                    playing: false,
                    position: outcome.position,
                });
            }
            None => {}
        }
        self.publish(EngineEvent::Position {
            position: outcome.position,
            duration: outcome.duration,
        });
    }

    /// Arm the tick on entry to playing and drop it on exit
    fn sync_tick(&mut self) {
        match (self.engine.is_playing(), self.tick.is_some()) {
            (true, false) => {
                let mut interval = time::interval(self.tick_period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.tick = Some(interval);
            }
            (false, true) => self.tick = None,
            _ => {}
        }
    }

    fn publish(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{EngineConfig, TrackDescriptor};
    use tokio::time::timeout;

    struct FixedLoader;

    impl AssetLoader for FixedLoader {
        fn load_buffer(&self, source: &str) -> std::result::Result<AudioBuffer, DecodeError> {
            match source {
                "short.wav" => Ok(AudioBuffer::silence(2.0, 2, 100)),
                "long.wav" => Ok(AudioBuffer::silence(4.0, 2, 100)),
                other => Err(DecodeError::NotFound(other.to_string())),
            }
        }
    }

    fn start(sources: &[&str]) -> (EngineHandle, JoinHandle<Engine>, ManualClock) {
        let clock = ManualClock::new();
        let descriptors = sources
            .iter()
            .map(|s| TrackDescriptor::new(*s, *s, "#ffffff"))
            .collect();
        let config = EngineConfig {
            tick_interval_ms: 5,
            ..EngineConfig::default()
        };
        let engine = Engine::new(descriptors, config, Arc::new(clock.clone())).unwrap();
        let (handle, join) = EngineService::spawn(engine);
        (handle, join, clock)
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<EngineEvent>,
        pred: impl Fn(&EngineEvent) -> bool,
    ) -> EngineEvent {
        loop {
            match timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Ok(event)) if pred(&event) => return event,
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(e)) => panic!("event channel closed: {}", e),
                Err(_) => panic!("timed out waiting for event"),
            }
        }
    }

    #[tokio::test]
    async fn test_load_reports_every_track() {
        let (handle, _join, _clock) = start(&["short.wav", "missing.wav", "long.wav"]);
        let mut events = handle.subscribe();

        let reports = handle.load_tracks(Arc::new(FixedLoader)).await.unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports[0].is_ok());
        assert!(!reports[1].is_ok());

        let ready = wait_for(&mut events, |e| matches!(e, EngineEvent::Ready { .. })).await;
        assert_eq!(ready, EngineEvent::Ready { duration: 4.0 });

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.duration, 4.0);
        assert!(snapshot.tracks[1].load_error.is_some());
    }

    #[tokio::test]
    async fn test_play_then_end_of_media_stops_ticking() {
        let (handle, _join, clock) = start(&["short.wav", "long.wav"]);
        let mut events = handle.subscribe();
        handle.load_tracks(Arc::new(FixedLoader)).await.unwrap();

        handle.send(ControlMessage::Play).await.unwrap();
        wait_for(&mut events, |e| {
            matches!(e, EngineEvent::StateChanged { playing: true, .. })
        })
        .await;
        wait_for(&mut events, |e| matches!(e, EngineEvent::Position { .. })).await;

        clock.advance(5.0);
        wait_for(&mut events, |e| matches!(e, EngineEvent::Ended)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert!(!snapshot.playing);
        assert_eq!(snapshot.position, 0.0);
    }

    #[tokio::test]
    async fn test_loop_wrap_is_published() {
        let (handle, _join, clock) = start(&["long.wav"]);
        let mut events = handle.subscribe();
        handle.load_tracks(Arc::new(FixedLoader)).await.unwrap();

        handle.send(ControlMessage::ToggleLoop).await.unwrap();
        handle.send(ControlMessage::Play).await.unwrap();
        wait_for(&mut events, |e| {
            matches!(e, EngineEvent::StateChanged { playing: true, .. })
        })
        .await;
        clock.advance(4.5);

        let looped = wait_for(&mut events, |e| matches!(e, EngineEvent::Looped { .. })).await;
        let EngineEvent::Looped { position } = looped else {
            unreachable!()
        };
        assert!((position - 0.5).abs() < 1e-6);
        assert!(handle.snapshot().await.unwrap().playing);
    }

    #[tokio::test]
    async fn test_bad_track_id_is_rejected() {
        let (handle, _join, _clock) = start(&["short.wav"]);
        let mut events = handle.subscribe();

        handle
            .send(ControlMessage::ToggleMute { track_id: 42 })
            .await
            .unwrap();
        let event = wait_for(&mut events, |e| matches!(e, EngineEvent::Rejected { .. })).await;
        assert_eq!(
            event,
            EngineEvent::Rejected {
                error: "Track not found: 42".into()
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_returns_engine() {
        let (handle, join, _clock) = start(&["short.wav"]);
        handle.load_tracks(Arc::new(FixedLoader)).await.unwrap();
        handle.send(ControlMessage::Play).await.unwrap();
        handle.shutdown().await.unwrap();

        let engine = join.await.unwrap();
        assert!(!engine.is_playing());
        assert!(handle.send(ControlMessage::Pause).await.is_err());
    }

    #[tokio::test]
    async fn test_tick_is_dropped_on_pause() {
        let clock = ManualClock::new();
        let mut engine = Engine::new(
            vec![TrackDescriptor::new("long.wav", "long.wav", "#ffffff")],
            EngineConfig::default(),
            Arc::new(clock),
        )
        .unwrap();
        engine.load_tracks(&FixedLoader);
        let (mut service, _handle) = EngineService::new(engine);

        service.handle(Request::Control(ControlMessage::Play));
        service.sync_tick();
        assert!(service.tick.is_some());

        service.handle(Request::Control(ControlMessage::Pause));
        service.sync_tick();
        assert!(service.tick.is_none());

        // Seeking while paused does not re-arm it
        service.handle(Request::Control(ControlMessage::Seek { position: 1.0 }));
        service.sync_tick();
        assert!(service.tick.is_none());
    }

    #[tokio::test]
    async fn test_no_position_updates_after_pause() {
        let (handle, _join, _clock) = start(&["long.wav"]);
        let mut events = handle.subscribe();
        handle.load_tracks(Arc::new(FixedLoader)).await.unwrap();

        handle.send(ControlMessage::Play).await.unwrap();
        wait_for(&mut events, |e| matches!(e, EngineEvent::Position { .. })).await;

        handle.send(ControlMessage::Pause).await.unwrap();
        wait_for(&mut events, |e| {
            matches!(e, EngineEvent::StateChanged { playing: false, .. })
        })
        .await;

        let quiet = timeout(Duration::from_millis(100), async {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::Position { .. }) => return true,
                    Ok(_) => continue,
                    Err(_) => return false,
                }
            }
        })
        .await;
        assert!(quiet.is_err(), "position tick kept running after pause");
    }
}
