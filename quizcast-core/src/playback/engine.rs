//! Playback engine state machine
//!
//! One engine per presentation surface. Owns the probe → attach → play
//! pipeline and the recovery policy for fatal playback errors: a fatal
//! error tears the strategy down completely and runs the pipeline again
//! for the same URL. Live-stream transients (segment gaps, manifest
//! hiccups) are common and self-healing, so the production policy
//! restarts without bound and leaves stopping a dead session to the
//! operator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::prober::{ProbeOutcome, StreamProber};
use super::strategy::{
    select_strategy, EngineFactory, MediaSurface, PlaybackStrategy, StrategyEvent,
};
use crate::config::{EngineConfig, PlaybackConfig};
use crate::notice::{Notice, NoticeSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No stream attached
    Idle,
    /// Availability check in flight
    Probing,
    /// Strategy loading/attaching the probed URL
    Attaching,
    Playing,
    /// Fatal error: tearing down and re-attempting
    Recovering,
    /// Explicitly released
    Stopped,
}

/// Restart policy after a fatal playback error.
///
/// `Unbounded` is the production policy; `Bounded` exists so tests can
/// inject a deterministic variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Unbounded,
    Bounded { max_restarts: u32, delay: Duration },
}

impl RestartPolicy {
    #[must_use]
    pub fn from_config(config: &PlaybackConfig) -> Self {
        if config.restart_policy == "bounded" {
            Self::Bounded {
                max_restarts: config.max_restarts,
                delay: Duration::from_millis(config.restart_delay_ms),
            }
        } else {
            Self::Unbounded
        }
    }
}

/// Per-surface playback engine.
///
/// The strategy (native vs library-mediated) is selected once at
/// construction from the surface's capability and never changes.
pub struct PlaybackEngine {
    stream_label: &'static str,
    prober: StreamProber,
    policy: RestartPolicy,
    strategy: Arc<tokio::sync::Mutex<Box<dyn PlaybackStrategy>>>,
    state: Arc<Mutex<PlaybackState>>,
    generation: Arc<AtomicU64>,
    cancel: Mutex<CancellationToken>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    notices: NoticeSender,
}

impl PlaybackEngine {
    #[must_use]
    pub fn new(
        stream_label: &'static str,
        surface: Arc<dyn MediaSurface>,
        factory: Arc<dyn EngineFactory>,
        engine_config: &EngineConfig,
        prober: StreamProber,
        policy: RestartPolicy,
        notices: NoticeSender,
    ) -> Self {
        let strategy = select_strategy(surface, factory, engine_config);
        Self {
            stream_label,
            prober,
            policy,
            strategy: Arc::new(tokio::sync::Mutex::new(strategy)),
            state: Arc::new(Mutex::new(PlaybackState::Idle)),
            generation: Arc::new(AtomicU64::new(0)),
            cancel: Mutex::new(CancellationToken::new()),
            task: tokio::sync::Mutex::new(None),
            notices,
        }
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// Acquire the stream at `url`: probe, attach, play, and keep
    /// recovering per the restart policy. Supersedes any stream this
    /// engine was already running; the prior strategy instance is fully
    /// released before the new pipeline begins.
    pub async fn start(&self, url: Url) {
        self.halt(PlaybackState::Idle).await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let run = StreamRun {
            stream_label: self.stream_label,
            url,
            generation,
            engine_generation: Arc::clone(&self.generation),
            prober: self.prober.clone(),
            policy: self.policy,
            strategy: Arc::clone(&self.strategy),
            state: Arc::clone(&self.state),
            token,
            notices: self.notices.clone(),
        };
        *self.task.lock().await = Some(tokio::spawn(run.run()));
    }

    /// Release everything. Valid in any state; always ends `Stopped`.
    pub async fn stop(&self) {
        self.halt(PlaybackState::Stopped).await;
        info!(stream = self.stream_label, "Playback stopped");
    }

    /// Resume at the live edge (library-mediated path; no-op on native)
    pub async fn seek_to_live(&self) {
        self.strategy.lock().await.seek_to_live().await;
    }

    /// Cancel the pipeline task, wait it out, tear the strategy down,
    /// and settle in `final_state`.
    async fn halt(&self, final_state: PlaybackState) {
        self.cancel.lock().cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(stream = self.stream_label, "Playback task ended abnormally: {e}");
                }
            }
        }
        self.strategy.lock().await.stop().await;
        *self.state.lock() = final_state;
    }
}

/// One generation of the probe → attach → play → recover pipeline.
struct StreamRun {
    stream_label: &'static str,
    url: Url,
    generation: u64,
    engine_generation: Arc<AtomicU64>,
    prober: StreamProber,
    policy: RestartPolicy,
    strategy: Arc<tokio::sync::Mutex<Box<dyn PlaybackStrategy>>>,
    state: Arc<Mutex<PlaybackState>>,
    token: CancellationToken,
    notices: NoticeSender,
}

impl StreamRun {
    fn set_state(&self, next: PlaybackState) {
        let mut state = self.state.lock();
        debug!(stream = self.stream_label, from = ?*state, to = ?next, "Playback transition");
        *state = next;
    }

    /// The async completions in here were issued for `self.generation`;
    /// acting on them requires that generation to still be current.
    fn superseded(&self) -> bool {
        self.token.is_cancelled()
            || self.engine_generation.load(Ordering::SeqCst) != self.generation
    }

    async fn run(self) {
        let mut restarts: u32 = 0;

        loop {
            self.set_state(PlaybackState::Probing);
            match self.prober.probe(&self.url, &self.token).await {
                ProbeOutcome::Cancelled => return,
                ProbeOutcome::Exhausted => {
                    self.set_state(PlaybackState::Idle);
                    self.notices.send(Notice::StreamUnavailable {
                        stream: self.stream_label,
                    });
                    return;
                }
                ProbeOutcome::Available => {}
            }
            if self.superseded() {
                return;
            }

            self.set_state(PlaybackState::Attaching);
            let (event_tx, mut event_rx) = mpsc::channel::<StrategyEvent>(16);
            let attach = {
                let mut strategy = self.strategy.lock().await;
                tokio::select! {
                    () = self.token.cancelled() => return,
                    attach = strategy.start(&self.url, event_tx) => attach,
                }
            };

            match attach {
                Ok(()) => {
                    self.set_state(PlaybackState::Playing);
                    info!(stream = self.stream_label, url = %self.url, "Playback started");

                    // Park here until the strategy reports a fatal error
                    // or this generation is cancelled
                    loop {
                        tokio::select! {
                            () = self.token.cancelled() => return,
                            event = event_rx.recv() => match event {
                                Some(StrategyEvent::NonFatal { detail }) => {
                                    debug!(stream = self.stream_label, "Non-fatal playback error: {detail}");
                                }
                                Some(StrategyEvent::Fatal { detail }) => {
                                    warn!(stream = self.stream_label, "Fatal playback error: {detail}");
                                    break;
                                }
                                // Event channel gone without a fatal report:
                                // the strategy side died, recover anyway
                                None => {
                                    warn!(stream = self.stream_label, "Playback event channel closed");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => {
                    warn!(stream = self.stream_label, url = %self.url, "Attach failed: {e}");
                }
            }

            // Recovery: full teardown, then the pipeline re-runs from
            // the probe with an identically configured fresh instance
            self.set_state(PlaybackState::Recovering);
            self.strategy.lock().await.stop().await;
            if self.superseded() {
                return;
            }

            restarts += 1;
            match self.policy {
                RestartPolicy::Unbounded => {}
                RestartPolicy::Bounded {
                    max_restarts,
                    delay,
                } => {
                    if restarts > max_restarts {
                        warn!(
                            stream = self.stream_label,
                            restarts = restarts - 1,
                            "Restart budget exhausted"
                        );
                        self.set_state(PlaybackState::Idle);
                        self.notices.send(Notice::StreamUnavailable {
                            stream: self.stream_label,
                        });
                        return;
                    }
                    tokio::select! {
                        () = self.token.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
            self.notices.send(Notice::RecoveringPlayback {
                stream: self.stream_label,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::strategy::{HlsEngine, MockHlsEngine, MockMediaSurface};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Shared call log so tests can assert release-before-attach ordering
    type CallLog = Arc<Mutex<Vec<String>>>;

    /// Keeps per-instance event senders alive, the way a real engine's
    /// feed task would; a dropped sender reads as a dead strategy
    type SenderHold = Arc<Mutex<Vec<mpsc::Sender<StrategyEvent>>>>;

    fn logging_engine(
        log: &CallLog,
        hold: &SenderHold,
        tag: &'static str,
        fatal_after_ms: Option<u64>,
    ) -> MockHlsEngine {
        let mut engine = MockHlsEngine::new();
        let l = Arc::clone(log);
        engine.expect_attach().returning(move |_| {
            l.lock().push(format!("{tag}:attach"));
        });
        let l = Arc::clone(log);
        let h = Arc::clone(hold);
        engine.expect_load().returning(move |_, events| {
            l.lock().push(format!("{tag}:load"));
            if let Some(ms) = fatal_after_ms {
                let events = events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let _ = events
                        .send(StrategyEvent::Fatal {
                            detail: "segment gap".to_string(),
                        })
                        .await;
                });
            }
            h.lock().push(events);
            Ok(())
        });
        let l = Arc::clone(log);
        engine.expect_stop_load().returning(move || {
            l.lock().push(format!("{tag}:stop_load"));
        });
        let l = Arc::clone(log);
        engine.expect_detach().returning(move || {
            l.lock().push(format!("{tag}:detach"));
        });
        let l = Arc::clone(log);
        engine.expect_destroy().returning(move || {
            l.lock().push(format!("{tag}:destroy"));
        });
        engine
    }

    struct QueueFactory {
        engines: Mutex<Vec<MockHlsEngine>>,
        created: AtomicU64,
    }

    impl QueueFactory {
        fn new(engines: Vec<MockHlsEngine>) -> Arc<Self> {
            Arc::new(Self {
                engines: Mutex::new(engines),
                created: AtomicU64::new(0),
            })
        }
    }

    impl EngineFactory for QueueFactory {
        fn create(&self, _config: &EngineConfig) -> Box<dyn HlsEngine> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(self.engines.lock().remove(0))
        }
    }

    fn library_surface() -> Arc<dyn MediaSurface> {
        let mut surface = MockMediaSurface::new();
        surface.expect_supports_native_hls().return_const(false);
        surface.expect_play().returning(|| Ok(()));
        surface.expect_pause().returning(|| ());
        surface.expect_clear().returning(|| ());
        Arc::new(surface)
    }

    async fn probe_server(status: u16) -> (MockServer, Url) {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/live/k1.m3u8", server.uri())).expect("url");
        (server, url)
    }

    fn quick_prober() -> StreamProber {
        StreamProber::new(2, Duration::from_millis(10))
    }

    async fn wait_for_state(engine: &PlaybackEngine, wanted: PlaybackState) {
        for _ in 0..100 {
            if engine.state() == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("engine never reached {wanted:?}, stuck at {:?}", engine.state());
    }

    #[tokio::test]
    async fn test_fatal_error_recovers_with_fresh_instance() {
        let (_server, url) = probe_server(200).await;
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let hold: SenderHold = Arc::new(Mutex::new(Vec::new()));
        let factory = QueueFactory::new(vec![
            logging_engine(&log, &hold, "first", Some(30)),
            logging_engine(&log, &hold, "second", None),
        ]);

        let (notices, _notice_rx) = NoticeSender::channel(16);
        let engine = PlaybackEngine::new(
            "primary",
            library_surface(),
            Arc::clone(&factory) as Arc<dyn EngineFactory>,
            &EngineConfig::default(),
            quick_prober(),
            RestartPolicy::Unbounded,
            notices,
        );

        engine.start(url).await;
        wait_for_state(&engine, PlaybackState::Playing).await;

        // First instance reports fatal; the engine must tear it down and
        // come back to Playing on a brand-new instance
        for _ in 0..200 {
            if factory.created.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        wait_for_state(&engine, PlaybackState::Playing).await;
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);

        // The first instance is fully destroyed before the second attaches
        let calls = log.lock().clone();
        let destroy_pos = calls.iter().position(|c| c == "first:destroy").expect("destroyed");
        let attach_pos = calls.iter().position(|c| c == "second:attach").expect("attached");
        assert!(
            destroy_pos < attach_pos,
            "prior instance must be released before the next attach: {calls:?}"
        );

        engine.stop().await;
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[tokio::test]
    async fn test_probe_exhausted_settles_idle_with_notice() {
        let (_server, url) = probe_server(404).await;
        let factory = QueueFactory::new(vec![]);
        let (notices, mut notice_rx) = NoticeSender::channel(16);
        let engine = PlaybackEngine::new(
            "primary",
            library_surface(),
            factory as Arc<dyn EngineFactory>,
            &EngineConfig::default(),
            quick_prober(),
            RestartPolicy::Unbounded,
            notices,
        );

        engine.start(url).await;
        wait_for_state(&engine, PlaybackState::Idle).await;
        assert_eq!(
            notice_rx.recv().await,
            Some(Notice::StreamUnavailable { stream: "primary" })
        );
    }

    #[tokio::test]
    async fn test_bounded_policy_gives_up() {
        let (_server, url) = probe_server(200).await;
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let hold: SenderHold = Arc::new(Mutex::new(Vec::new()));
        let factory = QueueFactory::new(vec![
            logging_engine(&log, &hold, "a", Some(10)),
            logging_engine(&log, &hold, "b", Some(10)),
        ]);

        let (notices, mut notice_rx) = NoticeSender::channel(16);
        let engine = PlaybackEngine::new(
            "primary",
            library_surface(),
            Arc::clone(&factory) as Arc<dyn EngineFactory>,
            &EngineConfig::default(),
            quick_prober(),
            RestartPolicy::Bounded {
                max_restarts: 1,
                delay: Duration::from_millis(5),
            },
            notices,
        );

        engine.start(url).await;
        wait_for_state(&engine, PlaybackState::Idle).await;
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);

        let mut got_unavailable = false;
        while let Ok(notice) = notice_rx.try_recv() {
            if notice == (Notice::StreamUnavailable { stream: "primary" }) {
                got_unavailable = true;
            }
        }
        assert!(got_unavailable);
    }

    #[tokio::test]
    async fn test_stop_is_valid_from_any_state() {
        let factory = QueueFactory::new(vec![]);
        let (notices, _rx) = NoticeSender::channel(16);
        let engine = PlaybackEngine::new(
            "primary",
            library_surface(),
            factory as Arc<dyn EngineFactory>,
            &EngineConfig::default(),
            quick_prober(),
            RestartPolicy::Unbounded,
            notices,
        );

        // Stop without ever starting
        engine.stop().await;
        assert_eq!(engine.state(), PlaybackState::Stopped);
        engine.stop().await;
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[tokio::test]
    async fn test_superseding_start_releases_prior_stream() {
        let (_server, url) = probe_server(200).await;
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let hold: SenderHold = Arc::new(Mutex::new(Vec::new()));
        let factory = QueueFactory::new(vec![
            logging_engine(&log, &hold, "old", None),
            logging_engine(&log, &hold, "new", None),
        ]);

        let (notices, _rx) = NoticeSender::channel(16);
        let engine = PlaybackEngine::new(
            "primary",
            library_surface(),
            Arc::clone(&factory) as Arc<dyn EngineFactory>,
            &EngineConfig::default(),
            quick_prober(),
            RestartPolicy::Unbounded,
            notices,
        );

        engine.start(url.clone()).await;
        wait_for_state(&engine, PlaybackState::Playing).await;
        engine.start(url).await;
        wait_for_state(&engine, PlaybackState::Playing).await;

        let calls = log.lock().clone();
        let destroy_pos = calls.iter().position(|c| c == "old:destroy").expect("destroyed");
        let attach_pos = calls.iter().position(|c| c == "new:attach").expect("attached");
        assert!(destroy_pos < attach_pos, "{calls:?}");
    }
}
