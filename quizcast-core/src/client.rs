//! Viewer client
//!
//! The single logical thread of control: one event loop that serializes
//! push events, poll ticks and viewer commands into the reconciler, the
//! quiz machine and the two playback engines. Poll ticks are strictly
//! sequential (a tick's handling completes before the next is issued),
//! and nothing that fails here halts the loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::Config;
use crate::ledger::AnswerLedger;
use crate::models::{stream_key_url, QuizId, SessionId};
use crate::notice::{Notice, NoticeSender};
use crate::playback::{PlaybackEngine, RestartPolicy, StreamProber};
use crate::playback::strategy::{EngineFactory, MediaSurface};
use crate::quiz::{QuizAction, QuizMachine};
use crate::reconciler::{SessionAction, SessionReconciler};
use crate::transport::{ClientEvent, ServerEvent, Transport, TransportSignal};

/// Operations the embedding UI drives.
#[derive(Debug, Clone)]
pub enum ViewerCommand {
    SubmitAnswer {
        quiz_id: QuizId,
        selected_option: usize,
    },
    SendQuestion {
        question_text: String,
    },
    SeekToLive,
}

/// Cloneable handle for issuing [`ViewerCommand`]s into the client loop.
#[derive(Clone)]
pub struct ViewerHandle {
    commands: mpsc::Sender<ViewerCommand>,
}

impl ViewerHandle {
    pub async fn submit_answer(&self, quiz_id: QuizId, selected_option: usize) {
        self.send(ViewerCommand::SubmitAnswer {
            quiz_id,
            selected_option,
        })
        .await;
    }

    pub async fn send_question(&self, question_text: impl Into<String>) {
        self.send(ViewerCommand::SendQuestion {
            question_text: question_text.into(),
        })
        .await;
    }

    pub async fn seek_to_live(&self) {
        self.send(ViewerCommand::SeekToLive).await;
    }

    async fn send(&self, command: ViewerCommand) {
        if self.commands.send(command).await.is_err() {
            warn!("Viewer command dropped: client loop is gone");
        }
    }
}

/// The assembled viewer client. Build with [`ViewerClient::new`], then
/// drive with [`ViewerClient::run`].
pub struct ViewerClient {
    core: Core,
    signals: mpsc::Receiver<TransportSignal>,
    commands: mpsc::Receiver<ViewerCommand>,
}

impl ViewerClient {
    /// Wire the client together.
    ///
    /// `signals` is the incoming half of the push channel;
    /// `primary_surface` and `spectator_surface` are the two
    /// presentation surfaces (main stream and approved-spectator
    /// stream); `factory` builds demux engines for surfaces without
    /// native HLS support.
    #[must_use]
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        signals: mpsc::Receiver<TransportSignal>,
        primary_surface: Arc<dyn MediaSurface>,
        spectator_surface: Arc<dyn MediaSurface>,
        factory: Arc<dyn EngineFactory>,
        ledger: AnswerLedger,
    ) -> (Self, ViewerHandle, mpsc::Receiver<Notice>) {
        let (notices, notice_rx) = NoticeSender::channel(32);
        let (command_tx, command_rx) = mpsc::channel(16);

        let prober = StreamProber::from_config(&config.stream);
        let policy = RestartPolicy::from_config(&config.playback);
        let primary = PlaybackEngine::new(
            "primary",
            primary_surface,
            Arc::clone(&factory),
            &config.playback.engine,
            prober.clone(),
            policy,
            notices.clone(),
        );
        let spectator = PlaybackEngine::new(
            "spectator",
            spectator_surface,
            factory,
            &config.playback.engine,
            prober,
            policy,
            notices.clone(),
        );

        let api = ApiClient::new(config.api.base_url.clone());
        let core = Core {
            config,
            api,
            transport,
            reconciler: SessionReconciler::new(),
            quiz: QuizMachine::new(ledger),
            primary,
            spectator,
            notices,
        };

        (
            Self {
                core,
                signals,
                commands: command_rx,
            },
            ViewerHandle {
                commands: command_tx,
            },
            notice_rx,
        )
    }

    /// Run until `shutdown` fires. Polling continues indefinitely as the
    /// eventually-consistent backstop, whether or not the push channel
    /// is up.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            mut core,
            mut signals,
            mut commands,
        } = self;

        let mut poll = tokio::time::interval(core.config.api.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut signals_open = true;
        let mut commands_open = true;

        info!("Viewer client started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = poll.tick() => core.poll_session().await,
                signal = signals.recv(), if signals_open => match signal {
                    Some(signal) => core.handle_signal(signal).await,
                    None => {
                        // Push channel task gone for good; polling keeps
                        // session state consistent on its own
                        signals_open = false;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => core.handle_command(command).await,
                    None => commands_open = false,
                },
            }
        }

        core.primary.stop().await;
        core.spectator.stop().await;
        info!("Viewer client stopped");
    }
}

/// Everything the event handlers mutate, kept apart from the receivers
/// so the select loop can borrow both.
struct Core {
    config: Config,
    api: ApiClient,
    transport: Arc<dyn Transport>,
    reconciler: SessionReconciler,
    quiz: QuizMachine,
    primary: PlaybackEngine,
    spectator: PlaybackEngine,
    notices: NoticeSender,
}

impl Core {
    async fn poll_session(&mut self) {
        match self.api.current_session().await {
            Ok(snapshot) => {
                let actions = self.reconciler.apply_snapshot(snapshot, &self.config.stream);
                self.run_session_actions(actions).await;
            }
            // Transient: the tracked session stays as it is and the next
            // tick retries
            Err(e) => warn!("Session poll failed: {e}"),
        }
    }

    async fn handle_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Connected => {
                self.notices.send(Notice::Connected);
                // Re-check immediately; push events may have been missed
                // while the channel was down
                self.poll_session().await;
            }
            TransportSignal::Disconnected => {
                self.notices.send(Notice::Disconnected);
            }
            TransportSignal::Event(event) => self.handle_event(event).await,
        }
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        debug!(event = event.event_type(), "Dispatching push event");
        match event {
            ServerEvent::NewQuiz { quiz } => {
                if self.reconciler.current_id().is_none() {
                    debug!(quiz_id = %quiz.id, "Quiz event ignored: no current session");
                    return;
                }
                let actions = self.quiz.present(quiz);
                self.run_quiz_actions(actions).await;
            }
            ServerEvent::QuizResult {
                quiz_id,
                correct_option,
                selected_option,
            }
            | ServerEvent::NewQuizResponse {
                quiz_id,
                correct_option,
                selected_option,
            } => {
                if self.reconciler.current_id().is_none() {
                    debug!(quiz_id = %quiz_id, "Result event ignored: no current session");
                    return;
                }
                let actions = self.quiz.apply_result(&quiz_id, correct_option, selected_option);
                self.run_quiz_actions(actions).await;
            }
            ServerEvent::QuizDeleted { quiz_id } => {
                if self.reconciler.current_id().is_none() {
                    debug!(quiz_id = %quiz_id, "Delete event ignored: no current session");
                    return;
                }
                let actions = self.quiz.apply_deleted(&quiz_id);
                self.run_quiz_actions(actions).await;
            }
            ServerEvent::SessionStatusChanged { session_id, status } => {
                let actions = self.reconciler.apply_status_change(&session_id, status);
                if actions.contains(&SessionAction::PollNow) {
                    // The push event carries no stream locator; adopt
                    // through the authoritative snapshot instead
                    self.poll_session().await;
                } else {
                    self.run_session_actions(actions).await;
                }
            }
            ServerEvent::SpectatorApproved { stream_key } => {
                match stream_key_url(&self.config.stream, &stream_key) {
                    Ok(url) => {
                        info!(url = %url, "Spectator stream approved");
                        self.spectator.start(url).await;
                    }
                    Err(e) => warn!(stream_key = %stream_key, "Bad spectator stream key: {e}"),
                }
            }
            ServerEvent::SpectatorStreamStopped => {
                info!("Spectator stream stopped");
                self.spectator.stop().await;
            }
            // Render collaborators; delivery is acknowledged, display is
            // out of scope
            ServerEvent::NewQuestion { question_text, .. } => {
                info!(question = %question_text, "Question posted");
            }
            ServerEvent::NewAnswer { question_text, .. } => {
                info!(question = %question_text, "Question answered");
            }
            ServerEvent::ToggleQrCode { session_id, show } => {
                debug!(session_id = %session_id, show = show, "QR code toggled");
            }
        }
    }

    async fn handle_command(&mut self, command: ViewerCommand) {
        match command {
            ViewerCommand::SubmitAnswer {
                quiz_id,
                selected_option,
            } => {
                let session = self.reconciler.current_id().cloned();
                let actions = self
                    .quiz
                    .submit(session.as_ref(), &quiz_id, selected_option);
                self.run_quiz_actions(actions).await;
            }
            ViewerCommand::SendQuestion { question_text } => {
                // Same silent guard as answering: without a session this
                // is a stale control, not an error
                let Some(session_id) = self.reconciler.current_id().cloned() else {
                    debug!("Question ignored: no current session");
                    return;
                };
                self.emit(ClientEvent::Question {
                    session_id,
                    question_text,
                })
                .await;
            }
            ViewerCommand::SeekToLive => self.primary.seek_to_live().await,
        }
    }

    async fn run_session_actions(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Emit(event) => self.emit(event).await,
                SessionAction::StartPlayback(url) => self.primary.start(url).await,
                SessionAction::StopPlayback => self.primary.stop().await,
                SessionAction::ClearQuiz => self.quiz.clear(),
                SessionAction::FetchQuizzes(session_id) => self.fetch_quizzes(&session_id).await,
                SessionAction::PollNow => {
                    debug!("Snapshot refresh requested outside the push path; next tick covers it");
                }
                SessionAction::Notify(notice) => self.notices.send(notice),
            }
        }
    }

    async fn run_quiz_actions(&mut self, actions: Vec<QuizAction>) {
        for action in actions {
            match action {
                QuizAction::Emit(event) => self.emit(event).await,
                QuizAction::Notify(notice) => self.notices.send(notice),
            }
        }
    }

    async fn fetch_quizzes(&mut self, session_id: &SessionId) {
        match self.api.session_quizzes(session_id).await {
            Ok(mut quizzes) => {
                // The last element is the current quiz
                if let Some(quiz) = quizzes.pop() {
                    let actions = self.quiz.present(quiz);
                    self.run_quiz_actions(actions).await;
                } else {
                    self.notices.send(Notice::NoQuizAvailable);
                }
            }
            Err(e) => warn!(session_id = %session_id, "Quiz fetch failed: {e}"),
        }
    }

    async fn emit(&self, event: ClientEvent) {
        if let Err(e) = self.transport.emit(event).await {
            // Push is down; polling remains the backstop
            warn!("Emit failed: {e}");
        }
    }
}
