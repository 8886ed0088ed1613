//! The conversational turn-taking loop.
//!
//! A single logical control loop drives the session state machine:
//! Idle -> Awake -> Listening -> Dispatching -> Responding -> Idle.
//! The controller owns the state; everything else sees it read-only.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout_at;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dispatch::ResponseDispatcher;
use crate::personality::Personality;
use crate::presentation::{ErrorKind, PresentationEvent, PresentationSink};
use crate::recognizer::Utterance;
use crate::wake::{is_sleep_command, WakeWordDetector};

/// Current mode of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    Idle,
    Awake,
    Listening,
    Dispatching,
    Responding,
}

/// How one wake-to-idle cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A reply was dispatched and spoken.
    Completed(String),
    /// The dispatcher failed; no retry, back to idle.
    DispatchFailed(ErrorKind),
    /// Listening lapsed without a usable utterance.
    Timeout,
    /// The user ended the session with the sleep command.
    Sleep,
    /// The utterance producer went away.
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Inactivity window while listening before returning to idle.
    pub listen_timeout: Duration,
    /// Wake matches this soon after a completed cycle are ignored.
    pub wake_cooldown: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_timeout: Duration::from_secs(8),
            wake_cooldown: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for ControllerConfig {
    fn from(config: &Config) -> Self {
        Self {
            listen_timeout: config.listen_timeout(),
            wake_cooldown: config.wake_cooldown(),
        }
    }
}

pub struct ConversationController {
    state: SessionState,
    detector: WakeWordDetector,
    dispatcher: Arc<dyn ResponseDispatcher>,
    sink: Arc<dyn PresentationSink>,
    personality: &'static Personality,
    config: ControllerConfig,
    last_cycle_end: Option<Instant>,
}

impl ConversationController {
    pub fn new(
        detector: WakeWordDetector,
        dispatcher: Arc<dyn ResponseDispatcher>,
        sink: Arc<dyn PresentationSink>,
        personality: &'static Personality,
        config: ControllerConfig,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            detector,
            dispatcher,
            sink,
            personality,
            config,
            last_cycle_end: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive cycles until cancelled or the utterance producer closes.
    pub async fn run(
        &mut self,
        mut utterances: mpsc::Receiver<Utterance>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                outcome = self.run_cycle(&mut utterances) => {
                    log::info!("Session cycle ended: {:?}", outcome);
                    if outcome == CycleOutcome::ChannelClosed {
                        break;
                    }
                }
                _ = cancel.cancelled() => {
                    log::info!("Controller cancelled");
                    self.set_state(SessionState::Idle);
                    break;
                }
            }
        }
    }

    /// One full wake-to-idle cycle. Always leaves the state at Idle.
    pub async fn run_cycle(&mut self, utterances: &mut mpsc::Receiver<Utterance>) -> CycleOutcome {
        debug_assert_eq!(self.state, SessionState::Idle);

        if !self.await_wake(utterances).await {
            return CycleOutcome::ChannelClosed;
        }

        self.set_state(SessionState::Awake);
        self.sink.emit(PresentationEvent::Wake).await;

        // Awake exists only to surface the wake event
        self.set_state(SessionState::Listening);
        self.sink.emit(PresentationEvent::Listening).await;

        let text = match self.await_query(utterances).await {
            ListenResult::Query(text) => text,
            ListenResult::Timeout => {
                log::info!("Listening timed out, no dispatch");
                return self.finish_cycle(PresentationEvent::Idle, CycleOutcome::Timeout).await;
            }
            ListenResult::Sleep => {
                log::info!("Sleep command, ending session");
                return self.finish_cycle(PresentationEvent::Idle, CycleOutcome::Sleep).await;
            }
            ListenResult::ChannelClosed => {
                self.set_state(SessionState::Idle);
                return CycleOutcome::ChannelClosed;
            }
        };

        self.set_state(SessionState::Dispatching);
        log::info!("Dispatching query: '{}'", text);

        match self.dispatcher.dispatch(&text, self.personality).await {
            Ok(reply) => {
                self.set_state(SessionState::Responding);
                self.sink.emit(PresentationEvent::Speaking(reply.clone())).await;
                self.finish_cycle(PresentationEvent::Idle, CycleOutcome::Completed(reply))
                    .await
            }
            Err(e) => {
                log::error!("Dispatch failed: {}", e);
                let kind = ErrorKind::from(&e);
                // Straight back to idle, never retry; the error face
                // stays up until the next wake.
                self.finish_cycle(PresentationEvent::Error(kind), CycleOutcome::DispatchFailed(kind))
                    .await
            }
        }
    }

    /// Block in Idle until a wake match. Returns false when the channel
    /// closed.
    async fn await_wake(&mut self, utterances: &mut mpsc::Receiver<Utterance>) -> bool {
        loop {
            let Some(utterance) = utterances.recv().await else {
                return false;
            };

            if !self.detector.matches(&utterance) {
                continue;
            }

            if let Some(end) = self.last_cycle_end {
                if end.elapsed() < self.config.wake_cooldown {
                    log::debug!("Wake match within cooldown, ignored");
                    continue;
                }
            }

            log::info!("Wake word matched: '{}'", utterance.text);
            return true;
        }
    }

    /// Collect utterances until a final, non-empty one arrives or the
    /// inactivity window lapses. Non-empty partials count as activity
    /// and push the deadline out.
    async fn await_query(&mut self, utterances: &mut mpsc::Receiver<Utterance>) -> ListenResult {
        let mut deadline = tokio::time::Instant::now() + self.config.listen_timeout;

        loop {
            let utterance = match timeout_at(deadline, utterances.recv()).await {
                Ok(Some(utterance)) => utterance,
                Ok(None) => return ListenResult::ChannelClosed,
                Err(_) => return ListenResult::Timeout,
            };

            if !utterance.is_final {
                if !utterance.is_empty() {
                    deadline = tokio::time::Instant::now() + self.config.listen_timeout;
                }
                continue;
            }

            if utterance.is_empty() {
                continue;
            }

            if is_sleep_command(&utterance.text) {
                return ListenResult::Sleep;
            }

            return ListenResult::Query(utterance.text);
        }
    }

    async fn finish_cycle(
        &mut self,
        final_event: PresentationEvent,
        outcome: CycleOutcome,
    ) -> CycleOutcome {
        self.sink.emit(final_event).await;
        self.set_state(SessionState::Idle);
        self.last_cycle_end = Some(Instant::now());
        outcome
    }

    fn set_state(&mut self, next: SessionState) {
        if next != self.state {
            log::debug!("Session state: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

enum ListenResult {
    Query(String),
    Timeout,
    Sleep,
    ChannelClosed,
}
