//! Turn-taking scenarios driven end to end with scripted utterances,
//! a mock dispatcher, and a recording presentation sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use voice_companion_rs::controller::{
    ControllerConfig, ConversationController, CycleOutcome, SessionState,
};
use voice_companion_rs::dispatch::{DispatchError, ResponseDispatcher};
use voice_companion_rs::personality::Personality;
use voice_companion_rs::presentation::{ErrorKind, PresentationEvent, PresentationSink};
use voice_companion_rs::recognizer::Utterance;
use voice_companion_rs::wake::WakeWordDetector;

/// Dispatcher that replays scripted results and tracks concurrency.
struct MockDispatcher {
    script: Mutex<Vec<Result<String, DispatchErrorKind>>>,
    requests: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
}

#[derive(Clone, Copy)]
enum DispatchErrorKind {
    Auth,
    Network,
    Backend,
}

impl MockDispatcher {
    fn new(script: Vec<Result<String, DispatchErrorKind>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn with_delay(script: Vec<Result<String, DispatchErrorKind>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            delay,
        })
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ResponseDispatcher for MockDispatcher {
    async fn dispatch(
        &self,
        utterance_text: &str,
        _personality: &Personality,
    ) -> Result<String, DispatchError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.requests.lock().unwrap().push(utterance_text.to_string());
        let result = self.script.lock().unwrap().remove(0);

        self.active.fetch_sub(1, Ordering::SeqCst);
        match result {
            Ok(reply) => Ok(reply),
            Err(DispatchErrorKind::Auth) => Err(DispatchError::Auth("bad key".to_string())),
            Err(DispatchErrorKind::Network) => {
                Err(DispatchError::Network("unreachable".to_string()))
            }
            Err(DispatchErrorKind::Backend) => {
                Err(DispatchError::Backend("empty reply".to_string()))
            }
        }
    }
}

/// Sink that records every event it sees.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<PresentationEvent>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn events(&self) -> Vec<PresentationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PresentationSink for RecordingSink {
    async fn emit(&self, event: PresentationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn controller(
    wake_word: &str,
    dispatcher: Arc<MockDispatcher>,
    sink: Arc<RecordingSink>,
    listen_timeout: Duration,
) -> ConversationController {
    ConversationController::new(
        WakeWordDetector::new(wake_word),
        dispatcher,
        sink,
        Personality::by_id("casual").unwrap(),
        ControllerConfig {
            listen_timeout,
            wake_cooldown: Duration::ZERO,
        },
    )
}

#[tokio::test]
async fn mango_scenario_full_cycle() {
    let dispatcher = MockDispatcher::new(vec![Ok("It is three o'clock".to_string())]);
    let sink = RecordingSink::new();
    let mut controller = controller(
        "Mango",
        dispatcher.clone(),
        sink.clone(),
        Duration::from_secs(8),
    );

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(Utterance::final_text("hey mango what time is it"))
        .await
        .unwrap();
    tx.send(Utterance::final_text("what time is it"))
        .await
        .unwrap();

    let outcome = controller.run_cycle(&mut rx).await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed("It is three o'clock".to_string())
    );
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(dispatcher.requests(), vec!["what time is it".to_string()]);
    assert_eq!(
        sink.events(),
        vec![
            PresentationEvent::Wake,
            PresentationEvent::Listening,
            PresentationEvent::Speaking("It is three o'clock".to_string()),
            PresentationEvent::Idle,
        ]
    );
}

#[tokio::test]
async fn auth_error_surfaces_and_returns_to_idle_without_retry() {
    let dispatcher = MockDispatcher::new(vec![Err(DispatchErrorKind::Auth)]);
    let sink = RecordingSink::new();
    let mut controller = controller(
        "mango",
        dispatcher.clone(),
        sink.clone(),
        Duration::from_secs(8),
    );

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(Utterance::final_text("mango")).await.unwrap();
    tx.send(Utterance::final_text("open the pod bay doors"))
        .await
        .unwrap();

    let outcome = controller.run_cycle(&mut rx).await;

    assert_eq!(outcome, CycleOutcome::DispatchFailed(ErrorKind::Auth));
    assert_eq!(controller.state(), SessionState::Idle);
    // Exactly one call: no automatic retry
    assert_eq!(dispatcher.requests().len(), 1);
    assert_eq!(
        sink.events().last(),
        Some(&PresentationEvent::Error(ErrorKind::Auth))
    );
}

#[tokio::test]
async fn network_and_backend_errors_map_to_their_kinds() {
    for (kind, expected) in [
        (DispatchErrorKind::Network, ErrorKind::Network),
        (DispatchErrorKind::Backend, ErrorKind::Backend),
    ] {
        let dispatcher = MockDispatcher::new(vec![Err(kind)]);
        let sink = RecordingSink::new();
        let mut controller = controller(
            "mango",
            dispatcher,
            sink.clone(),
            Duration::from_secs(8),
        );

        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Utterance::final_text("mango")).await.unwrap();
        tx.send(Utterance::final_text("hello")).await.unwrap();

        let outcome = controller.run_cycle(&mut rx).await;
        assert_eq!(outcome, CycleOutcome::DispatchFailed(expected));
        assert_eq!(
            sink.events().last(),
            Some(&PresentationEvent::Error(expected))
        );
    }
}

#[tokio::test(start_paused = true)]
async fn listening_timeout_returns_to_idle_without_dispatch() {
    let dispatcher = MockDispatcher::new(vec![]);
    let sink = RecordingSink::new();
    let mut controller = controller(
        "mango",
        dispatcher.clone(),
        sink.clone(),
        Duration::from_secs(8),
    );

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(Utterance::final_text("hey mango")).await.unwrap();
    // Keep the sender alive so the channel does not close
    let _tx = tx;

    let outcome = controller.run_cycle(&mut rx).await;

    assert_eq!(outcome, CycleOutcome::Timeout);
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(dispatcher.requests().is_empty());
    assert_eq!(
        sink.events(),
        vec![
            PresentationEvent::Wake,
            PresentationEvent::Listening,
            PresentationEvent::Idle,
        ]
    );
}

#[tokio::test]
async fn sleep_command_ends_session_without_dispatch() {
    let dispatcher = MockDispatcher::new(vec![]);
    let sink = RecordingSink::new();
    let mut controller = controller(
        "mango",
        dispatcher.clone(),
        sink.clone(),
        Duration::from_secs(8),
    );

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(Utterance::final_text("mango")).await.unwrap();
    tx.send(Utterance::final_text("Sleep")).await.unwrap();

    let outcome = controller.run_cycle(&mut rx).await;

    assert_eq!(outcome, CycleOutcome::Sleep);
    assert!(dispatcher.requests().is_empty());
    assert_eq!(sink.events().last(), Some(&PresentationEvent::Idle));
}

#[tokio::test]
async fn sleep_inside_longer_phrase_still_dispatches() {
    let dispatcher = MockDispatcher::new(vec![Ok("try chamomile tea".to_string())]);
    let sink = RecordingSink::new();
    let mut controller = controller(
        "mango",
        dispatcher.clone(),
        sink,
        Duration::from_secs(8),
    );

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(Utterance::final_text("mango")).await.unwrap();
    tx.send(Utterance::final_text("how do I sleep better"))
        .await
        .unwrap();

    let outcome = controller.run_cycle(&mut rx).await;
    assert_eq!(
        outcome,
        CycleOutcome::Completed("try chamomile tea".to_string())
    );
    assert_eq!(
        dispatcher.requests(),
        vec!["how do I sleep better".to_string()]
    );
}

#[tokio::test]
async fn non_matching_utterances_never_wake() {
    let dispatcher = MockDispatcher::new(vec![]);
    let sink = RecordingSink::new();
    let mut controller = controller(
        "mango",
        dispatcher.clone(),
        sink.clone(),
        Duration::from_secs(8),
    );

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(Utterance::final_text("hello there")).await.unwrap();
    tx.send(Utterance::final_text("man go away")).await.unwrap();
    tx.send(Utterance::new("mango", false, 1.0)).await.unwrap(); // partial
    drop(tx);

    let outcome = controller.run_cycle(&mut rx).await;

    assert_eq!(outcome, CycleOutcome::ChannelClosed);
    assert!(sink.events().is_empty());
    assert!(dispatcher.requests().is_empty());
}

#[tokio::test]
async fn dispatches_never_overlap_across_cycles() {
    let dispatcher = MockDispatcher::with_delay(
        vec![Ok("first".to_string()), Ok("second".to_string())],
        Duration::from_millis(20),
    );
    let sink = RecordingSink::new();
    let mut controller = controller(
        "mango",
        dispatcher.clone(),
        sink,
        Duration::from_secs(8),
    );

    let (tx, mut rx) = mpsc::channel(8);
    for text in ["mango", "first question", "mango", "second question"] {
        tx.send(Utterance::final_text(text)).await.unwrap();
    }

    let first = controller.run_cycle(&mut rx).await;
    let second = controller.run_cycle(&mut rx).await;

    assert_eq!(first, CycleOutcome::Completed("first".to_string()));
    assert_eq!(second, CycleOutcome::Completed("second".to_string()));
    assert_eq!(dispatcher.max_concurrent(), 1);
    assert_eq!(
        dispatcher.requests(),
        vec!["first question".to_string(), "second question".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn partial_activity_extends_the_listening_window() {
    let dispatcher = MockDispatcher::new(vec![Ok("done".to_string())]);
    let sink = RecordingSink::new();
    let mut controller = controller(
        "mango",
        dispatcher.clone(),
        sink,
        Duration::from_millis(150),
    );

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(Utterance::final_text("mango")).await.unwrap();

    let feeder = tokio::spawn(async move {
        // Partial just before the first deadline keeps the session open
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(Utterance::new("what ti", false, 1.0)).await.unwrap();
        // Final lands after the original deadline but within the pushed one
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(Utterance::final_text("what time is it"))
            .await
            .unwrap();
    });

    let outcome = controller.run_cycle(&mut rx).await;
    feeder.await.unwrap();

    assert_eq!(outcome, CycleOutcome::Completed("done".to_string()));
    assert_eq!(dispatcher.requests(), vec!["what time is it".to_string()]);
}

#[tokio::test]
async fn empty_final_utterances_are_skipped_while_listening() {
    let dispatcher = MockDispatcher::new(vec![Ok("sure".to_string())]);
    let sink = RecordingSink::new();
    let mut controller = controller(
        "mango",
        dispatcher.clone(),
        sink,
        Duration::from_secs(8),
    );

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(Utterance::final_text("mango")).await.unwrap();
    tx.send(Utterance::final_text("   ")).await.unwrap();
    tx.send(Utterance::final_text("turn on the light"))
        .await
        .unwrap();

    let outcome = controller.run_cycle(&mut rx).await;
    assert_eq!(outcome, CycleOutcome::Completed("sure".to_string()));
    assert_eq!(dispatcher.requests(), vec!["turn on the light".to_string()]);
}

#[tokio::test]
async fn wake_cooldown_suppresses_immediate_retrigger() {
    let dispatcher = MockDispatcher::new(vec![Ok("ok".to_string())]);
    let sink = RecordingSink::new();
    let mut controller = ConversationController::new(
        WakeWordDetector::new("mango"),
        dispatcher.clone(),
        sink,
        Personality::by_id("casual").unwrap(),
        ControllerConfig {
            listen_timeout: Duration::from_secs(8),
            wake_cooldown: Duration::from_secs(60),
        },
    );

    let (tx, mut rx) = mpsc::channel(8);
    tx.send(Utterance::final_text("mango")).await.unwrap();
    tx.send(Utterance::final_text("first question")).await.unwrap();
    // Arrives right after the cycle ends, inside the cooldown
    tx.send(Utterance::final_text("mango again")).await.unwrap();
    drop(tx);

    let first = controller.run_cycle(&mut rx).await;
    assert_eq!(first, CycleOutcome::Completed("ok".to_string()));

    let second = controller.run_cycle(&mut rx).await;
    assert_eq!(second, CycleOutcome::ChannelClosed);
    assert_eq!(dispatcher.requests().len(), 1);
}
