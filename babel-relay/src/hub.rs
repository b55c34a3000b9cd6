//! The broadcast hub: single owner of membership and fan-out.
//!
//! One task owns every participant's mailbox and language. Sessions talk to
//! it only through [`HubHandle`], which feeds four dedicated channels. The
//! loop drains them with a `biased` select (join, leave, broadcast, snapshot)
//! so a session's join is always applied before anything it sends afterwards.
//!
//! Translation never happens on the hub task. Recipients who share the
//! sender's language get the line straight from the hub. Every other active
//! language gets a lane: a task with a bounded queue that translates jobs in
//! order and pushes the rendered line into the recipients' mailboxes. A slow
//! provider call only delays its own target language.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use crate::{
    mailbox::Mailbox,
    message::{InboundMessage, render_line},
    translate::{TranslateError, Translator},
};

pub type ConnectionId = u64;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each of the hub's intake channels.
    pub intake_capacity: usize,
    /// Broadcasts a language lane may hold before new ones are dropped.
    pub lane_capacity: usize,
    pub translate_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            intake_capacity: 256,
            lane_capacity: 256,
            translate_timeout: Duration::from_secs(10),
        }
    }
}

/// A logged-in user as the hub sees it: a value snapshot taken at join time.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ConnectionId,
    pub name: String,
    pub language: String,
    pub mailbox: Mailbox,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSnapshot {
    pub participants: usize,
    /// Active languages, sorted.
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("broadcast hub has shut down")]
pub struct HubClosed;

#[derive(Clone)]
pub struct HubHandle {
    joins: mpsc::Sender<Participant>,
    leaves: mpsc::Sender<ConnectionId>,
    broadcasts: mpsc::Sender<InboundMessage>,
    snapshots: mpsc::Sender<oneshot::Sender<HubSnapshot>>,
}

impl HubHandle {
    pub async fn join(&self, participant: Participant) -> Result<(), HubClosed> {
        self.joins.send(participant).await.map_err(|_| HubClosed)
    }

    pub async fn leave(&self, id: ConnectionId) -> Result<(), HubClosed> {
        self.leaves.send(id).await.map_err(|_| HubClosed)
    }

    pub async fn broadcast(&self, message: InboundMessage) -> Result<(), HubClosed> {
        self.broadcasts.send(message).await.map_err(|_| HubClosed)
    }

    /// Reports membership as of the moment the hub handles the request.
    pub async fn snapshot(&self) -> Result<HubSnapshot, HubClosed> {
        let (respond_to, response) = oneshot::channel();
        self.snapshots
            .send(respond_to)
            .await
            .map_err(|_| HubClosed)?;
        response.await.map_err(|_| HubClosed)
    }
}

struct Subscriber {
    mailbox: Mailbox,
    language: String,
}

struct LaneJob {
    message: Arc<InboundMessage>,
    recipients: Vec<Mailbox>,
}

struct Lane {
    jobs: mpsc::Sender<LaneJob>,
}

pub struct Hub {
    config: HubConfig,
    translator: Arc<dyn Translator>,
    subscribers: HashMap<ConnectionId, Subscriber>,
    // Keys double as the set of languages currently in use.
    lanes: BTreeMap<String, Lane>,
    joins: mpsc::Receiver<Participant>,
    leaves: mpsc::Receiver<ConnectionId>,
    broadcasts: mpsc::Receiver<InboundMessage>,
    snapshots: mpsc::Receiver<oneshot::Sender<HubSnapshot>>,
}

impl Hub {
    /// Starts the hub task. It stops once every handle has been dropped.
    pub fn spawn(translator: Arc<dyn Translator>, config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let capacity = config.intake_capacity.max(1);
        let (joins_tx, joins) = mpsc::channel(capacity);
        let (leaves_tx, leaves) = mpsc::channel(capacity);
        let (broadcasts_tx, broadcasts) = mpsc::channel(capacity);
        let (snapshots_tx, snapshots) = mpsc::channel(capacity);

        let hub = Hub {
            config,
            translator,
            subscribers: HashMap::new(),
            lanes: BTreeMap::new(),
            joins,
            leaves,
            broadcasts,
            snapshots,
        };
        let task = tokio::spawn(hub.run());

        let handle = HubHandle {
            joins: joins_tx,
            leaves: leaves_tx,
            broadcasts: broadcasts_tx,
            snapshots: snapshots_tx,
        };
        (handle, task)
    }

    async fn run(mut self) {
        loop {
            select! {
                biased;
                Some(participant) = self.joins.recv() => self.handle_join(participant),
                Some(id) = self.leaves.recv() => self.handle_leave(id),
                Some(message) = self.broadcasts.recv() => self.handle_broadcast(message),
                Some(respond_to) = self.snapshots.recv() => {
                    let _ = respond_to.send(self.snapshot());
                }
                else => break,
            }
        }
        info!("broadcast hub stopped");
    }

    fn handle_join(&mut self, participant: Participant) {
        let Participant {
            id,
            name,
            language,
            mailbox,
        } = participant;
        debug!(id, %name, %language, "participant registered");

        self.ensure_lane(&language);
        let previous = self.subscribers.insert(
            id,
            Subscriber {
                mailbox,
                language: language.clone(),
            },
        );
        if let Some(previous) = previous {
            if previous.language != language {
                self.prune_language(&previous.language);
            }
        }
    }

    fn handle_leave(&mut self, id: ConnectionId) {
        if let Some(Subscriber { language, .. }) = self.subscribers.remove(&id) {
            debug!(id, %language, "participant unregistered");
            self.prune_language(&language);
        }
    }

    fn handle_broadcast(&mut self, message: InboundMessage) {
        let mut by_language: HashMap<&str, Vec<Mailbox>> = HashMap::new();
        for subscriber in self.subscribers.values() {
            by_language
                .entry(subscriber.language.as_str())
                .or_default()
                .push(subscriber.mailbox.clone());
        }

        let message = Arc::new(message);
        for (language, lane) in &self.lanes {
            let Some(recipients) = by_language.remove(language.as_str()) else {
                continue;
            };
            if *language == message.language {
                // Nothing to translate; mailboxes never block, so skip the lane.
                let line: Arc<str> = render_line(&message.sender, &message.text).into();
                deliver_all(language, &recipients, &line);
                continue;
            }
            let job = LaneJob {
                message: Arc::clone(&message),
                recipients,
            };
            match lane.jobs.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(%language, sender = %message.sender, "language lane is saturated; dropping broadcast");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(%language, "language lane stopped unexpectedly; dropping broadcast");
                }
            }
        }
    }

    fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            participants: self.subscribers.len(),
            languages: self.lanes.keys().cloned().collect(),
        }
    }

    fn ensure_lane(&mut self, language: &str) {
        if self.lanes.contains_key(language) {
            return;
        }
        let (jobs, queue) = mpsc::channel(self.config.lane_capacity.max(1));
        tokio::spawn(run_lane(
            language.to_string(),
            queue,
            Arc::clone(&self.translator),
            self.config.translate_timeout,
        ));
        info!(%language, "language now in use");
        self.lanes.insert(language.to_string(), Lane { jobs });
    }

    fn prune_language(&mut self, language: &str) {
        let still_spoken = self
            .subscribers
            .values()
            .any(|subscriber| subscriber.language == language);
        if !still_spoken && self.lanes.remove(language).is_some() {
            info!(%language, "language no longer in use");
        }
    }
}

/// Serves one target language until the hub drops the lane's sender.
async fn run_lane(
    language: String,
    mut jobs: mpsc::Receiver<LaneJob>,
    translator: Arc<dyn Translator>,
    timeout: Duration,
) {
    while let Some(LaneJob {
        message,
        recipients,
    }) = jobs.recv().await
    {
        let text = localize(&language, &message, translator.as_ref(), timeout).await;
        let line: Arc<str> = render_line(&message.sender, &text).into();
        deliver_all(&language, &recipients, &line);
    }
    debug!(%language, "language lane finished");
}

fn deliver_all(language: &str, recipients: &[Mailbox], line: &Arc<str>) {
    for mailbox in recipients {
        if !mailbox.deliver(Arc::clone(line)) {
            debug!(%language, "recipient left before delivery");
        }
    }
}

async fn localize(
    target: &str,
    message: &InboundMessage,
    translator: &dyn Translator,
    timeout: Duration,
) -> String {
    if target == message.language || message.text.trim().is_empty() {
        return message.text.clone();
    }

    let outcome = time::timeout(
        timeout,
        translator.translate(&message.language, target, &message.text),
    )
    .await
    .unwrap_or(Err(TranslateError::TimedOut(timeout)));

    match outcome {
        Ok(translated) => translated,
        Err(error) => {
            warn!(source = %message.language, %target, %error, "translation failed; delivering original text");
            message.text.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::mailbox::{self, Delivery, Inbox};

    const WAIT: Duration = Duration::from_secs(1);

    /// Prefixes the target language, fails for languages in `broken`, and
    /// stalls forever for languages in `stuck`.
    #[derive(Default)]
    struct FakeTranslator {
        broken: Vec<&'static str>,
        stuck: Vec<&'static str>,
        calls: AtomicUsize,
        seen: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Translator for FakeTranslator {
        async fn translate(
            &self,
            source: &str,
            target: &str,
            text: &str,
        ) -> Result<String, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((source.into(), target.into(), text.into()));
            if self.stuck.contains(&target) {
                std::future::pending::<()>().await;
            }
            if self.broken.contains(&target) {
                return Err(TranslateError::Malformed("provider unavailable".into()));
            }
            Ok(format!("[{target}] {text}"))
        }
    }

    fn spawn_hub(translator: Arc<FakeTranslator>) -> HubHandle {
        spawn_hub_with(
            translator,
            HubConfig {
                translate_timeout: Duration::from_millis(200),
                ..HubConfig::default()
            },
        )
    }

    fn spawn_hub_with(translator: Arc<FakeTranslator>, config: HubConfig) -> HubHandle {
        let (handle, _task) = Hub::spawn(translator, config);
        handle
    }

    async fn join(hub: &HubHandle, id: ConnectionId, name: &str, language: &str) -> Inbox {
        let (mailbox, inbox) = mailbox::channel(16);
        hub.join(Participant {
            id,
            name: name.into(),
            language: language.into(),
            mailbox,
        })
        .await
        .expect("hub accepts join");
        inbox
    }

    async fn next_line(inbox: &mut Inbox) -> String {
        match time::timeout(WAIT, inbox.recv()).await.expect("line in time") {
            Delivery::Line(line) => line.to_string(),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_language_verbatim_and_other_language_translated() {
        let translator = Arc::new(FakeTranslator::default());
        let hub = spawn_hub(Arc::clone(&translator));
        let mut alice = join(&hub, 1, "alice", "en").await;
        let mut bob = join(&hub, 2, "bob", "es").await;

        hub.broadcast(InboundMessage::chat("en", "alice", "Hello"))
            .await
            .expect("broadcast");

        assert_eq!(next_line(&mut alice).await, render_line("alice", "Hello"));
        assert_eq!(next_line(&mut bob).await, render_line("alice", "[es] Hello"));
        assert_eq!(translator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            translator.seen.lock().unwrap().as_slice(),
            &[("en".to_string(), "es".to_string(), "Hello".to_string())]
        );
    }

    #[tokio::test]
    async fn translation_runs_once_per_language_not_per_recipient() {
        let translator = Arc::new(FakeTranslator::default());
        let hub = spawn_hub(Arc::clone(&translator));
        let mut first = join(&hub, 1, "ana", "es").await;
        let mut second = join(&hub, 2, "beto", "es").await;
        let _sender = join(&hub, 3, "carl", "en").await;

        hub.broadcast(InboundMessage::chat("en", "carl", "Good morning"))
            .await
            .expect("broadcast");

        let expected = render_line("carl", "[es] Good morning");
        assert_eq!(next_line(&mut first).await, expected);
        assert_eq!(next_line(&mut second).await, expected);
        assert_eq!(translator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_translation_falls_back_without_hurting_other_languages() {
        let translator = Arc::new(FakeTranslator {
            broken: vec!["fr"],
            ..FakeTranslator::default()
        });
        let hub = spawn_hub(translator);
        let mut alice = join(&hub, 1, "alice", "en").await;
        let mut bruno = join(&hub, 2, "bruno", "es").await;
        let mut claire = join(&hub, 3, "claire", "fr").await;

        hub.broadcast(InboundMessage::chat("en", "alice", "Hello"))
            .await
            .expect("broadcast");

        assert_eq!(next_line(&mut alice).await, render_line("alice", "Hello"));
        assert_eq!(next_line(&mut bruno).await, render_line("alice", "[es] Hello"));
        assert_eq!(next_line(&mut claire).await, render_line("alice", "Hello"));
    }

    #[tokio::test]
    async fn stuck_translation_times_out_and_leaves_other_lanes_alone() {
        let translator = Arc::new(FakeTranslator {
            stuck: vec!["de"],
            ..FakeTranslator::default()
        });
        let hub = spawn_hub(translator);
        let mut alice = join(&hub, 1, "alice", "en").await;
        let mut dieter = join(&hub, 2, "dieter", "de").await;

        hub.broadcast(InboundMessage::chat("en", "alice", "Hello"))
            .await
            .expect("broadcast");

        // English is delivered straight away; German waits out the timeout.
        assert_eq!(next_line(&mut alice).await, render_line("alice", "Hello"));
        assert_eq!(next_line(&mut dieter).await, render_line("alice", "Hello"));
    }

    #[tokio::test]
    async fn same_language_lines_skip_a_stalled_translation() {
        let translator = Arc::new(FakeTranslator {
            stuck: vec!["en"],
            ..FakeTranslator::default()
        });
        let hub = spawn_hub_with(
            translator,
            HubConfig {
                translate_timeout: Duration::from_secs(5),
                ..HubConfig::default()
            },
        );
        let mut alice = join(&hub, 1, "alice", "en").await;
        let mut bruno = join(&hub, 2, "bruno", "es").await;

        // es -> en hangs until the timeout, long after WAIT.
        hub.broadcast(InboundMessage::chat("es", "bruno", "hola"))
            .await
            .expect("broadcast");
        hub.broadcast(InboundMessage::chat("en", "alice", "hi"))
            .await
            .expect("broadcast");

        assert_eq!(next_line(&mut alice).await, render_line("alice", "hi"));
        assert_eq!(next_line(&mut bruno).await, render_line("bruno", "hola"));
        assert_eq!(next_line(&mut bruno).await, render_line("alice", "[es] hi"));
    }

    #[tokio::test]
    async fn saturated_lane_drops_only_its_own_language() {
        let translator = Arc::new(FakeTranslator {
            stuck: vec!["de"],
            ..FakeTranslator::default()
        });
        let hub = spawn_hub_with(
            translator,
            HubConfig {
                lane_capacity: 1,
                translate_timeout: Duration::from_millis(300),
                ..HubConfig::default()
            },
        );
        let mut alice = join(&hub, 1, "alice", "en").await;
        let mut dieter = join(&hub, 2, "dieter", "de").await;
        let mut bruno = join(&hub, 3, "bruno", "es").await;

        for (index, text) in ["m1", "m2", "m3"].into_iter().enumerate() {
            hub.broadcast(InboundMessage::chat("en", "alice", text))
                .await
                .expect("broadcast");
            assert_eq!(next_line(&mut alice).await, render_line("alice", text));
            assert_eq!(
                next_line(&mut bruno).await,
                render_line("alice", &format!("[es] {text}"))
            );
            if index == 0 {
                // Let the German lane pick up m1 and stall on it.
                time::sleep(Duration::from_millis(50)).await;
            }
        }

        // m2 waits in the one free slot; m3 finds the lane full.
        let mut received = Vec::new();
        while let Ok(delivery) = time::timeout(WAIT, dieter.recv()).await {
            match delivery {
                Delivery::Line(line) => received.push(line.to_string()),
                other => panic!("expected a line, got {other:?}"),
            }
        }
        assert_eq!(
            received,
            vec![render_line("alice", "m1"), render_line("alice", "m2")]
        );
        let snapshot = hub.snapshot().await.expect("hub still running");
        assert_eq!(snapshot.participants, 3);
    }

    #[tokio::test]
    async fn late_joiner_does_not_receive_earlier_broadcast() {
        let translator = Arc::new(FakeTranslator::default());
        let hub = spawn_hub(translator);
        let mut alice = join(&hub, 1, "alice", "en").await;

        hub.broadcast(InboundMessage::chat("en", "alice", "first"))
            .await
            .expect("broadcast");
        // Snapshots rank below broadcasts, so this waits until "first" is fanned out.
        hub.snapshot().await.expect("snapshot");
        let mut bob = join(&hub, 2, "bob", "en").await;
        hub.broadcast(InboundMessage::chat("en", "alice", "second"))
            .await
            .expect("broadcast");

        assert_eq!(next_line(&mut alice).await, render_line("alice", "first"));
        assert_eq!(next_line(&mut alice).await, render_line("alice", "second"));
        assert_eq!(next_line(&mut bob).await, render_line("alice", "second"));
    }

    #[tokio::test]
    async fn lines_from_one_sender_keep_their_order() {
        let translator = Arc::new(FakeTranslator::default());
        let hub = spawn_hub(translator);
        let _alice = join(&hub, 1, "alice", "en").await;
        let mut bob = join(&hub, 2, "bob", "es").await;

        for text in ["one", "two", "three"] {
            hub.broadcast(InboundMessage::chat("en", "alice", text))
                .await
                .expect("broadcast");
        }

        for text in ["one", "two", "three"] {
            assert_eq!(
                next_line(&mut bob).await,
                render_line("alice", &format!("[es] {text}"))
            );
        }
    }

    #[tokio::test]
    async fn last_speaker_leaving_prunes_the_language() {
        let translator = Arc::new(FakeTranslator::default());
        let hub = spawn_hub(Arc::clone(&translator));
        let mut alice = join(&hub, 1, "alice", "en").await;
        let _bob = join(&hub, 2, "bob", "es").await;

        let snapshot = hub.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.languages, vec!["en".to_string(), "es".to_string()]);

        hub.leave(2).await.expect("leave");
        let snapshot = hub.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.participants, 1);
        assert_eq!(snapshot.languages, vec!["en".to_string()]);

        hub.broadcast(InboundMessage::chat("en", "alice", "anyone?"))
            .await
            .expect("broadcast");
        assert_eq!(next_line(&mut alice).await, render_line("alice", "anyone?"));
        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejoin_with_same_id_overwrites_entry() {
        let translator = Arc::new(FakeTranslator::default());
        let hub = spawn_hub(translator);
        let _old = join(&hub, 7, "alice", "en").await;
        let mut new = join(&hub, 7, "alice", "it").await;

        let snapshot = hub.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.participants, 1);
        assert_eq!(snapshot.languages, vec!["it".to_string()]);

        hub.broadcast(InboundMessage::chat("it", "alice", "ciao"))
            .await
            .expect("broadcast");
        assert_eq!(next_line(&mut new).await, render_line("alice", "ciao"));
    }

    #[tokio::test]
    async fn leaving_mid_broadcast_does_not_disturb_others() {
        let translator = Arc::new(FakeTranslator::default());
        let hub = spawn_hub(translator);
        let mut alice = join(&hub, 1, "alice", "en").await;
        let bob = join(&hub, 2, "bob", "es").await;

        hub.broadcast(InboundMessage::chat("en", "alice", "bye bob"))
            .await
            .expect("broadcast");
        drop(bob);
        hub.leave(2).await.expect("leave");
        hub.leave(2).await.expect("second leave is a no-op");

        assert_eq!(next_line(&mut alice).await, render_line("alice", "bye bob"));
        let snapshot = hub.snapshot().await.expect("hub still running");
        assert_eq!(snapshot.participants, 1);
    }

    #[tokio::test]
    async fn blank_text_skips_the_translator() {
        let translator = Arc::new(FakeTranslator::default());
        let hub = spawn_hub(Arc::clone(&translator));
        let _alice = join(&hub, 1, "alice", "en").await;
        let mut bob = join(&hub, 2, "bob", "es").await;

        hub.broadcast(InboundMessage::chat("en", "alice", ""))
            .await
            .expect("broadcast");

        assert_eq!(next_line(&mut bob).await, render_line("alice", ""));
        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hub_stops_when_every_handle_is_dropped() {
        let translator: Arc<dyn Translator> = Arc::new(FakeTranslator::default());
        let (handle, task) = Hub::spawn(translator, HubConfig::default());
        drop(handle);
        time::timeout(WAIT, task)
            .await
            .expect("hub exits in time")
            .expect("hub task completes cleanly");
    }
}
