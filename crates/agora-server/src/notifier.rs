//! Notification fan-out.
//!
//! When a message is stored, [`Notifier::notify`] looks up the aggregate
//! rooms linked to its room and delivers one notification to each. Every
//! delivery, including reminder deliveries from the scheduler, goes through
//! [`Notifier::deliver`]:
//!
//! 1. take the destination's lane (a FIFO async mutex, one per room);
//! 2. wait until the cooldown since the lane's last send has elapsed;
//! 3. take a slot from the global concurrency pool;
//! 4. send;
//! 5. record the send instant on the lane, even if the send failed;
//! 6. release the slot, then the lane.
//!
//! Deliveries to distinct rooms run concurrently. Two deliveries to one room
//! never overlap and never start closer together than the cooldown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agora_shared::constants::{
    DEFAULT_CHANNEL_COOLDOWN_MS, DEFAULT_MAX_CONCURRENT_DELIVERIES, MAX_SIMILAR_MESSAGES,
    NOTIFICATION_BODY_LIMIT, SIMILAR_EXCERPT_LIMIT,
};
use agora_shared::protocol::{truncate, Destination, Notification};
use agora_shared::RoomId;
use agora_store::{Message, Room, StoreError};
use futures::future::join_all;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::sender::{DeliveryError, Sender};
use crate::store::Store;

/// Keywords taken from a message body for the similar-message search.
const MAX_KEYWORDS: usize = 5;
/// Of those, how many are actually searched.
const MAX_SEARCHED_KEYWORDS: usize = 3;
const MIN_KEYWORD_CHARS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct NotifierConfig {
    pub max_concurrency: usize,
    pub cooldown: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENT_DELIVERIES,
            cooldown: Duration::from_millis(DEFAULT_CHANNEL_COOLDOWN_MS),
        }
    }
}

/// Last send instant of one destination. `None` until the first send.
type Lane = Arc<AsyncMutex<Option<Instant>>>;

pub struct Notifier {
    store: Store,
    sender: Arc<dyn Sender>,
    slots: Semaphore,
    cooldown: Duration,
    lanes: Mutex<HashMap<RoomId, Lane>>,
}

impl Notifier {
    pub fn new(store: Store, sender: Arc<dyn Sender>, config: NotifierConfig) -> Self {
        Self {
            store,
            sender,
            slots: Semaphore::new(config.max_concurrency.max(1)),
            cooldown: config.cooldown,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Fan `message` (just stored in `room`) out to every linked aggregate
    /// room. Returns the rooms that were delivered to; failed deliveries are
    /// logged and left out.
    pub async fn notify(
        &self,
        message: &Message,
        room: &Room,
        find_similar: bool,
    ) -> Result<Vec<RoomId>, StoreError> {
        let workspace_id = message.workspace_id;
        let targets = self
            .store
            .with(|db| db.linked_aggregate_targets(workspace_id, room.id))?;

        if targets.is_empty() {
            debug!(room = %room.id, "no aggregate rooms linked");
            return Ok(Vec::new());
        }

        let similar = if find_similar {
            match self.similar_messages(message) {
                Ok(similar) => similar,
                Err(e) => {
                    warn!(message = %message.id, error = %e, "similar-message search failed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let notification = message_notification(message, room, &similar);

        let deliveries = targets.iter().map(|target| {
            let destination = Destination {
                room_id: target.id,
                channel_external_id: target.external_id.clone(),
            };
            let notification = &notification;
            async move {
                self.deliver(&destination, notification)
                    .await
                    .ok()
                    .map(|_| destination.room_id)
            }
        });

        let delivered: Vec<RoomId> = join_all(deliveries).await.into_iter().flatten().collect();

        info!(
            message = %message.id,
            targets = targets.len(),
            delivered = delivered.len(),
            "fan-out complete"
        );
        Ok(delivered)
    }

    /// Deliver one notification under the lane/cooldown/slot policy.
    pub async fn deliver(
        &self,
        destination: &Destination,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        let lane = self.lane(destination.room_id);
        let mut last_sent = lane.lock().await;

        if let Some(last) = *last_sent {
            let ready_at = last + self.cooldown;
            let now = Instant::now();
            if now < ready_at {
                debug!(
                    room = %destination.room_id,
                    wait_ms = (ready_at - now).as_millis() as u64,
                    "waiting for destination cooldown"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| DeliveryError::Closed)?;

        let result = self.sender.send(destination, notification).await;
        *last_sent = Some(Instant::now());
        drop(permit);

        match &result {
            Ok(()) => info!(
                room = %destination.room_id,
                channel = %destination.channel_external_id,
                "delivered notification"
            ),
            Err(e) => warn!(
                room = %destination.room_id,
                channel = %destination.channel_external_id,
                error = %e,
                "delivery failed"
            ),
        }
        result
    }

    fn lane(&self, room_id: RoomId) -> Lane {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        lanes.entry(room_id).or_default().clone()
    }

    /// Up to [`MAX_SIMILAR_MESSAGES`] earlier messages of the same workspace
    /// sharing a keyword with `message`.
    fn similar_messages(&self, message: &Message) -> Result<Vec<Message>, StoreError> {
        let keywords = extract_keywords(&message.body);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        self.store.with(|db| {
            let mut found: Vec<Message> = Vec::new();
            for keyword in keywords.iter().take(MAX_SEARCHED_KEYWORDS) {
                let hits =
                    db.search_messages(message.workspace_id, keyword, MAX_SIMILAR_MESSAGES * 2)?;
                for hit in hits {
                    if hit.id != message.id && !found.iter().any(|m| m.id == hit.id) {
                        found.push(hit);
                    }
                }
            }
            found.truncate(MAX_SIMILAR_MESSAGES);
            Ok(found)
        })
    }
}

fn extract_keywords(body: &str) -> Vec<&str> {
    body.split_whitespace()
        .filter(|word| word.chars().count() >= MIN_KEYWORD_CHARS)
        .take(MAX_KEYWORDS)
        .collect()
}

/// The notification posted to aggregate rooms for a new message.
pub fn message_notification(message: &Message, source: &Room, similar: &[Message]) -> Notification {
    let mut notification = Notification::new(
        "New message",
        truncate(&message.body, NOTIFICATION_BODY_LIMIT),
    )
    .field("Sender", &message.sender_name, true)
    .field("Source room", &source.name, true)
    .field("Message type", message.message_type.as_str(), true);

    if !similar.is_empty() {
        let lines = similar
            .iter()
            .enumerate()
            .map(|(i, m)| {
                format!(
                    "{}. [{}] {}: {}",
                    i + 1,
                    m.timestamp.format("%Y-%m-%d %H:%M"),
                    m.sender_name,
                    truncate(&m.body, SIMILAR_EXCERPT_LIMIT)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        notification = notification.field("Similar messages", lines, false);
    }

    notification.footer(format!("Message ID: {}", message.external_message_id))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agora_shared::{LinkKind, MessageType, RoomKind, WorkspaceId};
    use agora_store::{IngestOutcome, NewMessage};
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;

    /// One recorded send: destination room, when the send started, payload.
    pub(crate) type SendRecord = (RoomId, Instant, Notification);

    /// Records every send; can fail chosen rooms and hold each send open.
    #[derive(Default)]
    pub(crate) struct RecordingSender {
        pub sends: Mutex<Vec<SendRecord>>,
        pub fail_rooms: Mutex<Vec<RoomId>>,
        pub hold: Duration,
        in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl RecordingSender {
        pub fn holding(hold: Duration) -> Self {
            Self {
                hold,
                ..Default::default()
            }
        }

        pub fn fail_room(&self, room: RoomId) {
            self.fail_rooms.lock().unwrap().push(room);
        }

        pub fn heal(&self) {
            self.fail_rooms.lock().unwrap().clear();
        }

        pub fn sends_to(&self, room: RoomId) -> Vec<SendRecord> {
            self.sends
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, _, _)| *r == room)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl Sender for RecordingSender {
        async fn send(
            &self,
            destination: &Destination,
            notification: &Notification,
        ) -> Result<(), DeliveryError> {
            let started = Instant::now();
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

            if !self.hold.is_zero() {
                tokio::time::sleep(self.hold).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.sends
                .lock()
                .unwrap()
                .push((destination.room_id, started, notification.clone()));

            if self.fail_rooms.lock().unwrap().contains(&destination.room_id) {
                return Err(DeliveryError::Rejected { status: 500 });
            }
            Ok(())
        }
    }

    pub(crate) fn store_message(
        store: &Store,
        ws: WorkspaceId,
        room: &Room,
        external_id: &str,
        body: &str,
    ) -> Message {
        let outcome = store
            .with(|db| {
                db.ingest_message(
                    ws,
                    NewMessage {
                        room_id: room.id,
                        sender_id: "u-1".into(),
                        sender_name: "alice".into(),
                        body: body.into(),
                        message_type: MessageType::Text,
                        external_message_id: external_id.into(),
                        timestamp: Utc::now(),
                    },
                    vec![],
                )
            })
            .unwrap();
        match outcome {
            IngestOutcome::Stored(m) => m,
            IngestOutcome::Duplicate => panic!("unexpected duplicate"),
        }
    }

    struct Acme {
        store: Store,
        ws: WorkspaceId,
        general: Room,
        digest: Room,
    }

    /// Acme: `general` (standard) -> `digest` (aggregate).
    fn acme() -> Acme {
        let store = Store::in_memory();
        let (ws, general, digest) = store
            .with(|db| {
                let ws = db.ensure_workspace("acme", "Acme")?.id;
                let general = db.ensure_room(ws, "c-general", "general")?;
                let digest = db.ensure_room(ws, "c-digest", "digest")?;
                let digest = db.set_room_kind(ws, digest.id, RoomKind::Aggregate)?;
                db.create_room_link(ws, general.id, digest.id, LinkKind::OneWay)?;
                Ok((ws, general, digest))
            })
            .unwrap();
        Acme {
            store,
            ws,
            general,
            digest,
        }
    }

    fn notifier(store: &Store, sender: Arc<RecordingSender>, config: NotifierConfig) -> Notifier {
        Notifier::new(store.clone(), sender, config)
    }

    fn destination(room: RoomId) -> Destination {
        Destination {
            room_id: room,
            channel_external_id: format!("c-{room}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acme_scenario_second_message_waits_for_cooldown() {
        let acme = acme();
        let sender = Arc::new(RecordingSender::default());
        let notifier = notifier(&acme.store, sender.clone(), NotifierConfig::default());

        let m1 = store_message(&acme.store, acme.ws, &acme.general, "m-1", "first");
        let delivered = notifier.notify(&m1, &acme.general, false).await.unwrap();
        assert_eq!(delivered, vec![acme.digest.id]);

        let m2 = store_message(&acme.store, acme.ws, &acme.general, "m-2", "second");
        notifier.notify(&m2, &acme.general, false).await.unwrap();

        let sends = sender.sends_to(acme.digest.id);
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].2.footer.as_deref(), Some("Message ID: m-1"));
        assert_eq!(sends[0].2.description, "first");
        assert_eq!(sends[1].2.footer.as_deref(), Some("Message ID: m-2"));
        assert!(sends[1].1 - sends[0].1 >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_deliveries_to_one_room_respect_cooldown() {
        let store = Store::in_memory();
        let sender = Arc::new(RecordingSender::default());
        let cooldown = Duration::from_millis(750);
        let notifier = notifier(
            &store,
            sender.clone(),
            NotifierConfig {
                max_concurrency: 5,
                cooldown,
            },
        );

        let room = RoomId::new();
        let dest = destination(room);
        let notification = Notification::new("t", "d");
        let results = join_all((0..6).map(|_| notifier.deliver(&dest, &notification))).await;
        assert!(results.iter().all(Result::is_ok));

        let mut instants: Vec<Instant> = sender.sends_to(room).iter().map(|s| s.1).collect();
        instants.sort();
        assert_eq!(instants.len(), 6);
        for pair in instants.windows(2) {
            assert!(pair[1] - pair[0] >= cooldown);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_sends_never_exceed_the_pool() {
        let store = Store::in_memory();
        let sender = Arc::new(RecordingSender::holding(Duration::from_millis(50)));
        let notifier = notifier(
            &store,
            sender.clone(),
            NotifierConfig {
                max_concurrency: 3,
                cooldown: Duration::from_secs(1),
            },
        );

        let destinations: Vec<_> = (0..20).map(|_| destination(RoomId::new())).collect();
        let notification = Notification::new("t", "d");
        let results =
            join_all(destinations.iter().map(|d| notifier.deliver(d, &notification))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(sender.sends.lock().unwrap().len(), 20);
        assert_eq!(sender.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_still_starts_the_cooldown() {
        let store = Store::in_memory();
        let sender = Arc::new(RecordingSender::default());
        let notifier = notifier(&store, sender.clone(), NotifierConfig::default());
        let room = RoomId::new();
        let dest = destination(room);
        let notification = Notification::new("t", "d");

        sender.fail_room(room);
        assert!(notifier.deliver(&dest, &notification).await.is_err());
        sender.heal();
        notifier.deliver(&dest, &notification).await.unwrap();

        let sends = sender.sends_to(room);
        assert_eq!(sends.len(), 2);
        assert!(sends[1].1 - sends[0].1 >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_reaches_each_linked_aggregate_once_and_stays_in_tenant() {
        let acme = acme();
        let (agg2, deleted_agg, plain, foreign_digest) = acme
            .store
            .with(|db| {
                let ws = acme.ws;
                let agg2 = db.ensure_room(ws, "c-agg2", "agg2")?;
                db.set_room_kind(ws, agg2.id, RoomKind::Aggregate)?;
                // Reverse bidirectional link: agg2 <-> general.
                db.create_room_link(ws, agg2.id, acme.general.id, LinkKind::Bidirectional)?;
                // And a second path to digest, which must not double-deliver.
                db.create_room_link(ws, acme.digest.id, acme.general.id, LinkKind::Bidirectional)?;

                let deleted_agg = db.ensure_room(ws, "c-old", "old-digest")?;
                db.set_room_kind(ws, deleted_agg.id, RoomKind::Aggregate)?;
                db.create_room_link(ws, acme.general.id, deleted_agg.id, LinkKind::OneWay)?;
                db.soft_delete_room(ws, "c-old")?;

                let plain = db.ensure_room(ws, "c-plain", "plain")?;
                db.create_room_link(ws, acme.general.id, plain.id, LinkKind::OneWay)?;

                // Same channel id and name in another tenant.
                let other = db.ensure_workspace("globex", "Globex")?.id;
                let foreign = db.ensure_room(other, "c-digest", "digest")?;
                db.set_room_kind(other, foreign.id, RoomKind::Aggregate)?;
                Ok((agg2, deleted_agg, plain, foreign))
            })
            .unwrap();

        let sender = Arc::new(RecordingSender::default());
        let notifier = notifier(&acme.store, sender.clone(), NotifierConfig::default());
        let m = store_message(&acme.store, acme.ws, &acme.general, "m-1", "hello");

        let mut delivered = notifier.notify(&m, &acme.general, false).await.unwrap();
        delivered.sort();
        let mut expected = vec![acme.digest.id, agg2.id];
        expected.sort();
        assert_eq!(delivered, expected);

        assert_eq!(sender.sends_to(acme.digest.id).len(), 1);
        assert_eq!(sender.sends_to(agg2.id).len(), 1);
        for excluded in [deleted_agg.id, plain.id, foreign_digest.id, acme.general.id] {
            assert!(sender.sends_to(excluded).is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_target_is_left_out_of_the_result() {
        let acme = acme();
        let agg2 = acme
            .store
            .with(|db| {
                let agg2 = db.ensure_room(acme.ws, "c-agg2", "agg2")?;
                db.set_room_kind(acme.ws, agg2.id, RoomKind::Aggregate)?;
                db.create_room_link(acme.ws, acme.general.id, agg2.id, LinkKind::OneWay)?;
                Ok(agg2)
            })
            .unwrap();

        let sender = Arc::new(RecordingSender::default());
        sender.fail_room(acme.digest.id);
        let notifier = notifier(&acme.store, sender.clone(), NotifierConfig::default());
        let m = store_message(&acme.store, acme.ws, &acme.general, "m-1", "hello");

        let delivered = notifier.notify(&m, &acme.general, false).await.unwrap();
        assert_eq!(delivered, vec![agg2.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_store_is_an_error_not_an_empty_fan_out() {
        let acme = acme();
        let sender = Arc::new(RecordingSender::default());
        let notifier = notifier(&acme.store, sender.clone(), NotifierConfig::default());
        let m = store_message(&acme.store, acme.ws, &acme.general, "m-1", "hello");

        acme.store.poison();
        let result = notifier.notify(&m, &acme.general, false).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(sender.sends_to(acme.digest.id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn similar_messages_are_attached_without_the_message_itself() {
        let acme = acme();
        let sender = Arc::new(RecordingSender::default());
        let notifier = notifier(&acme.store, sender.clone(), NotifierConfig::default());

        store_message(&acme.store, acme.ws, &acme.general, "old-1", "deploy failed on staging");
        store_message(&acme.store, acme.ws, &acme.general, "old-2", "unrelated chatter");
        let m = store_message(&acme.store, acme.ws, &acme.general, "m-1", "deploy is broken again");

        notifier.notify(&m, &acme.general, true).await.unwrap();

        let sends = sender.sends_to(acme.digest.id);
        let field = sends[0]
            .2
            .fields
            .iter()
            .find(|f| f.name == "Similar messages")
            .expect("similar field");
        assert!(field.value.contains("deploy failed on staging"));
        assert!(!field.value.contains("deploy is broken again"));
        assert!(!field.value.contains("unrelated"));
    }

    #[test]
    fn keywords_skip_short_words_and_cap_at_five() {
        assert_eq!(
            extract_keywords("a to the deploy of db server is up now ok yes"),
            vec!["the", "deploy", "server", "now", "yes"]
        );
    }

    #[test]
    fn long_bodies_are_truncated() {
        let message = Message {
            id: agora_shared::MessageId::new(),
            workspace_id: WorkspaceId::new(),
            room_id: RoomId::new(),
            sender_id: "u".into(),
            sender_name: "alice".into(),
            body: "x".repeat(800),
            message_type: MessageType::Text,
            external_message_id: "m".into(),
            timestamp: Utc::now(),
        };
        let room = Room {
            id: message.room_id,
            workspace_id: message.workspace_id,
            external_id: "c".into(),
            name: "general".into(),
            kind: RoomKind::Standard,
            ai_config: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        let n = message_notification(&message, &room, &[]);
        assert_eq!(n.description.chars().count(), NOTIFICATION_BODY_LIMIT);
        assert!(n.description.ends_with("..."));
        assert_eq!(n.fields.len(), 3);
    }
}
