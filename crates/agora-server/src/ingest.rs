//! Inbound event handling: persist, then fan out.
//!
//! A `message_created` event is resolved to its workspace and room (created
//! on first sight), its attachments are downloaded into blob storage, and the
//! message plus attachment rows are written in one transaction. Fan-out runs
//! only after that commit and can never undo it.

use std::sync::Arc;
use std::time::Duration;

use agora_shared::protocol::{InboundAttachment, InboundEvent, MessageCreated};
use agora_shared::{MessageId, MessageType, RoomId, WorkspaceId};
use agora_store::{IngestOutcome, Message, NewAttachment, NewMessage, Room, StoreError};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blob_store::{BlobError, BlobStorage};
use crate::error::ServerError;
use crate::notifier::Notifier;
use crate::store::Store;

/// What happened to an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestResult {
    Stored {
        message_id: MessageId,
        notified_rooms: Vec<RoomId>,
    },
    Duplicate,
    /// A room was renamed or soft-deleted.
    Updated,
    /// The event referred to an unknown workspace or room.
    Ignored,
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("download returned HTTP {0}")]
    Status(u16),

    #[error("attachment too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: usize },

    #[error(transparent)]
    Blob(#[from] BlobError),
}

pub struct IngestService {
    store: Store,
    blobs: Arc<dyn BlobStorage>,
    notifier: Arc<Notifier>,
    http: reqwest::Client,
    find_similar: bool,
}

impl IngestService {
    pub fn new(
        store: Store,
        blobs: Arc<dyn BlobStorage>,
        notifier: Arc<Notifier>,
        find_similar: bool,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            store,
            blobs,
            notifier,
            http,
            find_similar,
        })
    }

    pub async fn handle_event(&self, event: InboundEvent) -> Result<IngestResult, ServerError> {
        match event {
            InboundEvent::MessageCreated(created) => self.handle_message(created).await,

            InboundEvent::ChannelRenamed {
                tenant_external_id,
                room_external_id,
                room_name,
            } => {
                let changed = self.store.with(|db| {
                    let ws = match db.get_workspace_by_external_id(&tenant_external_id) {
                        Ok(ws) => ws,
                        Err(StoreError::NotFound) => return Ok(false),
                        Err(e) => return Err(e),
                    };
                    db.rename_room(ws.id, &room_external_id, &room_name)
                })?;
                if changed {
                    info!(room = %room_external_id, name = %room_name, "Room renamed");
                }
                Ok(updated_or_ignored(changed))
            }

            InboundEvent::ChannelDeleted {
                tenant_external_id,
                room_external_id,
            } => {
                let changed = self.store.with(|db| {
                    let ws = match db.get_workspace_by_external_id(&tenant_external_id) {
                        Ok(ws) => ws,
                        Err(StoreError::NotFound) => return Ok(false),
                        Err(e) => return Err(e),
                    };
                    db.soft_delete_room(ws.id, &room_external_id)
                })?;
                if changed {
                    info!(room = %room_external_id, "Room soft-deleted");
                }
                Ok(updated_or_ignored(changed))
            }
        }
    }

    async fn handle_message(&self, created: MessageCreated) -> Result<IngestResult, ServerError> {
        let tenant_name = created
            .tenant_name
            .clone()
            .unwrap_or_else(|| created.tenant_external_id.clone());

        let (workspace, room, seen) = self.store.with(|db| {
            let workspace = db.ensure_workspace(&created.tenant_external_id, &tenant_name)?;
            let room = db.ensure_room(workspace.id, &created.room_external_id, &created.room_name)?;
            let seen = db.message_exists(&created.external_message_id)?;
            Ok((workspace, room, seen))
        })?;

        if seen {
            debug!(external_id = %created.external_message_id, "Duplicate message");
            return Ok(IngestResult::Duplicate);
        }

        let mut attachments = Vec::with_capacity(created.attachments.len());
        for inbound in &created.attachments {
            match self.download(workspace.id, room.id, inbound).await {
                Ok(attachment) => attachments.push(attachment),
                Err(e) => warn!(
                    file = %inbound.filename,
                    error = %e,
                    "Skipping attachment"
                ),
            }
        }
        let blob_keys: Vec<String> = attachments.iter().map(|a| a.blob_key.clone()).collect();

        let message_type = MessageType::from_content_type(
            created
                .attachments
                .first()
                .and_then(|a| a.content_type.as_deref()),
        );
        let new_message = NewMessage {
            room_id: room.id,
            sender_id: created.sender_id,
            sender_name: created.sender_name,
            body: created.body,
            message_type,
            external_message_id: created.external_message_id,
            timestamp: created.timestamp.unwrap_or_else(Utc::now),
        };

        let outcome = self
            .store
            .with(|db| db.ingest_message(workspace.id, new_message, attachments));

        let message = match outcome {
            Ok(IngestOutcome::Stored(message)) => message,
            Ok(IngestOutcome::Duplicate) => {
                self.discard_blobs(&blob_keys).await;
                return Ok(IngestResult::Duplicate);
            }
            Err(e) => {
                self.discard_blobs(&blob_keys).await;
                return Err(e.into());
            }
        };

        info!(
            message = %message.id,
            room = %room.id,
            attachments = blob_keys.len(),
            "Message stored"
        );

        let notified_rooms = self.fan_out(&message, &room).await?;

        Ok(IngestResult::Stored {
            message_id: message.id,
            notified_rooms,
        })
    }

    /// Notify the aggregate rooms linked to `room`. Undeliverable targets are
    /// left out of the result; a store failure fails the request while the
    /// committed message stays, so a redelivery is answered `Duplicate`.
    async fn fan_out(&self, message: &Message, room: &Room) -> Result<Vec<RoomId>, ServerError> {
        self.notifier
            .notify(message, room, self.find_similar)
            .await
            .map_err(|e| {
                error!(message = %message.id, error = %e, "Fan-out failed after commit");
                ServerError::from(e)
            })
    }

    async fn download(
        &self,
        ws: WorkspaceId,
        room: RoomId,
        inbound: &InboundAttachment,
    ) -> Result<NewAttachment, FetchError> {
        let max = self.blobs.max_size();
        if inbound.size > max as u64 {
            return Err(FetchError::TooLarge {
                size: inbound.size,
                max,
            });
        }

        let response = self.http.get(&inbound.url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        if let Some(length) = response.content_length() {
            if length > max as u64 {
                return Err(FetchError::TooLarge { size: length, max });
            }
        }
        let bytes = response.bytes().await?;
        if bytes.len() > max {
            return Err(FetchError::TooLarge {
                size: bytes.len() as u64,
                max,
            });
        }

        let key = format!(
            "{ws}/{room}/{}-{}",
            Uuid::new_v4(),
            sanitize_file_name(&inbound.filename)
        );
        let blob_key = self.blobs.save(&key, &bytes).await?;

        Ok(NewAttachment {
            file_name: inbound.filename.clone(),
            blob_key,
            content_type: inbound.content_type.clone(),
            file_size: bytes.len() as i64,
            blake3_hash: blake3::hash(&bytes).to_hex().to_string(),
        })
    }

    async fn discard_blobs(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.blobs.delete(key).await {
                warn!(key = %key, error = %e, "Failed to remove orphaned blob");
            }
        }
    }
}

fn updated_or_ignored(changed: bool) -> IngestResult {
    if changed {
        IngestResult::Updated
    } else {
        IngestResult::Ignored
    }
}

/// Platform file names end up in a blob key; keep them to one path segment.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agora_shared::{LinkKind, RoomKind};
    use axum::routing::get;
    use axum::Router;
    use tempfile::TempDir;

    use super::*;
    use crate::blob_store::LocalBlobStore;
    use crate::notifier::tests::RecordingSender;
    use crate::notifier::NotifierConfig;

    struct Fixture {
        store: Store,
        sender: Arc<RecordingSender>,
        service: IngestService,
        _blob_dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let store = Store::in_memory();
        let blob_dir = TempDir::new().unwrap();
        let blobs = LocalBlobStore::new(blob_dir.path().to_path_buf(), 64)
            .await
            .unwrap();
        let sender = Arc::new(RecordingSender::default());
        let notifier = Arc::new(Notifier::new(
            store.clone(),
            sender.clone(),
            NotifierConfig {
                max_concurrency: 5,
                cooldown: Duration::from_millis(1),
            },
        ));
        let service = IngestService::new(store.clone(), Arc::new(blobs), notifier, false).unwrap();
        Fixture {
            store,
            sender,
            service,
            _blob_dir: blob_dir,
        }
    }

    fn message(external_id: &str) -> MessageCreated {
        MessageCreated {
            tenant_external_id: "guild-acme".into(),
            tenant_name: Some("Acme".into()),
            room_external_id: "c-general".into(),
            room_name: "general".into(),
            sender_id: "u-1".into(),
            sender_name: "alice".into(),
            body: "hello".into(),
            external_message_id: external_id.into(),
            timestamp: None,
            attachments: vec![],
        }
    }

    /// Serve fixed files on an ephemeral local port.
    async fn file_server() -> SocketAddr {
        let app = Router::new()
            .route("/small.png", get(|| async { vec![7u8; 16] }))
            .route("/big.bin", get(|| async { vec![0u8; 1024] }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn first_message_creates_workspace_and_room() {
        let f = fixture().await;
        let result = f
            .service
            .handle_event(InboundEvent::MessageCreated(message("m-1")))
            .await
            .unwrap();

        let IngestResult::Stored {
            message_id,
            notified_rooms,
        } = result
        else {
            panic!("expected stored, got {result:?}");
        };
        assert!(notified_rooms.is_empty());

        let (ws, room, stored) = f
            .store
            .with(|db| {
                let ws = db.get_workspace_by_external_id("guild-acme")?;
                let room = db.get_room_by_external_id(ws.id, "c-general")?;
                let stored = db.get_message(ws.id, message_id)?;
                Ok((ws, room, stored))
            })
            .unwrap();
        assert_eq!(ws.name, "Acme");
        assert_eq!(room.name, "general");
        assert_eq!(stored.room_id, room.id);
        assert_eq!(stored.message_type, MessageType::Text);
    }

    #[tokio::test]
    async fn redelivered_message_is_a_duplicate() {
        let f = fixture().await;
        let event = InboundEvent::MessageCreated(message("m-1"));
        f.service.handle_event(event.clone()).await.unwrap();
        let again = f.service.handle_event(event).await.unwrap();
        assert_eq!(again, IngestResult::Duplicate);

        let count = f
            .store
            .with(|db| {
                let ws = db.get_workspace_by_external_id("guild-acme")?;
                let room = db.get_room_by_external_id(ws.id, "c-general")?;
                db.messages_for_room(ws.id, room.id, 10)
            })
            .unwrap()
            .len();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn stored_message_fans_out_to_linked_digest() {
        let f = fixture().await;
        f.service
            .handle_event(InboundEvent::MessageCreated(message("m-0")))
            .await
            .unwrap();
        let digest = f
            .store
            .with(|db| {
                let ws = db.get_workspace_by_external_id("guild-acme")?.id;
                let general = db.get_room_by_external_id(ws, "c-general")?;
                let digest = db.ensure_room(ws, "c-digest", "digest")?;
                let digest = db.set_room_kind(ws, digest.id, RoomKind::Aggregate)?;
                db.create_room_link(ws, general.id, digest.id, LinkKind::OneWay)?;
                Ok(digest)
            })
            .unwrap();

        let result = f
            .service
            .handle_event(InboundEvent::MessageCreated(message("m-1")))
            .await
            .unwrap();
        let IngestResult::Stored { notified_rooms, .. } = result else {
            panic!("expected stored");
        };
        assert_eq!(notified_rooms, vec![digest.id]);
        let sends = f.sender.sends_to(digest.id);
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].2.footer.as_deref(), Some("Message ID: m-1"));
    }

    #[tokio::test]
    async fn undeliverable_target_keeps_the_message() {
        let f = fixture().await;
        f.service
            .handle_event(InboundEvent::MessageCreated(message("m-0")))
            .await
            .unwrap();
        let digest = f
            .store
            .with(|db| {
                let ws = db.get_workspace_by_external_id("guild-acme")?.id;
                let general = db.get_room_by_external_id(ws, "c-general")?;
                let digest = db.ensure_room(ws, "c-digest", "digest")?;
                db.set_room_kind(ws, digest.id, RoomKind::Aggregate)?;
                db.create_room_link(ws, general.id, digest.id, LinkKind::OneWay)?;
                Ok(digest)
            })
            .unwrap();
        f.sender.fail_room(digest.id);

        let result = f
            .service
            .handle_event(InboundEvent::MessageCreated(message("m-1")))
            .await
            .unwrap();
        let IngestResult::Stored {
            message_id,
            notified_rooms,
        } = result
        else {
            panic!("expected stored");
        };
        assert!(notified_rooms.is_empty());
        let ws = f
            .store
            .with(|db| db.get_workspace_by_external_id("guild-acme"))
            .unwrap();
        assert!(f.store.with(|db| db.get_message(ws.id, message_id)).is_ok());
    }

    #[tokio::test]
    async fn store_failure_during_fan_out_fails_the_request_and_keeps_the_message() {
        let f = fixture().await;
        let result = f
            .service
            .handle_event(InboundEvent::MessageCreated(message("m-1")))
            .await
            .unwrap();
        let IngestResult::Stored { message_id, .. } = result else {
            panic!("expected stored");
        };
        let (stored, room) = f
            .store
            .with(|db| {
                let ws = db.get_workspace_by_external_id("guild-acme")?.id;
                Ok((
                    db.get_message(ws, message_id)?,
                    db.get_room_by_external_id(ws, "c-general")?,
                ))
            })
            .unwrap();

        f.store.poison();
        let err = f.service.fan_out(&stored, &room).await.unwrap_err();
        assert!(matches!(err, ServerError::Store(StoreError::Unavailable(_))));
        f.store.clear_poison();

        assert!(f
            .store
            .with(|db| db.get_message(stored.workspace_id, message_id))
            .is_ok());
        let again = f
            .service
            .handle_event(InboundEvent::MessageCreated(message("m-1")))
            .await
            .unwrap();
        assert_eq!(again, IngestResult::Duplicate);
    }

    #[tokio::test]
    async fn id_seen_in_another_workspace_is_a_duplicate_before_download() {
        let f = fixture().await;
        f.service
            .handle_event(InboundEvent::MessageCreated(message("m-1")))
            .await
            .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/a.png",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { vec![7u8; 4] }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut other = message("m-1");
        other.tenant_external_id = "guild-globex".into();
        other.tenant_name = Some("Globex".into());
        other.attachments = vec![InboundAttachment {
            filename: "a.png".into(),
            url: format!("http://{addr}/a.png"),
            size: 4,
            content_type: Some("image/png".into()),
        }];

        let result = f
            .service
            .handle_event(InboundEvent::MessageCreated(other))
            .await
            .unwrap();
        assert_eq!(result, IngestResult::Duplicate);

        let globex_messages = f
            .store
            .with(|db| {
                let ws = db.get_workspace_by_external_id("guild-globex")?.id;
                let room = db.get_room_by_external_id(ws, "c-general")?;
                db.messages_for_room(ws, room.id, 10)
            })
            .unwrap();
        assert!(globex_messages.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn attachments_are_downloaded_and_oversized_ones_skipped() {
        let f = fixture().await;
        let addr = file_server().await;

        let mut created = message("m-1");
        created.attachments = vec![
            InboundAttachment {
                filename: "../photo.png".into(),
                url: format!("http://{addr}/small.png"),
                size: 16,
                content_type: Some("image/png".into()),
            },
            InboundAttachment {
                filename: "declared-small.bin".into(),
                url: format!("http://{addr}/big.bin"),
                size: 10,
                content_type: None,
            },
            InboundAttachment {
                filename: "declared-big.bin".into(),
                url: format!("http://{addr}/big.bin"),
                size: 4096,
                content_type: None,
            },
        ];

        let result = f
            .service
            .handle_event(InboundEvent::MessageCreated(created))
            .await
            .unwrap();
        let IngestResult::Stored { message_id, .. } = result else {
            panic!("expected stored");
        };

        let (message, attachments) = f
            .store
            .with(|db| {
                let ws = db.get_workspace_by_external_id("guild-acme")?.id;
                Ok((
                    db.get_message(ws, message_id)?,
                    db.attachments_for_message(ws, message_id)?,
                ))
            })
            .unwrap();
        assert_eq!(message.message_type, MessageType::Image);
        assert_eq!(attachments.len(), 1);
        let attachment = &attachments[0];
        assert_eq!(attachment.file_name, "../photo.png");
        assert_eq!(attachment.file_size, 16);
        assert_eq!(
            attachment.blake3_hash,
            blake3::hash(&[7u8; 16]).to_hex().to_string()
        );
        assert!(attachment.blob_key.ends_with("-.._photo.png"));
        assert!(attachment
            .blob_key
            .starts_with(&format!("{}/{}/", message.workspace_id, message.room_id)));
    }

    #[tokio::test]
    async fn rename_and_delete_update_known_rooms_only() {
        let f = fixture().await;
        f.service
            .handle_event(InboundEvent::MessageCreated(message("m-1")))
            .await
            .unwrap();

        let renamed = f
            .service
            .handle_event(InboundEvent::ChannelRenamed {
                tenant_external_id: "guild-acme".into(),
                room_external_id: "c-general".into(),
                room_name: "town-square".into(),
            })
            .await
            .unwrap();
        assert_eq!(renamed, IngestResult::Updated);

        let unknown = f
            .service
            .handle_event(InboundEvent::ChannelDeleted {
                tenant_external_id: "guild-other".into(),
                room_external_id: "c-general".into(),
            })
            .await
            .unwrap();
        assert_eq!(unknown, IngestResult::Ignored);

        let deleted = f
            .service
            .handle_event(InboundEvent::ChannelDeleted {
                tenant_external_id: "guild-acme".into(),
                room_external_id: "c-general".into(),
            })
            .await
            .unwrap();
        assert_eq!(deleted, IngestResult::Updated);

        let room = f
            .store
            .with(|db| {
                let ws = db.get_workspace_by_external_id("guild-acme")?.id;
                db.get_room_by_external_id(ws, "c-general")
            })
            .unwrap();
        assert_eq!(room.name, "town-square");
        assert!(!room.is_active());
    }

    #[test]
    fn result_serializes_with_status_tag() {
        let json = serde_json::to_value(IngestResult::Duplicate).unwrap();
        assert_eq!(json, serde_json::json!({"status": "duplicate"}));

        let id = MessageId::new();
        let json = serde_json::to_value(IngestResult::Stored {
            message_id: id,
            notified_rooms: vec![],
        })
        .unwrap();
        assert_eq!(json["status"], "stored");
        assert_eq!(json["message_id"], id.to_string());
    }

    #[test]
    fn file_names_stay_one_segment() {
        assert_eq!(sanitize_file_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_file_name(""), "file");
    }
}
