//! Background reminder loop.
//!
//! Every `interval` the scheduler looks for pending, not-yet-notified
//! reminders due within the lookahead window and posts each one to the
//! workspace's aggregate rooms through the shared [`Notifier`]. A reminder is
//! marked notified only once at least one delivery succeeded; otherwise it is
//! picked up again on the next pass.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agora_shared::protocol::{Destination, Notification};
use agora_store::{Reminder, StoreError};
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::notifier::Notifier;
use crate::store::Store;

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ReminderScheduler {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

struct Inner {
    store: Store,
    notifier: Arc<Notifier>,
    interval: Duration,
    lookahead: chrono::Duration,
}

impl ReminderScheduler {
    pub fn new(
        store: Store,
        notifier: Arc<Notifier>,
        interval: Duration,
        lookahead_hours: i64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                notifier,
                interval,
                lookahead: chrono::Duration::hours(lookahead_hours),
            }),
            running: Mutex::new(None),
        }
    }

    /// Spawn the loop. Calling this while it already runs only logs a warning.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            warn!("Reminder scheduler already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        match inner.check_and_notify().await {
                            Ok(0) => {}
                            Ok(n) => info!(notified = n, "Reminder pass complete"),
                            Err(e) => error!(error = %e, "Reminder pass failed"),
                        }
                    }
                }
            }
            debug!("Reminder loop exited");
        });

        info!(
            interval_secs = self.inner.interval.as_secs(),
            lookahead_hours = self.inner.lookahead.num_hours(),
            "Reminder scheduler started"
        );
        *running = Some(Running { shutdown, handle });
    }

    /// Signal the loop and wait for it to finish. No-op when stopped.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(Running { shutdown, handle }) = running else {
            return;
        };
        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "Reminder loop task failed");
        }
        info!("Reminder scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// One pass over every workspace. Returns how many reminders were newly
    /// marked notified.
    pub async fn check_and_notify(&self) -> Result<usize, StoreError> {
        self.inner.check_and_notify().await
    }
}

impl Inner {
    async fn check_and_notify(&self) -> Result<usize, StoreError> {
        let horizon = Utc::now() + self.lookahead;
        let workspaces = self.store.with(|db| db.list_workspaces())?;

        let mut notified = 0;
        for workspace in workspaces {
            let due = match self
                .store
                .with(|db| db.due_reminders(workspace.id, horizon))
            {
                Ok(due) => due,
                Err(e) => {
                    error!(workspace = %workspace.id, error = %e, "Failed to load due reminders");
                    continue;
                }
            };

            for reminder in due {
                match self.notify_reminder(&reminder).await {
                    Ok(true) => notified += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(reminder = %reminder.id, error = %e, "Failed to process reminder")
                    }
                }
            }
        }
        Ok(notified)
    }

    async fn notify_reminder(&self, reminder: &Reminder) -> Result<bool, StoreError> {
        let ws = reminder.workspace_id;
        let rooms = self.store.with(|db| db.list_aggregate_rooms(ws))?;
        if rooms.is_empty() {
            debug!(reminder = %reminder.id, workspace = %ws, "No aggregate room, skipping reminder");
            return Ok(false);
        }

        let notification = reminder_notification(reminder);
        let mut delivered = 0;
        for room in &rooms {
            let destination = Destination {
                room_id: room.id,
                channel_external_id: room.external_id.clone(),
            };
            if self.notifier.deliver(&destination, &notification).await.is_ok() {
                delivered += 1;
            }
        }

        if delivered == 0 {
            warn!(reminder = %reminder.id, "Reminder not delivered to any room, will retry");
            return Ok(false);
        }

        let marked = self
            .store
            .with(|db| db.mark_reminder_notified(ws, reminder.id))?;
        if marked {
            info!(reminder = %reminder.id, rooms = delivered, "Reminder notified");
        }
        Ok(marked)
    }
}

pub fn reminder_notification(reminder: &Reminder) -> Notification {
    let mut notification = Notification::new("Reminder", format!("**{}**", reminder.title))
        .field(
            "Due",
            reminder.due_at.format("%Y-%m-%d %H:%M").to_string(),
            true,
        )
        .field("Status", reminder.status.as_str(), true);

    if let Some(description) = &reminder.description {
        notification = notification.field("Description", description, false);
    }

    notification.footer(format!("Reminder ID: {}", reminder.id))
}
