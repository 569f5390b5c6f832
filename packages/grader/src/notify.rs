use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::event::GradedEvent;
use common::hook::{Hook, HookAction, HookRegistry};
use dashmap::DashMap;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// Receives grading events once the final status is persisted.
///
/// Failures are logged by the caller and never change the grade.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn graded(&self, event: &GradedEvent) -> Result<()>;
}

/// Notifier that fans events out to registered hooks.
pub struct HookNotifier {
    registry: Arc<HookRegistry>,
}

impl HookNotifier {
    pub fn new(registry: HookRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

#[async_trait]
impl Notifier for HookNotifier {
    async fn graded(&self, event: &GradedEvent) -> Result<()> {
        let delivery = self.registry.trigger(event).await;
        if !delivery.failed.is_empty() {
            bail!("hooks failed: {}", delivery.failed.join(", "));
        }
        Ok(())
    }
}

/// Notifier that drops every event.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn graded(&self, _event: &GradedEvent) -> Result<()> {
        Ok(())
    }
}

/// Per-user notification record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub kind: &'static str,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// In-process notification inbox, filled by a hook on graded events.
#[derive(Default)]
pub struct NotificationFeed {
    inbox: DashMap<String, Vec<Notification>>,
}

impl NotificationFeed {
    pub const ID: &'static str = "notification_feed";

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Notifications of a user, newest first.
    pub fn list(&self, user_id: &str) -> Vec<Notification> {
        self.inbox
            .get(user_id)
            .map(|list| list.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Hook<GradedEvent> for NotificationFeed {
    fn id(&self) -> &str {
        Self::ID
    }

    fn topics(&self) -> &[&str] {
        &[GradedEvent::TOPIC]
    }

    async fn on_event(&self, e: &GradedEvent) -> Result<HookAction> {
        let notification = Notification {
            id: Uuid::now_v7(),
            user_id: e.user_id.clone(),
            kind: "graded",
            payload: serde_json::json!({
                "submission_id": e.submission_id,
                "assignment_id": e.assignment_id,
                "score": e.score,
            }),
            created_at: e.graded_at,
        };
        self.inbox
            .entry(e.user_id.clone())
            .or_default()
            .push(notification);
        Ok(HookAction::Pass)
    }
}

/// Logs every graded event.
pub struct LogHook;

#[async_trait]
impl Hook<GradedEvent> for LogHook {
    fn id(&self) -> &str {
        "log"
    }

    fn topics(&self) -> &[&str] {
        &[GradedEvent::TOPIC]
    }

    async fn on_event(&self, e: &GradedEvent) -> Result<HookAction> {
        info!(
            submission_id = %e.submission_id,
            user_id = %e.user_id,
            assignment_id = %e.assignment_id,
            score = %e.score,
            "Submission graded"
        );
        Ok(HookAction::Pass)
    }
}
