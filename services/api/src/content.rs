//! Free mentorship sessions, free signals and their availability flags

use chrono::{DateTime, Utc};
use common::{Direction, DocumentStore, Fields, Query, SharedStore, StoreError, server_timestamp};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::collections::{MENTORSHIP_FLAG, SIGNALS_FLAG, config, mentorship, signals};
use crate::models::{FeatureFlag, FreeSignal, MentorshipSession, decode_valid};
use crate::roles::Actor;

/// Errors of content management
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Only admins can manage content")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ContentResult<T> = Result<T, ContentError>;

/// Broadcast feature behind an availability flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    FreeMentorship,
    FreeSignals,
}

impl Feature {
    fn flag_id(&self) -> &'static str {
        match self {
            Feature::FreeMentorship => MENTORSHIP_FLAG,
            Feature::FreeSignals => SIGNALS_FLAG,
        }
    }
}

/// New mentorship session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub zoom_link: String,
    pub date: DateTime<Utc>,
}

/// Edit of a mentorship session; absent fields are kept
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub zoom_link: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

fn required(field: &str, value: &str) -> ContentResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ContentError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

/// Mentorship sessions and free signals
#[derive(Clone)]
pub struct ContentBoard {
    store: SharedStore,
}

impl ContentBoard {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn require_admin(actor: &Actor) -> ContentResult<()> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(ContentError::Forbidden)
        }
    }

    /// Whether a feature is offered; a missing flag reads as available
    pub async fn is_available(&self, feature: Feature) -> ContentResult<bool> {
        let flag = match self.store.get(&config(), feature.flag_id()).await? {
            Some(doc) => doc.decode::<FeatureFlag>()?,
            None => FeatureFlag::default(),
        };
        Ok(flag.is_available)
    }

    /// Create the flag document if it does not exist yet
    pub async fn ensure_flag(&self, actor: &Actor, feature: Feature) -> ContentResult<()> {
        Self::require_admin(actor)?;
        if self.store.get(&config(), feature.flag_id()).await?.is_none() {
            self.set_available(actor, feature, true).await?;
        }
        Ok(())
    }

    pub async fn set_available(
        &self,
        actor: &Actor,
        feature: Feature,
        available: bool,
    ) -> ContentResult<()> {
        Self::require_admin(actor)?;
        let mut data = Fields::new();
        data.insert("isAvailable".into(), json!(available));
        self.store.set(&config(), feature.flag_id(), data, true).await?;
        info!("{:?} availability set to {} by {}", feature, available, actor.uid);
        Ok(())
    }

    /// Flip the availability flag, returning the new value
    pub async fn toggle(&self, actor: &Actor, feature: Feature) -> ContentResult<bool> {
        Self::require_admin(actor)?;
        let available = !self.is_available(feature).await?;
        self.set_available(actor, feature, available).await?;
        Ok(available)
    }

    /// All sessions by date
    pub async fn sessions(&self) -> ContentResult<Vec<MentorshipSession>> {
        let query = Query::new(mentorship()).order_by("date", Direction::Asc);
        let docs = self.store.query(&query).await?;
        Ok(decode_valid(&docs))
    }

    /// Sessions as shown to visitors; `None` while the feature is off
    pub async fn public_sessions(&self) -> ContentResult<Option<Vec<MentorshipSession>>> {
        if !self.is_available(Feature::FreeMentorship).await? {
            return Ok(None);
        }
        let sessions = self.sessions().await?;
        Ok(Some(
            sessions
                .into_iter()
                .map(MentorshipSession::public_view)
                .collect(),
        ))
    }

    /// Add a session; new sessions start inactive
    pub async fn add_session(
        &self,
        actor: &Actor,
        session: NewSession,
    ) -> ContentResult<MentorshipSession> {
        Self::require_admin(actor)?;
        let title = required("Title", &session.title)?;
        let zoom_link = required("Zoom link", &session.zoom_link)?;

        let mut data = Fields::new();
        data.insert("title".into(), json!(title));
        data.insert(
            "description".into(),
            json!(session.description.map(|d| d.trim().to_string())),
        );
        data.insert("zoomLink".into(), json!(zoom_link));
        data.insert("date".into(), json!(session.date.timestamp_micros()));
        data.insert("isActive".into(), json!(false));
        data.insert("createdBy".into(), json!(actor.uid));
        data.insert("timestamp".into(), server_timestamp());

        let doc = self.store.create(&mentorship(), data).await?;
        info!("Mentorship session {} added by {}", doc.id, actor.uid);
        Ok(doc.decode()?)
    }

    pub async fn update_session(
        &self,
        actor: &Actor,
        id: &str,
        update: SessionUpdate,
    ) -> ContentResult<MentorshipSession> {
        Self::require_admin(actor)?;
        let mut patch = Fields::new();
        if let Some(title) = update.title {
            patch.insert("title".into(), json!(required("Title", &title)?));
        }
        if let Some(zoom_link) = update.zoom_link {
            patch.insert("zoomLink".into(), json!(required("Zoom link", &zoom_link)?));
        }
        if let Some(description) = update.description {
            patch.insert("description".into(), json!(description.trim()));
        }
        if let Some(date) = update.date {
            patch.insert("date".into(), json!(date.timestamp_micros()));
        }
        self.patch_session(id, patch).await
    }

    pub async fn set_session_active(
        &self,
        actor: &Actor,
        id: &str,
        active: bool,
    ) -> ContentResult<MentorshipSession> {
        Self::require_admin(actor)?;
        let mut patch = Fields::new();
        patch.insert("isActive".into(), json!(active));
        self.patch_session(id, patch).await
    }

    async fn patch_session(&self, id: &str, patch: Fields) -> ContentResult<MentorshipSession> {
        let doc = self
            .store
            .update(&mentorship(), id, patch)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => ContentError::NotFound(id.to_string()),
                other => other.into(),
            })?;
        Ok(doc.decode()?)
    }

    pub async fn delete_session(&self, actor: &Actor, id: &str) -> ContentResult<()> {
        Self::require_admin(actor)?;
        if !self.store.delete(&mentorship(), id).await? {
            return Err(ContentError::NotFound(id.to_string()));
        }
        info!("Mentorship session {} deleted by {}", id, actor.uid);
        Ok(())
    }

    /// All signals, oldest first
    pub async fn signals(&self) -> ContentResult<Vec<FreeSignal>> {
        let query = Query::new(signals()).order_by("timestamp", Direction::Asc);
        let docs = self.store.query(&query).await?;
        Ok(decode_valid(&docs))
    }

    /// Signals as shown to visitors; `None` while the feature is off
    pub async fn public_signals(&self) -> ContentResult<Option<Vec<FreeSignal>>> {
        if !self.is_available(Feature::FreeSignals).await? {
            return Ok(None);
        }
        Ok(Some(self.signals().await?))
    }

    pub async fn add_signal(&self, actor: &Actor, text: &str) -> ContentResult<FreeSignal> {
        Self::require_admin(actor)?;
        let text = required("Signal text", text)?;

        let mut data = Fields::new();
        data.insert("text".into(), json!(text));
        data.insert("senderUid".into(), json!(actor.uid));
        data.insert("senderRole".into(), json!(actor.sender_role()));
        data.insert("timestamp".into(), server_timestamp());

        let doc = self.store.create(&signals(), data).await?;
        info!("Free signal {} posted by {}", doc.id, actor.uid);
        Ok(doc.decode()?)
    }

    pub async fn delete_signal(&self, actor: &Actor, id: &str) -> ContentResult<()> {
        Self::require_admin(actor)?;
        if !self.store.delete(&signals(), id).await? {
            return Err(ContentError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
