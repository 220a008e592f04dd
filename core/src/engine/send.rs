/// Optimistic send
use super::ChatEngine;
use crate::chat_types::{Content, EngineEvent, Message, MessageKey};
use crate::error::{ChatError, Result};
use crate::service::{Asset, ChatService, OutgoingMessage};
use crate::transport::{Channel, Transport};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

/// What the user composed
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: Option<String>,
    pub asset: Option<Asset>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            asset: None,
        }
    }

    pub fn image(asset: Asset) -> Self {
        Self {
            text: None,
            asset: Some(asset),
        }
    }
}

impl<S: ChatService, C: Channel> ChatEngine<S, C> {
    /// Insert an optimistic message and dispatch it.
    ///
    /// Returns the temp id, or `None` when there was nothing to send. The
    /// optimistic entry is only ever replaced by its echo; on failure it
    /// stays pending and the error goes back to the caller.
    pub async fn send(&self, draft: Draft) -> Result<Option<String>> {
        let text = draft
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let temp_id = Uuid::new_v4().to_string();

        let content = if let Some(asset) = &draft.asset {
            // local preview until the echo brings the uploaded reference
            Content::Image {
                image_ref: format!("local://{}/{}", temp_id, asset.file_name),
            }
        } else if let Some(text) = &text {
            Content::Text { text: text.clone() }
        } else {
            return Ok(None);
        };

        let room_id = {
            let mut state = self.state.write().await;
            let room_id = state
                .directory
                .active()
                .map(str::to_string)
                .ok_or(ChatError::NoActiveRoom)?;
            state.cache.room_mut(&room_id).push_pending(Message {
                key: MessageKey::Pending {
                    temp_id: temp_id.clone(),
                },
                room_id: room_id.clone(),
                sender_id: self.identity.id.clone(),
                content,
                timestamp: Utc::now(),
                from_me: true,
                read: false,
            });
            room_id
        };
        self.notify(EngineEvent::TimelineChanged {
            room_id: room_id.clone(),
        });

        let image_ref = match &draft.asset {
            Some(asset) => {
                let uploaded = self.service.upload(asset).await.map_err(|e| {
                    warn!("Upload of {} failed: {}", asset.file_name, e);
                    match e {
                        ChatError::Upload(_) => e,
                        other => ChatError::Upload(other.to_string()),
                    }
                })?;
                Some(uploaded)
            }
            None => None,
        };

        let outgoing = OutgoingMessage {
            temp_id: temp_id.clone(),
            sender_id: self.identity.id.clone(),
            text,
            image_ref,
        };
        let route = self.route(&room_id).await;
        debug!(
            "Sending {} to room {} ({})",
            temp_id,
            room_id,
            if route.is_live() { "live" } else { "fallback" }
        );
        route.send_message(&room_id, &outgoing).await.map_err(|e| {
            warn!("Send {} to room {} failed: {}", temp_id, room_id, e);
            e
        })?;

        Ok(Some(temp_id))
    }
}
