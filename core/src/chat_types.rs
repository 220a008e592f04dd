/// Shared types for the chat engine and its rendering layer
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The signed-in user, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default, alias = "displayName", alias = "nickname")]
    pub display_name: String,
    #[serde(default, alias = "avatarRef", alias = "avatar_url", alias = "avatarUrl")]
    pub avatar_ref: Option<String>,
}

/// Which side of the listing the signed-in user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Seller,
    Buyer,
}

/// Listing the conversation is about
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub title: String,
    pub thumbnail_ref: Option<String>,
    pub price: Option<i64>,
    pub status: Option<String>,
}

/// One buyer/seller conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub product: ProductRef,
    pub seller_id: String,
    pub buyer_id: String,
    pub my_role: Role,
    pub counterparty_name: String,
    pub counterparty_avatar_ref: Option<String>,
    pub unread_count: u32,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
}

impl Room {
    /// User id of the other participant
    pub fn counterparty_id(&self) -> &str {
        match self.my_role {
            Role::Seller => &self.buyer_id,
            Role::Buyer => &self.seller_id,
        }
    }
}

/// Client-only messages that never carry a server id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticKind {
    Intro,
    PeerLeft,
}

/// Identity of a message through its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageKey {
    /// Optimistic entry waiting for its server echo
    Pending { temp_id: String },
    /// Optimistic entry whose echo never arrived in time
    Failed { temp_id: String },
    /// Server-assigned, ordered within a room
    Confirmed { id: u64 },
    Synthetic { kind: SyntheticKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    System,
}

/// Message payload; exactly one per message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
    Image { image_ref: String },
    System { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub key: MessageKey,
    pub room_id: String,
    pub sender_id: String,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
    pub from_me: bool,
    pub read: bool,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self.content {
            Content::Text { .. } => MessageKind::Text,
            Content::Image { .. } => MessageKind::Image,
            Content::System { .. } => MessageKind::System,
        }
    }

    /// Server id, if confirmed
    pub fn server_id(&self) -> Option<u64> {
        match self.key {
            MessageKey::Confirmed { id } => Some(id),
            _ => None,
        }
    }

    /// Temporary id of an unconfirmed optimistic entry
    pub fn temp_id(&self) -> Option<&str> {
        match &self.key {
            MessageKey::Pending { temp_id } | MessageKey::Failed { temp_id } => Some(temp_id),
            _ => None,
        }
    }

    pub fn is_intro(&self) -> bool {
        matches!(
            self.key,
            MessageKey::Synthetic {
                kind: SyntheticKind::Intro
            }
        )
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.key, MessageKey::Synthetic { .. })
    }

    /// Short text for room list previews
    pub fn preview(&self) -> String {
        match &self.content {
            Content::Text { text } | Content::System { text } => text.clone(),
            Content::Image { .. } => "[image]".to_string(),
        }
    }

    pub(crate) fn synthetic(kind: SyntheticKind, room_id: &str, text: String) -> Self {
        Self {
            key: MessageKey::Synthetic { kind },
            room_id: room_id.to_string(),
            sender_id: String::new(),
            content: Content::System { text },
            timestamp: Utc::now(),
            from_me: false,
            read: false,
        }
    }
}

/// One row of the rendered conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineItem {
    DateDivider { date: NaiveDate },
    Message { message: Message },
}

/// Interleave day dividers into an ordered message list.
/// The intro banner is never preceded by a divider.
pub fn build_timeline(messages: &[Message]) -> Vec<TimelineItem> {
    let mut items = Vec::with_capacity(messages.len() + 4);
    let mut last_day: Option<NaiveDate> = None;

    for message in messages {
        if !message.is_intro() {
            let day = message.timestamp.date_naive();
            if last_day != Some(day) {
                items.push(TimelineItem::DateDivider { date: day });
                last_day = Some(day);
            }
        }
        items.push(TimelineItem::Message {
            message: message.clone(),
        });
    }

    items
}

/// Change notifications streamed to the rendering layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RoomsChanged,
    ActiveRoomChanged { room_id: Option<String> },
    TimelineChanged { room_id: String },
    SendFailed { room_id: String, temp_id: String },
}

/// Read-only view of the engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSnapshot {
    pub identity: Identity,
    pub rooms: Vec<Room>,
    pub active_room: Option<String>,
    pub timeline: Vec<TimelineItem>,
    pub has_more_before: bool,
    pub connected: bool,
    pub directory_error: Option<String>,
    pub room_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn text_at(id: u64, day: u32, hour: u32) -> Message {
        Message {
            key: MessageKey::Confirmed { id },
            room_id: "r1".to_string(),
            sender_id: "u2".to_string(),
            content: Content::Text {
                text: format!("m{}", id),
            },
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
            from_me: false,
            read: false,
        }
    }

    #[test]
    fn test_timeline_dividers_per_day() {
        let intro = Message::synthetic(SyntheticKind::Intro, "r1", "hi".to_string());
        let messages = vec![intro, text_at(1, 1, 9), text_at(2, 1, 18), text_at(3, 2, 8)];

        let timeline = build_timeline(&messages);
        let dividers: Vec<_> = timeline
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                TimelineItem::DateDivider { date } => Some((i, *date)),
                _ => None,
            })
            .collect();

        assert_eq!(dividers.len(), 2);
        // intro stays first, divider comes after it
        assert!(matches!(&timeline[0], TimelineItem::Message { message } if message.is_intro()));
        assert_eq!(dividers[0].0, 1);
        assert_eq!(dividers[1].1, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(timeline.len(), messages.len() + 2);
    }

    #[test]
    fn test_counterparty_follows_role() {
        let mut room = Room {
            room_id: "r1".to_string(),
            product: ProductRef::default(),
            seller_id: "s".to_string(),
            buyer_id: "b".to_string(),
            my_role: Role::Seller,
            counterparty_name: String::new(),
            counterparty_avatar_ref: None,
            unread_count: 0,
            last_activity_at: None,
            last_message_preview: None,
        };
        assert_eq!(room.counterparty_id(), "b");
        room.my_role = Role::Buyer;
        assert_eq!(room.counterparty_id(), "s");
    }
}
