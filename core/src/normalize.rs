/// Raw records from the data source, and their conversion into engine types.
///
/// The backend has renamed fields more than once; every variant still seen
/// in the wild is accepted through serde aliases.
use crate::chat_types::{Content, Message, MessageKey, ProductRef, Role, Room};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Nested product block (newer payloads)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProduct {
    #[serde(default, alias = "name")]
    pub title: Option<String>,
    #[serde(default, alias = "thumbnailRef", alias = "thumbnail", alias = "image_url", alias = "imageUrl")]
    pub thumbnail_ref: Option<String>,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default, alias = "state", alias = "saleStatus")]
    pub status: Option<String>,
}

/// Room record as returned by the room source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRoom {
    #[serde(default, alias = "roomId", alias = "id", alias = "chat_room_id", alias = "chatRoomId")]
    pub room_id: Option<Value>,
    #[serde(default, alias = "sellerId", alias = "seller")]
    pub seller_id: Option<Value>,
    #[serde(default, alias = "buyerId", alias = "buyer")]
    pub buyer_id: Option<Value>,

    #[serde(default)]
    pub product: Option<RawProduct>,
    #[serde(default, alias = "productTitle", alias = "item_title")]
    pub product_title: Option<String>,
    #[serde(default, alias = "productThumbnail", alias = "product_image")]
    pub product_thumbnail: Option<String>,
    #[serde(default, alias = "productPrice")]
    pub product_price: Option<i64>,
    #[serde(default, alias = "productStatus")]
    pub product_status: Option<String>,

    #[serde(default, alias = "counterpartyName", alias = "partner_name", alias = "otherUserName")]
    pub counterparty_name: Option<String>,
    #[serde(default, alias = "counterpartyAvatarRef", alias = "partner_avatar", alias = "otherUserAvatar")]
    pub counterparty_avatar_ref: Option<String>,
    #[serde(default, alias = "sellerName")]
    pub seller_name: Option<String>,
    #[serde(default, alias = "buyerName")]
    pub buyer_name: Option<String>,
    #[serde(default, alias = "sellerAvatar")]
    pub seller_avatar: Option<String>,
    #[serde(default, alias = "buyerAvatar")]
    pub buyer_avatar: Option<String>,

    #[serde(default, alias = "unreadCount", alias = "unread")]
    pub unread_count: Option<u32>,
    #[serde(default, alias = "lastActivityAt", alias = "updated_at", alias = "updatedAt", alias = "last_message_time")]
    pub last_activity_at: Option<Value>,
    #[serde(default, alias = "lastMessagePreview", alias = "last_message", alias = "lastMessage")]
    pub last_message_preview: Option<String>,
}

/// Message record as returned by the message source or pushed live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default, alias = "messageId", alias = "message_id")]
    pub id: Option<Value>,
    #[serde(default, alias = "tempId", alias = "client_id")]
    pub temp_id: Option<String>,
    #[serde(default, alias = "roomId", alias = "chat_room_id")]
    pub room_id: Option<Value>,
    #[serde(default, alias = "senderId", alias = "sender", alias = "user_id")]
    pub sender_id: Option<Value>,
    #[serde(default, alias = "message", alias = "content", alias = "body")]
    pub text: Option<String>,
    #[serde(default, alias = "imageRef", alias = "image_url", alias = "imageUrl", alias = "image")]
    pub image_ref: Option<String>,
    #[serde(default, alias = "createdAt", alias = "created_at", alias = "sent_at", alias = "time")]
    pub timestamp: Option<Value>,
    #[serde(default, alias = "isRead", alias = "is_read")]
    pub read: Option<bool>,
}

/// Ids arrive as numbers or strings depending on the endpoint
pub fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// RFC3339 string or epoch milliseconds
pub fn value_to_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

impl RawRoom {
    /// Normalize into a `Room` for the given identity. Records without an id are dropped.
    pub fn into_room(self, identity_id: &str) -> Option<Room> {
        let room_id = self.room_id.as_ref().and_then(value_to_id)?;
        let seller_id = self.seller_id.as_ref().and_then(value_to_id).unwrap_or_default();
        let buyer_id = self.buyer_id.as_ref().and_then(value_to_id).unwrap_or_default();
        let my_role = if seller_id == identity_id {
            Role::Seller
        } else {
            Role::Buyer
        };

        let nested = self.product.unwrap_or_default();
        let product = ProductRef {
            title: non_empty(nested.title)
                .or(non_empty(self.product_title))
                .unwrap_or_default(),
            thumbnail_ref: non_empty(nested.thumbnail_ref).or(non_empty(self.product_thumbnail)),
            price: nested.price.or(self.product_price),
            status: non_empty(nested.status).or(non_empty(self.product_status)),
        };

        let (peer_name, peer_avatar) = match my_role {
            Role::Seller => (self.buyer_name, self.buyer_avatar),
            Role::Buyer => (self.seller_name, self.seller_avatar),
        };

        Some(Room {
            room_id,
            product,
            seller_id,
            buyer_id,
            my_role,
            counterparty_name: non_empty(self.counterparty_name)
                .or(non_empty(peer_name))
                .unwrap_or_default(),
            counterparty_avatar_ref: non_empty(self.counterparty_avatar_ref)
                .or(non_empty(peer_avatar)),
            unread_count: self.unread_count.unwrap_or(0),
            last_activity_at: self.last_activity_at.as_ref().and_then(value_to_time),
            last_message_preview: non_empty(self.last_message_preview),
        })
    }
}

impl RawMessage {
    /// Normalize into a `Message`.
    ///
    /// `fallback_room` is used when the record omits its room. Returns `None`
    /// for records with no payload; a record with both text and an image
    /// becomes an image message.
    pub fn into_message(self, identity_id: &str, fallback_room: &str) -> Option<Message> {
        let text = non_empty(self.text);
        let image_ref = non_empty(self.image_ref);

        let content = match (text, image_ref) {
            (Some(text), Some(image_ref)) => {
                debug!("Message carries both text and image, keeping image (dropped {} chars)", text.len());
                Content::Image { image_ref }
            }
            (None, Some(image_ref)) => Content::Image { image_ref },
            (Some(text), None) => Content::Text { text },
            (None, None) => return None,
        };

        let server_id = self.id.as_ref().and_then(value_to_u64);
        let key = match (server_id, non_empty(self.temp_id)) {
            (Some(id), _) => MessageKey::Confirmed { id },
            (None, Some(temp_id)) => MessageKey::Pending { temp_id },
            (None, None) => return None,
        };

        let sender_id = self.sender_id.as_ref().and_then(value_to_id).unwrap_or_default();
        let room_id = self
            .room_id
            .as_ref()
            .and_then(value_to_id)
            .unwrap_or_else(|| fallback_room.to_string());

        Some(Message {
            key,
            room_id,
            from_me: sender_id == identity_id,
            sender_id,
            content,
            timestamp: self
                .timestamp
                .as_ref()
                .and_then(value_to_time)
                .unwrap_or_else(Utc::now),
            read: self.read.unwrap_or(false),
        })
    }
}

/// Map a fetched page, dropping invalid rows and sorting oldest-first
pub fn map_page(raw: Vec<RawMessage>, identity_id: &str, room_id: &str) -> Vec<Message> {
    let mut page: Vec<Message> = raw
        .into_iter()
        .filter_map(|m| m.into_message(identity_id, room_id))
        .filter(|m| m.server_id().is_some())
        .collect();
    page.sort_by_key(|m| m.server_id());
    page.dedup_by_key(|m| m.server_id());
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_room_field_variants() {
        let camel: RawRoom = serde_json::from_value(json!({
            "roomId": 7,
            "sellerId": "s1",
            "buyerId": "b1",
            "productTitle": "Bike",
            "productPrice": 120,
            "sellerName": "Sam",
            "unreadCount": 3,
            "updatedAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        let room = camel.into_room("b1").unwrap();
        assert_eq!(room.room_id, "7");
        assert_eq!(room.my_role, Role::Buyer);
        assert_eq!(room.product.title, "Bike");
        assert_eq!(room.product.price, Some(120));
        assert_eq!(room.counterparty_name, "Sam");
        assert_eq!(room.unread_count, 3);
        assert!(room.last_activity_at.is_some());

        let nested: RawRoom = serde_json::from_value(json!({
            "room_id": "r-2",
            "seller": 5,
            "buyer": 6,
            "product": { "name": "Lamp", "thumbnail": "lamp.png", "status": "sold" },
            "counterparty_name": "Bo",
            "last_activity_at": 1714557600000i64
        }))
        .unwrap();
        let room = nested.into_room("5").unwrap();
        assert_eq!(room.my_role, Role::Seller);
        assert_eq!(room.counterparty_id(), "6");
        assert_eq!(room.product.thumbnail_ref.as_deref(), Some("lamp.png"));
        assert_eq!(room.counterparty_name, "Bo");
    }

    #[test]
    fn test_room_without_id_is_dropped() {
        let raw: RawRoom = serde_json::from_value(json!({ "sellerId": "s" })).unwrap();
        assert!(raw.into_room("s").is_none());
    }

    #[test]
    fn test_message_without_payload_is_dropped() {
        let raw: RawMessage = serde_json::from_value(json!({ "id": 3, "senderId": "u" })).unwrap();
        assert!(raw.into_message("u", "r").is_none());
    }

    #[test]
    fn test_message_with_both_payloads_becomes_image() {
        let raw: RawMessage = serde_json::from_value(json!({
            "message_id": "9",
            "sender": "me",
            "message": "look",
            "imageUrl": "https://cdn/x.jpg"
        }))
        .unwrap();
        let msg = raw.into_message("me", "r1").unwrap();
        assert_eq!(msg.server_id(), Some(9));
        assert_eq!(msg.room_id, "r1");
        assert!(msg.from_me);
        assert_eq!(
            msg.content,
            Content::Image {
                image_ref: "https://cdn/x.jpg".to_string()
            }
        );
    }

    #[test]
    fn test_page_is_sorted_and_deduplicated() {
        let raw: Vec<RawMessage> = serde_json::from_value(json!([
            { "id": 12, "text": "c" },
            { "id": 10, "text": "a" },
            { "id": 12, "text": "c" },
            { "id": 11 },
            { "tempId": "t-1", "text": "pending rows never come from pages" }
        ]))
        .unwrap();
        let ids: Vec<_> = map_page(raw, "me", "r").iter().filter_map(|m| m.server_id()).collect();
        assert_eq!(ids, vec![10, 12]);
    }
}
