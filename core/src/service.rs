/// Request/response collaborators the engine depends on
use crate::chat_types::Identity;
use crate::error::Result;
use crate::normalize::{RawMessage, RawRoom};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// A file picked for sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Payload of one outbound send, on either path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub temp_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

/// Identity provider, room and message sources, fallback calls and the asset store.
///
/// Every call may fail; the engine decides per call whether a failure is
/// swallowed or surfaced.
pub trait ChatService: Send + Sync + 'static {
    fn get_self(&self) -> impl Future<Output = Result<Identity>> + Send;

    fn list_rooms(&self, identity_id: &str) -> impl Future<Output = Result<Vec<RawRoom>>> + Send;

    /// Up to `page_size` messages, newest page first, strictly older than `before_id` when given
    fn list_messages(
        &self,
        room_id: &str,
        page_size: usize,
        before_id: Option<u64>,
    ) -> impl Future<Output = Result<Vec<RawMessage>>> + Send;

    /// Highest message id `peer_id` has seen in the room
    fn get_last_seen(&self, room_id: &str, peer_id: &str) -> impl Future<Output = Result<u64>> + Send;

    fn post_message(
        &self,
        room_id: &str,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<()>> + Send;

    fn post_read_advance(
        &self,
        room_id: &str,
        reader_id: &str,
        up_to_id: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    fn post_leave(&self, room_id: &str, actor_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Store an asset and return its durable reference
    fn upload(&self, asset: &Asset) -> impl Future<Output = Result<String>> + Send;
}
