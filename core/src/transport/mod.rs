/// Live channel contract and the dual-path dispatch capability.
///
/// `Route` picks the live channel when it reports connected and the
/// request/response fallback otherwise, so coordinators only ever talk to
/// `Transport`.
pub mod memory;

use crate::error::Result;
use crate::normalize::{RawMessage, RawRoom};
use crate::service::{ChatService, OutgoingMessage};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::debug;

/// Events pushed on the live channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    Message {
        message: RawMessage,
    },
    ReadAdvance {
        #[serde(default)]
        room_id: Option<String>,
        reader_id: String,
        up_to_id: u64,
    },
    UnreadBadge {
        room_id: String,
        unread_count: u32,
    },
    Leave {
        #[serde(default)]
        room_id: Option<String>,
        actor_id: String,
    },
    RoomCreated {
        room: RawRoom,
    },
    /// Typing indicators, presence and anything else not chat-related
    #[serde(other)]
    Other,
}

/// Duplex push connection scoped to one room at a time.
///
/// Each successful `connect` starts a fresh incoming sequence; offsets
/// passed to `events_since` refer to that sequence.
pub trait Channel: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    fn connect(&self, room_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    fn send_text(&self, text: &str, temp_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn send_image(&self, image_ref: &str, temp_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn send_read_advance(&self, up_to_id: u64) -> impl Future<Output = Result<()>> + Send;

    fn send_leave(&self) -> impl Future<Output = Result<()>> + Send;

    /// Incoming events from `offset` on, in arrival order
    fn events_since(&self, offset: usize) -> impl Future<Output = Vec<ChannelEvent>> + Send;
}

/// Outbound operations shared by the send, read and leave paths
pub trait Transport {
    fn send_message(
        &self,
        room_id: &str,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<()>> + Send;

    fn read_advance(
        &self,
        room_id: &str,
        reader_id: &str,
        up_to_id: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    fn leave(&self, room_id: &str, actor_id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Dispatch over the connected channel
pub struct LiveTransport<'a, C> {
    channel: &'a C,
}

impl<C: Channel> Transport for LiveTransport<'_, C> {
    async fn send_message(&self, _room_id: &str, message: &OutgoingMessage) -> Result<()> {
        if let Some(image_ref) = &message.image_ref {
            self.channel.send_image(image_ref, &message.temp_id).await?;
        }
        if let Some(text) = &message.text {
            self.channel.send_text(text, &message.temp_id).await?;
        }
        Ok(())
    }

    async fn read_advance(&self, _room_id: &str, _reader_id: &str, up_to_id: u64) -> Result<()> {
        self.channel.send_read_advance(up_to_id).await
    }

    async fn leave(&self, _room_id: &str, _actor_id: &str) -> Result<()> {
        self.channel.send_leave().await
    }
}

/// Dispatch through single request/response calls
pub struct FallbackTransport<'a, S> {
    service: &'a S,
}

impl<S: ChatService> Transport for FallbackTransport<'_, S> {
    async fn send_message(&self, room_id: &str, message: &OutgoingMessage) -> Result<()> {
        self.service.post_message(room_id, message).await
    }

    async fn read_advance(&self, room_id: &str, reader_id: &str, up_to_id: u64) -> Result<()> {
        self.service.post_read_advance(room_id, reader_id, up_to_id).await
    }

    async fn leave(&self, room_id: &str, actor_id: &str) -> Result<()> {
        self.service.post_leave(room_id, actor_id).await
    }
}

pub enum Route<'a, S, C> {
    Live(LiveTransport<'a, C>),
    Fallback(FallbackTransport<'a, S>),
}

impl<'a, S: ChatService, C: Channel> Route<'a, S, C> {
    /// Choose the path from the channel's current connection state
    pub fn select(service: &'a S, channel: &'a C) -> Self {
        if channel.is_connected() {
            debug!("Dispatching over live channel");
            Route::Live(LiveTransport { channel })
        } else {
            debug!("Channel down, dispatching over fallback");
            Route::Fallback(FallbackTransport { service })
        }
    }

    pub fn fallback(service: &'a S) -> Self {
        Route::Fallback(FallbackTransport { service })
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Route::Live(_))
    }
}

impl<S: ChatService, C: Channel> Transport for Route<'_, S, C> {
    async fn send_message(&self, room_id: &str, message: &OutgoingMessage) -> Result<()> {
        match self {
            Route::Live(t) => t.send_message(room_id, message).await,
            Route::Fallback(t) => t.send_message(room_id, message).await,
        }
    }

    async fn read_advance(&self, room_id: &str, reader_id: &str, up_to_id: u64) -> Result<()> {
        match self {
            Route::Live(t) => t.read_advance(room_id, reader_id, up_to_id).await,
            Route::Fallback(t) => t.read_advance(room_id, reader_id, up_to_id).await,
        }
    }

    async fn leave(&self, room_id: &str, actor_id: &str) -> Result<()> {
        match self {
            Route::Live(t) => t.leave(room_id, actor_id).await,
            Route::Fallback(t) => t.leave(room_id, actor_id).await,
        }
    }
}
