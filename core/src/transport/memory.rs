/// In-process channel: incoming events are pushed by the embedder,
/// outbound sends are recorded for inspection.
use super::{Channel, ChannelEvent};
use crate::error::{ChatError, Result};
use crate::utils::event_log::EventLog;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Something the engine sent over the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text { room_id: String, text: String, temp_id: String },
    Image { room_id: String, image_ref: String, temp_id: String },
    ReadAdvance { room_id: String, up_to_id: u64 },
    Leave { room_id: String },
}

#[derive(Default)]
struct MemoryState {
    room_id: Option<String>,
    incoming: EventLog<ChannelEvent>,
    outbound: Vec<Outbound>,
    connects: Vec<String>,
}

pub struct MemoryChannel {
    available: AtomicBool,
    connected: AtomicBool,
    state: RwLock<MemoryState>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    /// A channel that accepts connections
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// A channel whose connects always fail
    pub fn unavailable() -> Self {
        let channel = Self::new();
        channel.available.store(false, Ordering::SeqCst);
        channel
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Deliver an incoming event on the current subscription
    pub async fn push(&self, event: ChannelEvent) {
        self.state.write().await.incoming.append(event);
    }

    pub async fn outbound(&self) -> Vec<Outbound> {
        self.state.read().await.outbound.clone()
    }

    /// Rooms passed to `connect`, in order
    pub async fn connects(&self) -> Vec<String> {
        self.state.read().await.connects.clone()
    }

    pub async fn room_id(&self) -> Option<String> {
        self.state.read().await.room_id.clone()
    }

    async fn record(&self, make: impl FnOnce(String) -> Outbound) -> Result<()> {
        if !self.is_connected() {
            return Err(ChatError::Channel("not connected".to_string()));
        }
        let mut state = self.state.write().await;
        let room_id = state
            .room_id
            .clone()
            .ok_or_else(|| ChatError::Channel("no room subscribed".to_string()))?;
        state.outbound.push(make(room_id));
        Ok(())
    }
}

impl Channel for MemoryChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self, room_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.connects.push(room_id.to_string());
        if !self.available.load(Ordering::SeqCst) {
            return Err(ChatError::Channel("channel unavailable".to_string()));
        }
        debug!("Memory channel subscribed to room {}", room_id);
        state.room_id = Some(room_id.to_string());
        state.incoming = EventLog::new();
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.write().await;
        state.room_id = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send_text(&self, text: &str, temp_id: &str) -> Result<()> {
        self.record(|room_id| Outbound::Text {
            room_id,
            text: text.to_string(),
            temp_id: temp_id.to_string(),
        })
        .await
    }

    async fn send_image(&self, image_ref: &str, temp_id: &str) -> Result<()> {
        self.record(|room_id| Outbound::Image {
            room_id,
            image_ref: image_ref.to_string(),
            temp_id: temp_id.to_string(),
        })
        .await
    }

    async fn send_read_advance(&self, up_to_id: u64) -> Result<()> {
        self.record(|room_id| Outbound::ReadAdvance { room_id, up_to_id })
            .await
    }

    async fn send_leave(&self) -> Result<()> {
        self.record(|room_id| Outbound::Leave { room_id }).await
    }

    async fn events_since(&self, offset: usize) -> Vec<ChannelEvent> {
        self.state.read().await.incoming.since(offset).to_vec()
    }
}
