//! Scripted collaborators for engine integration tests
#![allow(dead_code)]

use haggle_core::chat_types::Identity;
use haggle_core::error::{ChatError, Result};
use haggle_core::normalize::{RawMessage, RawRoom};
use haggle_core::service::{Asset, ChatService, OutgoingMessage};
use haggle_core::transport::memory::MemoryChannel;
use haggle_core::{ChatEngine, EngineConfig};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const ME: &str = "me";
pub const PEER: &str = "peer";

/// Every call the engine made, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListRooms,
    ListMessages { room_id: String, before: Option<u64> },
    LastSeen { room_id: String },
    PostMessage { room_id: String, message: OutgoingMessage },
    ReadAdvance { room_id: String, up_to_id: u64 },
    Leave { room_id: String },
    Upload { file_name: String },
}

#[derive(Default)]
struct FakeState {
    rooms: Vec<RawRoom>,
    /// (id, sender) per room
    history: HashMap<String, Vec<(u64, String)>>,
    last_seen: HashMap<String, u64>,
    gates: HashMap<String, Arc<Notify>>,
    /// rows returned without any payload
    blank: Vec<(String, u64)>,
    calls: Vec<Call>,
    fail_identity: bool,
    fail_rooms: bool,
    fail_upload: bool,
    fail_leave: bool,
}

#[derive(Default)]
pub struct FakeService {
    state: Mutex<FakeState>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_room(&self, room: RawRoom) {
        self.state.lock().unwrap().rooms.push(room);
    }

    /// Fill a room with messages `ids`, all from `sender`
    pub fn set_history(&self, room_id: &str, ids: impl IntoIterator<Item = u64>, sender: &str) {
        let rows = ids.into_iter().map(|id| (id, sender.to_string())).collect();
        self.state
            .lock()
            .unwrap()
            .history
            .insert(room_id.to_string(), rows);
    }

    pub fn set_last_seen(&self, room_id: &str, id: u64) {
        self.state
            .lock()
            .unwrap()
            .last_seen
            .insert(room_id.to_string(), id);
    }

    /// Hold message fetches for `room_id` until the returned handle is notified
    pub fn gate(&self, room_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(room_id.to_string(), gate.clone());
        gate
    }

    pub fn ungate(&self, room_id: &str) {
        self.state.lock().unwrap().gates.remove(room_id);
    }

    /// Return message `id` of `room_id` as a row with no payload
    pub fn blank_row(&self, room_id: &str, id: u64) {
        self.state
            .lock()
            .unwrap()
            .blank
            .push((room_id.to_string(), id));
    }

    pub fn fail_identity(&self) {
        self.state.lock().unwrap().fail_identity = true;
    }

    pub fn fail_rooms(&self) {
        self.state.lock().unwrap().fail_rooms = true;
    }

    pub fn fail_upload(&self) {
        self.state.lock().unwrap().fail_upload = true;
    }

    pub fn fail_leave(&self) {
        self.state.lock().unwrap().fail_leave = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl ChatService for FakeService {
    async fn get_self(&self) -> Result<Identity> {
        if self.state.lock().unwrap().fail_identity {
            return Err(ChatError::Http("401".to_string()));
        }
        Ok(Identity {
            id: ME.to_string(),
            display_name: "Me".to_string(),
            avatar_ref: None,
        })
    }

    async fn list_rooms(&self, _identity_id: &str) -> Result<Vec<RawRoom>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListRooms);
        if state.fail_rooms {
            return Err(ChatError::Http("rooms unavailable".to_string()));
        }
        Ok(state.rooms.clone())
    }

    async fn list_messages(
        &self,
        room_id: &str,
        page_size: usize,
        before_id: Option<u64>,
    ) -> Result<Vec<RawMessage>> {
        let (page, gate) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::ListMessages {
                room_id: room_id.to_string(),
                before: before_id,
            });
            let mut rows: Vec<(u64, String)> = state
                .history
                .get(room_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|(id, _)| before_id.map_or(true, |b| *id < b))
                .collect();
            rows.sort_by(|a, b| b.0.cmp(&a.0));
            rows.truncate(page_size);
            let page: Vec<RawMessage> = rows
                .into_iter()
                .map(|(id, sender)| {
                    let mut row = raw_message(room_id, id, &sender);
                    if state.blank.contains(&(room_id.to_string(), id)) {
                        row.text = None;
                    }
                    row
                })
                .collect();
            (page, state.gates.get(room_id).cloned())
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(page)
    }

    async fn get_last_seen(&self, room_id: &str, _peer_id: &str) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::LastSeen {
            room_id: room_id.to_string(),
        });
        Ok(state.last_seen.get(room_id).copied().unwrap_or(0))
    }

    async fn post_message(&self, room_id: &str, message: &OutgoingMessage) -> Result<()> {
        self.record(Call::PostMessage {
            room_id: room_id.to_string(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn post_read_advance(&self, room_id: &str, _reader_id: &str, up_to_id: u64) -> Result<()> {
        self.record(Call::ReadAdvance {
            room_id: room_id.to_string(),
            up_to_id,
        });
        Ok(())
    }

    async fn post_leave(&self, room_id: &str, _actor_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Leave {
            room_id: room_id.to_string(),
        });
        if state.fail_leave {
            return Err(ChatError::Status {
                status: 500,
                body: "leave failed".to_string(),
            });
        }
        Ok(())
    }

    async fn upload(&self, asset: &Asset) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Upload {
            file_name: asset.file_name.clone(),
        });
        if state.fail_upload {
            return Err(ChatError::Http("store unavailable".to_string()));
        }
        Ok(format!("https://cdn.example/{}", asset.file_name))
    }
}

/// Room where `ME` is the buyer and `PEER` (named Sam) the seller
pub fn raw_room(room_id: &str, title: &str) -> RawRoom {
    serde_json::from_value(json!({
        "room_id": room_id,
        "seller_id": PEER,
        "buyer_id": ME,
        "product_title": title,
        "seller_name": "Sam",
    }))
    .unwrap()
}

pub fn raw_message(room_id: &str, id: u64, sender: &str) -> RawMessage {
    RawMessage {
        id: Some(json!(id)),
        room_id: Some(json!(room_id)),
        sender_id: Some(json!(sender)),
        text: Some(format!("m{}", id)),
        ..Default::default()
    }
}

pub fn config(page_size: usize) -> EngineConfig {
    EngineConfig {
        page_size,
        ..EngineConfig::default()
    }
}

pub type TestEngine = ChatEngine<FakeService, MemoryChannel>;

pub fn engine_with(
    service: FakeService,
    channel: MemoryChannel,
    page_size: usize,
) -> (TestEngine, Arc<FakeService>, Arc<MemoryChannel>) {
    let service = Arc::new(service);
    let channel = Arc::new(channel);
    let identity = Identity {
        id: ME.to_string(),
        display_name: "Me".to_string(),
        avatar_ref: None,
    };
    let engine = ChatEngine::with_identity(
        identity,
        service.clone(),
        channel.clone(),
        config(page_size),
    );
    (engine, service, channel)
}
