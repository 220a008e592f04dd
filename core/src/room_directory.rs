/// Room list for the signed-in user and the active-room selection
use crate::chat_types::{Message, Room};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: Vec<Room>,
    active: Option<String>,
    error: Option<String>,
    loaded_once: bool,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.room_id == room_id)
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, room_id: &str) -> bool {
        self.active.as_deref() == Some(room_id)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Replace the list after a successful fetch.
    ///
    /// Returns the room to activate when this is the first load and nothing
    /// was selected beforehand.
    pub fn replace(&mut self, rooms: Vec<Room>) -> Option<String> {
        self.rooms = dedupe(rooms);
        self.error = None;

        let first_load = !self.loaded_once;
        self.loaded_once = true;
        if first_load && self.active.is_none() {
            return self.rooms.first().map(|r| r.room_id.clone());
        }
        None
    }

    /// A failed fetch shows an empty list, never stale data
    pub fn fail(&mut self, error: String) {
        self.rooms.clear();
        self.error = Some(error);
    }

    /// Returns false when the room was already active
    pub fn set_active(&mut self, room_id: Option<&str>) -> bool {
        if self.active.as_deref() == room_id {
            return false;
        }
        self.active = room_id.map(str::to_string);
        true
    }

    /// Insert or refresh one room (push announcement)
    pub fn upsert(&mut self, room: Room) {
        match self.rooms.iter_mut().find(|r| r.room_id == room.room_id) {
            Some(existing) => *existing = room,
            None => self.rooms.push(room),
        }
    }

    pub fn remove(&mut self, room_id: &str) -> Option<Room> {
        let index = self.rooms.iter().position(|r| r.room_id == room_id)?;
        Some(self.rooms.remove(index))
    }

    /// Room that would become active once `room_id` is gone
    pub fn next_after_removal(&self, room_id: &str) -> Option<String> {
        self.rooms
            .iter()
            .find(|r| r.room_id != room_id)
            .map(|r| r.room_id.clone())
    }

    pub fn set_unread(&mut self, room_id: &str, count: u32) -> bool {
        match self.rooms.iter_mut().find(|r| r.room_id == room_id) {
            Some(room) if room.unread_count != count => {
                room.unread_count = count;
                true
            }
            _ => false,
        }
    }

    /// Refresh preview and activity time from a newly appended message
    pub fn touch(&mut self, message: &Message) {
        if let Some(room) = self.rooms.iter_mut().find(|r| r.room_id == message.room_id) {
            room.last_message_preview = Some(message.preview());
            room.last_activity_at = Some(message.timestamp);
        }
    }
}

/// One room per id; the record with the latest activity wins, later records win ties.
/// First-appearance order is kept.
fn dedupe(rooms: Vec<Room>) -> Vec<Room> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Room> = Vec::with_capacity(rooms.len());

    for room in rooms {
        match index.get(&room.room_id) {
            Some(&i) => {
                if room.last_activity_at >= out[i].last_activity_at {
                    out[i] = room;
                }
            }
            None => {
                index.insert(room.room_id.clone(), out.len());
                out.push(room);
            }
        }
    }

    out
}
