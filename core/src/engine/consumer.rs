/// Live event consumption for the active room
use super::{ChatEngine, EngineState};
use crate::chat_types::{EngineEvent, Message, SyntheticKind};
use crate::message_cache::Applied;
use crate::normalize::value_to_id;
use crate::service::ChatService;
use crate::transport::{Channel, ChannelEvent};
use tracing::debug;

#[derive(Debug, Default)]
struct FoldOutcome {
    timeline_changed: bool,
    rooms_changed: bool,
    /// Set when we left the active room; holds the room that replaced it
    left: Option<Option<String>>,
    /// The room we left; later events scoped to it are dropped
    left_room: Option<String>,
}

/// Room a message, read or leave event applies to; `None` for room-agnostic events
fn scoped_room(event: &ChannelEvent, subscribed: &str) -> Option<String> {
    match event {
        ChannelEvent::Message { message } => Some(
            message
                .room_id
                .as_ref()
                .and_then(value_to_id)
                .unwrap_or_else(|| subscribed.to_string()),
        ),
        ChannelEvent::ReadAdvance { room_id, .. } | ChannelEvent::Leave { room_id, .. } => {
            Some(room_id.clone().unwrap_or_else(|| subscribed.to_string()))
        }
        ChannelEvent::UnreadBadge { .. } | ChannelEvent::RoomCreated { .. } | ChannelEvent::Other => {
            None
        }
    }
}

impl<S: ChatService, C: Channel> ChatEngine<S, C> {
    /// Fold every event past the cursor into the caches and directory.
    ///
    /// The cursor moves by the full batch length, including events that
    /// turn out to be malformed or irrelevant. Returns the number consumed.
    pub async fn consume_events(&self) -> usize {
        let (room_id, offset) = {
            let state = self.state.read().await;
            match &state.subscription {
                Some(sub) => (sub.room_id.clone(), sub.cursor.offset()),
                None => return 0,
            }
        };

        let batch = self.channel.events_since(offset).await;
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();

        let outcome = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            match state.subscription.as_mut() {
                Some(sub) if sub.room_id == room_id && sub.cursor.offset() == offset => {
                    sub.cursor.advance(count);
                }
                _ => {
                    debug!("Subscription moved during consumption, batch left for next tick");
                    return 0;
                }
            }
            self.fold(state, &room_id, batch)
        };

        if outcome.rooms_changed {
            self.notify(EngineEvent::RoomsChanged);
        }
        match outcome.left {
            Some(next) => {
                self.notify(EngineEvent::ActiveRoomChanged {
                    room_id: next.clone(),
                });
                self.subscribe(next.as_deref()).await;
                if let Some(next) = next {
                    self.prime_room(&next).await;
                }
            }
            None if outcome.timeline_changed => {
                self.notify(EngineEvent::TimelineChanged {
                    room_id: room_id.clone(),
                });
                self.advance_read(&room_id).await;
            }
            None => {}
        }

        count
    }

    fn fold(&self, state: &mut EngineState, room_id: &str, batch: Vec<ChannelEvent>) -> FoldOutcome {
        let me = self.identity.id.as_str();
        let mut out = FoldOutcome::default();

        for event in batch {
            if let Some(gone) = out.left_room.as_deref() {
                if scoped_room(&event, room_id).as_deref() == Some(gone) {
                    debug!("Dropping event for room {} after leaving it", gone);
                    continue;
                }
            }
            match event {
                ChannelEvent::Message { message } => {
                    let echo_of = message.temp_id.clone();
                    let Some(message) = message.into_message(me, room_id) else {
                        debug!("Dropping message event without payload");
                        continue;
                    };
                    if message.room_id != room_id || message.server_id().is_none() {
                        debug!("Dropping message event for room {}", message.room_id);
                        continue;
                    }
                    let cache = state.cache.room_mut(room_id);
                    match cache.apply_incoming(message.clone(), echo_of.as_deref()) {
                        Applied::Duplicate => {
                            debug!(
                                "Duplicate delivery of message {:?} in room {}",
                                message.server_id(),
                                room_id
                            );
                        }
                        Applied::Reconciled | Applied::Appended => {
                            state.directory.touch(&message);
                            out.timeline_changed = true;
                            out.rooms_changed = true;
                        }
                    }
                }
                ChannelEvent::ReadAdvance {
                    room_id: target,
                    reader_id,
                    up_to_id,
                } => {
                    if reader_id == me {
                        continue;
                    }
                    let target = target.unwrap_or_else(|| room_id.to_string());
                    let stamped = state.cache.room_mut(&target).raise_floor(up_to_id);
                    if stamped > 0 && target == room_id {
                        out.timeline_changed = true;
                    }
                }
                ChannelEvent::UnreadBadge {
                    room_id: target,
                    unread_count,
                } => {
                    if state.directory.set_unread(&target, unread_count) {
                        out.rooms_changed = true;
                    }
                }
                ChannelEvent::Leave {
                    room_id: target,
                    actor_id,
                } => {
                    let target = target.unwrap_or_else(|| room_id.to_string());
                    if !state.directory.is_active(&target) {
                        continue;
                    }
                    if actor_id == me {
                        let next = state.directory.next_after_removal(&target);
                        state.directory.remove(&target);
                        state.cache.remove(&target);
                        state.tracker.forget(&target);
                        state.directory.set_active(next.as_deref());
                        out.left = Some(next);
                        out.left_room = Some(target);
                        out.rooms_changed = true;
                        continue;
                    }
                    let name = state
                        .directory
                        .get(&target)
                        .map(|r| r.counterparty_name.clone())
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| "The other person".to_string());
                    state.cache.room_mut(&target).push_system(Message::synthetic(
                        SyntheticKind::PeerLeft,
                        &target,
                        format!("{} left the conversation", name),
                    ));
                    out.timeline_changed = true;
                }
                ChannelEvent::RoomCreated { room } => {
                    if let Some(room) = room.into_room(me) {
                        debug!("Room {} announced", room.room_id);
                        state.directory.upsert(room);
                        out.rooms_changed = true;
                    }
                }
                ChannelEvent::Other => {}
            }
        }

        out
    }
}
