/// Leaving the active room
use super::ChatEngine;
use crate::chat_types::EngineEvent;
use crate::error::{ChatError, Result};
use crate::service::ChatService;
use crate::transport::{Channel, Transport};
use tracing::{info, warn};

impl<S: ChatService, C: Channel> ChatEngine<S, C> {
    /// Remove the active room locally, then tell the server.
    ///
    /// If the notification fails the room stays removed from the directory,
    /// but the selection goes back to it.
    pub async fn leave_active(&self) -> Result<()> {
        let (room_id, next) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let room_id = state
                .directory
                .active()
                .map(str::to_string)
                .ok_or(ChatError::NoActiveRoom)?;
            let next = state.directory.next_after_removal(&room_id);

            state.directory.remove(&room_id);
            state.cache.remove(&room_id);
            state.tracker.forget(&room_id);
            state.directory.set_active(next.as_deref());
            (room_id, next)
        };
        self.notify(EngineEvent::RoomsChanged);
        self.notify(EngineEvent::ActiveRoomChanged {
            room_id: next.clone(),
        });

        // the subscription still points at the room being left
        let route = self.route(&room_id).await;
        if let Err(e) = route.leave(&room_id, &self.identity.id).await {
            warn!("Leave notification for room {} failed: {}", room_id, e);
            self.state
                .write()
                .await
                .directory
                .set_active(Some(&room_id));
            self.notify(EngineEvent::ActiveRoomChanged {
                room_id: Some(room_id),
            });
            return Err(e);
        }
        info!("Left room {}", room_id);

        self.subscribe(next.as_deref()).await;
        if let Some(next) = next {
            self.prime_room(&next).await;
        }
        Ok(())
    }
}
