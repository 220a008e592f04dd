/// Chat synchronization engine.
///
/// Owns the room directory, the per-room caches and the read tracker.
/// Every async result is keyed by the room it was issued for and dropped
/// when that room is no longer active.
mod consumer;
mod leave;
mod send;

pub use send::Draft;

use crate::chat_types::{
    build_timeline, ChatSnapshot, EngineEvent, Identity, Message, Room, SyntheticKind,
};
use crate::config::EngineConfig;
use crate::error::{ChatError, Result};
use crate::message_cache::{MessageCache, RoomCache};
use crate::normalize::map_page;
use crate::read_tracker::ReadTracker;
use crate::room_directory::RoomDirectory;
use crate::service::ChatService;
use crate::transport::{Channel, Route, Transport};
use crate::utils::event_log::EventCursor;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;

/// Live subscription of the active room
#[derive(Debug)]
pub(crate) struct Subscription {
    pub(crate) room_id: String,
    pub(crate) cursor: EventCursor,
}

#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub(crate) directory: RoomDirectory,
    pub(crate) cache: MessageCache,
    pub(crate) tracker: ReadTracker,
    pub(crate) subscription: Option<Subscription>,
}

pub struct ChatEngine<S, C> {
    identity: Identity,
    service: Arc<S>,
    channel: Arc<C>,
    config: EngineConfig,
    state: Arc<RwLock<EngineState>>,
    events: broadcast::Sender<EngineEvent>,
    shutdown: Arc<RwLock<bool>>,
}

impl<S, C> Clone for ChatEngine<S, C> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            service: self.service.clone(),
            channel: self.channel.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: ChatService, C: Channel> ChatEngine<S, C> {
    /// Resolve the identity and build the engine. Without an identity nothing can load.
    pub async fn bootstrap(service: Arc<S>, channel: Arc<C>, config: EngineConfig) -> Result<Self> {
        let identity = service
            .get_self()
            .await
            .map_err(|e| ChatError::Identity(e.to_string()))?;
        info!("Signed in as {} ({})", identity.display_name, identity.id);
        Ok(Self::with_identity(identity, service, channel, config))
    }

    pub fn with_identity(
        identity: Identity,
        service: Arc<S>,
        channel: Arc<C>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            identity,
            service,
            channel,
            config,
            state: Arc::new(RwLock::new(EngineState::default())),
            events,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Change notifications for the rendering layer
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: EngineEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    // ─── Room directory ──────────────────────────────────────────────────────

    /// Fetch, normalize and de-duplicate the room list.
    ///
    /// A failure leaves an empty list and an error flag. On the first
    /// successful load the first room becomes active unless one was chosen.
    pub async fn load_rooms(&self) -> Vec<Room> {
        let me = &self.identity.id;
        match self.service.list_rooms(me).await {
            Ok(raw) => {
                let rooms: Vec<Room> = raw.into_iter().filter_map(|r| r.into_room(me)).collect();
                let (rooms, select) = {
                    let mut state = self.state.write().await;
                    let select = state.directory.replace(rooms);
                    (state.directory.rooms().to_vec(), select)
                };
                info!("Loaded {} rooms", rooms.len());
                self.notify(EngineEvent::RoomsChanged);
                if let Some(room_id) = select {
                    self.set_active(&room_id).await;
                }
                rooms
            }
            Err(e) => {
                warn!("Failed to load rooms: {}", e);
                self.state.write().await.directory.fail(e.to_string());
                self.notify(EngineEvent::RoomsChanged);
                Vec::new()
            }
        }
    }

    /// Switch the active room and move the live subscription to it. Idempotent.
    pub async fn set_active(&self, room_id: &str) {
        let changed = self.state.write().await.directory.set_active(Some(room_id));
        if !changed {
            return;
        }
        debug!("Active room is now {}", room_id);
        self.notify(EngineEvent::ActiveRoomChanged {
            room_id: Some(room_id.to_string()),
        });
        self.subscribe(Some(room_id)).await;
    }

    /// `set_active` followed by loading the newest page
    pub async fn open_room(&self, room_id: &str) {
        self.set_active(room_id).await;
        self.prime_room(room_id).await;
    }

    pub(crate) async fn subscribe(&self, room_id: Option<&str>) {
        let Some(room_id) = room_id else {
            self.channel.disconnect().await;
            self.state.write().await.subscription = None;
            return;
        };

        let connected = self.channel.connect(room_id).await;
        let mut state = self.state.write().await;
        if !state.directory.is_active(room_id) {
            debug!("Room {} lost focus while connecting", room_id);
            return;
        }
        match connected {
            Ok(()) => {
                state.subscription = Some(Subscription {
                    room_id: room_id.to_string(),
                    cursor: EventCursor::default(),
                });
            }
            Err(e) => {
                warn!("Live channel unavailable for room {}: {}", room_id, e);
                state.subscription = None;
            }
        }
    }

    // ─── Message cache ───────────────────────────────────────────────────────

    /// Load the newest page of the room and prime its read floor
    pub async fn prime_room(&self, room_id: &str) {
        let page_size = self.config.page_size;
        let (peer_id, title) = {
            let state = self.state.read().await;
            match state.directory.get(room_id) {
                Some(room) => (
                    Some(room.counterparty_id().to_string()),
                    room.product.title.clone(),
                ),
                None => (None, String::new()),
            }
        };

        let last_seen = async {
            let Some(peer_id) = peer_id.as_deref() else {
                return 0;
            };
            match self.service.get_last_seen(room_id, peer_id).await {
                Ok(id) => id,
                Err(e) => {
                    debug!("Last-seen lookup failed for room {}: {}", room_id, e);
                    0
                }
            }
        };
        let (page, floor) = tokio::join!(
            self.service.list_messages(room_id, page_size, None),
            last_seen
        );

        {
            let mut state = self.state.write().await;
            if !state.directory.is_active(room_id) {
                debug!("Discarding stale page for room {}", room_id);
                return;
            }
            let cache = state.cache.room_mut(room_id);
            match page {
                Ok(raw) => {
                    let fetched = raw.len();
                    let page = map_page(raw, &self.identity.id, room_id);
                    debug!("Primed room {} with {} of {} rows", room_id, page.len(), fetched);
                    cache.prime(intro_message(room_id, &title), page, fetched, page_size, floor);
                }
                Err(e) => {
                    warn!("Failed to load messages for room {}: {}", room_id, e);
                    cache.prime(intro_message(room_id, &title), Vec::new(), 0, page_size, floor);
                    cache.set_error(Some(e.to_string()));
                }
            }
        }

        self.notify(EngineEvent::TimelineChanged {
            room_id: room_id.to_string(),
        });
        self.advance_read(room_id).await;
    }

    /// Fetch the page before the oldest cached message. No-op while one is in
    /// flight or when the room has nothing older.
    pub async fn load_older(&self, room_id: &str) {
        let page_size = self.config.page_size;
        let before = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            if !state.directory.is_active(room_id) {
                return;
            }
            let cache = state.cache.room_mut(room_id);
            let Some(before) = cache.oldest_id() else {
                return;
            };
            if !cache.begin_older() {
                debug!("Older page for room {} skipped", room_id);
                return;
            }
            before
        };

        let result = self
            .service
            .list_messages(room_id, page_size, Some(before))
            .await;

        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let active = state.directory.is_active(room_id);
            let Some(cache) = state.cache.get_mut(room_id) else {
                return;
            };
            cache.end_older();
            if !active {
                debug!("Discarding stale older page for room {}", room_id);
                return;
            }
            match result {
                Ok(raw) => {
                    let fetched = raw.len();
                    let page = map_page(raw, &self.identity.id, room_id);
                    cache.prepend_older(page, fetched, page_size);
                }
                Err(e) => {
                    warn!("Failed to load older messages for room {}: {}", room_id, e);
                    cache.set_error(Some(e.to_string()));
                }
            }
        }

        self.notify(EngineEvent::TimelineChanged {
            room_id: room_id.to_string(),
        });
        self.advance_read(room_id).await;
    }

    // ─── Read tracking ───────────────────────────────────────────────────────

    /// Emit a read-advance when the active room's newest id passed the last one sent
    pub(crate) async fn advance_read(&self, room_id: &str) {
        let up_to = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            if !state.directory.is_active(room_id) {
                return;
            }
            let seen = state.cache.get(room_id).and_then(RoomCache::max_confirmed_id);
            let up_to = state.tracker.observe(room_id, seen);
            if up_to.is_some() && state.directory.set_unread(room_id, 0) {
                self.notify(EngineEvent::RoomsChanged);
            }
            up_to
        };
        let Some(up_to) = up_to else {
            return;
        };

        let route = self.route(room_id).await;
        if let Err(e) = route.read_advance(room_id, &self.identity.id, up_to).await {
            debug!("Read advance {} for room {} dropped: {}", up_to, room_id, e);
        }
    }

    /// Live path only when the channel is subscribed to this very room
    pub(crate) async fn route(&self, room_id: &str) -> Route<'_, S, C> {
        let subscribed = self
            .state
            .read()
            .await
            .subscription
            .as_ref()
            .is_some_and(|s| s.room_id == room_id);
        if subscribed {
            Route::select(&*self.service, &*self.channel)
        } else {
            Route::fallback(&*self.service)
        }
    }

    // ─── Pending sends ───────────────────────────────────────────────────────

    /// Mark every optimistic send older than the send timeout as failed
    pub async fn expire_pending_sends(&self, now: DateTime<Utc>) -> usize {
        let timeout = chrono::Duration::from_std(self.config.send_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let cutoff = now - timeout;

        let mut failed = Vec::new();
        {
            let mut state = self.state.write().await;
            for (room_id, cache) in state.cache.iter_mut() {
                for temp_id in cache.expire_pending(cutoff) {
                    failed.push((room_id.clone(), temp_id));
                }
            }
        }

        for (room_id, temp_id) in &failed {
            warn!("Send {} in room {} timed out", temp_id, room_id);
            self.notify(EngineEvent::SendFailed {
                room_id: room_id.clone(),
                temp_id: temp_id.clone(),
            });
            self.notify(EngineEvent::TimelineChanged {
                room_id: room_id.clone(),
            });
        }
        failed.len()
    }

    // ─── Snapshots ───────────────────────────────────────────────────────────

    pub async fn snapshot(&self) -> ChatSnapshot {
        let state = self.state.read().await;
        let active = state.directory.active().map(str::to_string);
        let room = active.as_deref().and_then(|id| state.cache.get(id));
        ChatSnapshot {
            identity: self.identity.clone(),
            rooms: state.directory.rooms().to_vec(),
            active_room: active.clone(),
            timeline: room.map(|c| build_timeline(c.messages())).unwrap_or_default(),
            has_more_before: room.is_some_and(RoomCache::has_more_before),
            connected: self.channel.is_connected(),
            directory_error: state.directory.error().map(str::to_string),
            room_error: room.and_then(|c| c.error().map(str::to_string)),
        }
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.state.read().await.directory.rooms().to_vec()
    }

    pub async fn active_room(&self) -> Option<String> {
        self.state.read().await.directory.active().map(str::to_string)
    }

    /// Cached messages of a room, oldest first
    pub async fn messages(&self, room_id: &str) -> Vec<Message> {
        self.state
            .read()
            .await
            .cache
            .get(room_id)
            .map(|c| c.messages().to_vec())
            .unwrap_or_default()
    }

    pub async fn has_more_before(&self, room_id: &str) -> bool {
        self.state
            .read()
            .await
            .cache
            .get(room_id)
            .is_some_and(RoomCache::has_more_before)
    }

    pub async fn read_floor(&self, room_id: &str) -> u64 {
        self.state
            .read()
            .await
            .cache
            .get(room_id)
            .map(RoomCache::read_floor)
            .unwrap_or(0)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Consume live events and expire stale sends until `shutdown` is called
    pub async fn run(&self) {
        let mut tick = interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *self.shutdown.read().await {
                break;
            }
            tick.tick().await;
            self.consume_events().await;
            self.expire_pending_sends(Utc::now()).await;
        }

        info!("Chat engine stopped");
    }

    pub async fn shutdown(&self) {
        *self.shutdown.write().await = true;
    }
}

fn intro_message(room_id: &str, title: &str) -> Message {
    let text = if title.is_empty() {
        "This is the start of your conversation. Keep payments inside the marketplace.".to_string()
    } else {
        format!(
            "This is the start of your conversation about \"{}\". Keep payments inside the marketplace.",
            title
        )
    };
    Message::synthetic(SyntheticKind::Intro, room_id, text)
}
