/// Per-room message lists, pagination state and read floors
use crate::chat_types::{Message, MessageKey, SyntheticKind};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// What happened to an incoming message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Replaced the optimistic entry with the same temp id
    Reconciled,
    /// Server id already cached
    Duplicate,
    Appended,
}

#[derive(Debug, Clone, Default)]
pub struct RoomCache {
    messages: Vec<Message>,
    read_floor: u64,
    has_more_before: bool,
    loading_older: bool,
    error: Option<String>,
}

impl RoomCache {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn read_floor(&self) -> u64 {
        self.read_floor
    }

    pub fn has_more_before(&self) -> bool {
        self.has_more_before
    }

    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    /// Smallest server id materialized; exclusive bound for the next older page
    pub fn oldest_id(&self) -> Option<u64> {
        self.messages.iter().filter_map(Message::server_id).min()
    }

    pub fn max_confirmed_id(&self) -> Option<u64> {
        self.messages.iter().filter_map(Message::server_id).max()
    }

    pub fn contains_id(&self, id: u64) -> bool {
        self.messages.iter().any(|m| m.server_id() == Some(id))
    }

    /// Install the newest page.
    ///
    /// `fetched` is the row count the source returned, before invalid rows
    /// were dropped. Live messages newer than the page and unconfirmed
    /// optimistic entries that were already cached are kept after it. The
    /// floor only rises.
    pub fn prime(
        &mut self,
        intro: Message,
        page: Vec<Message>,
        fetched: usize,
        page_size: usize,
        floor: u64,
    ) {
        let page_ids: HashSet<u64> = page.iter().filter_map(Message::server_id).collect();
        let page_max = page_ids.iter().copied().max().unwrap_or(0);

        let carried: Vec<Message> = std::mem::take(&mut self.messages)
            .into_iter()
            .filter(|m| match &m.key {
                MessageKey::Confirmed { id } => *id > page_max && !page_ids.contains(id),
                MessageKey::Pending { .. } | MessageKey::Failed { .. } => true,
                MessageKey::Synthetic { kind } => *kind == SyntheticKind::PeerLeft,
            })
            .collect();

        let mut messages = Vec::with_capacity(page.len() + carried.len() + 1);
        messages.push(intro);
        messages.extend(page);
        messages.extend(carried);

        self.messages = messages;
        self.has_more_before = fetched == page_size;
        self.read_floor = self.read_floor.max(floor);
        self.error = None;
        self.stamp_read();
    }

    /// Mark the start of an older-page fetch. Returns false when one is
    /// already running or there is nothing older.
    pub fn begin_older(&mut self) -> bool {
        if self.loading_older || !self.has_more_before {
            return false;
        }
        self.loading_older = true;
        true
    }

    pub fn end_older(&mut self) {
        self.loading_older = false;
    }

    /// Insert an older page before the current head, after the intro.
    /// `fetched` is the raw row count, as for `prime`.
    pub fn prepend_older(&mut self, page: Vec<Message>, fetched: usize, page_size: usize) {
        let oldest = self.oldest_id();
        let older: Vec<Message> = page
            .into_iter()
            .filter(|m| match (m.server_id(), oldest) {
                (Some(id), Some(bound)) => id < bound,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .collect();

        let at = usize::from(self.messages.first().is_some_and(Message::is_intro));
        self.messages.splice(at..at, older);
        self.has_more_before = fetched == page_size;
        self.stamp_read();
    }

    /// Fold one live message in. `echo_of` is the temp id the server echoed back, if any.
    pub fn apply_incoming(&mut self, mut message: Message, echo_of: Option<&str>) -> Applied {
        let server_id = message.server_id();
        if let Some(id) = server_id {
            if message.from_me && id <= self.read_floor {
                message.read = true;
            }
        }

        if let Some(temp_id) = echo_of {
            if let Some(pos) = self
                .messages
                .iter()
                .position(|m| m.temp_id() == Some(temp_id))
            {
                // confirmed copy already cached (page raced the echo): drop the placeholder
                if server_id.is_some_and(|id| self.contains_id(id)) {
                    self.messages.remove(pos);
                } else {
                    self.messages[pos] = message;
                }
                return Applied::Reconciled;
            }
        }

        if server_id.is_some_and(|id| self.contains_id(id)) {
            return Applied::Duplicate;
        }

        self.messages.push(message);
        Applied::Appended
    }

    /// Optimistic local entry
    pub fn push_pending(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_system(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Raise the floor and stamp own messages under it. Returns how many changed.
    pub fn raise_floor(&mut self, reported: u64) -> usize {
        self.read_floor = self.read_floor.max(reported);
        self.stamp_read()
    }

    /// Walks every own message; arrival order does not guarantee a contiguous read prefix.
    fn stamp_read(&mut self) -> usize {
        let floor = self.read_floor;
        let mut stamped = 0;
        for message in self.messages.iter_mut().rev() {
            if !message.from_me || message.read {
                continue;
            }
            if let Some(id) = message.server_id() {
                if id <= floor {
                    message.read = true;
                    stamped += 1;
                }
            }
        }
        stamped
    }

    /// Turn pending sends older than `cutoff` into failures; returns their temp ids
    pub fn expire_pending(&mut self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for message in &mut self.messages {
            if let MessageKey::Pending { temp_id } = &message.key {
                if message.timestamp < cutoff {
                    let temp_id = temp_id.clone();
                    message.key = MessageKey::Failed {
                        temp_id: temp_id.clone(),
                    };
                    expired.push(temp_id);
                }
            }
        }
        expired
    }
}

/// All room caches, keyed by room id. Missing rooms read as empty.
#[derive(Debug, Default)]
pub struct MessageCache {
    rooms: HashMap<String, RoomCache>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room_id: &str) -> Option<&RoomCache> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut RoomCache> {
        self.rooms.get_mut(room_id)
    }

    pub fn room_mut(&mut self, room_id: &str) -> &mut RoomCache {
        self.rooms.entry(room_id.to_string()).or_default()
    }

    pub fn remove(&mut self, room_id: &str) -> Option<RoomCache> {
        self.rooms.remove(room_id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut RoomCache)> {
        self.rooms.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_types::Content;

    fn msg(id: u64, from_me: bool) -> Message {
        Message {
            key: MessageKey::Confirmed { id },
            room_id: "r".to_string(),
            sender_id: if from_me { "me" } else { "peer" }.to_string(),
            content: Content::Text {
                text: format!("#{}", id),
            },
            timestamp: Utc::now(),
            from_me,
            read: false,
        }
    }

    fn pending(temp_id: &str) -> Message {
        Message {
            key: MessageKey::Pending {
                temp_id: temp_id.to_string(),
            },
            ..msg(0, true)
        }
    }

    fn intro() -> Message {
        Message::synthetic(SyntheticKind::Intro, "r", "Say hi".to_string())
    }

    fn ids(cache: &RoomCache) -> Vec<Option<u64>> {
        cache.messages().iter().map(Message::server_id).collect()
    }

    #[test]
    fn test_prime_sets_has_more_from_page_size() {
        let mut cache = RoomCache::default();
        cache.prime(intro(), (1..=30).map(|i| msg(i, false)).collect(), 30, 30, 0);
        assert!(cache.has_more_before());

        let mut cache = RoomCache::default();
        cache.prime(intro(), (1..=12).map(|i| msg(i, false)).collect(), 12, 30, 0);
        assert!(!cache.has_more_before());
        assert!(cache.messages()[0].is_intro());
    }

    #[test]
    fn test_has_more_counts_rows_before_filtering() {
        // one of thirty returned rows was unusable
        let mut cache = RoomCache::default();
        cache.prime(intro(), (2..=30).map(|i| msg(i, false)).collect(), 30, 30, 0);
        assert!(cache.has_more_before());

        assert!(cache.begin_older());
        cache.prepend_older(Vec::new(), 30, 30);
        cache.end_older();
        assert!(cache.has_more_before());
        assert_eq!(cache.oldest_id(), Some(2));
    }

    #[test]
    fn test_prime_stamps_own_messages_under_floor() {
        let mut cache = RoomCache::default();
        cache.prime(intro(), vec![msg(10, true), msg(11, false), msg(12, true)], 3, 30, 11);
        let read: Vec<bool> = cache.messages()[1..].iter().map(|m| m.read).collect();
        assert_eq!(read, vec![true, false, false]);
    }

    #[test]
    fn test_prime_keeps_live_and_pending_entries() {
        let mut cache = RoomCache::default();
        cache.apply_incoming(msg(40, false), None);
        cache.push_pending(pending("t1"));
        cache.prime(intro(), vec![msg(38, false), msg(39, false)], 2, 30, 0);
        assert_eq!(ids(&cache), vec![None, Some(38), Some(39), Some(40), None]);
        assert_eq!(cache.messages()[4].temp_id(), Some("t1"));
    }

    #[test]
    fn test_intro_stays_first_across_older_pages() {
        let mut cache = RoomCache::default();
        cache.prime(intro(), (71..=100).map(|i| msg(i, false)).collect(), 30, 30, 0);
        assert!(cache.begin_older());
        cache.prepend_older((41..=70).map(|i| msg(i, false)).collect(), 30, 30);
        cache.end_older();
        assert!(cache.begin_older());
        cache.prepend_older((31..=40).map(|i| msg(i, false)).collect(), 10, 30);
        cache.end_older();

        assert!(cache.messages()[0].is_intro());
        assert_eq!(cache.messages()[1].server_id(), Some(31));
        assert_eq!(cache.oldest_id(), Some(31));
        assert!(!cache.has_more_before());
        assert!(!cache.begin_older());

        let confirmed: Vec<u64> = cache.messages().iter().filter_map(Message::server_id).collect();
        let mut sorted = confirmed.clone();
        sorted.sort();
        assert_eq!(confirmed, sorted);
    }

    #[test]
    fn test_begin_older_guards_in_flight() {
        let mut cache = RoomCache::default();
        cache.prime(intro(), (1..=30).map(|i| msg(i, false)).collect(), 30, 30, 0);
        assert!(cache.begin_older());
        assert!(!cache.begin_older());
        cache.end_older();
        assert!(cache.begin_older());
    }

    #[test]
    fn test_duplicate_delivery_materializes_once() {
        let mut cache = RoomCache::default();
        assert_eq!(cache.apply_incoming(msg(5, false), None), Applied::Appended);
        assert_eq!(cache.apply_incoming(msg(5, false), None), Applied::Duplicate);
        assert_eq!(cache.messages().len(), 1);
    }

    #[test]
    fn test_pending_echo_reconciles_in_place() {
        let mut cache = RoomCache::default();
        cache.apply_incoming(msg(1, false), None);
        cache.push_pending(pending("t1"));
        cache.apply_incoming(msg(2, false), None);

        assert_eq!(cache.apply_incoming(msg(3, true), Some("t1")), Applied::Reconciled);
        assert_eq!(ids(&cache), vec![Some(1), Some(3), Some(2)]);
        assert_eq!(cache.messages()[1].temp_id(), None);
    }

    #[test]
    fn test_echo_after_page_drops_placeholder() {
        let mut cache = RoomCache::default();
        cache.push_pending(pending("t1"));
        cache.apply_incoming(msg(7, true), None);
        assert_eq!(cache.apply_incoming(msg(7, true), Some("t1")), Applied::Reconciled);
        assert_eq!(ids(&cache), vec![Some(7)]);
    }

    #[test]
    fn test_unmatched_echo_appends() {
        let mut cache = RoomCache::default();
        assert_eq!(cache.apply_incoming(msg(4, true), Some("gone")), Applied::Appended);
        assert_eq!(cache.messages().len(), 1);
    }

    #[test]
    fn test_raise_floor_is_monotonic() {
        let mut cache = RoomCache::default();
        cache.apply_incoming(msg(10, true), None);
        cache.apply_incoming(msg(11, true), None);
        cache.apply_incoming(msg(12, true), None);

        assert_eq!(cache.raise_floor(11), 2);
        assert_eq!(cache.raise_floor(4), 0);
        assert_eq!(cache.read_floor(), 11);
        let read: Vec<bool> = cache.messages().iter().map(|m| m.read).collect();
        assert_eq!(read, vec![true, true, false]);
    }

    #[test]
    fn test_stamping_handles_out_of_order_arrival() {
        let mut cache = RoomCache::default();
        cache.apply_incoming(msg(20, true), None);
        cache.apply_incoming(msg(15, true), None);
        cache.raise_floor(20);
        assert!(cache.messages().iter().all(|m| m.read));
    }

    #[test]
    fn test_new_own_message_under_floor_arrives_read() {
        let mut cache = RoomCache::default();
        cache.raise_floor(50);
        cache.apply_incoming(msg(49, true), None);
        cache.apply_incoming(msg(51, true), None);
        assert!(cache.messages()[0].read);
        assert!(!cache.messages()[1].read);
    }

    #[test]
    fn test_expire_pending_marks_failed() {
        let mut cache = RoomCache::default();
        cache.push_pending(pending("old"));
        let expired = cache.expire_pending(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(expired, vec!["old".to_string()]);
        assert!(matches!(cache.messages()[0].key, MessageKey::Failed { .. }));
        // a failed entry still reconciles
        assert_eq!(cache.apply_incoming(msg(9, true), Some("old")), Applied::Reconciled);
        assert_eq!(ids(&cache), vec![Some(9)]);
    }
}
