/// Append-only event log with monotonic per-subscriber cursors

/// Position of a subscriber in an `EventLog`. Only moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCursor {
    offset: usize,
}

impl EventCursor {
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Mark `count` more events as consumed
    pub fn advance(&mut self, count: usize) {
        self.offset += count;
    }
}

#[derive(Debug, Clone)]
pub struct EventLog<T> {
    entries: Vec<T>,
}

impl<T> Default for EventLog<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Clone> EventLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: T) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from `offset` to the end; empty when the offset is past the end
    pub fn since(&self, offset: usize) -> &[T] {
        self.entries.get(offset..).unwrap_or(&[])
    }

    /// Take everything after `cursor` and move the cursor past it
    pub fn drain_new(&self, cursor: &mut EventCursor) -> Vec<T> {
        let batch = self.since(cursor.offset()).to_vec();
        cursor.advance(batch.len());
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_never_reprocesses() {
        let mut log = EventLog::new();
        let mut cursor = EventCursor::default();
        log.append(1);
        log.append(2);

        assert_eq!(log.drain_new(&mut cursor), vec![1, 2]);
        assert!(log.drain_new(&mut cursor).is_empty());

        log.append(3);
        assert_eq!(log.drain_new(&mut cursor), vec![3]);
        assert_eq!(cursor.offset(), 3);
    }

    #[test]
    fn test_since_past_end_is_empty() {
        let mut log = EventLog::new();
        log.append("a");
        assert!(log.since(5).is_empty());
        assert_eq!(log.since(0), &["a"]);
    }

    #[test]
    fn test_independent_cursors() {
        let mut log = EventLog::new();
        let mut first = EventCursor::default();
        let mut second = EventCursor::default();
        log.append('x');
        assert_eq!(log.drain_new(&mut first).len(), 1);
        log.append('y');
        assert_eq!(log.drain_new(&mut second), vec!['x', 'y']);
        assert_eq!(log.drain_new(&mut first), vec!['y']);
    }
}
