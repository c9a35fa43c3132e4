//! Frontier (C2): in-memory FIFO of admitted `(clean_url, depth)` pairs (§4.2).
//!
//! Kept separate from the Store: the Store is optimized for durability and
//! dedup, the Frontier for cheap pop under concurrency. Losing the Frontier
//! is always recoverable by reseeding from `Store::pending_urls`; losing the
//! Store is not.

use crate::store::PendingEntry;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub clean_url: String,
    pub depth: i64,
}

impl From<PendingEntry> for FrontierEntry {
    fn from(p: PendingEntry) -> Self {
        Self {
            clean_url: p.clean_url,
            depth: p.depth,
        }
    }
}

pub struct Frontier {
    queue: Mutex<VecDeque<FrontierEntry>>,
}

impl Frontier {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Seeds the Frontier from the Store's pending URLs at startup (§4.2, §4.5).
    pub fn seed(&self, entries: Vec<PendingEntry>) {
        let mut queue = self.queue.lock().unwrap();
        queue.extend(entries.into_iter().map(FrontierEntry::from));
    }

    pub fn push_back(&self, clean_url: String, depth: i64) {
        self.queue.lock().unwrap().push_back(FrontierEntry { clean_url, depth });
    }

    pub fn push_back_many(&self, entries: impl IntoIterator<Item = (String, i64)>) {
        let mut queue = self.queue.lock().unwrap();
        for (clean_url, depth) in entries {
            queue.push_back(FrontierEntry { clean_url, depth });
        }
    }

    pub fn pop_front_nonblocking(&self) -> Option<FrontierEntry> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let f = Frontier::new();
        f.push_back("a".into(), 0);
        f.push_back("b".into(), 0);
        assert_eq!(f.pop_front_nonblocking().unwrap().clean_url, "a");
        assert_eq!(f.pop_front_nonblocking().unwrap().clean_url, "b");
        assert!(f.pop_front_nonblocking().is_none());
    }

    #[test]
    fn seed_preserves_store_ordering() {
        let f = Frontier::new();
        f.seed(vec![
            PendingEntry { clean_url: "a".into(), depth: 0 },
            PendingEntry { clean_url: "b".into(), depth: 1 },
        ]);
        assert_eq!(f.len(), 2);
        assert_eq!(f.pop_front_nonblocking().unwrap().clean_url, "a");
    }

    #[test]
    fn push_back_many_appends_in_order() {
        let f = Frontier::new();
        f.push_back_many(vec![("a".to_string(), 1), ("b".to_string(), 1)]);
        assert_eq!(f.pop_front_nonblocking().unwrap().clean_url, "a");
        assert_eq!(f.pop_front_nonblocking().unwrap().clean_url, "b");
    }
}
