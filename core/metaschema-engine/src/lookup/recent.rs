//! Recently selected lookup values per user session.
//!
//! Sessions idle longer than the TTL are dropped, and at most
//! `max_sessions` lists are kept; the least recently used goes first.

use metaschema_types::LookupId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

type Key = (LookupId, String);

struct SessionList {
    values: VecDeque<String>,
    touched: Instant,
    /// Use order; breaks ties between equal instants.
    seq: u64,
}

#[derive(Default)]
struct Lists {
    sessions: HashMap<Key, SessionList>,
    next_seq: u64,
}

impl Lists {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn expire(&mut self, idle_ttl: Duration) {
        let before = self.sessions.len();
        self.sessions.retain(|_, list| list.touched.elapsed() < idle_ttl);
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            debug!(dropped, "idle recent-selection sessions expired");
        }
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|(_, list)| list.seq)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.sessions.remove(&key);
        }
    }
}

pub struct RecentSelections {
    lists: Mutex<Lists>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl RecentSelections {
    pub fn new(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            lists: Mutex::new(Lists::default()),
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    fn lists(&self) -> MutexGuard<'_, Lists> {
        self.lists.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Moves `value` to the front, keeping at most `limit` entries.
    pub fn record(&self, lookup: LookupId, session: &str, value: &str, limit: usize) {
        if limit == 0 {
            return;
        }
        let mut lists = self.lists();
        lists.expire(self.idle_ttl);
        let key = (lookup, session.to_string());
        if !lists.sessions.contains_key(&key) && lists.sessions.len() >= self.max_sessions {
            lists.evict_least_recent();
        }
        let seq = lists.bump();
        let list = lists.sessions.entry(key).or_insert_with(|| SessionList {
            values: VecDeque::new(),
            touched: Instant::now(),
            seq,
        });
        list.values.retain(|v| v != value);
        list.values.push_front(value.to_string());
        list.values.truncate(limit);
        list.touched = Instant::now();
        list.seq = seq;
    }

    /// Most recent first, capped at `limit`. Reading counts as use.
    pub fn list(&self, lookup: LookupId, session: &str, limit: usize) -> Vec<String> {
        let mut lists = self.lists();
        lists.expire(self.idle_ttl);
        let seq = lists.bump();
        match lists.sessions.get_mut(&(lookup, session.to_string())) {
            Some(list) => {
                list.touched = Instant::now();
                list.seq = seq;
                list.values.iter().take(limit).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn forget_lookup(&self, lookup: LookupId) {
        self.lists().sessions.retain(|(id, _), _| *id != lookup);
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.lists().sessions.len()
    }
}
