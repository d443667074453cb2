use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

pub const DEFAULT_TAIL_LINES: usize = 10;
pub const MAX_TAIL_LINES: usize = 100;

/// A tagged terminal session with a bounded output ring buffer, driven by
/// the `cli` admin verb (`cli new`, `cli run`, `cli <id> --tail N`).
pub struct CliSession {
    pub id: u64,
    pub tag: String,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    last_activity: DateTime<Utc>,
    output: RingBuffer,
}

#[derive(Debug, Clone)]
pub struct CliSessionInfo {
    pub id: u64,
    pub tag: String,
    pub last_activity: DateTime<Utc>,
}

impl CliSession {
    pub fn append(&self, text: &str) {
        let mut inner = self.inner.lock().expect("cli session lock poisoned");
        inner.last_activity = Utc::now();
        inner.output.append(text);
    }

    /// Last `n` lines, clamped to `MAX_TAIL_LINES`.
    pub fn tail(&self, n: usize) -> String {
        let n = if n == 0 { DEFAULT_TAIL_LINES } else { n.min(MAX_TAIL_LINES) };
        let inner = self.inner.lock().expect("cli session lock poisoned");
        inner.output.tail(n)
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.inner
            .lock()
            .expect("cli session lock poisoned")
            .last_activity
    }
}

/// Registry of active CLI sessions.
pub struct CliSessionManager {
    sessions: RwLock<HashMap<u64, Arc<CliSession>>>,
    next_id: Mutex<u64>,
}

impl CliSessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }

    pub fn create(&self, tag: &str) -> Arc<CliSession> {
        let id = {
            let mut next = self.next_id.lock().expect("cli id lock poisoned");
            let id = *next;
            *next += 1;
            id
        };
        let session = Arc::new(CliSession {
            id,
            tag: tag.to_string(),
            inner: Mutex::new(SessionInner {
                last_activity: Utc::now(),
                output: RingBuffer::new(MAX_TAIL_LINES),
            }),
        });
        self.sessions
            .write()
            .expect("cli session map lock poisoned")
            .insert(id, session.clone());
        session
    }

    pub fn get(&self, id: u64) -> Option<Arc<CliSession>> {
        self.sessions
            .read()
            .expect("cli session map lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn list(&self) -> Vec<CliSessionInfo> {
        let mut out: Vec<CliSessionInfo> = self
            .sessions
            .read()
            .expect("cli session map lock poisoned")
            .values()
            .map(|s| CliSessionInfo {
                id: s.id,
                tag: s.tag.clone(),
                last_activity: s.last_activity(),
            })
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }
}

impl Default for CliSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-size line ring holding the most recent output.
struct RingBuffer {
    lines: Vec<String>,
    size: usize,
    head: usize,
    count: usize,
}

impl RingBuffer {
    fn new(size: usize) -> Self {
        Self {
            lines: vec![String::new(); size],
            size,
            head: 0,
            count: 0,
        }
    }

    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        for line in text.split_inclusive('\n') {
            self.lines[self.head] = line.to_string();
            self.head = (self.head + 1) % self.size;
            if self.count < self.size {
                self.count += 1;
            }
        }
    }

    fn tail(&self, n: usize) -> String {
        if n == 0 || self.count == 0 {
            return String::new();
        }
        let n = n.min(self.count);
        let start = (self.head + self.size - n) % self.size;
        let mut out = String::new();
        for i in 0..n {
            let line = &self.lines[(start + i) % self.size];
            out.push_str(line);
            if !line.ends_with('\n') && !line.is_empty() {
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_list_get() {
        let mgr = CliSessionManager::new();
        let a = mgr.create("build watch");
        let b = mgr.create("logs");
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);

        let list = mgr.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].tag, "build watch");
        assert!(mgr.get(1).is_some());
        assert!(mgr.get(99).is_none());
    }

    #[test]
    fn tail_returns_recent_lines() {
        let mgr = CliSessionManager::new();
        let s = mgr.create("t");
        s.append("one\ntwo\nthree\n");
        assert_eq!(s.tail(2), "two\nthree\n");
        assert_eq!(s.tail(10), "one\ntwo\nthree\n");
    }

    #[test]
    fn ring_overwrites_oldest() {
        let mut rb = RingBuffer::new(3);
        rb.append("1\n2\n3\n4\n");
        assert_eq!(rb.tail(3), "2\n3\n4\n");
    }

    #[test]
    fn tail_clamps_to_max() {
        let mgr = CliSessionManager::new();
        let s = mgr.create("t");
        for i in 0..200 {
            s.append(&format!("line{}\n", i));
        }
        let tail = s.tail(500);
        assert_eq!(tail.lines().count(), MAX_TAIL_LINES);
        assert!(tail.ends_with("line199\n"));
    }

    #[test]
    fn empty_session_tail_is_empty() {
        let mgr = CliSessionManager::new();
        let s = mgr.create("t");
        assert_eq!(s.tail(5), "");
    }
}
