//! Append-only record of dispatched events.
//!
//! Two runs built from the same configuration and seed must produce logs
//! with equal hashes; `logs_match` compares them event by event.

use crate::event::Event;

// ── Hash utility ──────────────────────────────────────────────────────

/// Combine two u64 hashes deterministically.
pub fn hash_combine(a: u64, b: u64) -> u64 {
    let mut h = a;
    h = h.wrapping_mul(0x517cc1b727220a95);
    h = h.wrapping_add(b);
    h ^= h >> 32;
    h
}

/// Hash a byte slice deterministically (FNV-1a).
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

// ── Event Log ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatched event.
    pub fn record(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Deterministic hash over ids, times and payloads.
    ///
    /// Payloads are hashed through their `Debug` rendering, which is stable
    /// for a given build.
    pub fn log_hash(&self) -> u64 {
        self.events.iter().fold(0u64, |h, event| {
            let h = hash_combine(h, event.id.raw());
            let h = hash_combine(h, event.scheduled_at.ticks());
            hash_combine(h, hash_bytes(format!("{:?}", event.payload).as_bytes()))
        })
    }
}

/// Compare two logs for identical ordering and payloads.
pub fn logs_match(a: &EventLog, b: &EventLog) -> bool {
    a.events.len() == b.events.len()
        && a.events.iter().zip(b.events.iter()).all(|(ea, eb)| {
            ea.id == eb.id && ea.scheduled_at == eb.scheduled_at && ea.payload == eb.payload
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventId, EventType};
    use crate::time::VirtualTime;

    fn log_of(payloads: &[&str]) -> EventLog {
        let mut log = EventLog::new();
        for (i, p) in payloads.iter().enumerate() {
            log.record(Event::new(
                EventId::new(i as u64),
                VirtualTime::new(i as u64 * 10),
                EventType::Log((*p).into()),
            ));
        }
        log
    }

    #[test]
    fn test_identical_logs_match() {
        let a = log_of(&["x", "y"]);
        let b = log_of(&["x", "y"]);
        assert!(logs_match(&a, &b));
        assert_eq!(a.log_hash(), b.log_hash());
    }

    #[test]
    fn test_payload_difference_changes_hash() {
        let a = log_of(&["x", "y"]);
        let b = log_of(&["x", "z"]);
        assert!(!logs_match(&a, &b));
        assert_ne!(a.log_hash(), b.log_hash());
    }

    #[test]
    fn test_empty_log() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.log_hash(), 0);
    }

    #[test]
    fn test_hash_bytes_is_fnv1a() {
        assert_eq!(hash_bytes(b""), 0xcbf29ce484222325);
        assert_ne!(hash_bytes(b"a"), hash_bytes(b"b"));
    }
}
