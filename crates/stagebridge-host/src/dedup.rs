/// Time-windowed record of recently seen or sent OSC messages.
///
/// The relay engine marks a fingerprint when it accepts an inbound message
/// and again per destination when it forwards one. Any fingerprint marked
/// less than `ttl` ago is "recent", which breaks relay loops in a mesh of
/// devices that all forward unmapped traffic to each other.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rosc::OscType;

/// Identity of a message for duplicate detection: who it came from (or is
/// going to), its address, and its serialized arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub ip: IpAddr,
    pub address: String,
    pub args: String,
}

impl Fingerprint {
    pub fn new(ip: IpAddr, address: &str, args: &[OscType]) -> Self {
        Self {
            ip,
            address: address.to_string(),
            args: format!("{:?}", args),
        }
    }

    /// Same message, keyed to a different peer.
    pub fn with_ip(&self, ip: IpAddr) -> Self {
        Self {
            ip,
            address: self.address.clone(),
            args: self.args.clone(),
        }
    }
}

pub struct DedupCache {
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    entries: HashMap<Fingerprint, Instant>,
    last_prune: Instant,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                last_prune: Instant::now(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn mark(&self, fp: Fingerprint) {
        self.mark_at(fp, Instant::now());
    }

    pub fn is_recent(&self, fp: &Fingerprint) -> bool {
        self.is_recent_at(fp, Instant::now())
    }

    /// Atomically test and record. Returns true if `fp` was already recent
    /// (the caller should drop the message); otherwise marks it and returns false.
    pub fn check_and_mark(&self, fp: Fingerprint) -> bool {
        self.check_and_mark_at(fp, Instant::now())
    }

    pub fn mark_at(&self, fp: Fingerprint, now: Instant) {
        let mut inner = self.lock();
        inner.entries.insert(fp, now);
        self.prune_if_due(&mut inner, now);
    }

    pub fn is_recent_at(&self, fp: &Fingerprint, now: Instant) -> bool {
        let inner = self.lock();
        inner
            .entries
            .get(fp)
            .is_some_and(|&marked| self.is_live(marked, now))
    }

    pub fn check_and_mark_at(&self, fp: Fingerprint, now: Instant) -> bool {
        let mut inner = self.lock();
        if let Some(&marked) = inner.entries.get(&fp) {
            if self.is_live(marked, now) {
                return true;
            }
        }
        inner.entries.insert(fp, now);
        self.prune_if_due(&mut inner, now);
        false
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn is_live(&self, marked: Instant, now: Instant) -> bool {
        // A mark "in the future" (clock passed in by a concurrent caller) is live
        now.checked_duration_since(marked)
            .map_or(true, |age| age < self.ttl)
    }

    /// Drop expired entries, at most once per TTL window.
    fn prune_if_due(&self, inner: &mut CacheInner, now: Instant) {
        if now.saturating_duration_since(inner.last_prune) < self.ttl {
            return;
        }
        let ttl = self.ttl;
        inner
            .entries
            .retain(|_, marked| now.saturating_duration_since(*marked) < ttl);
        inner.last_prune = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // Entries are plain data; a panic mid-insert leaves nothing inconsistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
