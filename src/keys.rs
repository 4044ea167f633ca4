//! Key & Index Layout (C1): deterministic naming of records and indexes in
//! the backing store, so collisions are impossible and prefix scans are
//! efficient.

/// Monotonic, lexicographically sortable message ids (ULID-shape).
pub mod ulid {
    use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

    use chrono::Utc;
    use once_cell::sync::Lazy;
    use rand::RngCore;

    const CROCKFORD: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

    static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);
    static COUNTER: AtomicU8 = AtomicU8::new(0);
    static RANDOM_TAIL: Lazy<[u8; 10]> = Lazy::new(|| {
        let mut buf = [0u8; 10];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    });

    /// Generate the next message id: a 48-bit millisecond timestamp followed
    /// by an 80-bit tail, Crockford base32 encoded to 26 characters. Within
    /// a single process, ids strictly increase even when produced in the
    /// same millisecond — a per-millisecond counter is mixed into the tail.
    pub fn next_message_id() -> String {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let seq = loop {
            let prev = LAST_MILLIS.load(Ordering::SeqCst);
            if prev == millis {
                break COUNTER.fetch_add(1, Ordering::SeqCst);
            }
            if LAST_MILLIS
                .compare_exchange(prev, millis, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                COUNTER.store(0, Ordering::SeqCst);
                break 0;
            }
        };

        let mut bytes = [0u8; 16];
        bytes[0..6].copy_from_slice(&millis.to_be_bytes()[2..8]);
        bytes[6] = seq;
        bytes[7..].copy_from_slice(&RANDOM_TAIL[0..9]);
        encode_crockford(&bytes)
    }

    fn encode_crockford(bytes: &[u8; 16]) -> String {
        // 16 bytes = 128 bits -> 26 base32 chars (130 bits, top 2 bits unused).
        let mut out = String::with_capacity(26);
        let mut acc: u128 = 0;
        for b in bytes {
            acc = (acc << 8) | (*b as u128);
        }
        acc <<= 2; // pad to 130 bits
        for i in 0..26 {
            let shift = 125 - i * 5;
            let idx = ((acc >> shift) & 0x1F) as usize;
            out.push(CROCKFORD[idx] as char);
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn ids_sort_lexicographically_with_time() {
            let a = next_message_id();
            let b = next_message_id();
            let c = next_message_id();
            assert!(a < b);
            assert!(b < c);
            assert_eq!(a.len(), 26);
        }
    }
}

/// Percent-escape any byte outside `[A-Za-z0-9._-]`, matching the key
/// layout's escaping rule.
pub fn percent_escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        let is_unreserved = b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-');
        if is_unreserved {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// `wm:{namespace}:{user_id}:{session_id}`, missing segments rendered empty.
pub fn working_memory_key(
    namespace: Option<&str>,
    user_id: Option<&str>,
    session_id: &str,
) -> String {
    format!(
        "wm:{}:{}:{}",
        namespace.map(percent_escape).unwrap_or_default(),
        user_id.map(percent_escape).unwrap_or_default(),
        percent_escape(session_id),
    )
}

/// `ltm:{id}`
pub fn long_term_key(id: crate::types::MemoryId) -> String {
    format!("ltm:{id}")
}

/// Secondary index kinds, each rendered as `{kind}:{value}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Topic,
    Entity,
    User,
    Namespace,
    Session,
    Type,
}

impl IndexKind {
    fn prefix(self) -> &'static str {
        match self {
            IndexKind::Topic => "topic",
            IndexKind::Entity => "entity",
            IndexKind::User => "user",
            IndexKind::Namespace => "namespace",
            IndexKind::Session => "session",
            IndexKind::Type => "type",
        }
    }
}

pub fn secondary_index_key(kind: IndexKind, value: &str) -> String {
    format!("{}:{}", kind.prefix(), percent_escape(value))
}

/// Name and schema of the vector index created lazily at startup if absent.
#[derive(Debug, Clone)]
pub struct VectorIndexSchema {
    pub name: String,
    pub dimension: usize,
    pub distance_metric: DistanceMetric,
}

impl Default for VectorIndexSchema {
    fn default() -> Self {
        Self {
            name: "memory_records".to_string(),
            dimension: 384,
            distance_metric: DistanceMetric::Cosine,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_memory_key_renders_missing_segments_empty() {
        assert_eq!(working_memory_key(None, None, "s1"), "wm:::s1");
        assert_eq!(
            working_memory_key(Some("ns"), Some("u1"), "s1"),
            "wm:ns:u1:s1"
        );
    }

    #[test]
    fn long_term_key_format() {
        assert_eq!(long_term_key(42), "ltm:42");
    }

    #[test]
    fn percent_escape_reserved_characters() {
        assert_eq!(percent_escape("a b:c"), "a%20b%3Ac");
        assert_eq!(percent_escape("safe-chars_1.2"), "safe-chars_1.2");
    }

    #[test]
    fn secondary_index_key_format() {
        assert_eq!(secondary_index_key(IndexKind::Topic, "pets"), "topic:pets");
        assert_eq!(
            secondary_index_key(IndexKind::User, "u 1"),
            "user:u%201"
        );
    }
}
