use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Token joining a request with the results or acknowledgements it produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Issues identifiers of the form `<process-tag>-<sequence>`.
///
/// The tag is a random nanoid drawn once per process, so identifiers from
/// different processes do not collide, and the sequence makes identifiers
/// from one process unique no matter how quickly they are drawn.
pub struct IdGenerator {
    tag: String,
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::with_tag(nanoid::nanoid!(10, &nanoid::alphabet::SAFE))
    }

    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> RequestId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        RequestId(format!("{}-{seq}", self.tag))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn ids_are_sequential_within_a_generator() {
        let ids = IdGenerator::with_tag("node");
        assert_eq!(ids.next_id().as_str(), "node-1");
        assert_eq!(ids.next_id().as_str(), "node-2");
    }

    #[test]
    fn concurrent_draws_never_collide() {
        let ids = Arc::new(IdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(!id.as_str().contains(char::is_whitespace));
                assert!(seen.insert(id), "duplicate identifier issued");
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn separate_generators_use_distinct_tags() {
        let a = IdGenerator::new().next_id();
        let b = IdGenerator::new().next_id();
        assert_ne!(a, b);
    }
}
