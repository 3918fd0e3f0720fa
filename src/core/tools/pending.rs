use std::sync::Arc;

use dashmap::DashMap;

use crate::core::realtime::ToolCallRequest;

/// Call ids awaiting an answer, mapped to their tool name.
///
/// Clones share the same set. An id leaves the set when it is answered
/// ([`claim`](Self::claim)), cancelled, or the set is cleared on disconnect.
#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    calls: Arc<DashMap<String, String>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, batch: &[ToolCallRequest]) {
        for call in batch {
            self.calls.insert(call.id.clone(), call.name.clone());
        }
    }

    /// Remove cancelled ids. Returns how many were still pending.
    pub fn cancel(&self, ids: &[String]) -> usize {
        ids.iter()
            .filter(|id| self.calls.remove(id.as_str()).is_some())
            .count()
    }

    /// Take the right to answer `id`. True at most once per registration.
    pub fn claim(&self, id: &str) -> bool {
        self.calls.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.calls.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn clear(&self) {
        self.calls.clear();
    }
}
