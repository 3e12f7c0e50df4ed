use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Out-of-band widget content keyed by channel id.
///
/// Realtime handlers write into it as data arrives; persistence snapshots and
/// restores it independently of widget placement. Cloning yields another
/// handle onto the same map.
#[derive(Debug, Clone, Default)]
pub struct WidgetContentStore {
    channels: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl WidgetContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, channel_id: impl Into<String>, value: Value) {
        self.lock().insert(channel_id.into(), value);
    }

    pub fn get(&self, channel_id: &str) -> Option<Value> {
        self.lock().get(channel_id).cloned()
    }

    pub fn remove(&self, channel_id: &str) -> Option<Value> {
        self.lock().remove(channel_id)
    }

    pub fn channels(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.lock().clone()
    }

    /// Replace every channel with the given snapshot.
    pub fn restore(&self, snapshot: BTreeMap<String, Value>) {
        *self.lock() = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clones_share_the_same_channels() {
        let store = WidgetContentStore::new();
        let other = store.clone();
        store.set("job-1", json!({"status": "done"}));
        assert_eq!(other.get("job-1"), Some(json!({"status": "done"})));
        assert_eq!(other.channels(), vec!["job-1".to_string()]);
    }

    #[test]
    fn restore_replaces_previous_content() {
        let store = WidgetContentStore::new();
        store.set("stale", json!(1));
        store.restore(BTreeMap::from([("fresh".to_string(), json!(2))]));
        assert!(store.get("stale").is_none());
        assert_eq!(store.get("fresh"), Some(json!(2)));
        assert_eq!(store.len(), 1);
    }
}
