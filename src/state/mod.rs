pub mod model;
pub mod poller;

pub use model::{AirHandlerView, DamperView, HeatPumpView, ZoneView, ZonesView};

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

/// Change events kept per subscriber before coalescing kicks in.
const CHANGE_BACKLOG: usize = 256;

/// A value held in the cache: a typed projection or a scalar mirror entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Zones(ZonesView),
    AirHandler(AirHandlerView),
    HeatPump(HeatPumpView),
    Dampers(DamperView),
    U8(u8),
    U16(u16),
    F32(f32),
    Bool(bool),
    Str(String),
}

impl From<ZonesView> for Value {
    fn from(v: ZonesView) -> Self {
        Value::Zones(v)
    }
}

impl From<AirHandlerView> for Value {
    fn from(v: AirHandlerView) -> Self {
        Value::AirHandler(v)
    }
}

impl From<HeatPumpView> for Value {
    fn from(v: HeatPumpView) -> Self {
        Value::HeatPump(v)
    }
}

impl From<DamperView> for Value {
    fn from(v: DamperView) -> Self {
        Value::Dampers(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U16(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub key: String,
    pub value: Value,
    pub version: u64,
}

struct Entry {
    value: Value,
    version: u64,
}

/// Concurrent keyed store of the most recent projected values.
///
/// Writers observe last-writer-wins order per key; readers never see a
/// partial structured value; change events are published in commit order.
/// Subscribers that fall more than [`CHANGE_BACKLOG`] events behind observe
/// a lag notice and should resync through [`get`](Self::get).
pub struct StateCache {
    inner: Mutex<HashMap<String, Entry>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BACKLOG);
        Self {
            inner: Mutex::new(HashMap::new()),
            changes,
        }
    }

    /// Store `value` under `key`, bump the key's version, and publish a
    /// change event. Returns the committed version.
    pub fn update(&self, key: &str, value: impl Into<Value>) -> u64 {
        let value = value.into();
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(key.to_string()).or_insert(Entry {
            value: value.clone(),
            version: 0,
        });
        entry.version += 1;
        entry.value = value.clone();
        let version = entry.version;

        // sent while the commit lock is held so subscribers see commit order
        let _ = self.changes.send(ChangeEvent {
            key: key.to_string(),
            value,
            version,
        });
        version
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().get(key).map(|e| e.value.clone())
    }

    pub fn version(&self, key: &str) -> Option<u64> {
        self.inner.lock().unwrap().get(key).map(|e| e.version)
    }

    /// Subscribe to change events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    pub fn zones(&self) -> Option<ZonesView> {
        match self.get("tstat") {
            Some(Value::Zones(v)) => Some(v),
            _ => None,
        }
    }

    pub fn air_handler(&self) -> Option<AirHandlerView> {
        match self.get("blower") {
            Some(Value::AirHandler(v)) => Some(v),
            _ => None,
        }
    }

    pub fn heat_pump(&self) -> Option<HeatPumpView> {
        match self.get("heatpump") {
            Some(Value::HeatPump(v)) => Some(v),
            _ => None,
        }
    }

    pub fn damper_position(&self) -> Option<DamperView> {
        match self.get("damperpos") {
            Some(Value::Dampers(v)) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_writer_wins() {
        let cache = StateCache::new();
        cache.update("k", 1u8);
        cache.update("k", 2u8);
        assert_eq!(cache.get("k"), Some(Value::U8(2)));
    }

    #[test]
    fn versions_increase_per_key() {
        let cache = StateCache::new();
        let v1 = cache.update("a", 1u8);
        let v2 = cache.update("a", 2u8);
        let other = cache.update("b", 3u8);
        assert!(v1 < v2);
        assert_eq!(other, 1);
        assert_eq!(cache.version("a"), Some(v2));
    }

    #[test]
    fn missing_key_absent() {
        let cache = StateCache::new();
        assert!(cache.get("nothing").is_none());
        assert!(cache.zones().is_none());
    }

    #[test]
    fn typed_accessors() {
        let cache = StateCache::new();
        cache.update("blower", AirHandlerView::default());
        cache.update("heatpump", HeatPumpView::default());
        cache.update("damperpos", DamperView::default());
        assert!(cache.air_handler().is_some());
        assert!(cache.heat_pump().is_some());
        assert!(cache.damper_position().is_some());
        // wrong shape under a typed key reads as absent
        cache.update("blower", 7u8);
        assert!(cache.air_handler().is_none());
    }

    #[tokio::test]
    async fn subscribers_see_commit_order() {
        let cache = StateCache::new();
        let mut rx = cache.subscribe();

        cache.update("x", 1u8);
        cache.update("y", 2u8);
        cache.update("x", 3u8);

        let e1 = rx.recv().await.unwrap();
        let e2 = rx.recv().await.unwrap();
        let e3 = rx.recv().await.unwrap();
        assert_eq!((e1.key.as_str(), e1.version), ("x", 1));
        assert_eq!((e2.key.as_str(), e2.version), ("y", 1));
        assert_eq!((e3.key.as_str(), e3.version), ("x", 2));
        assert_eq!(e3.value, Value::U8(3));
    }
}
