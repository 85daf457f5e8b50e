use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex};

use super::{segments, Store, StoreError, Subscription};

/// In-process realtime store shared by every client of this process.
///
/// Behaves like a hosted realtime database: `null` and empty objects are
/// never stored, and subscribers only hear about nodes whose value actually
/// changed.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    watchers: Vec<Watcher>,
}

struct Watcher {
    path: Vec<String>,
    sender: watch::Sender<Option<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn notify(&mut self) {
        let Inner { root, watchers } = self;
        watchers.retain(|w| !w.sender.is_closed());
        for watcher in watchers.iter() {
            let current = get_at(root, &watcher.path).cloned();
            watcher.sender.send_if_modified(|seen| {
                if *seen == current {
                    return false;
                }
                *seen = current;
                true
            });
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let segments = segments(path)?;
        let inner = self.inner.lock().await;
        Ok(get_at(&inner.root, &segments).cloned())
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let segments = segments(path)?;
        let mut inner = self.inner.lock().await;
        set_at(&mut inner.root, &segments, value);
        inner.notify();
        Ok(())
    }

    async fn merge(&self, path: &str, partial: Map<String, Value>) -> Result<(), StoreError> {
        let base = segments(path)?;
        let mut inner = self.inner.lock().await;
        match get_at(&inner.root, &base) {
            None | Some(Value::Object(_)) => {}
            Some(_) => return Err(StoreError::NotAnObject(path.to_string())),
        }

        // Validate every key before touching the tree so the update is all or nothing.
        let mut updates = Vec::with_capacity(partial.len());
        for (key, value) in partial {
            let mut full = base.clone();
            full.extend(segments(&key)?);
            updates.push((full.into_iter().map(String::from).collect::<Vec<_>>(), value));
        }
        for (full, value) in updates {
            set_at(&mut inner.root, &full, value);
        }
        inner.notify();
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.write(path, Value::Null).await
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let path: Vec<String> = segments(path)?.into_iter().map(String::from).collect();
        let mut inner = self.inner.lock().await;
        let (sender, receiver) = watch::channel(get_at(&inner.root, &path).cloned());
        inner.watchers.push(Watcher { path, sender });
        Ok(Subscription::new(receiver))
    }
}

fn is_vacant(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn get_at<'a, S: AsRef<str>>(node: &'a Value, path: &[S]) -> Option<&'a Value> {
    path.iter()
        .try_fold(node, |node, segment| node.get(segment.as_ref()))
}

fn set_at<S: AsRef<str>>(node: &mut Value, path: &[S], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    let key = first.as_ref();
    if !node.is_object() {
        if is_vacant(&value) {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        if is_vacant(&value) {
            map.remove(key);
        } else {
            map.insert(key.to_string(), value);
        }
        return;
    }

    if is_vacant(&value) && !map.contains_key(key) {
        return;
    }
    let child = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    set_at(child, rest, value);
    if is_vacant(child) {
        map.remove(key);
    }
}
