use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A flat JSON object persisted to a single file, written through on every change.
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!(path = %path.display(), "ignoring unreadable store file");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> std::io::Result<()> {
        let mut guard = self.lock();
        guard.insert(key.to_string(), value.into());
        self.flush(&guard)
    }

    pub fn remove(&self, key: &str) -> std::io::Result<()> {
        let mut guard = self.lock();
        if guard.remove(key).is_none() {
            return Ok(());
        }
        self.flush(&guard)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush(&self, data: &Map<String, Value>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)
    }
}
