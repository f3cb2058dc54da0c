use crate::error::Result;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

//////////////////////////////////////////////////////////
// I/O
//////////////////////////////////////////////////////////

/// Synchronous key/value persistence the view state is bound to.
pub trait Storage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn save(&self, key: &str, value: Value) -> Result<()>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        (**self).load(key)
    }

    fn save(&self, key: &str, value: Value) -> Result<()> {
        (**self).save(key, value)
    }
}

/// Reads `key`, falling back to `default` when it was never written or no
/// longer decodes.
pub fn load_or<T: DeserializeOwned>(store: &dyn Storage, key: &str, default: T) -> T {
    match store.load(key) {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Ignoring unreadable value under '{}': {}", key, e);
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            log::warn!("Unable to read '{}' from state store: {}", key, e);
            default
        }
    }
}

pub fn save_value<T: Serialize>(store: &dyn Storage, key: &str, value: &T) -> Result<()> {
    store.save(key, serde_json::to_value(value)?)
}

type Scopes = BTreeMap<String, Map<String, Value>>;

/// All chats' state in one JSON file, `{ "<chat id>": { "<key>": value } }`.
pub struct JsonFileStore {
    path: PathBuf,
    scopes: Mutex<Scopes>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let scopes = match File::open(&path) {
            Ok(mut file) => {
                let mut file_data = String::new();
                file.read_to_string(&mut file_data)?;
                if file_data.trim().is_empty() {
                    Scopes::new()
                } else {
                    serde_json::from_str(&file_data)?
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Scopes::new(),
            Err(e) => return Err(e.into()),
        };
        log::debug!("Opened state file {} with {} scopes", path.display(), scopes.len());

        Ok(JsonFileStore {
            path,
            scopes: Mutex::new(scopes),
        })
    }

    /// Storage limited to one chat's keys.
    pub fn scope(file: &Arc<Self>, id: impl ToString) -> ScopedStore {
        ScopedStore {
            file: Arc::clone(file),
            scope: id.to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Scopes> {
        self.scopes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Write to a sibling temp file and rename so a crash never leaves half a file.
    fn flush(&self, scopes: &Scopes) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");

        let mut file = File::create(&tmp_path)?;
        file.write_all(&serde_json::to_vec_pretty(scopes)?)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

pub struct ScopedStore {
    file: Arc<JsonFileStore>,
    scope: String,
}

impl Storage for ScopedStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let scopes = self.file.lock();
        Ok(scopes.get(&self.scope).and_then(|s| s.get(key)).cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<()> {
        let mut scopes = self.file.lock();
        scopes
            .entry(self.scope.clone())
            .or_default()
            .insert(key.to_string(), value);
        self.file.flush(&scopes)
    }
}

/// Storage that lives as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }
}
