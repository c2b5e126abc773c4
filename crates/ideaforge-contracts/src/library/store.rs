use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// File-backed key-value string storage.
///
/// The file holds one JSON object whose values are strings. Reads refresh from
/// disk and writes merge only the keys this instance touched, so two stores on
/// the same file do not clobber each other's keys.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
    load_warning: Option<String>,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
            load_warning: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set once the backing file was found unreadable.
    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    pub fn get_item(&mut self, key: &str) -> Option<String> {
        let payload = self.ensure_loaded(true);
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let payload = self.ensure_loaded(true);
        let snapshot = Value::String(value.to_string());
        if payload.get(key) == Some(&snapshot) {
            return Ok(());
        }
        payload.insert(key.to_string(), snapshot);
        self.mark_dirty(key);
        self.flush()
    }

    pub fn remove_item(&mut self, key: &str) -> anyhow::Result<()> {
        let payload = self.ensure_loaded(true);
        if payload.remove(key).is_none() {
            return Ok(());
        }
        self.mark_dirty(key);
        self.flush()
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.payload.is_none() || self.dirty_keys.is_empty() {
            return Ok(());
        }

        let mut on_disk = self.read_snapshot();
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                match payload.get(key) {
                    Some(value) => {
                        on_disk.insert(key.clone(), value.clone());
                    }
                    None => {
                        on_disk.remove(key);
                    }
                }
            }
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        Ok(())
    }

    fn mark_dirty(&mut self, key: &str) {
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
    }

    fn ensure_loaded(&mut self, refresh: bool) -> &mut Map<String, Value> {
        if refresh || self.payload.is_none() {
            self.payload = Some(self.read_snapshot());
        }
        self.payload.get_or_insert_with(Map::new)
    }

    fn read_snapshot(&mut self) -> Map<String, Value> {
        match read_on_disk(&self.path) {
            OnDisk::Missing => Map::new(),
            OnDisk::Object(object) => object,
            OnDisk::Unreadable(reason) => {
                self.note_unreadable(&reason);
                Map::new()
            }
        }
    }

    fn note_unreadable(&mut self, reason: &str) {
        if self.load_warning.is_some() {
            return;
        }
        let backup = corrupt_copy_path(&self.path);
        let kept = match fs::copy(&self.path, &backup) {
            Ok(_) => format!("copy kept at {}", backup.display()),
            Err(err) => format!("no copy kept ({err})"),
        };
        self.load_warning = Some(format!(
            "{}: unreadable store ({reason}), starting empty; {kept}",
            self.path.display()
        ));
    }
}

enum OnDisk {
    Missing,
    Object(Map<String, Value>),
    Unreadable(String),
}

fn read_on_disk(path: &Path) -> OnDisk {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return OnDisk::Missing,
        Err(err) => return OnDisk::Unreadable(err.to_string()),
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(object)) => OnDisk::Object(object),
        Ok(_) => OnDisk::Unreadable("top level is not a JSON object".to_string()),
        Err(err) => OnDisk::Unreadable(err.to_string()),
    }
}

fn corrupt_copy_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::LocalStore;

    #[test]
    fn store_basic() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = LocalStore::new(temp.path().join("store.json"));
        store.set_item("key", "value")?;
        assert_eq!(store.get_item("key").as_deref(), Some("value"));
        Ok(())
    }

    #[test]
    fn store_persists_across_instances() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        let mut store = LocalStore::new(&path);
        store.set_item("saved3DModels", "[]")?;

        let mut reloaded = LocalStore::new(path);
        assert_eq!(reloaded.get_item("saved3DModels").as_deref(), Some("[]"));
        Ok(())
    }

    #[test]
    fn store_remove_item_deletes_key_on_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        let mut store = LocalStore::new(&path);
        store.set_item("inspirationImage", "data:image/png;base64,AAAA")?;
        store.remove_item("inspirationImage")?;

        let mut reloaded = LocalStore::new(path);
        assert!(reloaded.get_item("inspirationImage").is_none());
        Ok(())
    }

    #[test]
    fn store_merges_with_concurrent_writer() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        let mut store_a = LocalStore::new(&path);
        let mut store_b = LocalStore::new(&path);

        store_a.set_item("a", "1")?;
        store_b.set_item("b", "2")?;
        store_a.set_item("c", "3")?;

        let mut reloaded = LocalStore::new(path);
        assert_eq!(reloaded.get_item("a").as_deref(), Some("1"));
        assert_eq!(reloaded.get_item("b").as_deref(), Some("2"));
        assert_eq!(reloaded.get_item("c").as_deref(), Some("3"));
        Ok(())
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_is_kept_aside() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        std::fs::write(&path, "{not json")?;
        let mut store = LocalStore::new(&path);
        assert!(store.get_item("anything").is_none());
        let warning = store.load_warning().unwrap_or_default().to_string();
        assert!(warning.contains("unreadable store"), "{warning}");

        store.set_item("fresh", "yes")?;
        assert_eq!(store.get_item("fresh").as_deref(), Some("yes"));
        assert_eq!(
            std::fs::read_to_string(temp.path().join("store.json.corrupt"))?,
            "{not json"
        );
        Ok(())
    }

    #[test]
    fn missing_or_healthy_file_has_no_warning() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        let mut store = LocalStore::new(&path);
        assert!(store.get_item("key").is_none());
        store.set_item("key", "value")?;
        let mut reopened = LocalStore::new(&path);
        assert_eq!(reopened.get_item("key").as_deref(), Some("value"));
        assert!(store.load_warning().is_none());
        assert!(reopened.load_warning().is_none());

        std::fs::write(&path, "[1, 2]")?;
        let mut wrong_shape = LocalStore::new(&path);
        assert!(wrong_shape.get_item("key").is_none());
        assert!(wrong_shape.load_warning().is_some());
        Ok(())
    }
}
