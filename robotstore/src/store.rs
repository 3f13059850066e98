use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::filter::{Filter, IndexValue};
use crate::record::Record;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry<T> {
    Upsert { record: T },
    Delete { id: String },
}

/// A single-collection, JSONL-backed store for values implementing [`Record`].
///
/// Each write appends one journal line; the in-memory index is the
/// replay of every line seen so far (last write for an id wins, a
/// `Delete` entry removes it). This mirrors the append-then-index
/// pattern used by the crate's context-store sibling, generalized from
/// "chunk metadata" to "generic upsert/delete records".
pub struct Store<T: Record> {
    root: PathBuf,
    index: Mutex<HashMap<String, T>>,
    _marker: PhantomData<T>,
}

impl<T: Record> Store<T> {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let index = Mutex::new(Self::load_index(&Self::collection_path_for(&root))?);
        debug!(collection = T::collection_name(), ?root, "Store::open");
        Ok(Self {
            root,
            index,
            _marker: PhantomData,
        })
    }

    fn collection_path_for(root: &Path) -> PathBuf {
        root.join(format!("{}.jsonl", T::collection_name()))
    }

    fn collection_path(&self) -> PathBuf {
        Self::collection_path_for(&self.root)
    }

    fn load_index(path: &Path) -> Result<HashMap<String, T>, StoreError> {
        let mut index = HashMap::new();
        if !path.exists() {
            return Ok(index);
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry<T> = serde_json::from_str(&line)?;
            match entry {
                JournalEntry::Upsert { record } => {
                    index.insert(record.id().to_string(), record);
                }
                JournalEntry::Delete { id } => {
                    index.remove(&id);
                }
            }
        }
        Ok(index)
    }

    fn append(&self, entry: &JournalEntry<T>) -> Result<(), StoreError> {
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new().create(true).append(true).open(self.collection_path())?;
        file.lock_exclusive()?;
        let result = writeln!(file, "{}", line);
        let _ = FileExt::unlock(&file);
        result?;
        Ok(())
    }

    /// Insert a new record, or overwrite an existing one with the same id.
    pub fn create(&self, record: T) -> Result<(), StoreError> {
        self.append(&JournalEntry::Upsert { record: record.clone() })?;
        self.index.lock().unwrap().insert(record.id().to_string(), record);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self.index.lock().unwrap().get(id).cloned())
    }

    /// Upsert semantics identical to `create`; kept as a distinct name to
    /// match the call sites that mean "write back a mutated record".
    pub fn update(&self, record: T) -> Result<(), StoreError> {
        self.create(record)
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let existed = self.index.lock().unwrap().remove(id).is_some();
        if existed {
            self.append(&JournalEntry::Delete { id: id.to_string() })?;
        }
        Ok(existed)
    }

    /// List every record matching all of `filters`, as evaluated against the
    /// per-record projection returned by `index_fn`.
    pub fn list(&self, filters: &[Filter], index_fn: impl Fn(&T) -> HashMap<String, IndexValue>) -> Vec<T> {
        self.index
            .lock()
            .unwrap()
            .values()
            .filter(|record| {
                let fields = index_fn(record);
                filters.iter().all(|f| f.matches(&fields))
            })
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<T> {
        self.index.lock().unwrap().values().cloned().collect()
    }

    /// Rebuild the in-memory index from the JSONL file, discarding whatever
    /// was cached. Used after an external process may have appended to the
    /// same collection file.
    pub fn rebuild_indexes(&self) -> Result<(), StoreError> {
        let fresh = Self::load_index(&self.collection_path())?;
        *self.index.lock().unwrap() = fresh;
        Ok(())
    }

    /// Rewrite the journal file as a single `Upsert` per live record,
    /// collapsing history. Safe because `load_index` only cares about the
    /// final state, not intermediate writes.
    pub fn compact(&self) -> Result<(), StoreError> {
        let snapshot: Vec<T> = self.index.lock().unwrap().values().cloned().collect();
        let tmp_path = self.collection_path().with_extension("jsonl.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for record in &snapshot {
                let line = serde_json::to_string(&JournalEntry::Upsert { record: record.clone() })?;
                writeln!(tmp, "{}", line)?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, self.collection_path())?;
        debug!(collection = T::collection_name(), count = snapshot.len(), "Store::compact");
        Ok(())
    }

    /// Flush the collection file to disk. JSONL writes are already
    /// append+fsync-on-lock-release by the OS page cache; this exists as an
    /// explicit checkpoint call sites can use before reporting success.
    pub fn sync(&self) -> Result<(), StoreError> {
        if !self.collection_path().exists() {
            return Ok(());
        }
        match File::open(self.collection_path()) {
            Ok(file) => {
                file.sync_all()?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Store::sync: failed to open collection file");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        updated_at: i64,
        name: String,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
    }

    fn widget(id: &str, name: &str) -> Widget {
        Widget {
            id: id.to_string(),
            updated_at: 0,
            name: name.to_string(),
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store: Store<Widget> = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "first")).unwrap();
        let fetched = store.get("w1").unwrap().unwrap();
        assert_eq!(fetched.name, "first");
    }

    #[test]
    fn update_overwrites_existing_record() {
        let dir = tempdir().unwrap();
        let store: Store<Widget> = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "first")).unwrap();
        store.update(widget("w1", "second")).unwrap();
        assert_eq!(store.get("w1").unwrap().unwrap().name, "second");
    }

    #[test]
    fn delete_removes_record() {
        let dir = tempdir().unwrap();
        let store: Store<Widget> = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "first")).unwrap();
        assert!(store.delete("w1").unwrap());
        assert!(store.get("w1").unwrap().is_none());
        assert!(!store.delete("w1").unwrap());
    }

    #[test]
    fn reopening_store_replays_journal() {
        let dir = tempdir().unwrap();
        {
            let store: Store<Widget> = Store::open(dir.path()).unwrap();
            store.create(widget("w1", "first")).unwrap();
            store.create(widget("w2", "second")).unwrap();
            store.delete("w1").unwrap();
        }
        let reopened: Store<Widget> = Store::open(dir.path()).unwrap();
        assert!(reopened.get("w1").unwrap().is_none());
        assert_eq!(reopened.get("w2").unwrap().unwrap().name, "second");
    }

    #[test]
    fn list_filters_by_equality() {
        let dir = tempdir().unwrap();
        let store: Store<Widget> = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "alpha")).unwrap();
        store.create(widget("w2", "beta")).unwrap();

        let index_fn = |w: &Widget| {
            let mut m = HashMap::new();
            m.insert("name".to_string(), IndexValue::String(w.name.clone()));
            m
        };
        let results = store.list(&[Filter::eq("name", "alpha")], index_fn);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "w1");
    }

    #[test]
    fn compact_collapses_history_but_preserves_state() {
        let dir = tempdir().unwrap();
        let store: Store<Widget> = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "first")).unwrap();
        store.update(widget("w1", "second")).unwrap();
        store.create(widget("w2", "third")).unwrap();
        store.delete("w2").unwrap();
        store.compact().unwrap();

        let reopened: Store<Widget> = Store::open(dir.path()).unwrap();
        assert_eq!(reopened.get("w1").unwrap().unwrap().name, "second");
        assert!(reopened.get("w2").unwrap().is_none());
    }

    #[test]
    fn rebuild_indexes_picks_up_external_appends() {
        let dir = tempdir().unwrap();
        let store: Store<Widget> = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "first")).unwrap();

        // simulate another process appending directly to the journal
        let path = store.collection_path();
        let entry = JournalEntry::Upsert {
            record: widget("w2", "external"),
        };
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{}", serde_json::to_string(&entry).unwrap()).unwrap();
        drop(file);

        assert!(store.get("w2").unwrap().is_none());
        store.rebuild_indexes().unwrap();
        assert!(store.get("w2").unwrap().is_some());
    }
}
