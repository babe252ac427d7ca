use super::KvStore;
use crate::define_simple_storage;
use crate::storage::simple_storage::SimpleStorage;
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Serialize, Deserialize)]
struct Entry {
    value: String,
    expires_at_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Default)]
struct SortedSet {
    members: BTreeMap<String, f64>,
}

define_simple_storage! {
    struct StringTable { table: "kv_strings" }
}

const ZSET_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv_zsets");

/// Default single-process `KvStore`, built on the same redb table
/// primitives as the persistence layer (spec §4.12: dev mode has no
/// separate Redis instance).
#[derive(Clone)]
pub struct RedbKvStore {
    strings: StringTable,
    db: Arc<Database>,
}

impl RedbKvStore {
    pub fn new(db: Arc<Database>) -> anyhow::Result<Self> {
        let strings = StringTable::new(db.clone())?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(ZSET_TABLE)?;
        write_txn.commit()?;
        Ok(Self { strings, db })
    }

    fn now_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }

    fn load_zset(&self, key: &str) -> anyhow::Result<SortedSet> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ZSET_TABLE)?;
        Ok(table
            .get(key)?
            .map(|v| serde_json::from_slice(v.value()))
            .transpose()?
            .unwrap_or_default())
    }

    fn save_zset(&self, key: &str, set: &SortedSet) -> anyhow::Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ZSET_TABLE)?;
            table.insert(key, serde_json::to_vec(set)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for RedbKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let Some(raw) = self.strings.get_raw(key)? else {
            return Ok(None);
        };
        let entry: Entry = serde_json::from_slice(&raw)?;
        if let Some(expires_at) = entry.expires_at_ms {
            if expires_at <= Self::now_ms() {
                self.strings.delete(key)?;
                return Ok(None);
            }
        }
        Ok(Some(entry.value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at_ms: Some(Self::now_ms() + ttl.as_millis() as u64),
        };
        self.strings.put_raw(key, serde_json::to_vec(&entry)?.as_slice())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.strings.delete(key)?;
        Ok(())
    }

    async fn zadd_and_count(&self, key: &str, min_score: f64, member: &str, score: f64) -> anyhow::Result<u64> {
        let mut set = self.load_zset(key)?;
        set.members.retain(|_, s| *s >= min_score);
        set.members.insert(member.to_string(), score);
        let count = set.members.len() as u64;
        self.save_zset(key, &set)?;
        Ok(count)
    }

    async fn zmin_score(&self, key: &str) -> anyhow::Result<Option<f64>> {
        let set = self.load_zset(key)?;
        Ok(set.members.values().cloned().fold(None, |acc, v| match acc {
            None => Some(v),
            Some(m) if v < m => Some(v),
            Some(m) => Some(m),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RedbKvStore {
        let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        let db = Arc::new(Database::create(&path).unwrap());
        std::mem::forget(path);
        RedbKvStore::new(db).unwrap()
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = store();
        store.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn expired_key_reads_as_none() {
        let store = store();
        store.set_ex("k", "v", Duration::from_millis(0)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sliding_window_trims_and_counts() {
        let store = store();
        let c1 = store.zadd_and_count("rate", 0.0, "a", 10.0).await.unwrap();
        assert_eq!(c1, 1);
        let c2 = store.zadd_and_count("rate", 0.0, "b", 20.0).await.unwrap();
        assert_eq!(c2, 2);
        let c3 = store.zadd_and_count("rate", 15.0, "c", 30.0).await.unwrap();
        assert_eq!(c3, 2);
        assert_eq!(store.zmin_score("rate").await.unwrap(), Some(20.0));
    }
}
