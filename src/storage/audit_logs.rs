use crate::define_simple_storage;
use crate::models::AuditLog;
use crate::storage::simple_storage::SimpleStorage;
use anyhow::Result;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

define_simple_storage! {
    pub struct AuditLogStorage { table: "audit_logs" }
}

const USER_INDEX: TableDefinition<&str, &str> = TableDefinition::new("audit_logs_by_user");

impl AuditLogStorage {
    fn ensure_index(&self) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        write_txn.open_table(USER_INDEX)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn insert(&self, log: &AuditLog) -> Result<()> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            table.insert(log.id.to_string().as_str(), serde_json::to_vec(log)?.as_slice())?;
            if let Some(user_id) = log.user_id {
                let mut index = write_txn.open_table(USER_INDEX)?;
                let key = format!("{}:{}:{}", user_id, log.created_at.timestamp_micros(), log.id);
                index.insert(key.as_str(), log.id.to_string().as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<AuditLog>> {
        Ok(self
            .get_raw(&id.to_string())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    pub fn list_by_user(&self, user_id: Uuid) -> Result<Vec<AuditLog>> {
        self.ensure_index()?;
        let (start, end) = crate::storage::range_utils::prefix_range(&format!("{}:", user_id));
        let read_txn = self.db().begin_read()?;
        let index = read_txn.open_table(USER_INDEX)?;
        let mut ids = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())? {
            let (_, v) = entry?;
            ids.push(v.value().to_string());
        }
        drop(index);
        drop(read_txn);
        ids.into_iter()
            .filter_map(|id| self.get(Uuid::parse_str(&id).ok()?).transpose())
            .collect()
    }
}
