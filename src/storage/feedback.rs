use crate::define_simple_storage;
use crate::models::Feedback;
use crate::storage::simple_storage::SimpleStorage;
use anyhow::Result;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

define_simple_storage! {
    pub struct FeedbackStorage { table: "feedback" }
}

/// Invariant (spec §3): unique (test_case, user).
const UNIQUE_INDEX: TableDefinition<&str, &str> = TableDefinition::new("feedback_by_test_case_user");

impl FeedbackStorage {
    fn ensure_index(&self) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        write_txn.open_table(UNIQUE_INDEX)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn upsert(&self, feedback: &Feedback) -> Result<()> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut index = write_txn.open_table(UNIQUE_INDEX)?;
            let unique_key = format!("{}:{}", feedback.test_case_id, feedback.user_id);
            if let Some(existing_id) = index.get(unique_key.as_str())?.map(|v| v.value().to_string()) {
                if existing_id != feedback.id.to_string() {
                    table.remove(existing_id.as_str())?;
                }
            }
            table.insert(feedback.id.to_string().as_str(), serde_json::to_vec(feedback)?.as_slice())?;
            index.insert(unique_key.as_str(), feedback.id.to_string().as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Feedback>> {
        Ok(self
            .get_raw(&id.to_string())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    pub fn get_for_test_case_and_user(&self, test_case_id: Uuid, user_id: Uuid) -> Result<Option<Feedback>> {
        self.ensure_index()?;
        let read_txn = self.db().begin_read()?;
        let index = read_txn.open_table(UNIQUE_INDEX)?;
        let key = format!("{}:{}", test_case_id, user_id);
        let Some(id) = index.get(key.as_str())?.map(|v| v.value().to_string()) else {
            return Ok(None);
        };
        drop(index);
        drop(read_txn);
        self.get(Uuid::parse_str(&id)?)
    }

    pub fn delete_for_test_case_and_user(&self, test_case_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut index = write_txn.open_table(UNIQUE_INDEX)?;
            let key = format!("{}:{}", test_case_id, user_id);
            match index.remove(key.as_str())?.map(|v| v.value().to_string()) {
                Some(id) => table.remove(id.as_str())?.is_some(),
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(existed)
    }
}
