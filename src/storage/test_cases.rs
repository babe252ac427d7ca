use crate::define_simple_storage;
use crate::models::TestCase;
use crate::storage::simple_storage::SimpleStorage;
use anyhow::Result;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

define_simple_storage! {
    pub struct TestCaseStorage { table: "test_cases" }
}

const EXPERIMENT_INDEX: TableDefinition<&str, &str> = TableDefinition::new("test_cases_by_experiment");

impl TestCaseStorage {
    fn ensure_index(&self) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        write_txn.open_table(EXPERIMENT_INDEX)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn insert_batch(&self, test_cases: &[TestCase]) -> Result<()> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut index = write_txn.open_table(EXPERIMENT_INDEX)?;
            for tc in test_cases {
                table.insert(tc.id.to_string().as_str(), serde_json::to_vec(tc)?.as_slice())?;
                let key = format!("{}:{:010}:{}", tc.experiment_id, tc.sequence_order, tc.id);
                index.insert(key.as_str(), tc.id.to_string().as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<TestCase>> {
        Ok(self
            .get_raw(&id.to_string())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    /// Ordered by `sequence_order` ascending (spec §5 "Ordering").
    pub fn list_by_experiment(&self, experiment_id: Uuid) -> Result<Vec<TestCase>> {
        self.ensure_index()?;
        let (start, end) = crate::storage::range_utils::prefix_range(&format!("{}:", experiment_id));
        let read_txn = self.db().begin_read()?;
        let index = read_txn.open_table(EXPERIMENT_INDEX)?;
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

    pub fn update(&self, test_case: &TestCase) -> Result<()> {
        self.put_raw(
            &test_case.id.to_string(),
            serde_json::to_vec(test_case)?.as_slice(),
        )
    }

    pub fn mark_representatives(&self, ids: &[Uuid]) -> Result<()> {
        for id in ids {
            if let Some(mut tc) = self.get(*id)? {
                tc.is_representative = true;
                self.update(&tc)?;
            }
        }
        Ok(())
    }
}
