use crate::define_simple_storage;
use crate::models::Experiment;
use crate::storage::simple_storage::SimpleStorage;
use anyhow::Result;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

define_simple_storage! {
    pub struct ExperimentStorage { table: "experiments" }
}

const PROJECT_INDEX: TableDefinition<&str, &str> = TableDefinition::new("experiments_by_project");

impl ExperimentStorage {
    fn ensure_index(&self) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        write_txn.open_table(PROJECT_INDEX)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn insert(&self, experiment: &Experiment) -> Result<()> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut project_index = write_txn.open_table(PROJECT_INDEX)?;
            table.insert(
                experiment.id.to_string().as_str(),
                serde_json::to_vec(experiment)?.as_slice(),
            )?;
            let key = format!(
                "{}:{}:{}",
                experiment.project_id,
                experiment.created_at.timestamp_micros(),
                experiment.id
            );
            project_index.insert(key.as_str(), experiment.id.to_string().as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Experiment>> {
        Ok(self
            .get_raw(&id.to_string())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    pub fn list_by_project(&self, project_id: Uuid) -> Result<Vec<Experiment>> {
        self.ensure_index()?;
        let (start, end) = crate::storage::range_utils::prefix_range(&format!("{}:", project_id));
        let read_txn = self.db().begin_read()?;
        let index = read_txn.open_table(PROJECT_INDEX)?;
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

    pub fn update(&self, experiment: &Experiment) -> Result<()> {
        self.put_raw(
            &experiment.id.to_string(),
            serde_json::to_vec(experiment)?.as_slice(),
        )
    }

    /// Cascade delete forbidden while running; caller (service layer)
    /// enforces the 409 before calling this.
    pub fn delete(&self, id: Uuid) -> Result<bool> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut project_index = write_txn.open_table(PROJECT_INDEX)?;
            if let Some(bytes) = table.get(id.to_string().as_str())?.map(|v| v.value().to_vec()) {
                let experiment: Experiment = serde_json::from_slice(&bytes)?;
                let key = format!(
                    "{}:{}:{}",
                    experiment.project_id,
                    experiment.created_at.timestamp_micros(),
                    experiment.id
                );
                project_index.remove(key.as_str())?;
            }
            table.remove(id.to_string().as_str())?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }
}
