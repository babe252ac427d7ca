use crate::define_simple_storage;
use crate::models::ModelProvider;
use crate::storage::simple_storage::SimpleStorage;
use anyhow::Result;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

define_simple_storage! {
    pub struct ProviderStorage { table: "providers" }
}

const OWNER_INDEX: TableDefinition<&str, &str> = TableDefinition::new("providers_by_owner");

impl ProviderStorage {
    fn ensure_index(&self) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        write_txn.open_table(OWNER_INDEX)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn insert(&self, provider: &ModelProvider) -> Result<()> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut owner_index = write_txn.open_table(OWNER_INDEX)?;
            table.insert(
                provider.id.to_string().as_str(),
                serde_json::to_vec(provider)?.as_slice(),
            )?;
            let owner_key = format!("{}:{}", provider.owner_id, provider.id);
            owner_index.insert(owner_key.as_str(), provider.id.to_string().as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<ModelProvider>> {
        Ok(self
            .get_raw(&id.to_string())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    pub fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<ModelProvider>> {
        self.ensure_index()?;
        let (start, end) = crate::storage::range_utils::prefix_range(&format!("{}:", owner_id));
        let read_txn = self.db().begin_read()?;
        let index = read_txn.open_table(OWNER_INDEX)?;
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

    pub fn update(&self, provider: &ModelProvider) -> Result<()> {
        self.put_raw(&provider.id.to_string(), serde_json::to_vec(provider)?.as_slice())
    }

    pub fn delete(&self, id: Uuid) -> Result<bool> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut owner_index = write_txn.open_table(OWNER_INDEX)?;
            if let Some(bytes) = table.get(id.to_string().as_str())?.map(|v| v.value().to_vec()) {
                let provider: ModelProvider = serde_json::from_slice(&bytes)?;
                owner_index.remove(format!("{}:{}", provider.owner_id, provider.id).as_str())?;
            }
            table.remove(id.to_string().as_str())?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }
}
