use crate::define_simple_storage;
use crate::models::Project;
use crate::storage::simple_storage::SimpleStorage;
use anyhow::Result;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

define_simple_storage! {
    pub struct ProjectStorage { table: "projects" }
}

/// Invariant (spec §3): api_key_hash uniquely identifies a project.
const API_KEY_HASH_INDEX: TableDefinition<&str, &str> = TableDefinition::new("projects_by_api_key_hash");
const OWNER_INDEX: TableDefinition<&str, &str> = TableDefinition::new("projects_by_owner");

impl ProjectStorage {
    fn ensure_indexes(&self) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        write_txn.open_table(API_KEY_HASH_INDEX)?;
        write_txn.open_table(OWNER_INDEX)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn insert(&self, project: &Project) -> Result<()> {
        self.ensure_indexes()?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut hash_index = write_txn.open_table(API_KEY_HASH_INDEX)?;
            let mut owner_index = write_txn.open_table(OWNER_INDEX)?;
            if hash_index.get(project.api_key_hash.as_str())?.is_some() {
                anyhow::bail!("api_key_hash collision");
            }
            table.insert(
                project.id.to_string().as_str(),
                serde_json::to_vec(project)?.as_slice(),
            )?;
            hash_index.insert(project.api_key_hash.as_str(), project.id.to_string().as_str())?;
            let owner_key = format!("{}:{}", project.owner_id, project.id);
            owner_index.insert(owner_key.as_str(), project.id.to_string().as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self
            .get_raw(&id.to_string())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    pub fn get_by_api_key_hash(&self, hash: &str) -> Result<Option<Project>> {
        self.ensure_indexes()?;
        let read_txn = self.db().begin_read()?;
        let index = read_txn.open_table(API_KEY_HASH_INDEX)?;
        let Some(id) = index.get(hash)?.map(|v| v.value().to_string()) else {
            return Ok(None);
        };
        drop(index);
        drop(read_txn);
        self.get(Uuid::parse_str(&id)?)
    }

    pub fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Project>> {
        self.ensure_indexes()?;
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

    /// Regenerating rotates hash+prefix atomically (spec §3). Caller must
    /// also invalidate the firewall auth cache entry for `old_hash`.
    pub fn rotate_api_key(&self, id: Uuid, old_hash: &str, new_hash: &str, new_prefix: &str) -> Result<Project> {
        self.ensure_indexes()?;
        let write_txn = self.db().begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut hash_index = write_txn.open_table(API_KEY_HASH_INDEX)?;
            let Some(bytes) = table.get(id.to_string().as_str())?.map(|v| v.value().to_vec()) else {
                anyhow::bail!("project not found");
            };
            let mut project: Project = serde_json::from_slice(&bytes)?;
            project.api_key_hash = new_hash.to_string();
            project.api_key_prefix = new_prefix.to_string();
            project.updated_at = chrono::Utc::now();
            hash_index.remove(old_hash)?;
            hash_index.insert(new_hash, id.to_string().as_str())?;
            table.insert(id.to_string().as_str(), serde_json::to_vec(&project)?.as_slice())?;
            project
        };
        write_txn.commit()?;
        Ok(updated)
    }

    pub fn update(&self, project: &Project) -> Result<()> {
        self.put_raw(&project.id.to_string(), serde_json::to_vec(project)?.as_slice())
    }

    pub fn delete(&self, id: Uuid) -> Result<bool> {
        self.ensure_indexes()?;
        let write_txn = self.db().begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut hash_index = write_txn.open_table(API_KEY_HASH_INDEX)?;
            let mut owner_index = write_txn.open_table(OWNER_INDEX)?;
            if let Some(bytes) = table.get(id.to_string().as_str())?.map(|v| v.value().to_vec()) {
                let project: Project = serde_json::from_slice(&bytes)?;
                hash_index.remove(project.api_key_hash.as_str())?;
                owner_index.remove(format!("{}:{}", project.owner_id, project.id).as_str())?;
            }
            table.remove(id.to_string().as_str())?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }
}
