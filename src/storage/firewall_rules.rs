use crate::define_simple_storage;
use crate::models::FirewallRule;
use crate::storage::simple_storage::SimpleStorage;
use anyhow::Result;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

define_simple_storage! {
    pub struct FirewallRuleStorage { table: "firewall_rules" }
}

/// Lower priority values evaluate first (spec §3); keying by
/// `{project_id}:{priority:010}:{id}` keeps a project's rules in
/// evaluation order under a single prefix scan.
const PROJECT_INDEX: TableDefinition<&str, &str> = TableDefinition::new("firewall_rules_by_project");

impl FirewallRuleStorage {
    fn ensure_index(&self) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        write_txn.open_table(PROJECT_INDEX)?;
        write_txn.commit()?;
        Ok(())
    }

    fn index_key(rule: &FirewallRule) -> String {
        format!("{}:{:010}:{}", rule.project_id, rule.priority, rule.id)
    }

    pub fn insert(&self, rule: &FirewallRule) -> Result<()> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut index = write_txn.open_table(PROJECT_INDEX)?;
            table.insert(rule.id.to_string().as_str(), serde_json::to_vec(rule)?.as_slice())?;
            index.insert(Self::index_key(rule).as_str(), rule.id.to_string().as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<FirewallRule>> {
        Ok(self
            .get_raw(&id.to_string())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    /// Ascending priority order, ties broken by id.
    pub fn list_active_by_project(&self, project_id: Uuid) -> Result<Vec<FirewallRule>> {
        let (start, end) = crate::storage::range_utils::prefix_range(&format!("{}:", project_id));
        self.ensure_index()?;
        let read_txn = self.db().begin_read()?;
        let index = read_txn.open_table(PROJECT_INDEX)?;
        let mut ids = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())? {
            let (_, v) = entry?;
            ids.push(v.value().to_string());
        }
        drop(index);
        drop(read_txn);
        let rules: Vec<FirewallRule> = ids
            .into_iter()
            .filter_map(|id| self.get(Uuid::parse_str(&id).ok()?).transpose())
            .collect::<Result<Vec<_>>>()?;
        Ok(rules.into_iter().filter(|r| r.active).collect())
    }

    /// All rules regardless of `active`, for management UIs (the pipeline
    /// itself only ever wants `list_active_by_project`).
    pub fn list_by_project(&self, project_id: Uuid) -> Result<Vec<FirewallRule>> {
        let (start, end) = crate::storage::range_utils::prefix_range(&format!("{}:", project_id));
        self.ensure_index()?;
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

    pub fn update(&self, rule: &FirewallRule, old_priority: i32) -> Result<()> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut index = write_txn.open_table(PROJECT_INDEX)?;
            let old_key = format!("{}:{:010}:{}", rule.project_id, old_priority, rule.id);
            index.remove(old_key.as_str())?;
            index.insert(Self::index_key(rule).as_str(), rule.id.to_string().as_str())?;
            table.insert(rule.id.to_string().as_str(), serde_json::to_vec(rule)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn delete(&self, id: Uuid) -> Result<bool> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut index = write_txn.open_table(PROJECT_INDEX)?;
            if let Some(bytes) = table.get(id.to_string().as_str())?.map(|v| v.value().to_vec()) {
                let rule: FirewallRule = serde_json::from_slice(&bytes)?;
                index.remove(Self::index_key(&rule).as_str())?;
            }
            table.remove(id.to_string().as_str())?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }
}
