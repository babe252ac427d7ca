use crate::define_simple_storage;
use crate::models::FirewallLog;
use crate::storage::simple_storage::SimpleStorage;
use anyhow::Result;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

define_simple_storage! {
    pub struct FirewallLogStorage { table: "firewall_logs" }
}

const PROJECT_INDEX: TableDefinition<&str, &str> = TableDefinition::new("firewall_logs_by_project");

impl FirewallLogStorage {
    fn ensure_index(&self) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        write_txn.open_table(PROJECT_INDEX)?;
        write_txn.commit()?;
        Ok(())
    }

    /// Logs are append-only (spec §3); fire-and-forget writers call this
    /// from a spawned task so a slow disk write never blocks the request.
    pub fn insert(&self, log: &FirewallLog) -> Result<()> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut index = write_txn.open_table(PROJECT_INDEX)?;
            table.insert(log.id.to_string().as_str(), serde_json::to_vec(log)?.as_slice())?;
            let key = format!("{}:{}:{}", log.project_id, log.created_at.timestamp_micros(), log.id);
            index.insert(key.as_str(), log.id.to_string().as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<FirewallLog>> {
        Ok(self
            .get_raw(&id.to_string())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    /// Newest first, for cursor pagination over a project's log stream.
    pub fn list_by_project(&self, project_id: Uuid, after_micros: Option<i64>, limit: usize) -> Result<Vec<FirewallLog>> {
        self.ensure_index()?;
        let (start, end) = crate::storage::range_utils::prefix_range(&format!("{}:", project_id));
        let read_txn = self.db().begin_read()?;
        let index = read_txn.open_table(PROJECT_INDEX)?;
        let mut ids = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())?.rev() {
            let (k, v) = entry?;
            if let Some(cursor) = after_micros {
                let parts: Vec<&str> = k.value().splitn(3, ':').collect();
                if let Some(ts) = parts.get(1).and_then(|s| s.parse::<i64>().ok()) {
                    if ts >= cursor {
                        continue;
                    }
                }
            }
            ids.push(v.value().to_string());
            if ids.len() >= limit {
                break;
            }
        }
        drop(index);
        drop(read_txn);
        ids.into_iter()
            .filter_map(|id| self.get(Uuid::parse_str(&id).ok()?).transpose())
            .collect()
    }

    /// Null out `matched_rule` for every log referencing a deleted rule
    /// (spec §9: logs outlive the rule that produced them).
    pub fn detach_rule(&self, project_id: Uuid, rule_id: Uuid) -> Result<()> {
        let logs = self.list_by_project(project_id, None, usize::MAX)?;
        let rule_id = rule_id.to_string();
        for mut log in logs {
            if log.matched_rule.as_deref() == Some(rule_id.as_str()) {
                log.matched_rule = None;
                self.put_raw(&log.id.to_string(), serde_json::to_vec(&log)?.as_slice())?;
            }
        }
        Ok(())
    }
}
