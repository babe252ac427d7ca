use crate::define_simple_storage;
use crate::models::ExperimentResult;
use crate::storage::simple_storage::SimpleStorage;
use anyhow::Result;
use uuid::Uuid;

define_simple_storage! {
    pub struct ResultStorage { table: "results" }
}

impl ResultStorage {
    pub fn insert(&self, result: &ExperimentResult) -> Result<()> {
        self.put_raw(&result.test_case_id.to_string(), serde_json::to_vec(result)?.as_slice())
    }

    pub fn get_by_test_case(&self, test_case_id: Uuid) -> Result<Option<ExperimentResult>> {
        Ok(self
            .get_raw(&test_case_id.to_string())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    pub fn list_by_test_cases(&self, test_case_ids: &[Uuid]) -> Result<Vec<ExperimentResult>> {
        test_case_ids
            .iter()
            .filter_map(|id| self.get_by_test_case(*id).transpose())
            .collect()
    }
}
