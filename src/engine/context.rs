use crate::models::{Experiment, ModelProvider, Project};

/// Read-only bundle handed down the generate/execute/judge/score pipeline
/// so each stage doesn't need its own storage lookups.
#[derive(Debug, Clone)]
pub struct ExperimentContext {
    pub experiment: Experiment,
    pub project: Project,
    pub provider: ModelProvider,
}

impl ExperimentContext {
    pub fn scope(&self) -> crate::engine::templates::ScopeLists<'_> {
        crate::engine::templates::ScopeLists {
            allowed_intents: &self.project.allowed_intents,
            restricted_intents: &self.project.restricted_intents,
            business_scope: &self.project.business_scope,
            project_name: &self.project.name,
        }
    }
}
