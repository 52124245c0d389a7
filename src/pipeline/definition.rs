//! Declared pipelines: ordered stage lists per variant

use std::sync::Arc;

use super::ids;
use crate::stages::Stage;
use crate::types::{stage_names, InvalidRequest, PipelineVariant};

/// One declared pipeline.
pub struct PipelineDefinition {
    pub variant: PipelineVariant,
    /// Prefix of generated incident ids.
    pub id_prefix: &'static str,
    /// Stage whose cached output is the incident's final result.
    pub result_stage: &'static str,
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineDefinition {
    pub fn new(
        variant: PipelineVariant,
        id_prefix: &'static str,
        result_stage: &'static str,
        stages: Vec<Arc<dyn Stage>>,
    ) -> Self {
        Self {
            variant,
            id_prefix,
            result_stage,
            stages,
        }
    }

    /// `planner → … → report`, result in `report`.
    pub fn single_incident(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self::new(
            PipelineVariant::SingleIncident,
            ids::SINGLE_PREFIX,
            stage_names::REPORT,
            stages,
        )
    }

    /// `multi_thinking → multi_report → graph_agent`, result in `multi_report`.
    pub fn multi_incident(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self::new(
            PipelineVariant::MultiIncident,
            ids::MULTI_PREFIX,
            stage_names::MULTI_REPORT,
            stages,
        )
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn declares(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s.name() == stage)
    }

    /// Every name in `force_refresh` must belong to this pipeline.
    pub fn check_refresh(&self, force_refresh: &[String]) -> Result<(), InvalidRequest> {
        match force_refresh.iter().find(|name| !self.declares(name)) {
            Some(unknown) => Err(InvalidRequest::UnknownStage(unknown.clone())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for PipelineDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDefinition")
            .field("variant", &self.variant)
            .field("stages", &self.stage_names())
            .field("result_stage", &self.result_stage)
            .finish()
    }
}

/// Both declared pipelines.
#[derive(Debug, Clone)]
pub struct PipelineCatalog {
    pub single: Arc<PipelineDefinition>,
    pub multi: Arc<PipelineDefinition>,
}

impl PipelineCatalog {
    pub fn new(single: PipelineDefinition, multi: PipelineDefinition) -> Self {
        Self {
            single: Arc::new(single),
            multi: Arc::new(multi),
        }
    }

    pub fn for_variant(&self, variant: PipelineVariant) -> &Arc<PipelineDefinition> {
        match variant {
            PipelineVariant::SingleIncident => &self.single,
            PipelineVariant::MultiIncident => &self.multi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ReasoningClient, TemplateClient};
    use crate::stages::{multi_incident_stages, single_incident_stages};

    fn catalog() -> PipelineCatalog {
        let client: Arc<dyn ReasoningClient> = Arc::new(TemplateClient::new());
        PipelineCatalog::new(
            PipelineDefinition::single_incident(single_incident_stages(&client, None)),
            PipelineDefinition::multi_incident(multi_incident_stages(&client)),
        )
    }

    #[test]
    fn test_refresh_names_must_be_declared() {
        let catalog = catalog();
        assert!(catalog.single.check_refresh(&["cost_research".to_string()]).is_ok());
        assert_eq!(
            catalog.single.check_refresh(&["graph_agent".to_string()]),
            Err(InvalidRequest::UnknownStage("graph_agent".to_string()))
        );
        assert!(catalog.multi.check_refresh(&["graph_agent".to_string()]).is_ok());
    }
}
