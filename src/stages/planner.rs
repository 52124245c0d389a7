//! Planner stage: search queries, parsed issue, geocoded location

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ask, finish, set_field, single_inputs, Stage, StageContext, StageError, StageOutcome};
use crate::llm::{ReasoningClient, ReasoningError};
use crate::services::Geocoder;
use crate::types::{stage_names, Coordinates, Geospatial};

const CONFIDENCE: f64 = 0.95;

const SCHEMA: &str = r#"{
  "search_queries": {"cost_research": ["..."], "contractor_search": ["..."], "budget_data": ["..."]},
  "tasks_list": [{"agent": "cost_research", "priority": 1}],
  "parsed_issue": {"category": "...", "subtype": "...", "severity_inferred": "low|medium|high",
                   "severity_source": "...", "urgency_flags": ["..."]}
}"#;

pub struct PlannerStage {
    client: Arc<dyn ReasoningClient>,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl PlannerStage {
    pub fn new(client: Arc<dyn ReasoningClient>, geocoder: Option<Arc<dyn Geocoder>>) -> Self {
        Self { client, geocoder }
    }

    /// Geocoding problems never fail the planner; the location just stays
    /// unresolved.
    async fn locate(&self, location: &str) -> Geospatial {
        let fallback = Geospatial {
            coordinates: Coordinates { lat: 0.0, lng: 0.0 },
            neighborhood: "Unknown".to_string(),
            district: None,
            geocoder: "fallback".to_string(),
        };

        let Some(geocoder) = &self.geocoder else {
            return fallback;
        };
        match geocoder.geocode(location).await {
            Ok(Some(point)) => Geospatial {
                coordinates: Coordinates {
                    lat: point.lat,
                    lng: point.lng,
                },
                neighborhood: point.neighborhood().to_string(),
                district: None,
                geocoder: geocoder.provider_name().to_string(),
            },
            Ok(None) => {
                debug!(location, "Geocoder found no match");
                fallback
            }
            Err(e) => {
                warn!(location, error = %e, "Geocoding failed, using fallback coordinates");
                fallback
            }
        }
    }
}

#[async_trait]
impl Stage for PlannerStage {
    fn name(&self) -> &'static str {
        stage_names::PLANNER
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let inputs = single_inputs(ctx, self.name())?;
        let geospatial = self.locate(&inputs.location).await;

        let prompt = format!(
            "You are an infrastructure planning agent.\n\
             A resident reported an issue of type '{}' at '{}' (fiscal year {}).\n\
             Create search queries for repair costs, local contractors and municipal budget data.\n\
             Assign tasks to cost_research, budget, contractor and repair_plan with priorities (1 = highest).\n\
             Parse the issue: category, subtype, inferred severity, the source of that severity,\n\
             and urgency flags such as proximity to schools or arterial roads.",
            inputs.issue_type, inputs.location, inputs.fiscal_year
        );

        let mut completion = ask(self.client.as_ref(), self.name(), prompt, SCHEMA).await?;
        let geospatial = serde_json::to_value(&geospatial)
            .map_err(|e| ReasoningError::Decode(e.to_string()))?;
        set_field(&mut completion.value, "geospatial", geospatial);

        finish(self.name(), completion, CONFIDENCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TemplateClient;
    use crate::services::GeoPoint;
    use crate::types::{IncidentInputs, PipelineInputs, StageData};

    struct FixedGeocoder(Option<GeoPoint>);

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, _location: &str) -> Result<Option<GeoPoint>, ReasoningError> {
            Ok(self.0.clone())
        }

        fn provider_name(&self) -> &'static str {
            "fixed"
        }
    }

    struct BrokenGeocoder;

    #[async_trait]
    impl Geocoder for BrokenGeocoder {
        async fn geocode(&self, _location: &str) -> Result<Option<GeoPoint>, ReasoningError> {
            Err(ReasoningError::Unavailable("offline".to_string()))
        }

        fn provider_name(&self) -> &'static str {
            "broken"
        }
    }

    fn ctx() -> StageContext {
        StageContext::new(
            "INC-1".to_string(),
            PipelineInputs::Single(IncidentInputs {
                issue_type: "pothole".to_string(),
                location: "Chicago, IL".to_string(),
                fiscal_year: 2025,
                image_url: None,
                image_base64: None,
            }),
        )
    }

    async fn plan(geocoder: Option<Arc<dyn Geocoder>>) -> Geospatial {
        let stage = PlannerStage::new(Arc::new(TemplateClient::new()), geocoder);
        let outcome = stage.execute(&ctx()).await.unwrap();
        assert!((outcome.confidence - 0.95).abs() < f64::EPSILON);
        match outcome.data {
            StageData::Planner(p) => p.geospatial,
            other => panic!("unexpected variant {}", other.stage_name()),
        }
    }

    #[tokio::test]
    async fn test_geocoded_location_is_attached() {
        let point = GeoPoint {
            lat: 41.88,
            lng: -87.63,
            display_name: "Loop, Chicago".to_string(),
        };
        let geo = plan(Some(Arc::new(FixedGeocoder(Some(point))))).await;
        assert_eq!(geo.geocoder, "fixed");
        assert_eq!(geo.neighborhood, "Loop");
        assert!((geo.coordinates.lat - 41.88).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_geocoder_failure_falls_back() {
        let geo = plan(Some(Arc::new(BrokenGeocoder))).await;
        assert_eq!(geo.geocoder, "fallback");
        assert_eq!(geo.neighborhood, "Unknown");

        let geo = plan(Some(Arc::new(FixedGeocoder(None)))).await;
        assert_eq!(geo.geocoder, "fallback");

        let geo = plan(None).await;
        assert_eq!(geo.geocoder, "fallback");
    }
}
