//! Location lookup

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{defaults, GeocoderConfig};
use crate::llm::ReasoningError;

/// A resolved location.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    /// Full address as returned by the provider.
    pub display_name: String,
}

impl GeoPoint {
    /// First component of the address, which is usually the neighborhood or
    /// street.
    pub fn neighborhood(&self) -> &str {
        self.display_name
            .split(',')
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` when the provider knows no such place.
    async fn geocode(&self, location: &str) -> Result<Option<GeoPoint>, ReasoningError>;

    fn provider_name(&self) -> &'static str;
}

/// OpenStreetMap Nominatim search API.
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self, ReasoningError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::HTTP_TIMEOUT_SECS))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn parse_place(place: &NominatimPlace) -> Result<GeoPoint, ReasoningError> {
    let lat = place
        .lat
        .parse::<f64>()
        .map_err(|e| ReasoningError::Decode(format!("lat: {e}")))?;
    let lng = place
        .lon
        .parse::<f64>()
        .map_err(|e| ReasoningError::Decode(format!("lon: {e}")))?;
    Ok(GeoPoint {
        lat,
        lng,
        display_name: place.display_name.clone(),
    })
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, location: &str) -> Result<Option<GeoPoint>, ReasoningError> {
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", location), ("format", "json"), ("limit", "1")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::ServerError { status, body });
        }

        let places: Vec<NominatimPlace> = response.json().await?;
        places.first().map(parse_place).transpose()
    }

    fn provider_name(&self) -> &'static str {
        "nominatim"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nominatim_place() {
        let raw = r#"[{"lat": "41.8781", "lon": "-87.6298", "display_name": "Loop, Chicago, Cook County, Illinois"}]"#;
        let places: Vec<NominatimPlace> = serde_json::from_str(raw).unwrap();
        let point = parse_place(&places[0]).unwrap();
        assert!((point.lat - 41.8781).abs() < 1e-9);
        assert!((point.lng + 87.6298).abs() < 1e-9);
        assert_eq!(point.neighborhood(), "Loop");
    }

    #[test]
    fn test_bad_coordinate_is_decode_error() {
        let place = NominatimPlace {
            lat: "north".to_string(),
            lon: "0".to_string(),
            display_name: String::new(),
        };
        assert!(matches!(parse_place(&place), Err(ReasoningError::Decode(_))));
    }

    #[test]
    fn test_empty_display_name_is_unknown() {
        let point = GeoPoint {
            lat: 0.0,
            lng: 0.0,
            display_name: String::new(),
        };
        assert_eq!(point.neighborhood(), "Unknown");
    }
}
