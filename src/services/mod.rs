//! External collaborators used by stages and the artifact endpoint

mod geocoder;
mod renderer;

pub use geocoder::{GeoPoint, Geocoder, NominatimGeocoder};
pub use renderer::{Artifact, ArtifactRenderer, MarkdownRenderer, RenderError};
