use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Gazetteer identifier of a named place
pub type GeonameId = u64;

/// A resolved gazetteer location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub geoname_id: GeonameId,
    pub name: String,
    /// Administrative feature code (ADM1, PCLI, PPL, ...)
    #[serde(default)]
    pub feature_code: Option<String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub country: Option<String>,
    /// First-level administrative region label
    #[serde(default)]
    pub region: Option<String>,
}

impl GeoLocation {
    pub fn new(geoname_id: GeonameId, name: impl Into<String>, feature_code: impl Into<String>) -> Self {
        Self {
            geoname_id,
            name: name.into(),
            feature_code: Some(feature_code.into()),
            latitude: 0.0,
            longitude: 0.0,
            country: None,
            region: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }
}

/// One disjointer input row: a record, its location, and the ids enclosing that location.
///
/// `ancestors` excludes the location's own id. `None` means the resolver had nothing.
#[derive(Debug, Clone)]
pub struct LocatedRecord {
    pub record_id: String,
    pub location: Option<GeoLocation>,
    pub ancestors: Option<HashSet<GeonameId>>,
}

impl LocatedRecord {
    pub fn new(
        record_id: impl Into<String>,
        location: Option<GeoLocation>,
        ancestors: Option<HashSet<GeonameId>>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            location,
            ancestors,
        }
    }

    /// Location, feature code and a non-empty ancestor set are all present
    pub fn is_usable(&self) -> bool {
        let has_code = self
            .location
            .as_ref()
            .map_or(false, |loc| loc.feature_code.as_deref().map_or(false, |c| !c.is_empty()));
        let has_ancestors = self.ancestors.as_ref().map_or(false, |a| !a.is_empty());
        has_code && has_ancestors
    }
}
