use crate::location::GeonameId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolutionError>;

/// Failures of disjoint-location resolution.
///
/// Messages are shown to submitters verbatim, so they only mention location names.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("too few distinct locations: {count}{}", sole.as_ref().map(|n| format!(" ({})", n)).unwrap_or_default())]
    TooFewLocations { count: usize, sole: Option<String> },

    #[error("too many distinct locations: {count} exceeds the maximum of {max}: {}", names.join(", "))]
    TooManyLocations {
        count: usize,
        max: usize,
        names: Vec<String>,
    },

    #[error("could not match location '{0}' to a US state")]
    Canonicalization(String),

    #[error("location rewrite for geoname {0} does not resolve to a retained location")]
    UnresolvedRewrite(GeonameId),
}

impl ResolutionError {
    pub fn too_few(remaining: &[String]) -> Self {
        Self::TooFewLocations {
            count: remaining.len(),
            sole: match remaining {
                [only] => Some(only.clone()),
                _ => None,
            },
        }
    }
}
