use crate::location::{GeoLocation, GeonameId};
use once_cell::sync::Lazy;

/// A canonical US state (or DC) as used for default GLM covariates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsState {
    pub name: &'static str,
    pub geoname_id: GeonameId,
}

const fn state(name: &'static str, geoname_id: GeonameId) -> UsState {
    UsState { name, geoname_id }
}

/// 50 states plus the District of Columbia
pub const US_STATES: [UsState; 51] = [
    state("Alabama", 4829764),
    state("Alaska", 5879092),
    state("Arizona", 5551752),
    state("Arkansas", 4099753),
    state("California", 5332921),
    state("Colorado", 5417618),
    state("Connecticut", 4831725),
    state("Delaware", 4142224),
    state("District of Columbia", 4138106),
    state("Florida", 4155751),
    state("Georgia", 4197000),
    state("Hawaii", 5855797),
    state("Idaho", 5596512),
    state("Illinois", 4896861),
    state("Indiana", 4921868),
    state("Iowa", 4862182),
    state("Kansas", 4273857),
    state("Kentucky", 6254925),
    state("Louisiana", 4331987),
    state("Maine", 4971068),
    state("Maryland", 4361885),
    state("Massachusetts", 6254926),
    state("Michigan", 5001836),
    state("Minnesota", 5037779),
    state("Mississippi", 4436296),
    state("Missouri", 4398678),
    state("Montana", 5667009),
    state("Nebraska", 5073708),
    state("Nevada", 5509151),
    state("New Hampshire", 5090174),
    state("New Jersey", 5101760),
    state("New Mexico", 5481136),
    state("New York", 5128638),
    state("North Carolina", 4482348),
    state("North Dakota", 5690763),
    state("Ohio", 5165418),
    state("Oklahoma", 4544379),
    state("Oregon", 5744337),
    state("Pennsylvania", 6254927),
    state("Rhode Island", 5224323),
    state("South Carolina", 4597040),
    state("South Dakota", 5769223),
    state("Tennessee", 4662168),
    state("Texas", 4736286),
    state("Utah", 5549030),
    state("Vermont", 5242283),
    state("Virginia", 6254928),
    state("Washington", 5815135),
    state("West Virginia", 4826850),
    state("Wisconsin", 5279468),
    state("Wyoming", 5843591),
];

static LOWERCASE_NAMES: Lazy<Vec<(String, &'static UsState)>> = Lazy::new(|| {
    US_STATES
        .iter()
        .map(|s| (s.name.to_lowercase(), s))
        .collect()
});

fn longest_contained(text: &str) -> Option<&'static UsState> {
    let text = text.to_lowercase();
    LOWERCASE_NAMES
        .iter()
        .filter(|(name, _)| text.contains(name.as_str()))
        .max_by_key(|(name, _)| name.len())
        .map(|(_, s)| *s)
}

/// Map a location onto the state containing it, by case-insensitive substring match.
///
/// The location name is tried first, then its first-level region label. The longest
/// contained state name wins.
pub fn canonical_state(location: &GeoLocation) -> Option<&'static UsState> {
    longest_contained(&location.name)
        .or_else(|| location.region.as_deref().and_then(longest_contained))
}
