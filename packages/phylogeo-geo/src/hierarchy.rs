use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Root of the classification (continent)
pub const ROOT_CODE: &str = "CONT";

/// First-level administrative division, the GLM working granularity
pub const FIRST_LEVEL_CODE: &str = "ADM1";

/// Stand-in for any code outside the table; ranked as the most specific place type
pub const CATCH_ALL_CODE: &str = "OTHER";

const CONTINENT_BAND: &[&str] = &[ROOT_CODE];
const COUNTRY_BAND: &[&str] = &["PCL", "PCLD", "PCLF", "PCLH", "PCLI", "PCLIX", "PCLS", "TERR"];
const ADM1_BAND: &[&str] = &["ADM1", "ADM1H"];
const ADM2_BAND: &[&str] = &["ADM2", "ADM2H"];
const ADM3_BAND: &[&str] = &["ADM3", "ADM3H"];
const ADM4_BAND: &[&str] = &["ADM4", "ADM4H"];
const PLACE_BAND: &[&str] = &[
    "PPL", "PPLA", "PPLA2", "PPLA3", "PPLA4", "PPLC", "PPLF", "PPLG", "PPLL", "PPLQ", "PPLR",
    "PPLS", "PPLW", "PPLX", "STLMT",
];
const CATCH_ALL_BAND: &[&str] = &[CATCH_ALL_CODE];

/// Bands from coarsest to finest; every node's parents are the whole band above it
const BANDS: &[&[&str]] = &[
    CONTINENT_BAND,
    COUNTRY_BAND,
    ADM1_BAND,
    ADM2_BAND,
    ADM3_BAND,
    ADM4_BAND,
    PLACE_BAND,
    CATCH_ALL_BAND,
];

static STANDARD: Lazy<GeoHierarchy> = Lazy::new(GeoHierarchy::build);

/// Static DAG over gazetteer feature codes.
///
/// Answers whether one feature type is an ancestor type of another. Since each
/// band links completely to the band above, every upward path from a code crosses
/// the same band sequence and following a single parent edge per step is enough.
#[derive(Debug, Clone)]
pub struct GeoHierarchy {
    parents: HashMap<&'static str, Vec<&'static str>>,
}

impl GeoHierarchy {
    /// Shared standard hierarchy
    pub fn standard() -> &'static GeoHierarchy {
        &STANDARD
    }

    fn build() -> Self {
        let mut parents = HashMap::new();
        for code in BANDS[0] {
            parents.insert(*code, Vec::new());
        }
        for pair in BANDS.windows(2) {
            let (upper, lower) = (pair[0], pair[1]);
            for code in lower {
                parents.insert(*code, upper.to_vec());
            }
        }
        Self { parents }
    }

    /// Whether `code` appears in the table (the catch-all itself counts)
    pub fn is_known(&self, code: &str) -> bool {
        self.parents.contains_key(code)
    }

    /// True iff `parent_type` is a strict ancestor type of `child_type`.
    ///
    /// Unknown child codes are treated as the catch-all; unknown parent codes never match.
    pub fn is_parent(&self, child_type: &str, parent_type: &str) -> bool {
        let mut node = match self.parents.get_key_value(child_type) {
            Some((code, _)) => *code,
            None => CATCH_ALL_CODE,
        };

        loop {
            let parents = match self.parents.get(node) {
                Some(parents) if !parents.is_empty() => parents,
                _ => return false,
            };
            if parents.iter().any(|p| *p == parent_type) {
                return true;
            }
            node = parents[0];
        }
    }
}
