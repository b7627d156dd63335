use crate::error::{ResolutionError, Result};
use crate::hierarchy::{GeoHierarchy, FIRST_LEVEL_CODE};
use crate::location::{GeoLocation, GeonameId, LocatedRecord};
use crate::states::canonical_state;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Default upper bound on discrete location states
pub const DEFAULT_MAX_STATES: usize = 25;

/// Minimum number of states a discrete trait model can use
pub const MIN_STATES: usize = 2;

/// Policy bounds for one resolution call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisjointPolicy {
    /// Aggregate to US states so default GLM covariates apply
    pub use_default_glm: bool,
    pub max_states: usize,
    /// Fixed working granularity instead of the most frequent feature code
    pub level_override: Option<String>,
}

impl Default for DisjointPolicy {
    fn default() -> Self {
        Self {
            use_default_glm: false,
            max_states: DEFAULT_MAX_STATES,
            level_override: None,
        }
    }
}

/// Pairwise-disjoint set of retained locations, in acceptance order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisjointPartition {
    members: Vec<GeoLocation>,
}

impl DisjointPartition {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: GeonameId) -> bool {
        self.members.iter().any(|m| m.geoname_id == id)
    }

    pub fn get(&self, id: GeonameId) -> Option<&GeoLocation> {
        self.members.iter().find(|m| m.geoname_id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeoLocation> {
        self.members.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name.clone()).collect()
    }
}

/// Substitution table: rejected location id -> location it collapsed into
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteMap {
    entries: BTreeMap<GeonameId, GeonameId>,
}

impl RewriteMap {
    /// First substitution for an id wins; self-substitutions are not recorded
    fn record(&mut self, from: GeonameId, to: GeonameId) {
        if from != to {
            self.entries.entry(from).or_insert(to);
        }
    }

    pub fn get(&self, id: GeonameId) -> Option<GeonameId> {
        self.entries.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GeonameId, GeonameId)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    /// Follow the substitution chain from `id` to a partition member
    pub fn resolve(&self, id: GeonameId, partition: &DisjointPartition) -> Result<GeonameId> {
        let mut current = id;
        for _ in 0..=self.entries.len() {
            if partition.contains(current) {
                return Ok(current);
            }
            match self.entries.get(&current) {
                Some(next) => current = *next,
                None => break,
            }
        }
        Err(ResolutionError::UnresolvedRewrite(id))
    }
}

/// A retained input record, relabelled to the partition member it maps to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRecord {
    pub record_id: String,
    pub original_geoname_id: GeonameId,
    pub location: GeoLocation,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub records: Vec<ResolvedRecord>,
    pub partition: DisjointPartition,
    pub rewrites: RewriteMap,
    pub common_type: String,
}

impl Resolution {
    /// Number of discrete states, |partition|
    pub fn state_count(&self) -> usize {
        self.partition.len()
    }
}

struct Candidate<'a> {
    record_id: &'a str,
    location: &'a GeoLocation,
    code: &'a str,
    ancestors: &'a HashSet<GeonameId>,
}

struct Member {
    location: GeoLocation,
    ancestors: HashSet<GeonameId>,
    removed: bool,
}

impl Member {
    fn id(&self) -> GeonameId {
        self.location.geoname_id
    }

    /// `other` encloses or equals this member
    fn is_covered_by(&self, other: GeonameId) -> bool {
        self.id() == other || self.ancestors.contains(&other)
    }
}

/// Reduces overlapping location tags to a minimal disjoint partition.
///
/// Greedy accumulation in input order followed by a pairwise collapse; in GLM mode
/// the survivors are canonicalized to US states. Input order decides ties.
pub struct GeonameDisjointer<'h> {
    hierarchy: &'h GeoHierarchy,
    policy: DisjointPolicy,
}

impl GeonameDisjointer<'static> {
    pub fn new(policy: DisjointPolicy) -> Self {
        Self {
            hierarchy: GeoHierarchy::standard(),
            policy,
        }
    }
}

impl<'h> GeonameDisjointer<'h> {
    pub fn with_hierarchy(hierarchy: &'h GeoHierarchy, policy: DisjointPolicy) -> Self {
        Self { hierarchy, policy }
    }

    pub fn policy(&self) -> &DisjointPolicy {
        &self.policy
    }

    pub fn resolve(&self, records: &[LocatedRecord]) -> Result<Resolution> {
        let usable: Vec<Candidate<'_>> = records.iter().filter_map(Self::candidate).collect();
        debug!(
            "{} of {} records carry a usable location",
            usable.len(),
            records.len()
        );

        let common_type = self.common_type(&usable);
        let working: Vec<Candidate<'_>> = usable
            .into_iter()
            .filter(|c| !self.hierarchy.is_parent(&common_type, c.code))
            .collect();

        let mut rewrites = RewriteMap::default();
        let mut members = Self::accumulate(&working, &mut rewrites);
        Self::collapse(&mut members, &mut rewrites);
        if self.policy.use_default_glm {
            Self::canonicalize(&mut members, &mut rewrites)?;
        }

        let partition = DisjointPartition {
            members: members
                .into_iter()
                .filter(|m| !m.removed)
                .map(|m| m.location)
                .collect(),
        };
        self.check_bounds(&partition)?;

        let mut resolved = Vec::with_capacity(working.len());
        for candidate in &working {
            let target = rewrites.resolve(candidate.location.geoname_id, &partition)?;
            let location = partition
                .get(target)
                .cloned()
                .ok_or(ResolutionError::UnresolvedRewrite(candidate.location.geoname_id))?;
            resolved.push(ResolvedRecord {
                record_id: candidate.record_id.to_string(),
                original_geoname_id: candidate.location.geoname_id,
                location,
            });
        }

        info!(
            "Resolved {} records into {} disjoint locations at {} granularity ({} rewrites)",
            resolved.len(),
            partition.len(),
            common_type,
            rewrites.len()
        );

        Ok(Resolution {
            records: resolved,
            partition,
            rewrites,
            common_type,
        })
    }

    fn candidate(record: &LocatedRecord) -> Option<Candidate<'_>> {
        if !record.is_usable() {
            return None;
        }
        let location = record.location.as_ref()?;
        let code = location.feature_code.as_deref()?;
        let ancestors = record.ancestors.as_ref()?;
        Some(Candidate {
            record_id: &record.record_id,
            location,
            code,
            ancestors,
        })
    }

    /// Working granularity: ADM1 under GLM, else the override, else the most frequent code
    fn common_type(&self, usable: &[Candidate<'_>]) -> String {
        if self.policy.use_default_glm {
            return FIRST_LEVEL_CODE.to_string();
        }
        if let Some(level) = &self.policy.level_override {
            return level.clone();
        }

        let mut counts: Vec<(&str, usize)> = Vec::new();
        for candidate in usable {
            match counts.iter_mut().find(|(code, _)| *code == candidate.code) {
                Some((_, n)) => *n += 1,
                None => counts.push((candidate.code, 1)),
            }
        }

        // strict comparison keeps the first-seen code on ties
        let mut best: Option<(&str, usize)> = None;
        for (code, n) in counts {
            if best.map_or(true, |(_, m)| n > m) {
                best = Some((code, n));
            }
        }
        best.map(|(code, _)| code.to_string())
            .unwrap_or_else(|| FIRST_LEVEL_CODE.to_string())
    }

    fn accumulate(working: &[Candidate<'_>], rewrites: &mut RewriteMap) -> Vec<Member> {
        let mut members: Vec<Member> = Vec::new();
        for candidate in working {
            let id = candidate.location.geoname_id;
            let covering = members
                .iter()
                .find(|m| m.id() == id || candidate.ancestors.contains(&m.id()))
                .map(Member::id);

            match covering {
                Some(accepted) => rewrites.record(id, accepted),
                None => members.push(Member {
                    location: candidate.location.clone(),
                    ancestors: candidate.ancestors.clone(),
                    removed: false,
                }),
            }
        }
        members
    }

    fn collapse(members: &mut [Member], rewrites: &mut RewriteMap) {
        for a in 0..members.len() {
            if members[a].removed {
                continue;
            }
            let a_id = members[a].id();
            for b in 0..members.len() {
                if a == b || members[b].removed {
                    continue;
                }
                if members[b].is_covered_by(a_id) {
                    members[b].removed = true;
                    rewrites.record(members[b].id(), a_id);
                }
            }
        }
    }

    fn canonicalize(members: &mut Vec<Member>, rewrites: &mut RewriteMap) -> Result<()> {
        let original = members.len();
        for b in 0..original {
            if members[b].removed {
                continue;
            }
            let state = canonical_state(&members[b].location)
                .ok_or_else(|| ResolutionError::Canonicalization(members[b].location.name.clone()))?;
            if state.geoname_id == members[b].id() {
                continue;
            }

            debug!(
                "Canonicalized {} to {}",
                members[b].location.name, state.name
            );
            members[b].removed = true;
            rewrites.record(members[b].id(), state.geoname_id);

            let present = members
                .iter()
                .any(|m| !m.removed && m.id() == state.geoname_id);
            if !present {
                let mut location = GeoLocation::new(state.geoname_id, state.name, FIRST_LEVEL_CODE)
                    .with_region(state.name);
                location.country = Some("United States".to_string());
                members.push(Member {
                    location,
                    ancestors: HashSet::new(),
                    removed: false,
                });
            }
        }
        Ok(())
    }

    fn check_bounds(&self, partition: &DisjointPartition) -> Result<()> {
        let names = partition.names();
        if names.len() < MIN_STATES {
            return Err(ResolutionError::too_few(&names));
        }
        if names.len() > self.policy.max_states {
            return Err(ResolutionError::TooManyLocations {
                count: names.len(),
                max: self.policy.max_states,
                names,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NORTH_AMERICA: GeonameId = 6255149;
    const EUROPE: GeonameId = 6255148;
    const USA: GeonameId = 6252001;
    const MARYLAND: GeonameId = 4361885;
    const BALTIMORE_COUNTY: GeonameId = 4347790;
    const BALTIMORE: GeonameId = 4347778;
    const NEW_YORK: GeonameId = 5128638;

    fn us_adm1(record: &str, id: GeonameId, name: &str) -> LocatedRecord {
        LocatedRecord::new(
            record,
            Some(GeoLocation::new(id, name, "ADM1")),
            Some([NORTH_AMERICA, USA].into_iter().collect()),
        )
    }

    fn record(
        record: &str,
        id: GeonameId,
        name: &str,
        code: &str,
        ancestors: &[GeonameId],
    ) -> LocatedRecord {
        LocatedRecord::new(
            record,
            Some(GeoLocation::new(id, name, code)),
            Some(ancestors.iter().copied().collect()),
        )
    }

    fn united_states(record_id: &str) -> LocatedRecord {
        record(record_id, USA, "United States", "PCLI", &[NORTH_AMERICA])
    }

    fn scenario_a() -> Vec<LocatedRecord> {
        vec![
            us_adm1("r1", MARYLAND, "Maryland"),
            us_adm1("r2", 5332921, "California"),
            us_adm1("r3", 5509151, "Nevada"),
            us_adm1("r4", 5549030, "Utah"),
            us_adm1("r5", 5037779, "Minnesota"),
            us_adm1("r6", NEW_YORK, "New York"),
            us_adm1("r7", NEW_YORK, "New York"),
            united_states("r8"),
        ]
    }

    #[test]
    fn test_scenario_a_six_distinct_states() {
        let disjointer = GeonameDisjointer::new(DisjointPolicy::default());
        let resolution = disjointer.resolve(&scenario_a()).unwrap();

        assert_eq!(resolution.state_count(), 6);
        assert_eq!(resolution.common_type, "ADM1");
        assert_eq!(
            resolution.partition.names(),
            vec!["Maryland", "California", "Nevada", "Utah", "Minnesota", "New York"]
        );
        // country-level record is excluded, both New York records kept
        assert_eq!(resolution.records.len(), 7);
        assert!(resolution.records.iter().all(|r| r.record_id != "r8"));
        assert!(resolution.rewrites.is_empty());
    }

    #[test]
    fn test_scenario_b_single_location_fails() {
        let disjointer = GeonameDisjointer::new(DisjointPolicy::default());
        let records = vec![
            us_adm1("r1", NEW_YORK, "New York"),
            us_adm1("r2", NEW_YORK, "New York"),
        ];

        let err = disjointer.resolve(&records).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::TooFewLocations {
                count: 1,
                sole: Some("New York".to_string())
            }
        );
        assert!(err.to_string().starts_with("too few distinct locations: 1"));
        assert!(err.to_string().contains("New York"));
    }

    #[test]
    fn test_scenario_c_too_many_locations() {
        let mut records: Vec<LocatedRecord> = crate::states::US_STATES
            .iter()
            .take(26)
            .enumerate()
            .map(|(i, s)| us_adm1(&format!("s{}", i), s.geoname_id, s.name))
            .collect();
        let countries = [
            (3017382, "France"),
            (2921044, "Germany"),
            (3175395, "Italy"),
            (2510769, "Spain"),
            (2750405, "Netherlands"),
            (2802361, "Belgium"),
            (2658434, "Switzerland"),
            (2782113, "Austria"),
            (3144096, "Norway"),
            (2661886, "Sweden"),
        ];
        for (i, (id, name)) in countries.iter().enumerate() {
            records.push(record(&format!("c{}", i), *id, name, "PCLI", &[EUROPE]));
        }
        assert_eq!(records.len(), 36);

        let disjointer = GeonameDisjointer::new(DisjointPolicy {
            max_states: 25,
            ..Default::default()
        });
        match disjointer.resolve(&records).unwrap_err() {
            ResolutionError::TooManyLocations { count, max, names } => {
                assert_eq!(count, 26);
                assert_eq!(max, 25);
                assert_eq!(names.len(), 26);
                for s in crate::states::US_STATES.iter().take(26) {
                    assert!(names.iter().any(|n| n == s.name), "missing {}", s.name);
                }
            }
            other => panic!("Expected TooManyLocations, got {:?}", other),
        }
    }

    #[test]
    fn test_unusable_records_are_dropped() {
        let mut records = vec![
            us_adm1("r1", MARYLAND, "Maryland"),
            us_adm1("r2", NEW_YORK, "New York"),
            LocatedRecord::new("no-location", None, Some([USA].into_iter().collect())),
            LocatedRecord::new(
                "no-ancestors",
                Some(GeoLocation::new(5549030, "Utah", "ADM1")),
                None,
            ),
            LocatedRecord::new(
                "empty-ancestors",
                Some(GeoLocation::new(5509151, "Nevada", "ADM1")),
                Some(HashSet::new()),
            ),
        ];
        let mut no_code = us_adm1("no-code", 5332921, "California");
        no_code.location.as_mut().unwrap().feature_code = None;
        records.push(no_code);

        let resolution = GeonameDisjointer::new(DisjointPolicy::default())
            .resolve(&records)
            .unwrap();
        assert_eq!(resolution.partition.names(), vec!["Maryland", "New York"]);
        assert_eq!(resolution.records.len(), 2);
    }

    #[test]
    fn test_finer_locations_collapse_into_enclosing_region() {
        let records = vec![
            record(
                "city",
                BALTIMORE,
                "Baltimore",
                "PPLA2",
                &[NORTH_AMERICA, USA, MARYLAND, BALTIMORE_COUNTY],
            ),
            record(
                "county",
                BALTIMORE_COUNTY,
                "Baltimore County",
                "ADM2",
                &[NORTH_AMERICA, USA, MARYLAND],
            ),
            us_adm1("state", MARYLAND, "Maryland"),
            us_adm1("other", 5165418, "Ohio"),
        ];

        let resolution = GeonameDisjointer::new(DisjointPolicy::default())
            .resolve(&records)
            .unwrap();

        assert_eq!(resolution.partition.names(), vec!["Maryland", "Ohio"]);
        assert_eq!(resolution.rewrites.get(BALTIMORE), Some(BALTIMORE_COUNTY));
        assert_eq!(resolution.rewrites.get(BALTIMORE_COUNTY), Some(MARYLAND));

        let city = &resolution.records[0];
        assert_eq!(city.record_id, "city");
        assert_eq!(city.original_geoname_id, BALTIMORE);
        assert_eq!(city.location.name, "Maryland");
    }

    #[test]
    fn test_greedy_rejects_finer_after_coarser() {
        let records = vec![
            us_adm1("state", MARYLAND, "Maryland"),
            record(
                "city",
                BALTIMORE,
                "Baltimore",
                "PPLA2",
                &[NORTH_AMERICA, USA, MARYLAND],
            ),
            us_adm1("other", NEW_YORK, "New York"),
        ];

        let resolution = GeonameDisjointer::new(DisjointPolicy::default())
            .resolve(&records)
            .unwrap();
        assert_eq!(resolution.partition.names(), vec!["Maryland", "New York"]);
        assert_eq!(resolution.rewrites.get(BALTIMORE), Some(MARYLAND));
        assert_eq!(resolution.records[1].location.name, "Maryland");
    }

    #[test]
    fn test_level_override_drops_coarser_types() {
        let records = vec![
            us_adm1("a", MARYLAND, "Maryland"),
            us_adm1("b", NEW_YORK, "New York"),
            record("c", BALTIMORE, "Baltimore", "PPLA2", &[NORTH_AMERICA, USA, MARYLAND]),
            record("d", 5128581, "New York City", "PPL", &[NORTH_AMERICA, USA, NEW_YORK]),
        ];

        let resolution = GeonameDisjointer::new(DisjointPolicy {
            level_override: Some("PPL".to_string()),
            ..Default::default()
        })
        .resolve(&records)
        .unwrap();

        assert_eq!(resolution.common_type, "PPL");
        assert_eq!(
            resolution.partition.names(),
            vec!["Baltimore", "New York City"]
        );
    }

    #[test]
    fn test_glm_canonicalizes_to_states() {
        let mut city = record("r1", BALTIMORE, "Baltimore", "PPLA2", &[NORTH_AMERICA, USA, 99]);
        city.location.as_mut().unwrap().region = Some("Maryland".to_string());
        let records = vec![
            city,
            us_adm1("r2", NEW_YORK, "New York"),
            record("r3", 4140963, "Washington, D.C.", "PPLC", &[NORTH_AMERICA, USA]),
        ];

        let resolution = GeonameDisjointer::new(DisjointPolicy {
            use_default_glm: true,
            ..Default::default()
        })
        .resolve(&records)
        .unwrap();

        assert_eq!(resolution.common_type, "ADM1");
        // substring match on "Washington" is the documented behaviour
        assert_eq!(
            resolution.partition.names(),
            vec!["New York", "Maryland", "Washington"]
        );
        assert_eq!(resolution.rewrites.get(BALTIMORE), Some(MARYLAND));
        assert_eq!(resolution.records[0].location.name, "Maryland");
    }

    #[test]
    fn test_glm_merges_locations_sharing_a_state() {
        let mut city = record("r1", BALTIMORE, "Baltimore", "PPLA2", &[NORTH_AMERICA, USA, 99]);
        city.location.as_mut().unwrap().region = Some("Maryland".to_string());
        let mut town = record("r2", 4351977, "Columbia", "PPL", &[NORTH_AMERICA, USA, 98]);
        town.location.as_mut().unwrap().region = Some("Maryland".to_string());
        let records = vec![city, town, us_adm1("r3", NEW_YORK, "New York")];

        let resolution = GeonameDisjointer::new(DisjointPolicy {
            use_default_glm: true,
            ..Default::default()
        })
        .resolve(&records)
        .unwrap();

        assert_eq!(resolution.state_count(), 2);
        assert!(resolution.partition.contains(MARYLAND));
        assert!(resolution
            .records
            .iter()
            .take(2)
            .all(|r| r.location.geoname_id == MARYLAND));
    }

    #[test]
    fn test_glm_canonicalization_failure() {
        let records = vec![
            us_adm1("r1", NEW_YORK, "New York"),
            record("r2", 6167865, "Toronto", "PPLA", &[NORTH_AMERICA, 6251999]),
        ];

        let err = GeonameDisjointer::new(DisjointPolicy {
            use_default_glm: true,
            ..Default::default()
        })
        .resolve(&records)
        .unwrap_err();
        assert_eq!(err, ResolutionError::Canonicalization("Toronto".to_string()));
    }

    #[test]
    fn test_common_type_tie_keeps_first_seen() {
        let maryland = us_adm1("a", MARYLAND, "Maryland");
        let ohio = us_adm1("b", 5165418, "Ohio");
        let baltimore = record("c", BALTIMORE, "Baltimore", "PPLA2", &[NORTH_AMERICA, USA, MARYLAND]);
        let annapolis = record("d", 4347242, "Annapolis", "PPLA2", &[NORTH_AMERICA, USA, MARYLAND]);
        let disjointer = GeonameDisjointer::new(DisjointPolicy::default());

        let states_first = vec![maryland.clone(), ohio.clone(), baltimore.clone(), annapolis.clone()];
        let resolution = disjointer.resolve(&states_first).unwrap();
        assert_eq!(resolution.common_type, "ADM1");
        assert_eq!(resolution.partition.names(), vec!["Maryland", "Ohio"]);

        let places_first = vec![baltimore, annapolis, maryland, ohio];
        let resolution = disjointer.resolve(&places_first).unwrap();
        assert_eq!(resolution.common_type, "PPLA2");
        assert_eq!(resolution.partition.names(), vec!["Baltimore", "Annapolis"]);
    }

    #[test]
    fn test_rewrite_resolution_rejects_dangling_chain() {
        let mut rewrites = RewriteMap::default();
        rewrites.record(1, 2);
        rewrites.record(2, 3);
        let partition = DisjointPartition {
            members: vec![GeoLocation::new(4, "Elsewhere", "ADM1")],
        };
        assert_eq!(
            rewrites.resolve(1, &partition),
            Err(ResolutionError::UnresolvedRewrite(1))
        );

        rewrites.record(3, 4);
        assert_eq!(rewrites.resolve(1, &partition), Ok(4));
    }
}
