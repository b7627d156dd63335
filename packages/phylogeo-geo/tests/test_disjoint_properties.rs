//! Property tests for disjoint-location resolution
//!
//! Runs the disjointer over random selections from a synthetic gazetteer
//! (continent -> countries -> ADM1 -> ADM2 -> places) and checks:
//! - pairwise disjointness of the partition
//! - size bounds and their error messages
//! - every rewrite chain ends at a retained member
//! - re-resolving the partition at the same granularity is a no-op
//!
//! A second gazetteer of US states and their counties drives the GLM policy,
//! where counties are canonicalized to the enclosing state.

use phylogeo_geo::{
    DisjointPolicy, GeoLocation, GeonameDisjointer, GeonameId, LocatedRecord, ResolutionError,
    US_STATES,
};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

struct Place {
    id: GeonameId,
    code: &'static str,
    ancestors: Vec<GeonameId>,
}

fn gazetteer() -> Vec<Place> {
    let mut places = vec![Place {
        id: 1,
        code: "CONT",
        ancestors: vec![],
    }];
    for c in 0..4 {
        places.push(Place {
            id: 10 + c,
            code: "PCLI",
            ancestors: vec![1],
        });
    }
    for a in 0..40 {
        let country = 10 + a % 4;
        places.push(Place {
            id: 100 + a,
            code: "ADM1",
            ancestors: vec![1, country],
        });
    }
    for d in 0..120 {
        let adm1 = 100 + d % 40;
        let country = 10 + (adm1 - 100) % 4;
        places.push(Place {
            id: 1000 + d,
            code: "ADM2",
            ancestors: vec![1, country, adm1],
        });
    }
    for p in 0..120 {
        let adm2 = 1000 + (p * 7) % 120;
        let adm1 = 100 + (adm2 - 1000) % 40;
        let country = 10 + (adm1 - 100) % 4;
        places.push(Place {
            id: 5000 + p,
            code: "PPL",
            ancestors: vec![1, country, adm1, adm2],
        });
    }
    places
}

fn located(index: usize, place: &Place) -> LocatedRecord {
    LocatedRecord::new(
        format!("rec-{}", index),
        Some(GeoLocation::new(place.id, format!("Place {}", place.id), place.code)),
        Some(place.ancestors.iter().copied().collect()),
    )
}

fn ancestor_table(places: &[Place]) -> HashMap<GeonameId, HashSet<GeonameId>> {
    places
        .iter()
        .map(|p| (p.id, p.ancestors.iter().copied().collect()))
        .collect()
}

const US: GeonameId = 6252001;
const GLM_STATES: usize = 12;
const COUNTIES_PER_STATE: usize = 3;

/// Country, then `GLM_STATES` states, then their counties; counties carry only a region label
fn us_gazetteer() -> Vec<(GeoLocation, HashSet<GeonameId>)> {
    let mut places = vec![(
        GeoLocation::new(US, "United States", "PCLI"),
        HashSet::new(),
    )];
    for state in &US_STATES[..GLM_STATES] {
        places.push((
            GeoLocation::new(state.geoname_id, state.name, "ADM1").with_region(state.name),
            [US].into_iter().collect(),
        ));
    }
    for (s, state) in US_STATES[..GLM_STATES].iter().enumerate() {
        for c in 0..COUNTIES_PER_STATE {
            let id = 9_000_000 + (s * 10 + c) as GeonameId;
            places.push((
                GeoLocation::new(id, format!("County {}", id), "ADM2").with_region(state.name),
                [US, state.geoname_id].into_iter().collect(),
            ));
        }
    }
    places
}

proptest! {
    #[test]
    fn prop_glm_partition_is_disjoint_states(
        picks in prop::collection::vec(0usize..(1 + GLM_STATES * (1 + COUNTIES_PER_STATE)), 0..30),
        max_states in 2usize..15,
    ) {
        let places = us_gazetteer();
        let table: HashMap<GeonameId, HashSet<GeonameId>> = places
            .iter()
            .map(|(loc, anc)| (loc.geoname_id, anc.clone()))
            .collect();
        let state_ids: HashSet<GeonameId> =
            US_STATES[..GLM_STATES].iter().map(|s| s.geoname_id).collect();
        let records: Vec<LocatedRecord> = picks
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let (location, ancestors) = &places[*p];
                LocatedRecord::new(format!("rec-{}", i), Some(location.clone()), Some(ancestors.clone()))
            })
            .collect();

        let policy = DisjointPolicy { use_default_glm: true, max_states, ..Default::default() };
        match GeonameDisjointer::new(policy).resolve(&records) {
            Ok(resolution) => {
                prop_assert_eq!(resolution.common_type.as_str(), "ADM1");
                let members: Vec<&GeoLocation> = resolution.partition.iter().collect();
                prop_assert!(members.len() >= 2 && members.len() <= max_states);

                for a in &members {
                    prop_assert!(state_ids.contains(&a.geoname_id), "{} is not a state", a.name);
                    for b in &members {
                        if a.geoname_id != b.geoname_id {
                            prop_assert!(!table[&b.geoname_id].contains(&a.geoname_id));
                        }
                    }
                }

                for record in &resolution.records {
                    let target = resolution
                        .rewrites
                        .resolve(record.original_geoname_id, &resolution.partition);
                    prop_assert_eq!(target, Ok(record.location.geoname_id));
                }
                for (from, _) in resolution.rewrites.iter() {
                    prop_assert!(!resolution.partition.contains(from));
                }
            }
            Err(ResolutionError::TooFewLocations { count, .. }) => prop_assert!(count < 2),
            Err(ResolutionError::TooManyLocations { count, max, .. }) => {
                prop_assert_eq!(max, max_states);
                prop_assert!(count > max_states);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    #[test]
    fn prop_partition_is_disjoint_and_bounded(
        picks in prop::collection::vec(0usize..285, 0..40),
        max_states in 2usize..30,
    ) {
        let places = gazetteer();
        let table = ancestor_table(&places);
        let records: Vec<LocatedRecord> = picks
            .iter()
            .enumerate()
            .map(|(i, p)| located(i, &places[*p]))
            .collect();

        let policy = DisjointPolicy { max_states, ..Default::default() };
        match GeonameDisjointer::new(policy.clone()).resolve(&records) {
            Ok(resolution) => {
                let members: Vec<&GeoLocation> = resolution.partition.iter().collect();
                prop_assert!(members.len() >= 2 && members.len() <= max_states);

                for a in &members {
                    for b in &members {
                        if a.geoname_id == b.geoname_id {
                            continue;
                        }
                        prop_assert!(!table[&b.geoname_id].contains(&a.geoname_id));
                    }
                }

                for record in &resolution.records {
                    prop_assert!(resolution.partition.contains(record.location.geoname_id));
                    let target = resolution
                        .rewrites
                        .resolve(record.original_geoname_id, &resolution.partition);
                    prop_assert_eq!(target, Ok(record.location.geoname_id));
                }

                // rewrite keys are never retained members
                for (from, _) in resolution.rewrites.iter() {
                    prop_assert!(!resolution.partition.contains(from));
                }

                let again: Vec<LocatedRecord> = members
                    .iter()
                    .enumerate()
                    .map(|(i, m)| LocatedRecord::new(
                        format!("member-{}", i),
                        Some((*m).clone()),
                        Some(table[&m.geoname_id].clone()),
                    ))
                    .collect();
                let same_level = DisjointPolicy {
                    level_override: Some(resolution.common_type.clone()),
                    ..policy
                };
                let rerun = GeonameDisjointer::new(same_level).resolve(&again).unwrap();
                prop_assert_eq!(rerun.partition, resolution.partition);
                prop_assert!(rerun.rewrites.is_empty());
            }
            Err(ResolutionError::TooFewLocations { count, sole }) => {
                prop_assert!(count < 2);
                prop_assert_eq!(sole.is_some(), count == 1);
            }
            Err(ResolutionError::TooManyLocations { count, max, names }) => {
                prop_assert_eq!(max, max_states);
                prop_assert!(count > max_states);
                prop_assert_eq!(names.len(), count);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}

#[test]
fn test_output_is_independent_of_duplicate_records() {
    let places = gazetteer();
    let picks = [5usize, 6, 7, 5, 5, 6];
    let records: Vec<LocatedRecord> = picks
        .iter()
        .enumerate()
        .map(|(i, p)| located(i, &places[*p]))
        .collect();

    let resolution = GeonameDisjointer::new(DisjointPolicy::default())
        .resolve(&records)
        .unwrap();
    assert_eq!(resolution.state_count(), 3);
    assert_eq!(resolution.records.len(), 6);
}
