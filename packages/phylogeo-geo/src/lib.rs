/*
 * Phylogeo Geo - Discrete location states for phylogeographic inference
 *
 * Converts arbitrary, possibly overlapping geoname tags attached to sequence
 * records into a minimal pairwise-disjoint partition of locations.
 *
 * Architecture:
 * - GeoHierarchy: static DAG over administrative feature codes
 * - GeonameDisjointer: greedy accumulation + pairwise collapse
 * - US state canonicalization (GLM mode)
 * - AncestorResolver: pluggable source of enclosing-region ids
 */

// Public modules
pub mod disjoint;
pub mod error;
pub mod hierarchy;
pub mod location;
pub mod resolver;
pub mod states;

// Re-exports
pub use disjoint::{DisjointPartition, DisjointPolicy, GeonameDisjointer, Resolution, ResolvedRecord, RewriteMap};
pub use error::{ResolutionError, Result};
pub use hierarchy::GeoHierarchy;
pub use location::{GeoLocation, GeonameId, LocatedRecord};
pub use resolver::{AncestorResolver, InMemoryAncestorResolver};
pub use states::{canonical_state, UsState, US_STATES};
