//! Provider graph
//!
//! Bind-time analysis of where every argument comes from: conflict
//! detection between providers, cycle detection, and transitive
//! resolution. All traversals use explicit stacks.

mod cycle;
mod providers;
mod resolve;

pub use cycle::{find_cycle, find_cycle_normalized, normalize};
pub use providers::{
    ProviderGraph, ProviderMap, Source, SourceKind, StageNode, StaticSources, build_providers,
    check_conflicts, target_key,
};
pub use resolve::{resolve, resolve_one};
