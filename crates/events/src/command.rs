use gearshop_core::AggregateId;

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** — a request to mutate one aggregate. They
/// are transient (never persisted) and are turned into events, which are.
/// Each command names its target aggregate so infrastructure can route it,
/// and so different job sheets can be mutated concurrently while a single
/// sheet's stream serializes its writers.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
