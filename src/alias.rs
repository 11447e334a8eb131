use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum AliasStep<V> {
    Value(V),
    Alias(String),
}

/// A namespace whose entries are either concrete values or references to
/// other entries. Implemented for the document's variables and for the
/// token catalog.
pub trait AliasGraph {
    type Value: Clone;

    /// `None` when `id` is unknown (deleted, external, or never declared) or
    /// carries no value usable at this point of the chain.
    fn step(&self, id: &str) -> Option<AliasStep<Self::Value>>;
}

/// Follows `start` to its terminal value. Cycles, dangling references and
/// entries without a value resolve to `None`.
pub fn resolve<G: AliasGraph + ?Sized>(graph: &G, start: &str) -> Option<G::Value> {
    let mut visited = HashSet::new();
    let mut current = start.to_string();
    loop {
        if !visited.insert(current.clone()) {
            return None;
        }
        match graph.step(&current)? {
            AliasStep::Value(value) => return Some(value),
            AliasStep::Alias(next) => current = next,
        }
    }
}

/// Ids visited while following `start`, the start included, in hop order.
/// Stops at the first repeated id, unknown id, or terminal value.
pub fn alias_chain<G: AliasGraph + ?Sized>(graph: &G, start: &str) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut chain = Vec::new();
    let mut current = start.to_string();
    while visited.insert(current.clone()) {
        chain.push(current.clone());
        match graph.step(&current) {
            Some(AliasStep::Alias(next)) => current = next,
            _ => break,
        }
    }
    chain
}
