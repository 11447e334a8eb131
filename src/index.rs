use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::alias::{self, AliasGraph, AliasStep};
use crate::color::Rgba;
use crate::config::EngineConfig;
use crate::document::{ResolvedType, ResolvedValue, Variable};
use crate::number;
use crate::path;
use crate::store::{variable_step, DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Semantic,
    Core,
    Component,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVariable {
    pub variable: Variable,
    pub kind: VariableKind,
    pub collection_name: String,
    /// Normalised variable name.
    pub name: String,
    /// Normalised `collection/name`.
    pub full_path: String,
    pub resolved: Option<ResolvedValue>,
}

impl IndexedVariable {
    pub fn id(&self) -> &str {
        &self.variable.id
    }
}

/// Semantic / core / component classification from the variable name and
/// its collection name.
pub fn classify(name: &str, collection_name: &str, config: &EngineConfig) -> VariableKind {
    let segments = path::segments(name);
    let collection = collection_name.to_lowercase();
    let marks = |markers: &[String]| markers.iter().any(|marker| collection.contains(marker.as_str()));

    let in_component = segments
        .iter()
        .any(|segment| config.component_markers.contains(segment));
    if in_component || marks(&config.component_markers) {
        return VariableKind::Component;
    }
    let semantic_prefix = segments
        .first()
        .map(|first| config.semantic_prefixes.contains(first))
        .unwrap_or(false);
    if semantic_prefix || marks(&config.semantic_collection_markers) {
        return VariableKind::Semantic;
    }
    VariableKind::Core
}

struct LocalGraph<'a> {
    variables: &'a HashMap<String, Variable>,
    default_modes: &'a HashMap<String, String>,
}

impl AliasGraph for LocalGraph<'_> {
    type Value = ResolvedValue;

    fn step(&self, id: &str) -> Option<AliasStep<ResolvedValue>> {
        let variable = self.variables.get(id)?;
        let mode = self.default_modes.get(&variable.collection_id);
        variable_step(variable, mode.map(String::as_str))
    }
}

#[derive(Debug, Default)]
pub struct VariableIndex {
    variables: HashMap<String, IndexedVariable>,
    order: Vec<String>,
    by_full_path: HashMap<String, String>,
    by_name: HashMap<String, Vec<String>>,
    by_resolved_color: HashMap<String, Vec<String>>,
    by_resolved_number: HashMap<u64, Vec<String>>,
    resolved_number_by_id: HashMap<String, f64>,
    collection_names: HashMap<String, String>,
    default_modes: HashMap<String, String>,
}

impl VariableIndex {
    pub fn build(store: &dyn DocumentStore, config: &EngineConfig) -> Result<Self> {
        let mut index = VariableIndex::default();
        for collection in store.collections()? {
            index
                .collection_names
                .insert(collection.id.clone(), collection.name.clone());
            index
                .default_modes
                .insert(collection.id.clone(), collection.default_mode_id.clone());
        }

        let variables: Vec<Variable> = store
            .variables()?
            .into_iter()
            .filter(|variable| !variable.values_by_mode.is_empty())
            .collect();
        let by_id: HashMap<String, Variable> = variables
            .iter()
            .map(|variable| (variable.id.clone(), variable.clone()))
            .collect();
        let graph = LocalGraph {
            variables: &by_id,
            default_modes: &index.default_modes,
        };
        let resolved: Vec<Option<ResolvedValue>> = variables
            .iter()
            .map(|variable| alias::resolve(&graph, &variable.id))
            .collect();

        for (variable, resolved) in variables.into_iter().zip(resolved) {
            let collection_name = index
                .collection_names
                .get(&variable.collection_id)
                .cloned()
                .unwrap_or_default();
            let entry = IndexedVariable {
                kind: classify(&variable.name, &collection_name, config),
                name: path::normalize(&variable.name),
                full_path: path::full_path(&collection_name, &variable.name),
                collection_name,
                resolved,
                variable,
            };
            index.insert(entry);
        }
        Ok(index)
    }

    fn insert(&mut self, entry: IndexedVariable) {
        let id = entry.id().to_string();
        let semantic = entry.kind == VariableKind::Semantic;
        self.order.push(id.clone());
        self.by_full_path
            .entry(entry.full_path.clone())
            .or_insert_with(|| id.clone());
        self.by_name.entry(entry.name.clone()).or_default().push(id.clone());

        match entry.resolved {
            Some(ResolvedValue::Color(color)) if entry.variable.resolved_type == ResolvedType::Color => {
                let bucket = self.by_resolved_color.entry(color.to_hex()).or_default();
                push_semantic_first(bucket, &self.variables, id.clone(), semantic);
            }
            Some(ResolvedValue::Number(value)) if entry.variable.resolved_type == ResolvedType::Float => {
                if let Some(key) = number::number_key(value) {
                    let bucket = self.by_resolved_number.entry(key).or_default();
                    push_semantic_first(bucket, &self.variables, id.clone(), semantic);
                }
                self.resolved_number_by_id.insert(id.clone(), value);
            }
            _ => {}
        }
        self.variables.insert(id, entry);
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&IndexedVariable> {
        self.variables.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedVariable> {
        self.order.iter().filter_map(|id| self.variables.get(id))
    }

    pub fn by_full_path(&self, full_path: &str) -> Option<&IndexedVariable> {
        self.by_full_path
            .get(&path::normalize(full_path))
            .and_then(|id| self.variables.get(id))
    }

    pub fn by_name(&self, name: &str) -> Vec<&IndexedVariable> {
        self.lookup(self.by_name.get(&path::normalize(name)))
    }

    /// Exact colour matches keyed by full hex, semantic variables first.
    pub fn by_color(&self, color: &Rgba) -> Vec<&IndexedVariable> {
        self.lookup(self.by_resolved_color.get(&color.to_hex()))
    }

    pub fn by_number(&self, value: f64) -> Vec<&IndexedVariable> {
        self.lookup(number::number_key(value).and_then(|key| self.by_resolved_number.get(&key)))
    }

    pub fn by_value(&self, value: &ResolvedValue) -> Vec<&IndexedVariable> {
        match value {
            ResolvedValue::Color(color) => self.by_color(color),
            ResolvedValue::Number(number) => self.by_number(*number),
        }
    }

    pub fn resolved_number(&self, id: &str) -> Option<f64> {
        self.resolved_number_by_id.get(id).copied()
    }

    /// Every numeric variable with its resolved value, in declaration order.
    pub fn numbers(&self) -> Vec<(&IndexedVariable, f64)> {
        self.iter()
            .filter_map(|entry| self.resolved_number(entry.id()).map(|value| (entry, value)))
            .collect()
    }

    pub fn collection_name(&self, collection_id: &str) -> Option<&str> {
        self.collection_names.get(collection_id).map(String::as_str)
    }

    fn lookup(&self, ids: Option<&Vec<String>>) -> Vec<&IndexedVariable> {
        ids.map(|ids| ids.iter().filter_map(|id| self.variables.get(id)).collect())
            .unwrap_or_default()
    }
}

/// Semantic ids go after the bucket's existing semantic run, everything else
/// at the back.
fn push_semantic_first(
    bucket: &mut Vec<String>,
    variables: &HashMap<String, IndexedVariable>,
    id: String,
    semantic: bool,
) {
    if !semantic {
        bucket.push(id);
        return;
    }
    let position = bucket
        .iter()
        .take_while(|existing| {
            variables
                .get(existing.as_str())
                .map(|entry| entry.kind == VariableKind::Semantic)
                .unwrap_or(false)
        })
        .count();
    bucket.insert(position, id);
}

#[derive(Debug)]
pub struct IndexCache {
    ttl: Duration,
    entry: Option<(Duration, Arc<VariableIndex>)>,
    builds: usize,
}

impl IndexCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: None,
            builds: 0,
        }
    }

    pub fn is_fresh(&self, now: Duration) -> bool {
        match &self.entry {
            Some((built_at, _)) => now.saturating_sub(*built_at) < self.ttl,
            None => false,
        }
    }

    pub fn get_or_build<F>(&mut self, now: Duration, build: F) -> Result<Arc<VariableIndex>>
    where
        F: FnOnce() -> Result<VariableIndex>,
    {
        if self.is_fresh(now) {
            if let Some((_, index)) = &self.entry {
                return Ok(index.clone());
            }
        }
        let index = Arc::new(build()?);
        self.builds += 1;
        self.entry = Some((now, index.clone()));
        Ok(index)
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn builds(&self) -> usize {
        self.builds
    }
}
