use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alias::{self, AliasGraph, AliasStep};
use crate::document::{
    BindingSlot, LibraryVariable, Node, PaintTarget, ResolvedType, ResolvedValue, ScanScope,
    Style, StyleKind, Variable, VariableCollection, VariableLookup, VariableValue,
};

pub trait DocumentStore {
    /// Local collections only.
    fn collections(&self) -> Result<Vec<VariableCollection>>;

    /// Any collection the document can resolve, remote ones included.
    fn collection_by_id(&self, id: &str) -> Result<Option<VariableCollection>>;

    /// Local variables only.
    fn variables(&self) -> Result<Vec<Variable>>;

    fn lookup_variable(&self, id: &str) -> Result<VariableLookup>;

    fn node(&self, id: &str) -> Result<Option<Node>>;

    /// Root nodes of `scope`; descendants are reachable through `children`.
    fn scope_roots(&self, scope: &ScanScope) -> Result<Vec<Node>>;

    fn style(&self, id: &str) -> Result<Option<Style>>;

    /// Binds `variable_id` at `slot`. The rendered literal becomes the
    /// variable's resolved value.
    fn bind_variable(&mut self, node_id: &str, slot: &BindingSlot, variable_id: &str) -> Result<()>;

    fn unbind_variable(&mut self, node_id: &str, slot: &BindingSlot, literal: ResolvedValue) -> Result<()>;

    /// Removes the style reference; the style's values stay on the node as literals.
    fn detach_style(&mut self, node_id: &str, kind: StyleKind) -> Result<()>;

    fn library_variables(&self) -> Result<Vec<LibraryVariable>>;

    fn import_library_variable(&mut self, key: &str) -> Result<Variable>;

    fn select_node(&mut self, node_id: &str) -> Result<()>;

    /// Cooperative suspension point between bulk items and scan batches.
    fn yield_now(&mut self) {}

    fn export_snapshot(&self) -> Result<Value> {
        Err(anyhow!("this document store cannot export snapshots"))
    }
}

/// Alias graph over whatever a store can resolve by id. Store errors read as
/// unknown ids.
pub struct StoreGraph<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> StoreGraph<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }
}

impl AliasGraph for StoreGraph<'_> {
    type Value = ResolvedValue;

    fn step(&self, id: &str) -> Option<AliasStep<ResolvedValue>> {
        let VariableLookup::Found(variable) = self.store.lookup_variable(id).ok()? else {
            return None;
        };
        let default_mode = self
            .store
            .collection_by_id(&variable.collection_id)
            .ok()
            .flatten()
            .map(|collection| collection.default_mode_id);
        variable_step(&variable, default_mode.as_deref())
    }
}

pub fn variable_step(variable: &Variable, mode_id: Option<&str>) -> Option<AliasStep<ResolvedValue>> {
    match variable.value_for_mode(mode_id)? {
        VariableValue::Alias(target) => Some(AliasStep::Alias(target.id.clone())),
        VariableValue::Color(color) => Some(AliasStep::Value(ResolvedValue::Color(*color))),
        VariableValue::Number(value) => Some(AliasStep::Value(ResolvedValue::Number(*value))),
        VariableValue::Boolean(_) | VariableValue::Text(_) => None,
    }
}

/// Terminal value of any variable `store` can resolve, remote ones included.
pub fn resolve_in_store(store: &dyn DocumentStore, id: &str) -> Option<ResolvedValue> {
    alias::resolve(&StoreGraph::new(store), id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedVariable {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub collection_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySource {
    pub key: String,
    pub name: String,
    pub resolved_type: ResolvedType,
    pub collection: VariableCollection,
    #[serde(default)]
    pub values_by_mode: BTreeMap<String, VariableValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    #[serde(default)]
    pub collections: Vec<VariableCollection>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub library: Vec<LibrarySource>,
    #[serde(default)]
    pub deleted_variables: Vec<DeletedVariable>,
    #[serde(default)]
    pub styles: Vec<Style>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub selection: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: DocumentSnapshot,
}

impl MemoryStore {
    pub fn new(snapshot: DocumentSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_json(value: Value) -> Result<Self> {
        let snapshot: DocumentSnapshot = serde_json::from_value(value)
            .map_err(|err| anyhow!("invalid document snapshot: {err}"))?;
        Ok(Self::new(snapshot))
    }

    fn variable(&self, id: &str) -> Option<&Variable> {
        self.snapshot.variables.iter().find(|variable| variable.id == id)
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node> {
        find_node_mut(&mut self.snapshot.nodes, id).ok_or_else(|| anyhow!("node not found: {id}"))
    }

    fn has_collection(&self, id: &str) -> bool {
        self.snapshot
            .collections
            .iter()
            .any(|collection| collection.id == id)
    }
}

fn find_node<'a>(nodes: &'a [Node], id: &str) -> Option<&'a Node> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_node(&node.children, id) {
            return Some(found);
        }
    }
    None
}

fn find_node_mut<'a>(nodes: &'a mut [Node], id: &str) -> Option<&'a mut Node> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_node_mut(&mut node.children, id) {
            return Some(found);
        }
    }
    None
}

impl DocumentStore for MemoryStore {
    fn collections(&self) -> Result<Vec<VariableCollection>> {
        Ok(self
            .snapshot
            .collections
            .iter()
            .filter(|collection| !collection.remote)
            .cloned()
            .collect())
    }

    fn collection_by_id(&self, id: &str) -> Result<Option<VariableCollection>> {
        Ok(self
            .snapshot
            .collections
            .iter()
            .find(|collection| collection.id == id)
            .cloned())
    }

    fn variables(&self) -> Result<Vec<Variable>> {
        Ok(self
            .snapshot
            .variables
            .iter()
            .filter(|variable| !variable.remote)
            .cloned()
            .collect())
    }

    fn lookup_variable(&self, id: &str) -> Result<VariableLookup> {
        if let Some(variable) = self.variable(id) {
            return Ok(VariableLookup::Found(variable.clone()));
        }
        let tombstone = self
            .snapshot
            .deleted_variables
            .iter()
            .find(|deleted| deleted.id == id);
        Ok(VariableLookup::Missing {
            last_known_name: tombstone.and_then(|deleted| deleted.name.clone()),
            last_known_collection: tombstone.and_then(|deleted| deleted.collection_name.clone()),
        })
    }

    fn node(&self, id: &str) -> Result<Option<Node>> {
        Ok(find_node(&self.snapshot.nodes, id).cloned())
    }

    fn scope_roots(&self, scope: &ScanScope) -> Result<Vec<Node>> {
        match scope {
            ScanScope::Document => Ok(self.snapshot.nodes.clone()),
            ScanScope::Nodes { ids } => ids
                .iter()
                .map(|id| {
                    find_node(&self.snapshot.nodes, id)
                        .cloned()
                        .ok_or_else(|| anyhow!("node not found: {id}"))
                })
                .collect(),
        }
    }

    fn style(&self, id: &str) -> Result<Option<Style>> {
        Ok(self.snapshot.styles.iter().find(|style| style.id == id).cloned())
    }

    fn bind_variable(&mut self, node_id: &str, slot: &BindingSlot, variable_id: &str) -> Result<()> {
        let variable = self
            .variable(variable_id)
            .ok_or_else(|| anyhow!("variable not found: {variable_id}"))?;
        if variable.resolved_type != slot.expected_type() {
            return Err(anyhow!(
                "variable {} has type {:?}, {slot} expects {:?}",
                variable.name,
                variable.resolved_type,
                slot.expected_type()
            ));
        }
        let value = resolve_in_store(&*self, variable_id)
            .ok_or_else(|| anyhow!("variable {variable_id} does not resolve to a value"))?;

        let node = self.node_mut(node_id)?;
        match (slot, value) {
            (BindingSlot::Paint { target, index }, ResolvedValue::Color(color)) => {
                let paint = node
                    .paints_mut(*target)
                    .and_then(|paints| paints.get_mut(*index))
                    .ok_or_else(|| anyhow!("node {node_id} has no paint at {slot}"))?;
                if !paint.is_solid() {
                    return Err(anyhow!("paint {slot} on {node_id} is not a solid colour"));
                }
                paint.color = Some(color);
                paint.bound_variable = Some(variable_id.to_string());
            }
            (BindingSlot::Number { field }, ResolvedValue::Number(number)) => {
                if !node.numbers.contains_key(field) {
                    return Err(anyhow!("node {node_id} has no bindable field {}", field.name()));
                }
                node.numbers.insert(*field, number);
                node.bound_variables.insert(*field, variable_id.to_string());
            }
            _ => return Err(anyhow!("variable {variable_id} cannot be bound to {slot}")),
        }
        Ok(())
    }

    fn unbind_variable(&mut self, node_id: &str, slot: &BindingSlot, literal: ResolvedValue) -> Result<()> {
        let node = self.node_mut(node_id)?;
        match (slot, literal) {
            (BindingSlot::Paint { target, index }, ResolvedValue::Color(color)) => {
                let paint = node
                    .paints_mut(*target)
                    .and_then(|paints| paints.get_mut(*index))
                    .ok_or_else(|| anyhow!("node {node_id} has no paint at {slot}"))?;
                paint.bound_variable = None;
                paint.color = Some(color);
            }
            (BindingSlot::Number { field }, ResolvedValue::Number(number)) => {
                node.bound_variables.remove(field);
                node.numbers.insert(*field, number);
            }
            _ => return Err(anyhow!("literal {literal} does not fit {slot}")),
        }
        Ok(())
    }

    fn detach_style(&mut self, node_id: &str, kind: StyleKind) -> Result<()> {
        let node = self.node_mut(node_id)?;
        node.styles
            .remove(&kind)
            .map(|_| ())
            .ok_or_else(|| anyhow!("node {node_id} has no {kind:?} style"))
    }

    fn library_variables(&self) -> Result<Vec<LibraryVariable>> {
        Ok(self
            .snapshot
            .library
            .iter()
            .map(|source| LibraryVariable {
                key: source.key.clone(),
                name: source.name.clone(),
                collection_name: source.collection.name.clone(),
                resolved_type: source.resolved_type,
            })
            .collect())
    }

    fn import_library_variable(&mut self, key: &str) -> Result<Variable> {
        if let Some(existing) = self
            .snapshot
            .variables
            .iter()
            .find(|variable| !variable.remote && variable.key.as_deref() == Some(key))
        {
            return Ok(existing.clone());
        }
        let source = self
            .snapshot
            .library
            .iter()
            .find(|source| source.key == key)
            .cloned()
            .ok_or_else(|| anyhow!("library variable not found: {key}"))?;

        if !self.has_collection(&source.collection.id) {
            let mut collection = source.collection.clone();
            collection.remote = false;
            self.snapshot.collections.push(collection);
        }
        let variable = Variable {
            id: format!("VariableID:{key}"),
            name: source.name,
            collection_id: source.collection.id,
            resolved_type: source.resolved_type,
            values_by_mode: source.values_by_mode,
            remote: false,
            key: Some(key.to_string()),
        };
        self.snapshot.variables.push(variable.clone());
        Ok(variable)
    }

    fn select_node(&mut self, node_id: &str) -> Result<()> {
        if find_node(&self.snapshot.nodes, node_id).is_none() {
            return Err(anyhow!("node not found: {node_id}"));
        }
        self.snapshot.selection = vec![node_id.to_string()];
        Ok(())
    }

    fn export_snapshot(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.snapshot)?)
    }
}

pub fn first_solid_paint(node: &Node, target: PaintTarget) -> Option<usize> {
    node.paints(target)?.iter().position(|paint| paint.is_solid())
}
