use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::bulk::Progress;
use crate::color::{self, ConfidenceTier};
use crate::document::{BindingSlot, Node, ResolvedValue, ScanScope, Variable, VariableLookup};
use crate::index::{IndexedVariable, VariableIndex, VariableKind};
use crate::matching::{find_by_value, MatchContext};
use crate::number;
use crate::path;
use crate::registry::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingHealth {
    Healthy,
    Stale,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemapKind {
    Stale,
    Broken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingRef {
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub slot: BindingSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedReplacement {
    pub variable_id: String,
    pub variable_name: String,
    pub collection_name: String,
    pub confidence: ConfidenceTier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemapEntry {
    pub old_reference_id: String,
    pub old_name: Option<String>,
    pub old_collection: Option<String>,
    pub kind: RemapKind,
    pub usage_count: usize,
    pub suggested_replacement: Option<SuggestedReplacement>,
    pub current_value: Option<String>,
    pub representative: BindingRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemapScanResult {
    pub entries: Vec<RemapEntry>,
    pub scanned_nodes: usize,
    pub total_bindings: usize,
    pub healthy_bindings: usize,
    pub stale_bindings: usize,
    pub broken_bindings: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Classification {
    Healthy,
    Stale { old: Variable, old_collection: Option<String> },
    Broken { last_known_name: Option<String>, last_known_collection: Option<String> },
}

impl Classification {
    fn health(&self) -> BindingHealth {
        match self {
            Classification::Healthy => BindingHealth::Healthy,
            Classification::Stale { .. } => BindingHealth::Stale,
            Classification::Broken { .. } => BindingHealth::Broken,
        }
    }
}

fn classify_binding(ctx: &Context, index: &VariableIndex, variable_id: &str) -> Result<Classification> {
    if index.get(variable_id).is_some() {
        return Ok(Classification::Healthy);
    }
    let store = ctx.session().store();
    match store.lookup_variable(variable_id)? {
        VariableLookup::Found(variable) => {
            let shadowed = index
                .by_name(&variable.name)
                .iter()
                .any(|local| local.id() != variable.id);
            if !shadowed {
                return Ok(Classification::Healthy);
            }
            let old_collection = store
                .collection_by_id(&variable.collection_id)?
                .map(|collection| collection.name);
            Ok(Classification::Stale {
                old: variable,
                old_collection,
            })
        }
        VariableLookup::Missing {
            last_known_name,
            last_known_collection,
        } => Ok(Classification::Broken {
            last_known_name,
            last_known_collection,
        }),
    }
}

/// Health of a single binding id against the current index.
pub fn binding_health(ctx: &mut Context, variable_id: &str) -> Result<BindingHealth> {
    let index = ctx.index()?;
    Ok(classify_binding(ctx, &index, variable_id)?.health())
}

fn confidence_of(current: Option<&ResolvedValue>, candidate: Option<&ResolvedValue>, ctx: &Context) -> ConfidenceTier {
    let (Some(current), Some(candidate)) = (current, candidate) else {
        return ConfidenceTier::Approximate;
    };
    if current.same_as(candidate) {
        return ConfidenceTier::Exact;
    }
    let tier = match (current, candidate) {
        (ResolvedValue::Color(a), ResolvedValue::Color(b)) => color::classify_color(a, b),
        (ResolvedValue::Number(a), ResolvedValue::Number(b)) => {
            number::classify_number(*a, *b, &ctx.session().config().number_tolerance())
        }
        _ => None,
    };
    tier.unwrap_or(ConfidenceTier::Approximate)
}

/// Same-name replacement for a stale variable, preferring the old collection.
fn stale_replacement(
    ctx: &mut Context,
    index: &VariableIndex,
    old: &Variable,
    old_collection: Option<&str>,
    current: Option<&ResolvedValue>,
) -> Option<SuggestedReplacement> {
    let mut candidates: Vec<&IndexedVariable> = index
        .by_name(&old.name)
        .into_iter()
        .filter(|local| local.id() != old.id && local.variable.resolved_type == old.resolved_type)
        .collect();
    candidates.sort_by_key(|local| local.kind != VariableKind::Semantic);

    let same_collection = old_collection.and_then(|wanted| {
        let wanted = path::normalize(wanted);
        candidates
            .iter()
            .copied()
            .find(|local| path::normalize(&local.collection_name) == wanted)
    });
    let chosen = match same_collection {
        Some(chosen) => chosen,
        None => {
            let chosen = candidates.first().copied()?;
            ctx.log(
                "warn",
                "stale binding has no replacement in its original collection",
                Some(json!({
                    "oldReferenceId": old.id,
                    "name": old.name,
                    "collection": old_collection,
                    "replacement": chosen.id(),
                })),
            );
            chosen
        }
    };
    Some(SuggestedReplacement {
        variable_id: chosen.id().to_string(),
        variable_name: chosen.variable.name.clone(),
        collection_name: chosen.collection_name.clone(),
        confidence: confidence_of(current, chosen.resolved.as_ref(), ctx),
    })
}

fn broken_replacement(
    ctx: &mut Context,
    node: &Node,
    slot: &BindingSlot,
    last_known_name: Option<&str>,
    last_known_collection: Option<&str>,
) -> Result<Option<SuggestedReplacement>> {
    let Some(current) = node.value_at(slot) else {
        return Ok(None);
    };
    let match_ctx = MatchContext::for_property(slot.to_string())
        .with_node(node)
        .with_preferred_collection(last_known_collection.map(str::to_string));
    let hit = find_by_value(
        ctx,
        last_known_name.unwrap_or_default(),
        slot.expected_type(),
        &current,
        &match_ctx,
    )?;
    Ok(hit.map(|hit| SuggestedReplacement {
        variable_id: hit.variable_id,
        variable_name: hit.variable_name,
        collection_name: hit.collection_name,
        confidence: hit.confidence,
    }))
}

/// Distinct nodes of `roots` and their descendants, in document order.
fn scope_nodes(roots: &[Node]) -> Vec<Node> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for root in roots {
        for node in root.flatten() {
            if seen.insert(node.id.clone()) {
                out.push(node.clone());
            }
        }
    }
    out
}

/// Walks `scope` and groups every stale or broken binding by the variable
/// it references. Yields to the host after each batch of nodes and stops at
/// a batch boundary once the context is cancelled.
pub fn scan_for_broken_bindings(
    ctx: &mut Context,
    scope: &ScanScope,
    on_progress: &mut dyn FnMut(&mut Context, &Progress),
) -> RemapScanResult {
    let mut result = RemapScanResult::default();
    let roots = match ctx.session().store().scope_roots(scope) {
        Ok(roots) => roots,
        Err(err) => {
            result.errors.push(err.to_string());
            return result;
        }
    };
    let index = match ctx.index() {
        Ok(index) => index,
        Err(err) => {
            result.errors.push(err.to_string());
            return result;
        }
    };

    let nodes = scope_nodes(&roots);
    let total = nodes.len();
    let batch = ctx.session().config().scan_batch_size.max(1);
    let mut classified: HashMap<String, Classification> = HashMap::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (position, node) in nodes.iter().enumerate() {
        for (slot, variable_id) in node.bindings() {
            result.total_bindings += 1;
            let classification = match classified.get(&variable_id) {
                Some(known) => known.clone(),
                None => match classify_binding(ctx, &index, &variable_id) {
                    Ok(fresh) => {
                        classified.insert(variable_id.clone(), fresh.clone());
                        fresh
                    }
                    Err(err) => {
                        result.errors.push(format!("{}: {err}", node.id));
                        continue;
                    }
                },
            };

            let kind = match &classification {
                Classification::Healthy => {
                    result.healthy_bindings += 1;
                    continue;
                }
                Classification::Stale { .. } => {
                    result.stale_bindings += 1;
                    RemapKind::Stale
                }
                Classification::Broken { .. } => {
                    result.broken_bindings += 1;
                    RemapKind::Broken
                }
            };

            if let Some(existing) = positions.get(&variable_id) {
                result.entries[*existing].usage_count += 1;
                continue;
            }

            let current = node.value_at(&slot);
            let (old_name, old_collection, suggestion) = match classification {
                Classification::Stale { old, old_collection } => {
                    let suggestion =
                        stale_replacement(ctx, &index, &old, old_collection.as_deref(), current.as_ref());
                    (Some(old.name), old_collection, suggestion)
                }
                Classification::Broken {
                    last_known_name,
                    last_known_collection,
                } => {
                    let suggestion = broken_replacement(
                        ctx,
                        node,
                        &slot,
                        last_known_name.as_deref(),
                        last_known_collection.as_deref(),
                    )
                    .unwrap_or_else(|err| {
                        result.errors.push(format!("{}: {err}", node.id));
                        None
                    });
                    (last_known_name, last_known_collection, suggestion)
                }
                Classification::Healthy => continue,
            };

            positions.insert(variable_id.clone(), result.entries.len());
            result.entries.push(RemapEntry {
                old_reference_id: variable_id,
                old_name,
                old_collection,
                kind,
                usage_count: 1,
                suggested_replacement: suggestion,
                current_value: current.map(|value| value.to_string()),
                representative: BindingRef {
                    node_id: node.id.clone(),
                    node_name: node.name.clone(),
                    node_type: node.node_type.clone(),
                    slot,
                },
            });
        }

        result.scanned_nodes = position + 1;
        if result.scanned_nodes % batch == 0 || result.scanned_nodes == total {
            ctx.session_mut().store_mut().yield_now();
            on_progress(
                ctx,
                &Progress {
                    current: result.scanned_nodes,
                    total,
                    action: None,
                },
            );
            if ctx.is_cancelled() && result.scanned_nodes < total {
                result.cancelled = true;
                break;
            }
        }
    }
    result
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemapPair {
    pub old_reference_id: String,
    pub new_variable_id: String,
}

/// Rebinds every binding to `pair.old_reference_id` inside `scope` to the
/// new variable. Returns how many bindings changed.
pub fn remap_bindings(ctx: &mut Context, pair: &RemapPair, scope: &ScanScope) -> Result<usize> {
    let roots = ctx.session().store().scope_roots(scope)?;
    let targets: Vec<(String, BindingSlot)> = scope_nodes(&roots)
        .iter()
        .flat_map(|node| {
            node.bindings()
                .into_iter()
                .filter(|(_, id)| *id == pair.old_reference_id)
                .map(|(slot, _)| (node.id.clone(), slot))
                .collect::<Vec<_>>()
        })
        .collect();
    if targets.is_empty() {
        return Err(anyhow!("no bindings reference {}", pair.old_reference_id));
    }

    let mut updated = 0;
    let mut failures = Vec::new();
    for (node_id, slot) in &targets {
        match ctx
            .session_mut()
            .store_mut()
            .bind_variable(node_id, slot, &pair.new_variable_id)
        {
            Ok(()) => updated += 1,
            Err(err) => failures.push(format!("{node_id} {slot}: {err}")),
        }
    }
    if !failures.is_empty() {
        return Err(anyhow!(
            "{} of {} bindings not remapped: {}",
            failures.len(),
            targets.len(),
            failures.join("; ")
        ));
    }
    Ok(updated)
}
