use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::color::ConfidenceTier;
use crate::document::{Node, ResolvedType, ResolvedValue, Variable};
use crate::index::{IndexedVariable, VariableIndex, VariableKind};
use crate::library::find_library_match;
use crate::number::{self, NumberTolerance};
use crate::path;
use crate::registry::Context;
use crate::store::resolve_in_store;

pub const CONTEXT_SCORE: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPhase {
    Name,
    Value,
    CloseValue,
    Remote,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchContext {
    pub property: String,
    pub node_type: Option<String>,
    pub node_name: Option<String>,
    /// Collection name to prefer when otherwise tied.
    pub preferred_collection: Option<String>,
    /// Token paths to try in the library after the primary one.
    pub alias_chain: Vec<String>,
}

impl MatchContext {
    pub fn for_property(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            ..Self::default()
        }
    }

    pub fn with_node(mut self, node: &Node) -> Self {
        self.node_type = Some(node.node_type.clone());
        self.node_name = Some(node.name.clone());
        self
    }

    pub fn with_preferred_collection(mut self, collection: Option<String>) -> Self {
        self.preferred_collection = collection;
        self
    }

    pub fn with_alias_chain(mut self, chain: Vec<String>) -> Self {
        self.alias_chain = chain;
        self
    }

    fn is_icon(&self) -> bool {
        let vector = self
            .node_type
            .as_deref()
            .map(|kind| matches!(kind.to_ascii_uppercase().as_str(), "VECTOR" | "BOOLEAN_OPERATION"))
            .unwrap_or(false);
        let named = self
            .node_name
            .as_deref()
            .map(|name| name.to_lowercase().contains("icon"))
            .unwrap_or(false);
        vector || named
    }

    pub fn keywords(&self) -> Vec<&'static str> {
        let property = self.property.to_lowercase();
        let text = self
            .node_type
            .as_deref()
            .map(|kind| kind.eq_ignore_ascii_case("TEXT"))
            .unwrap_or(false);

        let mut keywords = Vec::new();
        if self.is_icon() {
            keywords.push("icon");
        }
        if property.starts_with("fill") {
            if text {
                keywords.push("text");
            } else {
                keywords.extend(["background", "surface", "fill"]);
            }
        } else if property.starts_with("stroke") && property.contains("weight") {
            keywords.extend(["border", "stroke", "width"]);
        } else if property.starts_with("stroke") {
            keywords.extend(["border", "stroke"]);
        } else if property.contains("radius") {
            keywords.extend(["radius", "corner"]);
        } else if property.contains("padding") || property.contains("spacing") {
            keywords.extend(["spacing", "space", "gap", "padding"]);
        } else if property.contains("width") || property.contains("height") {
            keywords.extend(["size", "sizing"]);
        }
        keywords
    }

    fn context_score(&self, keywords: &[&str], variable_name: &str) -> i64 {
        if keywords.iter().any(|keyword| path::has_segment(variable_name, keyword)) {
            CONTEXT_SCORE
        } else {
            0
        }
    }

    fn prefers(&self, collection_name: &str) -> bool {
        self.preferred_collection
            .as_deref()
            .map(|preferred| path::normalize(preferred) == path::normalize(collection_name))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    /// Accept name matches within the number tolerance and run the
    /// close-value pass. When false only bit-identical values are accepted.
    pub allow_close: bool,
}

impl MatchOptions {
    pub fn strict() -> Self {
        Self { allow_close: false }
    }
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self { allow_close: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    #[serde(skip)]
    pub variable: Variable,
    pub variable_id: String,
    pub variable_name: String,
    pub collection_name: String,
    pub kind: VariableKind,
    pub resolved: Option<ResolvedValue>,
    pub score: f64,
    pub confidence: ConfidenceTier,
    pub phase: MatchPhase,
}

impl MatchCandidate {
    fn from_indexed(entry: &IndexedVariable, score: f64, confidence: ConfidenceTier, phase: MatchPhase) -> Self {
        Self {
            variable_id: entry.variable.id.clone(),
            variable_name: entry.variable.name.clone(),
            variable: entry.variable.clone(),
            collection_name: entry.collection_name.clone(),
            kind: entry.kind,
            resolved: entry.resolved,
            score,
            confidence,
            phase,
        }
    }
}

fn verify(
    current: &ResolvedValue,
    candidate: Option<&ResolvedValue>,
    tolerance: &NumberTolerance,
    options: MatchOptions,
) -> Option<ConfidenceTier> {
    let candidate = candidate?;
    if current.same_as(candidate) {
        return Some(ConfidenceTier::Exact);
    }
    match (current, candidate) {
        (ResolvedValue::Number(current), ResolvedValue::Number(candidate))
            if options.allow_close && tolerance.accepts(*current, *candidate) =>
        {
            Some(ConfidenceTier::Close)
        }
        _ => None,
    }
}

/// Finds the variable that should replace `current` on a node.
///
/// `Ok(None)` is the ordinary "no fix available" outcome; errors only come
/// from the document store.
pub fn find_variable(
    ctx: &mut Context,
    token_path: &str,
    expected: ResolvedType,
    current: &ResolvedValue,
    match_ctx: &MatchContext,
    options: MatchOptions,
) -> Result<Option<MatchCandidate>> {
    if current.resolved_type() != expected {
        return Ok(None);
    }
    let index = ctx.index()?;
    let tolerance = ctx.session().config().number_tolerance();
    let keywords = match_ctx.keywords();

    if let Some(hit) = match_by_name(&index, token_path, expected, current, match_ctx, &keywords, &tolerance, options) {
        log_hit(ctx, token_path, &hit);
        return Ok(Some(hit));
    }

    if let Some(hit) = match_by_value(&index, token_path, expected, current, match_ctx, &keywords) {
        log_hit(ctx, token_path, &hit);
        return Ok(Some(hit));
    }

    if let ResolvedValue::Number(value) = current {
        if options.allow_close {
            let max_diff = ctx.session().config().close_value_max_diff;
            if let Some(hit) = match_close_value(&index, token_path, *value, match_ctx, &keywords, max_diff, &tolerance) {
                log_hit(ctx, token_path, &hit);
                return Ok(Some(hit));
            }
        }
    }

    let hit = import_from_library(ctx, token_path, expected, current, match_ctx, &tolerance, options)?;
    if let Some(hit) = &hit {
        log_hit(ctx, token_path, hit);
    }
    Ok(hit)
}

/// The value-based phase on its own, followed by the close-value pass for
/// numbers when no variable holds the exact value.
pub fn find_by_value(
    ctx: &mut Context,
    name_hint: &str,
    expected: ResolvedType,
    current: &ResolvedValue,
    match_ctx: &MatchContext,
) -> Result<Option<MatchCandidate>> {
    if current.resolved_type() != expected {
        return Ok(None);
    }
    let index = ctx.index()?;
    let keywords = match_ctx.keywords();
    if let Some(hit) = match_by_value(&index, name_hint, expected, current, match_ctx, &keywords) {
        return Ok(Some(hit));
    }
    let ResolvedValue::Number(value) = current else {
        return Ok(None);
    };
    let config = ctx.session().config();
    let (tolerance, max_diff) = (config.number_tolerance(), config.close_value_max_diff);
    Ok(match_close_value(&index, name_hint, *value, match_ctx, &keywords, max_diff, &tolerance))
}

fn log_hit(ctx: &mut Context, token_path: &str, hit: &MatchCandidate) {
    ctx.log(
        "debug",
        "variable matched",
        Some(json!({
            "tokenPath": token_path,
            "variableId": hit.variable_id,
            "phase": hit.phase,
            "confidence": hit.confidence,
        })),
    );
}

/// Exact full path, then name-only, then longest trailing match. The first
/// candidate whose value verifies wins.
#[allow(clippy::too_many_arguments)]
fn match_by_name(
    index: &VariableIndex,
    token_path: &str,
    expected: ResolvedType,
    current: &ResolvedValue,
    match_ctx: &MatchContext,
    keywords: &[&str],
    tolerance: &NumberTolerance,
    options: MatchOptions,
) -> Option<MatchCandidate> {
    let typed = |entry: &&IndexedVariable| entry.variable.resolved_type == expected;
    let accept = |entry: &IndexedVariable, score: f64| {
        verify(current, entry.resolved.as_ref(), tolerance, options)
            .map(|confidence| MatchCandidate::from_indexed(entry, score, confidence, MatchPhase::Name))
    };

    if let Some(entry) = index.by_full_path(token_path).filter(typed) {
        if let Some(hit) = accept(entry, path::EXACT_PATH_SCORE as f64) {
            return Some(hit);
        }
    }

    let mut same_name: Vec<(i64, bool, usize, &IndexedVariable)> = index
        .by_name(token_path)
        .into_iter()
        .filter(typed)
        .enumerate()
        .map(|(position, entry)| {
            let score = path::EXACT_PATH_SCORE + match_ctx.context_score(keywords, &entry.variable.name);
            (score, match_ctx.prefers(&entry.collection_name), position, entry)
        })
        .collect();
    same_name.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
    for (score, _, _, entry) in same_name {
        if let Some(hit) = accept(entry, score as f64) {
            return Some(hit);
        }
    }

    let target = path::normalize(token_path);
    let mut suffixes: Vec<(usize, i64, bool, usize, &IndexedVariable)> = index
        .iter()
        .filter(typed)
        .filter(|entry| entry.name != target)
        .enumerate()
        .filter_map(|(position, entry)| {
            let shared = path::common_suffix_len(&entry.name, &target);
            (shared >= path::MIN_SUFFIX_SEGMENTS).then(|| {
                let context = match_ctx.context_score(keywords, &entry.variable.name);
                (shared, context, match_ctx.prefers(&entry.collection_name), position, entry)
            })
        })
        .collect();
    suffixes.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(b.1.cmp(&a.1))
            .then(b.2.cmp(&a.2))
            .then(a.3.cmp(&b.3))
    });
    for (_, context, _, _, entry) in suffixes {
        if let Some(hit) = accept(entry, (path::SUFFIX_PATH_SCORE + context) as f64) {
            return Some(hit);
        }
    }
    None
}

fn without_components<'a>(candidates: Vec<&'a IndexedVariable>) -> Vec<&'a IndexedVariable> {
    let general: Vec<&IndexedVariable> = candidates
        .iter()
        .copied()
        .filter(|entry| entry.kind != VariableKind::Component)
        .collect();
    if general.is_empty() {
        candidates
    } else {
        general
    }
}

/// Semantic partition first; within it `context + path similarity`, ties
/// resolved by the preferred collection and then by first-seen order.
fn select_best<'a>(
    candidates: Vec<&'a IndexedVariable>,
    token_path: &str,
    match_ctx: &MatchContext,
    keywords: &[&str],
) -> Option<(&'a IndexedVariable, i64)> {
    let semantic: Vec<&IndexedVariable> = candidates
        .iter()
        .copied()
        .filter(|entry| entry.kind == VariableKind::Semantic)
        .collect();
    let pool = if semantic.is_empty() { candidates } else { semantic };

    let mut best: Option<(&IndexedVariable, i64, bool)> = None;
    for entry in pool {
        let score = match_ctx.context_score(keywords, &entry.variable.name)
            + path::path_similarity_score(&entry.variable.name, token_path);
        let preferred = match_ctx.prefers(&entry.collection_name);
        let better = match &best {
            Some((_, best_score, best_preferred)) => {
                score > *best_score || (score == *best_score && preferred && !*best_preferred)
            }
            None => true,
        };
        if better {
            best = Some((entry, score, preferred));
        }
    }
    best.map(|(entry, score, _)| (entry, score))
}

fn match_by_value(
    index: &VariableIndex,
    token_path: &str,
    expected: ResolvedType,
    current: &ResolvedValue,
    match_ctx: &MatchContext,
    keywords: &[&str],
) -> Option<MatchCandidate> {
    let candidates: Vec<&IndexedVariable> = index
        .by_value(current)
        .into_iter()
        .filter(|entry| entry.variable.resolved_type == expected)
        .collect();
    if candidates.is_empty() {
        return None;
    }
    let (entry, score) = select_best(without_components(candidates), token_path, match_ctx, keywords)?;
    Some(MatchCandidate::from_indexed(entry, score as f64, ConfidenceTier::Exact, MatchPhase::Value))
}

/// Numeric fallback: every variable within `max_diff`, scored
/// `name + context - diff`, global best kept.
fn match_close_value(
    index: &VariableIndex,
    token_path: &str,
    current: f64,
    match_ctx: &MatchContext,
    keywords: &[&str],
    max_diff: f64,
    tolerance: &NumberTolerance,
) -> Option<MatchCandidate> {
    let in_range: Vec<(&IndexedVariable, f64)> = index
        .numbers()
        .into_iter()
        .filter_map(|(entry, value)| number::close_difference(current, value, max_diff).map(|_| (entry, value)))
        .collect();
    let general: Vec<(&IndexedVariable, f64)> = in_range
        .iter()
        .copied()
        .filter(|(entry, _)| entry.kind != VariableKind::Component)
        .collect();
    let pool = if general.is_empty() { in_range } else { general };

    let mut best: Option<(&IndexedVariable, f64, f64)> = None;
    for (entry, value) in pool {
        let diff = (current - value).abs();
        let score = (path::path_similarity_score(&entry.variable.name, token_path)
            + match_ctx.context_score(keywords, &entry.variable.name)) as f64
            - diff;
        if best.as_ref().map(|(_, best_score, _)| score > *best_score).unwrap_or(true) {
            best = Some((entry, score, value));
        }
    }
    let (entry, score, value) = best?;
    let confidence = number::classify_number(current, value, tolerance).unwrap_or(ConfidenceTier::Approximate);
    Some(MatchCandidate::from_indexed(entry, score, confidence, MatchPhase::CloseValue))
}

fn import_from_library(
    ctx: &mut Context,
    token_path: &str,
    expected: ResolvedType,
    current: &ResolvedValue,
    match_ctx: &MatchContext,
    tolerance: &NumberTolerance,
    options: MatchOptions,
) -> Result<Option<MatchCandidate>> {
    let before = ctx.session().library_fetches();
    let library = match ctx.session_mut().library_variables() {
        Ok(library) => library,
        Err(err) => {
            ctx.log(
                "warn",
                "library variables unavailable",
                Some(json!({ "error": err.to_string() })),
            );
            return Ok(None);
        }
    };
    if ctx.session().library_fetches() != before {
        ctx.log(
            "debug",
            "library variables refreshed",
            Some(json!({ "variables": library.len() })),
        );
    }
    if library.is_empty() {
        return Ok(None);
    }

    let mut paths = vec![path::normalize(token_path)];
    let chain = if match_ctx.alias_chain.is_empty() {
        ctx.session()
            .catalog()
            .map(|catalog| catalog.alias_chain(token_path))
            .unwrap_or_default()
    } else {
        match_ctx.alias_chain.clone()
    };
    for step in chain {
        let step = path::normalize(&step);
        if !paths.contains(&step) {
            paths.push(step);
        }
    }

    let Some(found) = paths
        .iter()
        .find_map(|candidate| find_library_match(&library, candidate, expected))
        .cloned()
    else {
        return Ok(None);
    };

    let imported = ctx.session_mut().store_mut().import_library_variable(&found.key)?;
    ctx.session_mut().invalidate_index();
    ctx.log(
        "info",
        "library variable imported",
        Some(json!({ "key": found.key, "variableId": imported.id, "name": imported.name })),
    );

    let index = ctx.index()?;
    let resolved = match index.get(&imported.id) {
        Some(entry) => entry.resolved,
        None => resolve_in_store(ctx.session().store(), &imported.id),
    };
    let Some(confidence) = verify(current, resolved.as_ref(), tolerance, options) else {
        ctx.log(
            "debug",
            "imported variable does not preserve the current value",
            Some(json!({ "variableId": imported.id, "current": current.to_string() })),
        );
        return Ok(None);
    };
    let collection_name = index
        .collection_name(&imported.collection_id)
        .unwrap_or(&found.collection_name)
        .to_string();
    let kind = index
        .get(&imported.id)
        .map(|entry| entry.kind)
        .unwrap_or(VariableKind::Core);
    Ok(Some(MatchCandidate {
        variable_id: imported.id.clone(),
        variable_name: imported.name.clone(),
        variable: imported,
        collection_name,
        kind,
        resolved,
        score: 0.0,
        confidence,
        phase: MatchPhase::Remote,
    }))
}
