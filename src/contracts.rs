use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::bulk::{self, DetachRequest, Progress};
use crate::color::Rgba;
use crate::document::{ResolvedType, ResolvedValue, ScanScope};
use crate::fix::{self, FixRequest};
use crate::matching::{find_variable, MatchContext, MatchOptions};
use crate::registry::{Context, Registry};
use crate::remap::{self, RemapPair};

pub const APPLY_FIX_ID: &str = "tokenlink://fix/apply@1";
pub const APPLY_BULK_FIX_ID: &str = "tokenlink://fix/apply-bulk@1";
pub const UNBIND_ID: &str = "tokenlink://fix/unbind@1";
pub const DETACH_STYLE_ID: &str = "tokenlink://style/detach@1";
pub const BULK_DETACH_ID: &str = "tokenlink://style/detach-bulk@1";
pub const REMAP_SCAN_ID: &str = "tokenlink://remap/scan@1";
pub const REMAP_APPLY_ID: &str = "tokenlink://remap/apply@1";
pub const FIND_VARIABLE_ID: &str = "tokenlink://match/find-variable@1";
pub const SUGGEST_TOKENS_ID: &str = "tokenlink://tokens/suggest@1";
pub const SELECT_NODE_ID: &str = "tokenlink://node/select@1";

const DEFAULT_SUGGESTION_LIMIT: usize = 5;

pub fn register_contracts(registry: &Registry) {
    registry.register(APPLY_FIX_ID, apply_fix_contract);
    registry.register(APPLY_BULK_FIX_ID, apply_bulk_fix_contract);
    registry.register(UNBIND_ID, unbind_contract);
    registry.register(DETACH_STYLE_ID, detach_style_contract);
    registry.register(BULK_DETACH_ID, bulk_detach_contract);
    registry.register(REMAP_SCAN_ID, remap_scan_contract);
    registry.register(REMAP_APPLY_ID, remap_apply_contract);
    registry.register(FIND_VARIABLE_ID, find_variable_contract);
    registry.register(SUGGEST_TOKENS_ID, suggest_tokens_contract);
    registry.register(SELECT_NODE_ID, select_node_contract);
}

fn parse_input<T: DeserializeOwned>(contract: &str, input: Value) -> Result<T> {
    let input = if input.is_null() { json!({}) } else { input };
    serde_json::from_value(input).map_err(|err| anyhow!("invalid input for {contract}: {err}"))
}

/// A colour as hex / `rgb()` text or a channel object, or a plain number.
fn parse_value(raw: &Value) -> Result<ResolvedValue> {
    match raw {
        Value::String(text) => Ok(ResolvedValue::Color(Rgba::parse(text)?)),
        Value::Number(number) => number
            .as_f64()
            .map(ResolvedValue::Number)
            .ok_or_else(|| anyhow!("value out of range: {number}")),
        Value::Object(_) => Ok(ResolvedValue::Color(serde_json::from_value::<Rgba>(raw.clone())?)),
        other => Err(anyhow!("unsupported value: {other}")),
    }
}

fn forward_progress(ctx: &mut Context, progress: &Progress) {
    ctx.emit_progress(progress);
}

fn apply_fix_contract(ctx: &mut Context, input: Value) -> Result<Value> {
    let request: FixRequest = parse_input(APPLY_FIX_ID, input)?;
    let result = fix::apply_fix(ctx, &request);
    Ok(serde_json::to_value(result)?)
}

#[derive(Deserialize)]
struct BulkFixInput {
    items: Vec<FixRequest>,
}

fn apply_bulk_fix_contract(ctx: &mut Context, input: Value) -> Result<Value> {
    let input: BulkFixInput = parse_input(APPLY_BULK_FIX_ID, input)?;
    let summary = bulk::apply_bulk_fix(ctx, &input.items, &mut forward_progress);
    Ok(serde_json::to_value(summary)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyInput {
    node_id: String,
    property: String,
}

fn unbind_contract(ctx: &mut Context, input: Value) -> Result<Value> {
    let input: PropertyInput = parse_input(UNBIND_ID, input)?;
    let result = fix::unbind_variable(ctx, &input.node_id, &input.property);
    Ok(serde_json::to_value(result)?)
}

fn detach_style_contract(ctx: &mut Context, input: Value) -> Result<Value> {
    let request: DetachRequest = parse_input(DETACH_STYLE_ID, input)?;
    let result = fix::detach_style(ctx, &request.node_id, &request.property, request.rebind);
    Ok(serde_json::to_value(result)?)
}

#[derive(Deserialize)]
struct BulkDetachInput {
    items: Vec<DetachRequest>,
}

fn bulk_detach_contract(ctx: &mut Context, input: Value) -> Result<Value> {
    let input: BulkDetachInput = parse_input(BULK_DETACH_ID, input)?;
    let summary = bulk::bulk_detach_styles(ctx, &input.items, &mut forward_progress);
    Ok(serde_json::to_value(summary)?)
}

#[derive(Deserialize)]
struct ScanInput {
    #[serde(default)]
    scope: ScanScope,
}

fn remap_scan_contract(ctx: &mut Context, input: Value) -> Result<Value> {
    let input: ScanInput = parse_input(REMAP_SCAN_ID, input)?;
    let result = remap::scan_for_broken_bindings(ctx, &input.scope, &mut forward_progress);
    Ok(serde_json::to_value(result)?)
}

#[derive(Deserialize)]
struct RemapApplyInput {
    pairs: Vec<RemapPair>,
    #[serde(default)]
    scope: ScanScope,
}

fn remap_apply_contract(ctx: &mut Context, input: Value) -> Result<Value> {
    let input: RemapApplyInput = parse_input(REMAP_APPLY_ID, input)?;
    let summary = bulk::apply_remaps(ctx, &input.pairs, &input.scope, &mut forward_progress);
    Ok(serde_json::to_value(summary)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindVariableInput {
    token_path: String,
    expected_type: ResolvedType,
    current_value: Value,
    #[serde(default)]
    property: Option<String>,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    preferred_collection: Option<String>,
    #[serde(default)]
    allow_close: Option<bool>,
}

fn find_variable_contract(ctx: &mut Context, input: Value) -> Result<Value> {
    let input: FindVariableInput = parse_input(FIND_VARIABLE_ID, input)?;
    let current = parse_value(&input.current_value)?;

    let mut match_ctx = MatchContext::for_property(input.property.unwrap_or_default())
        .with_preferred_collection(input.preferred_collection);
    if let Some(node_id) = &input.node_id {
        if let Some(node) = ctx.session().store().node(node_id)? {
            match_ctx = match_ctx.with_node(&node);
        }
    }
    let options = MatchOptions {
        allow_close: input.allow_close.unwrap_or(true),
    };

    let found = find_variable(
        ctx,
        &input.token_path,
        input.expected_type,
        &current,
        &match_ctx,
        options,
    )?;
    Ok(match found {
        Some(candidate) => {
            let mut value = serde_json::to_value(candidate)?;
            if let Value::Object(map) = &mut value {
                map.insert("found".to_string(), Value::Bool(true));
            }
            value
        }
        None => json!({ "found": false }),
    })
}

#[derive(Deserialize)]
struct SuggestInput {
    value: Value,
    #[serde(default)]
    limit: Option<usize>,
}

fn suggest_tokens_contract(ctx: &mut Context, input: Value) -> Result<Value> {
    let input: SuggestInput = parse_input(SUGGEST_TOKENS_ID, input)?;
    let catalog = ctx
        .session()
        .catalog()
        .ok_or_else(|| anyhow!("no token catalog loaded"))?;
    let limit = input.limit.unwrap_or(DEFAULT_SUGGESTION_LIMIT);
    let suggestions = match parse_value(&input.value)? {
        ResolvedValue::Color(color) => catalog.suggest_color(&color, limit),
        ResolvedValue::Number(number) => {
            let tolerance = ctx.session().config().number_tolerance();
            catalog.suggest_number(number, &tolerance, limit)
        }
    };
    Ok(json!({ "suggestions": suggestions }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectInput {
    node_id: String,
}

fn select_node_contract(ctx: &mut Context, input: Value) -> Result<Value> {
    let input: SelectInput = parse_input(SELECT_NODE_ID, input)?;
    ctx.session_mut().store_mut().select_node(&input.node_id)?;
    Ok(json!({ "selected": input.node_id }))
}
