use std::io::{stderr, Write};

use anyhow::{anyhow, bail, Context as _, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::{level_rank, LOG_LEVELS};
use crate::registry::{Context, Registry};

pub const LOG_CONTRACT_ID: &str = "tokenlink://contract/tooling/log@1";
pub const ENGINE_LOG_ID: &str = "tokenlink://engine/log@1";
pub const LOG_CONTEXT_ID: &str = "tokenlink://tooling/log.context@1";

#[derive(Debug, Deserialize)]
struct LogPayload {
    level: String,
    message: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    tags: Option<Value>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Scalar tags only; nested values are dropped.
fn scalar_tags(value: Option<Value>) -> Map<String, Value> {
    let Some(Value::Object(obj)) = value else {
        return Map::new();
    };
    obj.into_iter()
        .filter(|(_, val)| matches!(val, Value::String(_) | Value::Number(_) | Value::Bool(_)))
        .collect()
}

fn require_object(field: &str, value: Option<Value>) -> Result<Option<Value>> {
    match value {
        None | Some(Value::Object(_)) => Ok(value),
        Some(_) => bail!("log '{field}' must be an object"),
    }
}

fn entry_tags(ctx: &Context, engine: bool, own: Option<Value>) -> Map<String, Value> {
    let mut tags: Map<String, Value> = ctx
        .log_tag_stack()
        .iter()
        .flat_map(|scope| scope.iter().map(|(k, v)| (k.clone(), v.clone())))
        .collect();
    if engine {
        tags.insert("component".to_string(), json!("engine"));
    }
    tags.extend(scalar_tags(own));
    tags
}

fn build_entry(ctx: &Context, input: Value, engine: bool) -> Result<Map<String, Value>> {
    if !input.is_object() {
        bail!("log payload must be an object, got {input}");
    }
    let payload: LogPayload = serde_json::from_value(input).context("invalid log payload")?;
    if !LOG_LEVELS.contains(&payload.level.as_str()) {
        bail!("unsupported log level: {}", payload.level);
    }
    if payload.message.is_empty() {
        bail!("log payload missing 'message'");
    }

    let mut entry = Map::new();
    entry.insert("level".to_string(), Value::String(payload.level));
    entry.insert("message".to_string(), Value::String(payload.message));
    if let Some(data) = require_object("data", payload.data)? {
        entry.insert("data".to_string(), data);
    }
    if let Some(error) = require_object("error", payload.error)? {
        entry.insert("error".to_string(), error);
    }
    let tags = entry_tags(ctx, engine, payload.tags);
    if !tags.is_empty() {
        entry.insert("tags".to_string(), Value::Object(tags));
    }
    let timestamp = payload.timestamp.unwrap_or_else(|| ctx.session().timestamp());
    entry.insert("timestamp".to_string(), Value::String(timestamp));
    Ok(entry)
}

/// Unbound logs go to stderr, filtered by the configured threshold. Stdout
/// stays reserved for contract results.
fn write_stderr(ctx: &Context, entry: &Map<String, Value>) {
    let level = entry.get("level").and_then(Value::as_str).unwrap_or("info");
    let threshold = level_rank(&ctx.session().config().log_level).unwrap_or(2);
    if level_rank(level).unwrap_or(0) < threshold {
        return;
    }
    if let Ok(line) = serde_json::to_string(entry) {
        let _ = writeln!(stderr(), "{line}");
    }
}

fn handler_for(ctx: &Context) -> Option<String> {
    ctx.binding_for(LOG_CONTRACT_ID)
        .filter(|target| target != LOG_CONTRACT_ID && target != ENGINE_LOG_ID)
}

pub(crate) fn emit_log(ctx: &mut Context, input: Value, engine: bool) -> Result<Value> {
    let entry = build_entry(ctx, input, engine)?;
    let Some(target) = handler_for(ctx) else {
        write_stderr(ctx, &entry);
        return Ok(Value::Object(entry));
    };

    match ctx.dispatch(&target, Value::Object(entry.clone())) {
        Ok(Value::Null) => Ok(Value::Object(entry)),
        Ok(value) => Ok(value),
        Err(err) => {
            let mut failure = Map::new();
            failure.insert("level".to_string(), json!("error"));
            failure.insert("message".to_string(), json!("log handler failed"));
            failure.insert("data".to_string(), json!({ "handler": target, "error": err.to_string() }));
            failure.insert("timestamp".to_string(), json!(ctx.session().timestamp()));
            if let Some(tags) = entry.get("tags") {
                failure.insert("tags".to_string(), tags.clone());
            }
            write_stderr(ctx, &failure);
            Ok(Value::Null)
        }
    }
}

/// Runs the contract named in `call` with `tags` pushed onto the log scope.
fn log_context(ctx: &mut Context, input: Value) -> Result<Value> {
    let mut map = match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return Err(anyhow!("log.context input must be an object")),
    };
    let contract = match map.remove("call") {
        Some(Value::String(contract)) => Some(contract),
        Some(_) => bail!("log.context 'call' must be a contract id"),
        None => None,
    };
    let Some(contract) = contract else {
        return Ok(Value::Object(Map::new()));
    };

    let tags = scalar_tags(map.remove("tags"));
    let scoped = !tags.is_empty();
    ctx.push_log_tags(tags);
    let result = ctx.call(&contract, map.remove("input").unwrap_or(Value::Null));
    if scoped {
        ctx.pop_log_tags();
    }
    result
}

pub fn register_logging(registry: &Registry) {
    registry.register(LOG_CONTRACT_ID, |ctx: &mut Context, input: Value| emit_log(ctx, input, false));
    registry.register(ENGINE_LOG_ID, |ctx: &mut Context, input: Value| emit_log(ctx, input, true));
    registry.register(LOG_CONTEXT_ID, log_context);
}
