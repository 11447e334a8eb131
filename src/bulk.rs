use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::document::ScanScope;
use crate::fix::{
    apply_fix_with_action, detach_style_with_action, record_action, ActionType, FixAction, FixRequest,
    FixResult,
};
use crate::registry::Context;
use crate::remap::{remap_bindings, RemapPair};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<FixAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub index: usize,
    pub node_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFixSummary {
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<ItemError>,
    pub actions: Vec<FixAction>,
    pub results: Vec<FixResult>,
    pub cancelled: bool,
}

impl BulkFixSummary {
    fn record(&mut self, index: usize, node_id: &str, result: FixResult, action: FixAction) {
        if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
            self.errors.push(ItemError {
                index,
                node_id: node_id.to_string(),
                message: result.message.clone().unwrap_or_default(),
            });
        }
        self.actions.push(action);
        self.results.push(result);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachRequest {
    pub node_id: String,
    pub property: String,
    #[serde(default = "default_rebind")]
    pub rebind: bool,
}

fn default_rebind() -> bool {
    true
}

impl DetachRequest {
    pub fn new(node_id: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            property: property.into(),
            rebind: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemapSummary {
    pub remapped: usize,
    pub failed: usize,
    pub bindings_updated: usize,
    pub errors: Vec<ItemError>,
    pub actions: Vec<FixAction>,
    pub cancelled: bool,
}

/// Shared tail of every item: yield, report, then honour cancellation.
/// Returns true when the batch must stop.
fn finish_item(
    ctx: &mut Context,
    current: usize,
    total: usize,
    action: &FixAction,
    on_progress: &mut dyn FnMut(&mut Context, &Progress),
) -> bool {
    ctx.session_mut().store_mut().yield_now();
    let progress = Progress {
        current,
        total,
        action: Some(action.clone()),
    };
    on_progress(ctx, &progress);
    ctx.is_cancelled() && current < total
}

fn log_failure(ctx: &mut Context, operation: &str, index: usize, node_id: &str, result: &FixResult) {
    if result.success {
        return;
    }
    ctx.log(
        "warn",
        "bulk item failed",
        Some(json!({
            "operation": operation,
            "index": index,
            "nodeId": node_id,
            "message": result.message,
        })),
    );
}

pub fn apply_bulk_fix(
    ctx: &mut Context,
    items: &[FixRequest],
    on_progress: &mut dyn FnMut(&mut Context, &Progress),
) -> BulkFixSummary {
    let mut summary = BulkFixSummary::default();
    let total = items.len();
    for (index, item) in items.iter().enumerate() {
        if ctx.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        let (result, action) = apply_fix_with_action(ctx, item);
        log_failure(ctx, "fix", index, &item.node_id, &result);
        summary.record(index, &item.node_id, result, action.clone());
        if finish_item(ctx, index + 1, total, &action, on_progress) {
            summary.cancelled = true;
            break;
        }
    }
    summary
}

pub fn bulk_detach_styles(
    ctx: &mut Context,
    items: &[DetachRequest],
    on_progress: &mut dyn FnMut(&mut Context, &Progress),
) -> BulkFixSummary {
    let mut summary = BulkFixSummary::default();
    let total = items.len();
    for (index, item) in items.iter().enumerate() {
        if ctx.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        let (result, action) = detach_style_with_action(ctx, &item.node_id, &item.property, item.rebind);
        log_failure(ctx, "detach", index, &item.node_id, &result);
        summary.record(index, &item.node_id, result, action.clone());
        if finish_item(ctx, index + 1, total, &action, on_progress) {
            summary.cancelled = true;
            break;
        }
    }
    summary
}

fn scope_label(scope: &ScanScope) -> String {
    match scope {
        ScanScope::Document => "document".to_string(),
        ScanScope::Nodes { ids } => ids.join(","),
    }
}

/// Applies each remap pair across `scope`. A pair counts as remapped when
/// every binding to the old variable now points at the new one.
pub fn apply_remaps(
    ctx: &mut Context,
    pairs: &[RemapPair],
    scope: &ScanScope,
    on_progress: &mut dyn FnMut(&mut Context, &Progress),
) -> RemapSummary {
    let mut summary = RemapSummary::default();
    let total = pairs.len();
    let label = scope_label(scope);
    for (index, pair) in pairs.iter().enumerate() {
        if ctx.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        let result = match remap_bindings(ctx, pair, scope) {
            Ok(updated) => {
                summary.remapped += 1;
                summary.bindings_updated += updated;
                FixResult {
                    success: true,
                    before_value: Some(pair.old_reference_id.clone()),
                    after_value: Some(pair.new_variable_id.clone()),
                    action_type: ActionType::Rebind,
                    message: Some(format!("{updated} bindings remapped")),
                    variable_id: Some(pair.new_variable_id.clone()),
                    variable_name: None,
                    confidence: None,
                }
            }
            Err(err) => {
                summary.failed += 1;
                summary.errors.push(ItemError {
                    index,
                    node_id: label.clone(),
                    message: err.to_string(),
                });
                let mut failed = FixResult::failure(ActionType::Rebind, err.to_string());
                failed.before_value = Some(pair.old_reference_id.clone());
                failed
            }
        };
        log_failure(ctx, "remap", index, &label, &result);
        let action = record_action(ctx, &label, "boundVariables", None, &result);
        summary.actions.push(action.clone());
        if finish_item(ctx, index + 1, total, &action, on_progress) {
            summary.cancelled = true;
            break;
        }
    }
    summary
}
