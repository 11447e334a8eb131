use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::color::ConfidenceTier;
use crate::document::{
    BindingSlot, Capability, Node, NumberField, PaintTarget, ResolvedValue, StyleKind, VariableLookup,
};
use crate::matching::{find_variable, MatchCandidate, MatchContext, MatchOptions};
use crate::registry::Context;
use crate::store::{first_solid_paint, resolve_in_store};
use crate::tokens::{RawToken, TokenCatalog};

const TEXT_STYLE_ALTERNATIVE: &str = "apply a text style";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    Rebind,
    Unbind,
    Detach,
    ApplyStyle,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionType::Rebind => "rebind",
            ActionType::Unbind => "unbind",
            ActionType::Detach => "detach",
            ActionType::ApplyStyle => "apply-style",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FixError {
    NotBindable { property: String, alternative: String },
    NoMatch { token_path: String, current_value: String },
    MixedValues { property: String },
    NodeNotFound { node_id: String },
    UnsupportedProperty { property: String, node_type: String },
    NoBinding { property: String },
    NoStyle { property: String },
}

impl fmt::Display for FixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixError::NotBindable { property, alternative } => {
                write!(f, "{property} cannot be bound to a variable; {alternative} instead")
            }
            FixError::NoMatch {
                token_path,
                current_value,
            } => write!(
                f,
                "no variable matches token {token_path} with value {current_value}"
            ),
            FixError::MixedValues { property } => {
                write!(f, "{property} has mixed values and cannot be bound as one")
            }
            FixError::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            FixError::UnsupportedProperty { property, node_type } => {
                write!(f, "{node_type} node has no bindable {property}")
            }
            FixError::NoBinding { property } => write!(f, "{property} is not bound to a variable"),
            FixError::NoStyle { property } => write!(f, "no {property} style is applied"),
        }
    }
}

impl std::error::Error for FixError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixResult {
    pub success: bool,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceTier>,
}

impl FixResult {
    pub fn failure(action_type: ActionType, message: impl Into<String>) -> Self {
        Self {
            success: false,
            before_value: None,
            after_value: None,
            action_type,
            message: Some(message.into()),
            variable_id: None,
            variable_name: None,
            confidence: None,
        }
    }

    fn from_error(action_type: ActionType, err: &anyhow::Error) -> Self {
        let mut result = Self::failure(action_type, err.to_string());
        if let Some(FixError::NoMatch { current_value, .. }) = err.downcast_ref::<FixError>() {
            result.before_value = Some(current_value.clone());
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixAction {
    pub node_id: String,
    pub property: String,
    pub action: ActionType,
    pub before: Option<String>,
    pub after: Option<String>,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub timestamp: String,
}

pub(crate) fn record_action(
    ctx: &mut Context,
    node_id: &str,
    property: &str,
    rule_id: Option<&str>,
    result: &FixResult,
) -> FixAction {
    let action = FixAction {
        node_id: node_id.to_string(),
        property: property.to_string(),
        action: result.action_type,
        before: result.before_value.clone(),
        after: result.after_value.clone(),
        status: if result.success {
            ActionStatus::Success
        } else {
            ActionStatus::Failed
        },
        message: result.message.clone(),
        rule_id: rule_id.map(str::to_string),
        timestamp: ctx.session().timestamp(),
    };
    ctx.record_action(action.clone());
    action
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixRequest {
    pub node_id: String,
    pub property: String,
    pub token_path: String,
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub tokens: Option<Vec<RawToken>>,
    #[serde(default)]
    pub allow_close: Option<bool>,
}

impl FixRequest {
    pub fn new(node_id: impl Into<String>, property: impl Into<String>, token_path: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            property: property.into(),
            token_path: token_path.into(),
            rule_id: None,
            tokens: None,
            allow_close: None,
        }
    }
}

fn parse_indexed(property: &str) -> (&str, Option<usize>) {
    if let Some(open) = property.find('[') {
        if let Some(inner) = property[open + 1..].strip_suffix(']') {
            if let Ok(index) = inner.trim().parse() {
                return (&property[..open], Some(index));
            }
        }
    }
    (property, None)
}

fn unsupported(node: &Node, property: &str) -> FixError {
    FixError::UnsupportedProperty {
        property: property.to_string(),
        node_type: node.node_type.clone(),
    }
}

fn paint_slot(node: &Node, target: PaintTarget, index: Option<usize>, property: &str) -> Result<BindingSlot, FixError> {
    let index = match index {
        Some(index) => index,
        None => first_solid_paint(node, target).ok_or_else(|| unsupported(node, property))?,
    };
    let slot = BindingSlot::Paint { target, index };
    node.value_at(&slot).map(|_| slot).ok_or_else(|| unsupported(node, property))
}

fn fan_out(node: &Node, caps: &[Capability], fields: &[NumberField], property: &str) -> Result<Vec<BindingSlot>, FixError> {
    let present: Vec<BindingSlot> = fields
        .iter()
        .filter(|field| caps.contains(&Capability::HasBindableNumber(**field)))
        .map(|field| BindingSlot::number(*field))
        .collect();
    if present.is_empty() {
        return Err(unsupported(node, property));
    }
    Ok(present)
}

/// Maps a logical property name onto the node's bindable slots. Uniform
/// corner radius and padding fan out to every side present on the node.
pub fn property_slots(node: &Node, property: &str) -> Result<Vec<BindingSlot>, FixError> {
    let caps = node.capabilities();
    let (name, index) = parse_indexed(property.trim());
    let name = name.to_ascii_lowercase();
    let target = match name.as_str() {
        "fill" | "fills" => Some((Capability::HasFills, PaintTarget::Fills)),
        "stroke" | "strokes" => Some((Capability::HasStrokes, PaintTarget::Strokes)),
        _ => None,
    };
    if let Some((needed, target)) = target {
        if !caps.contains(&needed) {
            return Err(unsupported(node, property));
        }
        return Ok(vec![paint_slot(node, target, index, property)?]);
    }
    match name.as_str() {
        "cornerradius" | "radius" if caps.contains(&Capability::HasCornerRadius) => {
            fan_out(node, &caps, &NumberField::CORNERS, property)
        }
        "cornerradius" | "radius" => Err(unsupported(node, property)),
        "padding" => fan_out(node, &caps, &NumberField::PADDINGS, property),
        "fontsize" | "lineheight" | "letterspacing" | "paragraphspacing" if caps.contains(&Capability::IsText) => {
            Err(FixError::NotBindable {
                property: property.to_string(),
                alternative: TEXT_STYLE_ALTERNATIVE.to_string(),
            })
        }
        "fontsize" | "lineheight" | "letterspacing" | "paragraphspacing" => Err(unsupported(node, property)),
        _ => {
            let field = NumberField::from_name(&name).ok_or_else(|| unsupported(node, property))?;
            fan_out(node, &caps, &[field], property)
        }
    }
}

fn uniform_value(node: &Node, slots: &[BindingSlot], property: &str) -> Result<ResolvedValue, FixError> {
    let mut values = slots.iter().map(|slot| node.value_at(slot));
    let first = values.next().flatten().ok_or_else(|| unsupported(node, property))?;
    for value in values {
        match value {
            Some(value) if value.same_as(&first) => {}
            _ => {
                return Err(FixError::MixedValues {
                    property: property.to_string(),
                })
            }
        }
    }
    Ok(first)
}

fn load_node(ctx: &Context, node_id: &str) -> Result<Node> {
    ctx.session()
        .store()
        .node(node_id)?
        .ok_or_else(|| {
            FixError::NodeNotFound {
                node_id: node_id.to_string(),
            }
            .into()
        })
}

/// Puts `slots` back the way `node` had them: the previous variable where
/// one was bound, the literal otherwise. Returns what could not be restored.
fn restore_slots(ctx: &mut Context, node: &Node, slots: &[BindingSlot]) -> Vec<String> {
    let store = ctx.session_mut().store_mut();
    slots
        .iter()
        .filter_map(|slot| {
            let outcome = match (node.binding_at(slot), node.value_at(slot)) {
                (Some(previous), _) => store.bind_variable(&node.id, slot, previous),
                (None, Some(literal)) => store.unbind_variable(&node.id, slot, literal),
                (None, None) => Ok(()),
            };
            outcome.err().map(|err| format!("{slot}: {err}"))
        })
        .collect()
}

/// Binds every slot of `node`. When one is rejected the slots written
/// before it are restored to their previous state.
fn bind_all(ctx: &mut Context, node: &Node, slots: &[BindingSlot], variable_id: &str) -> Result<()> {
    for (position, slot) in slots.iter().enumerate() {
        let outcome = ctx
            .session_mut()
            .store_mut()
            .bind_variable(&node.id, slot, variable_id);
        let Err(err) = outcome else {
            continue;
        };
        let unrestored = restore_slots(ctx, node, &slots[..position]);
        if unrestored.is_empty() {
            return Err(err);
        }
        ctx.log(
            "error",
            "rollback after failed bind left slots changed",
            Some(json!({ "nodeId": node.id, "slots": &unrestored })),
        );
        return Err(anyhow!("{err}; rollback failed for {}", unrestored.join(", ")));
    }
    Ok(())
}

fn rebound(node: &Node, slots: &[BindingSlot], candidate: &MatchCandidate) -> FixResult {
    let before = node.value_at(&slots[0]).map(|value| value.to_string());
    FixResult {
        success: true,
        before_value: before,
        after_value: None,
        action_type: ActionType::Rebind,
        message: None,
        variable_id: Some(candidate.variable_id.clone()),
        variable_name: Some(candidate.variable_name.clone()),
        confidence: Some(candidate.confidence),
    }
}

fn try_apply_fix(ctx: &mut Context, request: &FixRequest) -> Result<FixResult> {
    let node = load_node(ctx, &request.node_id)?;
    let slots = property_slots(&node, &request.property)?;
    let current = uniform_value(&node, &slots, &request.property)?;

    let mut match_ctx = MatchContext::for_property(request.property.clone()).with_node(&node);
    if let Some(tokens) = &request.tokens {
        let catalog = TokenCatalog::from_raw(tokens.clone());
        match_ctx = match_ctx.with_alias_chain(catalog.alias_chain(&request.token_path));
    }
    let options = MatchOptions {
        allow_close: request.allow_close.unwrap_or(false),
    };

    let candidate = find_variable(
        ctx,
        &request.token_path,
        slots[0].expected_type(),
        &current,
        &match_ctx,
        options,
    )?
    .ok_or_else(|| FixError::NoMatch {
        token_path: request.token_path.clone(),
        current_value: current.to_string(),
    })?;

    bind_all(ctx, &node, &slots, &candidate.variable_id)?;

    let mut result = rebound(&node, &slots, &candidate);
    let after = load_node(ctx, &request.node_id)?;
    result.after_value = after.value_at(&slots[0]).map(|value| value.to_string());
    if slots.len() > 1 {
        result.message = Some(format!("bound {} fields", slots.len()));
    }
    Ok(result)
}

pub(crate) fn apply_fix_with_action(ctx: &mut Context, request: &FixRequest) -> (FixResult, FixAction) {
    let result = match try_apply_fix(ctx, request) {
        Ok(result) => result,
        Err(err) => FixResult::from_error(ActionType::Rebind, &err),
    };
    let action = record_action(
        ctx,
        &request.node_id,
        &request.property,
        request.rule_id.as_deref(),
        &result,
    );
    (result, action)
}

pub fn apply_fix(ctx: &mut Context, request: &FixRequest) -> FixResult {
    apply_fix_with_action(ctx, request).0
}

fn try_unbind(ctx: &mut Context, node_id: &str, property: &str) -> Result<FixResult> {
    let node = load_node(ctx, node_id)?;
    let slots = property_slots(&node, property)?;
    let bound: Vec<(BindingSlot, String)> = slots
        .iter()
        .filter_map(|slot| node.binding_at(slot).map(|id| (*slot, id.to_string())))
        .collect();
    let Some((_, first_id)) = bound.first().cloned() else {
        return Err(FixError::NoBinding {
            property: property.to_string(),
        }
        .into());
    };

    let variable_name = match ctx.session().store().lookup_variable(&first_id)? {
        VariableLookup::Found(variable) => Some(variable.name),
        VariableLookup::Missing { last_known_name, .. } => last_known_name,
    };

    let mut literals = Vec::with_capacity(bound.len());
    for (slot, variable_id) in &bound {
        let literal = resolve_in_store(ctx.session().store(), variable_id)
            .filter(|value| value.resolved_type() == slot.expected_type())
            .or_else(|| node.value_at(slot))
            .ok_or_else(|| anyhow!("no literal value available for {slot} on {node_id}"))?;
        literals.push((*slot, literal));
    }
    for (slot, literal) in &literals {
        ctx.session_mut()
            .store_mut()
            .unbind_variable(node_id, slot, *literal)?;
    }

    let value = literals[0].1.to_string();
    Ok(FixResult {
        success: true,
        before_value: Some(value.clone()),
        after_value: Some(value),
        action_type: ActionType::Unbind,
        message: None,
        variable_id: Some(first_id),
        variable_name,
        confidence: None,
    })
}

pub fn unbind_variable(ctx: &mut Context, node_id: &str, property: &str) -> FixResult {
    let result = match try_unbind(ctx, node_id, property) {
        Ok(result) => result,
        Err(err) => FixResult::from_error(ActionType::Unbind, &err),
    };
    record_action(ctx, node_id, property, None, &result);
    result
}

pub fn style_kind(property: &str) -> Option<StyleKind> {
    match property.trim().to_ascii_lowercase().as_str() {
        "fill" | "fills" | "fillstyle" | "fillstyleid" => Some(StyleKind::Fill),
        "stroke" | "strokes" | "strokestyle" | "strokestyleid" => Some(StyleKind::Stroke),
        "text" | "textstyle" | "textstyleid" | "typography" => Some(StyleKind::Text),
        "effect" | "effects" | "effectstyle" | "effectstyleid" => Some(StyleKind::Effect),
        _ => None,
    }
}

fn try_detach(ctx: &mut Context, node_id: &str, property: &str, rebind: bool) -> Result<FixResult> {
    let node = load_node(ctx, node_id)?;
    let kind = style_kind(property).ok_or_else(|| FixError::UnsupportedProperty {
        property: property.to_string(),
        node_type: node.node_type.clone(),
    })?;
    let style_id = node.styles.get(&kind).cloned().ok_or_else(|| FixError::NoStyle {
        property: property.to_string(),
    })?;
    let style_name = ctx
        .session()
        .store()
        .style(&style_id)?
        .map(|style| style.name)
        .unwrap_or_else(|| style_id.clone());

    ctx.session_mut().store_mut().detach_style(node_id, kind)?;

    let target = match kind {
        StyleKind::Fill => Some(PaintTarget::Fills),
        StyleKind::Stroke => Some(PaintTarget::Strokes),
        StyleKind::Text | StyleKind::Effect => None,
    };
    let detached = load_node(ctx, node_id)?;
    let slot = target.and_then(|target| {
        first_solid_paint(&detached, target).map(|index| BindingSlot::Paint { target, index })
    });
    let literal = slot.and_then(|slot| detached.value_at(&slot));

    let mut result = FixResult {
        success: true,
        before_value: Some(style_name.clone()),
        after_value: literal.map(|value| value.to_string()),
        action_type: ActionType::Detach,
        message: Some(format!("detached style {style_name}")),
        variable_id: None,
        variable_name: None,
        confidence: None,
    };

    let (true, Some(slot), Some(literal)) = (rebind, slot, literal) else {
        return Ok(result);
    };
    let match_ctx = MatchContext::for_property(property.to_string()).with_node(&detached);
    let attempt = find_variable(
        ctx,
        &style_name,
        slot.expected_type(),
        &literal,
        &match_ctx,
        MatchOptions::strict(),
    )
    .and_then(|candidate| {
        let candidate = candidate.ok_or_else(|| FixError::NoMatch {
            token_path: style_name.clone(),
            current_value: literal.to_string(),
        })?;
        bind_all(ctx, &detached, &[slot], &candidate.variable_id)?;
        Ok(candidate)
    });
    match attempt {
        Ok(candidate) => {
            result.message = Some(format!(
                "detached style {style_name} and bound {}",
                candidate.variable_name
            ));
            result.variable_id = Some(candidate.variable_id);
            result.variable_name = Some(candidate.variable_name);
            result.confidence = Some(candidate.confidence);
        }
        Err(err) => {
            ctx.log(
                "debug",
                "rebind after detach failed",
                Some(json!({ "nodeId": node_id, "style": style_name, "error": err.to_string() })),
            );
            result.message = Some(format!("detached style {style_name}; rebind skipped: {err}"));
        }
    }
    Ok(result)
}

pub(crate) fn detach_style_with_action(
    ctx: &mut Context,
    node_id: &str,
    property: &str,
    rebind: bool,
) -> (FixResult, FixAction) {
    let result = match try_detach(ctx, node_id, property, rebind) {
        Ok(result) => result,
        Err(err) => FixResult::from_error(ActionType::Detach, &err),
    };
    let action = record_action(ctx, node_id, property, None, &result);
    (result, action)
}

/// Removes the style reference at `property`, optionally binding a variable
/// to the exposed literal in the same action. A failed rebind still reports
/// success, with the reason in the message.
pub fn detach_style(ctx: &mut Context, node_id: &str, property: &str, rebind: bool) -> FixResult {
    detach_style_with_action(ctx, node_id, property, rebind).0
}
