use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::color::Rgba;
use crate::number::format_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolvedType {
    Color,
    Float,
    String,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableAlias {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Alias(VariableAlias),
    Color(Rgba),
    Boolean(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    Color(Rgba),
    Number(f64),
}

impl ResolvedValue {
    pub fn as_color(&self) -> Option<Rgba> {
        match self {
            ResolvedValue::Color(color) => Some(*color),
            ResolvedValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ResolvedValue::Number(value) => Some(*value),
            ResolvedValue::Color(_) => None,
        }
    }

    pub fn resolved_type(&self) -> ResolvedType {
        match self {
            ResolvedValue::Color(_) => ResolvedType::Color,
            ResolvedValue::Number(_) => ResolvedType::Float,
        }
    }

    /// Bit-identical at the precision the document renders (hex for colours).
    pub fn same_as(&self, other: &ResolvedValue) -> bool {
        match (self, other) {
            (ResolvedValue::Color(a), ResolvedValue::Color(b)) => a.same_hex(b),
            (ResolvedValue::Number(a), ResolvedValue::Number(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedValue::Color(color) => f.write_str(&color.to_hex()),
            ResolvedValue::Number(value) => f.write_str(&format_number(*value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableMode {
    pub mode_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableCollection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub modes: Vec<VariableMode>,
    pub default_mode_id: String,
    #[serde(default)]
    pub remote: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub id: String,
    pub name: String,
    #[serde(rename = "variableCollectionId")]
    pub collection_id: String,
    pub resolved_type: ResolvedType,
    #[serde(default)]
    pub values_by_mode: BTreeMap<String, VariableValue>,
    #[serde(default)]
    pub remote: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Variable {
    pub fn value_for_mode(&self, mode_id: Option<&str>) -> Option<&VariableValue> {
        mode_id
            .and_then(|mode| self.values_by_mode.get(mode))
            .or_else(|| self.values_by_mode.values().next())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableLookup {
    Found(Variable),
    /// Nothing resolves; the store may still remember where the variable
    /// used to live.
    Missing {
        last_known_name: Option<String>,
        last_known_collection: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryVariable {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub collection_name: String,
    pub resolved_type: ResolvedType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaintTarget {
    Fills,
    Strokes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaintKind {
    Solid,
    GradientLinear,
    GradientRadial,
    Image,
}

fn default_opacity() -> f64 {
    1.0
}

fn default_visible() -> bool {
    true
}

fn default_blend_mode() -> String {
    "NORMAL".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paint {
    #[serde(rename = "type")]
    pub kind: PaintKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgba>,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default = "default_blend_mode")]
    pub blend_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_variable: Option<String>,
}

impl Paint {
    pub fn solid(color: Rgba) -> Self {
        Self {
            kind: PaintKind::Solid,
            color: Some(color),
            opacity: 1.0,
            visible: true,
            blend_mode: default_blend_mode(),
            bound_variable: None,
        }
    }

    pub fn is_solid(&self) -> bool {
        self.kind == PaintKind::Solid && self.color.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NumberField {
    ItemSpacing,
    CounterAxisSpacing,
    PaddingLeft,
    PaddingRight,
    PaddingTop,
    PaddingBottom,
    TopLeftRadius,
    TopRightRadius,
    BottomLeftRadius,
    BottomRightRadius,
    StrokeWeight,
    StrokeTopWeight,
    StrokeRightWeight,
    StrokeBottomWeight,
    StrokeLeftWeight,
    MinWidth,
    MaxWidth,
    MinHeight,
    MaxHeight,
    Width,
    Height,
}

impl NumberField {
    pub const CORNERS: [NumberField; 4] = [
        NumberField::TopLeftRadius,
        NumberField::TopRightRadius,
        NumberField::BottomLeftRadius,
        NumberField::BottomRightRadius,
    ];

    pub const PADDINGS: [NumberField; 4] = [
        NumberField::PaddingTop,
        NumberField::PaddingRight,
        NumberField::PaddingBottom,
        NumberField::PaddingLeft,
    ];

    pub const ALL: [NumberField; 21] = [
        NumberField::ItemSpacing,
        NumberField::CounterAxisSpacing,
        NumberField::PaddingLeft,
        NumberField::PaddingRight,
        NumberField::PaddingTop,
        NumberField::PaddingBottom,
        NumberField::TopLeftRadius,
        NumberField::TopRightRadius,
        NumberField::BottomLeftRadius,
        NumberField::BottomRightRadius,
        NumberField::StrokeWeight,
        NumberField::StrokeTopWeight,
        NumberField::StrokeRightWeight,
        NumberField::StrokeBottomWeight,
        NumberField::StrokeLeftWeight,
        NumberField::MinWidth,
        NumberField::MaxWidth,
        NumberField::MinHeight,
        NumberField::MaxHeight,
        NumberField::Width,
        NumberField::Height,
    ];

    pub fn from_name(name: &str) -> Option<NumberField> {
        Self::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(name))
    }

    pub fn name(&self) -> &'static str {
        match self {
            NumberField::ItemSpacing => "itemSpacing",
            NumberField::CounterAxisSpacing => "counterAxisSpacing",
            NumberField::PaddingLeft => "paddingLeft",
            NumberField::PaddingRight => "paddingRight",
            NumberField::PaddingTop => "paddingTop",
            NumberField::PaddingBottom => "paddingBottom",
            NumberField::TopLeftRadius => "topLeftRadius",
            NumberField::TopRightRadius => "topRightRadius",
            NumberField::BottomLeftRadius => "bottomLeftRadius",
            NumberField::BottomRightRadius => "bottomRightRadius",
            NumberField::StrokeWeight => "strokeWeight",
            NumberField::StrokeTopWeight => "strokeTopWeight",
            NumberField::StrokeRightWeight => "strokeRightWeight",
            NumberField::StrokeBottomWeight => "strokeBottomWeight",
            NumberField::StrokeLeftWeight => "strokeLeftWeight",
            NumberField::MinWidth => "minWidth",
            NumberField::MaxWidth => "maxWidth",
            NumberField::MinHeight => "minHeight",
            NumberField::MaxHeight => "maxHeight",
            NumberField::Width => "width",
            NumberField::Height => "height",
        }
    }

    pub fn is_corner(&self) -> bool {
        Self::CORNERS.contains(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StyleKind {
    Fill,
    Stroke,
    Text,
    Effect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    pub id: String,
    pub name: String,
    pub kind: StyleKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BindingSlot {
    Paint { target: PaintTarget, index: usize },
    Number { field: NumberField },
}

impl BindingSlot {
    pub fn fill(index: usize) -> Self {
        BindingSlot::Paint {
            target: PaintTarget::Fills,
            index,
        }
    }

    pub fn stroke(index: usize) -> Self {
        BindingSlot::Paint {
            target: PaintTarget::Strokes,
            index,
        }
    }

    pub fn number(field: NumberField) -> Self {
        BindingSlot::Number { field }
    }

    pub fn expected_type(&self) -> ResolvedType {
        match self {
            BindingSlot::Paint { .. } => ResolvedType::Color,
            BindingSlot::Number { .. } => ResolvedType::Float,
        }
    }
}

impl fmt::Display for BindingSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingSlot::Paint { target, index } => {
                let name = match target {
                    PaintTarget::Fills => "fills",
                    PaintTarget::Strokes => "strokes",
                };
                write!(f, "{name}[{index}]")
            }
            BindingSlot::Number { field } => f.write_str(field.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    HasFills,
    HasStrokes,
    HasCornerRadius,
    HasBindableNumber(NumberField),
    IsText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fills: Option<Vec<Paint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strokes: Option<Vec<Paint>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub numbers: BTreeMap<NumberField, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bound_variables: BTreeMap<NumberField, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub styles: BTreeMap<StyleKind, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn is_text(&self) -> bool {
        self.node_type.eq_ignore_ascii_case("TEXT")
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.fills.is_some() {
            caps.push(Capability::HasFills);
        }
        if self.strokes.is_some() {
            caps.push(Capability::HasStrokes);
        }
        if self.numbers.keys().any(NumberField::is_corner) {
            caps.push(Capability::HasCornerRadius);
        }
        for field in self.numbers.keys() {
            caps.push(Capability::HasBindableNumber(*field));
        }
        if self.is_text() {
            caps.push(Capability::IsText);
        }
        caps
    }

    pub fn paints(&self, target: PaintTarget) -> Option<&Vec<Paint>> {
        match target {
            PaintTarget::Fills => self.fills.as_ref(),
            PaintTarget::Strokes => self.strokes.as_ref(),
        }
    }

    pub fn paints_mut(&mut self, target: PaintTarget) -> Option<&mut Vec<Paint>> {
        match target {
            PaintTarget::Fills => self.fills.as_mut(),
            PaintTarget::Strokes => self.strokes.as_mut(),
        }
    }

    pub fn value_at(&self, slot: &BindingSlot) -> Option<ResolvedValue> {
        match slot {
            BindingSlot::Paint { target, index } => self
                .paints(*target)?
                .get(*index)
                .filter(|paint| paint.is_solid())
                .and_then(|paint| paint.color)
                .map(ResolvedValue::Color),
            BindingSlot::Number { field } => self.numbers.get(field).copied().map(ResolvedValue::Number),
        }
    }

    pub fn binding_at(&self, slot: &BindingSlot) -> Option<&str> {
        match slot {
            BindingSlot::Paint { target, index } => self
                .paints(*target)?
                .get(*index)
                .and_then(|paint| paint.bound_variable.as_deref()),
            BindingSlot::Number { field } => self.bound_variables.get(field).map(String::as_str),
        }
    }

    pub fn bindings(&self) -> Vec<(BindingSlot, String)> {
        let mut out = Vec::new();
        for target in [PaintTarget::Fills, PaintTarget::Strokes] {
            if let Some(paints) = self.paints(target) {
                for (index, paint) in paints.iter().enumerate() {
                    if let Some(id) = &paint.bound_variable {
                        out.push((BindingSlot::Paint { target, index }, id.clone()));
                    }
                }
            }
        }
        for (field, id) in &self.bound_variables {
            out.push((BindingSlot::Number { field: *field }, id.clone()));
        }
        out
    }

    pub fn flatten(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScanScope {
    #[default]
    Document,
    Nodes { ids: Vec<String> },
}
