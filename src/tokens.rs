use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alias::{self, AliasGraph, AliasStep};
use crate::color::{self, ConfidenceTier, Rgba};
use crate::number::{self, NumberTolerance};
use crate::path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Color,
    Number,
    Dimension,
    Text,
    Shadow,
    Typography,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenValue {
    Color(Rgba),
    Number(f64),
    Text(String),
    Composite(Value),
}

impl TokenValue {
    pub fn as_color(&self) -> Option<Rgba> {
        match self {
            TokenValue::Color(color) => Some(*color),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            TokenValue::Number(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawToken {
    pub path: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(default)]
    pub source_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Normalised path.
    pub path: String,
    pub raw_value: Value,
    /// `None` for a dangling or circular alias.
    pub resolved_value: Option<TokenValue>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub is_alias: bool,
    pub alias_path: Option<String>,
    pub source_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSuggestion {
    pub path: String,
    pub distance: f64,
    pub confidence: ConfidenceTier,
}

/// Alias reference in `{a.b.c}` or `{a/b/c}` notation.
pub fn alias_reference(raw: &Value) -> Option<String> {
    let text = raw.as_str()?.trim();
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    let normalized = path::normalize(inner);
    (!normalized.is_empty()).then_some(normalized)
}

pub fn parse_token_value(raw: &Value, token_type: TokenType) -> Option<TokenValue> {
    match token_type {
        TokenType::Color => raw.as_str().and_then(|text| Rgba::parse(text).ok()).map(TokenValue::Color),
        TokenType::Number | TokenType::Dimension => parse_dimension(raw).map(TokenValue::Number),
        TokenType::Text => raw.as_str().map(|text| TokenValue::Text(text.to_string())),
        TokenType::Shadow | TokenType::Typography => Some(TokenValue::Composite(raw.clone())),
    }
}

const REM_PX: f64 = 16.0;

fn parse_dimension(raw: &Value) -> Option<f64> {
    if let Some(number) = raw.as_f64() {
        return Some(number);
    }
    let text = raw.as_str()?.trim();
    if let Some(px) = text.strip_suffix("px") {
        return px.trim().parse().ok();
    }
    if let Some(rem) = text.strip_suffix("rem") {
        return rem.trim().parse::<f64>().ok().map(|value| value * REM_PX);
    }
    text.parse().ok()
}

struct RawGraph<'a> {
    raw: &'a HashMap<String, RawToken>,
}

impl AliasGraph for RawGraph<'_> {
    type Value = TokenValue;

    fn step(&self, id: &str) -> Option<AliasStep<TokenValue>> {
        let token = self.raw.get(id)?;
        if let Some(target) = alias_reference(&token.value) {
            return Some(AliasStep::Alias(target));
        }
        parse_token_value(&token.value, token.token_type).map(AliasStep::Value)
    }
}

impl AliasGraph for TokenCatalog {
    type Value = TokenValue;

    fn step(&self, id: &str) -> Option<AliasStep<TokenValue>> {
        let token = self.tokens.get(id)?;
        match (&token.alias_path, &token.resolved_value) {
            (Some(target), _) => Some(AliasStep::Alias(target.clone())),
            (None, Some(value)) => Some(AliasStep::Value(value.clone())),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenCatalog {
    tokens: HashMap<String, Token>,
    order: Vec<String>,
    by_type: HashMap<TokenType, Vec<String>>,
    color_preferred: HashMap<String, String>,
    number_paths: HashMap<u64, Vec<String>>,
    unresolved: Vec<String>,
}

impl TokenCatalog {
    /// Resolves every alias once and builds the lookup indexes. Later
    /// duplicates of a path replace earlier ones.
    pub fn from_raw(raw_tokens: Vec<RawToken>) -> Self {
        let mut order = Vec::new();
        let mut raw = HashMap::new();
        for token in raw_tokens {
            let key = path::normalize(&token.path);
            if key.is_empty() {
                continue;
            }
            if !raw.contains_key(&key) {
                order.push(key.clone());
            }
            raw.insert(key, token);
        }

        let graph = RawGraph { raw: &raw };
        let mut catalog = TokenCatalog::default();
        for key in &order {
            let Some(source) = raw.get(key) else { continue };
            let alias_path = alias_reference(&source.value);
            let resolved_value = alias::resolve(&graph, key);
            let token = Token {
                path: key.clone(),
                raw_value: source.value.clone(),
                resolved_value,
                token_type: source.token_type,
                is_alias: alias_path.is_some(),
                alias_path,
                source_file: source.source_file.clone(),
            };
            catalog.insert(token);
        }
        catalog
    }

    pub fn from_document(text: &str, yaml: bool) -> Result<Self> {
        let raw: Vec<RawToken> = if yaml {
            serde_yaml::from_str(text).map_err(|err| anyhow!("invalid token YAML: {err}"))?
        } else {
            serde_json::from_str(text).map_err(|err| anyhow!("invalid token JSON: {err}"))?
        };
        Ok(Self::from_raw(raw))
    }

    fn insert(&mut self, token: Token) {
        let key = token.path.clone();
        self.order.push(key.clone());
        self.by_type.entry(token.token_type).or_default().push(key.clone());
        match &token.resolved_value {
            Some(TokenValue::Color(color)) => {
                let hex = color.to_hex();
                let replace = match self.color_preferred.get(&hex) {
                    Some(current) => prefer_path(&key, current),
                    None => true,
                };
                if replace {
                    self.color_preferred.insert(hex, key.clone());
                }
            }
            Some(TokenValue::Number(value)) => {
                if let Some(bucket) = number::number_key(*value) {
                    self.number_paths.entry(bucket).or_default().push(key.clone());
                }
            }
            Some(_) => {}
            None => self.unresolved.push(key.clone()),
        }
        self.tokens.insert(key, token);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, token_path: &str) -> Option<&Token> {
        self.tokens.get(&path::normalize(token_path))
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.order.iter().filter_map(|key| self.tokens.get(key))
    }

    pub fn by_type(&self, token_type: TokenType) -> Vec<&Token> {
        self.by_type
            .get(&token_type)
            .map(|keys| keys.iter().filter_map(|key| self.tokens.get(key)).collect())
            .unwrap_or_default()
    }

    /// Preferred path for a colour: semantic namespaces first, then the
    /// shortest path, then declaration order.
    pub fn preferred_color_path(&self, color: &Rgba) -> Option<&str> {
        self.color_preferred.get(&color.to_hex()).map(String::as_str)
    }

    pub fn number_paths(&self, value: f64) -> &[String] {
        number::number_key(value)
            .and_then(|key| self.number_paths.get(&key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    /// The token's own path followed by every path its alias chain visits.
    pub fn alias_chain(&self, token_path: &str) -> Vec<String> {
        let key = path::normalize(token_path);
        if !self.tokens.contains_key(&key) {
            return vec![key];
        }
        alias::alias_chain(self, &key)
    }

    /// Closest colour tokens by CIEDE2000, best first. Among identical
    /// colours the preferred path leads.
    pub fn suggest_color(&self, color: &Rgba, limit: usize) -> Vec<TokenSuggestion> {
        let mut out: Vec<TokenSuggestion> = self
            .tokens()
            .filter_map(|token| {
                let candidate = token.resolved_value.as_ref()?.as_color()?;
                let confidence = color::classify_color(color, &candidate)?;
                Some(TokenSuggestion {
                    path: token.path.clone(),
                    distance: color::color_distance(color, &candidate),
                    confidence,
                })
            })
            .collect();
        sort_suggestions(&mut out, self.preferred_color_path(color));
        out.truncate(limit);
        out
    }

    pub fn suggest_number(&self, value: f64, tolerance: &NumberTolerance, limit: usize) -> Vec<TokenSuggestion> {
        let mut out: Vec<TokenSuggestion> = self
            .tokens()
            .filter_map(|token| {
                let candidate = token.resolved_value.as_ref()?.as_number()?;
                let confidence = number::classify_number(value, candidate, tolerance)?;
                Some(TokenSuggestion {
                    path: token.path.clone(),
                    distance: (value - candidate).abs(),
                    confidence,
                })
            })
            .collect();
        sort_suggestions(&mut out, None);
        out.truncate(limit);
        out
    }
}

fn sort_suggestions(items: &mut [TokenSuggestion], preferred: Option<&str>) {
    let demoted = |item: &TokenSuggestion| preferred != Some(item.path.as_str());
    items.sort_by(|a, b| {
        a.confidence
            .cmp(&b.confidence)
            .then(a.distance.total_cmp(&b.distance))
            .then(demoted(a).cmp(&demoted(b)))
            .then(a.path.cmp(&b.path))
    });
}

const SEMANTIC_TOKEN_PREFIXES: [&str; 3] = ["system", "semantic", "theme"];

fn is_semantic_path(token_path: &str) -> bool {
    path::segments(token_path)
        .first()
        .map(|first| SEMANTIC_TOKEN_PREFIXES.contains(&first.as_str()))
        .unwrap_or(false)
}

fn prefer_path(candidate: &str, current: &str) -> bool {
    match (is_semantic_path(candidate), is_semantic_path(current)) {
        (true, false) => true,
        (false, true) => false,
        _ => path::segments(candidate).len() < path::segments(current).len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(path: &str, value: Value, token_type: TokenType) -> RawToken {
        RawToken {
            path: path.to_string(),
            value,
            token_type,
            source_file: Some("tokens.json".to_string()),
        }
    }

    fn catalog() -> TokenCatalog {
        TokenCatalog::from_raw(vec![
            raw("color.core.gray-0", json!("#ffffff"), TokenType::Color),
            raw("system.background.surface", json!("{color.core.gray-0}"), TokenType::Color),
            raw("system.background.canvas", json!("{system.background.surface}"), TokenType::Color),
            raw("spacing.md", json!("16px"), TokenType::Dimension),
            raw("spacing.lg", json!("1.5rem"), TokenType::Dimension),
            raw("broken.a", json!("{broken.b}"), TokenType::Color),
            raw("broken.b", json!("{broken.a}"), TokenType::Color),
            raw("dangling", json!("{nowhere}"), TokenType::Color),
        ])
    }

    #[test]
    fn resolves_alias_chains() {
        let catalog = catalog();
        let canvas = catalog.get("system/background/canvas").unwrap();
        assert!(canvas.is_alias);
        assert_eq!(canvas.alias_path.as_deref(), Some("system/background/surface"));
        assert_eq!(
            canvas.resolved_value.as_ref().and_then(TokenValue::as_color).map(|c| c.to_hex()),
            Some("#ffffff".to_string())
        );
        assert_eq!(
            catalog.alias_chain("system.background.canvas"),
            vec!["system/background/canvas", "system/background/surface", "color/core/gray-0"]
        );
    }

    #[test]
    fn cycles_and_dangling_aliases_are_marked_unresolved() {
        let catalog = catalog();
        assert_eq!(catalog.unresolved(), ["broken/a", "broken/b", "dangling"]);
        assert!(catalog.get("broken.a").unwrap().resolved_value.is_none());
    }

    #[test]
    fn preferred_color_path_favours_semantic() {
        let catalog = catalog();
        let white = Rgba::from_hex("#fff").unwrap();
        assert_eq!(catalog.preferred_color_path(&white), Some("system/background/surface"));

        let paths: Vec<String> = catalog.suggest_color(&white, 5).into_iter().map(|s| s.path).collect();
        assert_eq!(
            paths,
            ["system/background/surface", "color/core/gray-0", "system/background/canvas"]
        );
    }

    #[test]
    fn dimensions_resolve_to_pixels() {
        let catalog = catalog();
        assert_eq!(catalog.number_paths(16.0), ["spacing/md"]);
        assert_eq!(catalog.number_paths(24.0), ["spacing/lg"]);
        assert_eq!(catalog.by_type(TokenType::Dimension).len(), 2);
    }

    #[test]
    fn suggestions_rank_by_distance() {
        let catalog = catalog();
        let near_white = Rgba::from_hex("#fefefe").unwrap();
        let suggestions = catalog.suggest_color(&near_white, 2);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].confidence, ConfidenceTier::Close);

        let numbers = catalog.suggest_number(15.0, &NumberTolerance::default(), 5);
        assert_eq!(numbers[0].path, "spacing/md");
        assert_eq!(numbers[0].confidence, ConfidenceTier::Close);
    }
}
