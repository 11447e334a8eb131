mod common;

use anyhow::Result;
use serde_json::{json, Value};

use tokenlink_kernel::color::{ConfidenceTier, Rgba};
use tokenlink_kernel::document::{ResolvedType, ResolvedValue};
use tokenlink_kernel::matching::{find_variable, MatchContext, MatchOptions, MatchPhase};
use tokenlink_kernel::tokens::TokenCatalog;

use common::{color, harness};

fn hex(value: &str) -> ResolvedValue {
    ResolvedValue::Color(Rgba::from_hex(value).unwrap())
}

fn fills() -> MatchContext {
    MatchContext::for_property("fills")
}

fn variables_document(variables: Value) -> Value {
    json!({
        "collections": [
            { "id": "c-core", "name": "Primitives", "defaultModeId": "m1" },
            { "id": "c-sem", "name": "Tokens", "defaultModeId": "s1" },
            { "id": "c-comp", "name": "Components", "defaultModeId": "k1" }
        ],
        "variables": variables
    })
}

#[test]
fn semantic_path_matches_by_name_before_value_search() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let hit = find_variable(
        &mut h.ctx,
        "system/background/surface",
        ResolvedType::Color,
        &hex("#ffffff"),
        &fills(),
        MatchOptions::default(),
    )?
    .expect("surface variable");

    assert_eq!(hit.variable_id, "v-surface");
    assert_eq!(hit.phase, MatchPhase::Name);
    assert_eq!(hit.confidence, ConfidenceTier::Exact);
    Ok(())
}

#[test]
fn dotted_token_path_matches_slashed_variable_name() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let hit = find_variable(
        &mut h.ctx,
        "system.background.surface",
        ResolvedType::Color,
        &hex("#ffffff"),
        &fills(),
        MatchOptions::default(),
    )?;
    assert_eq!(hit.map(|hit| hit.variable_id), Some("v-surface".to_string()));
    Ok(())
}

#[test]
fn name_match_with_a_different_colour_falls_through_to_value() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let hit = find_variable(
        &mut h.ctx,
        "system/background/surface",
        ResolvedType::Color,
        &hex("#3355ff"),
        &fills(),
        MatchOptions::default(),
    )?
    .expect("value match");
    assert_eq!(hit.variable_id, "v-accent");
    assert_eq!(hit.phase, MatchPhase::Value);
    Ok(())
}

#[test]
fn semantic_beats_core_in_either_declaration_order() -> Result<()> {
    let core = json!({ "id": "v-core", "name": "color/blue/500", "variableCollectionId": "c-core",
        "resolvedType": "COLOR", "valuesByMode": { "m1": color("#3355ff") } });
    let semantic = json!({ "id": "v-sem", "name": "system/brand/accent", "variableCollectionId": "c-sem",
        "resolvedType": "COLOR", "valuesByMode": { "s1": color("#3355ff") } });

    for variables in [json!([core.clone(), semantic.clone()]), json!([semantic, core])] {
        let mut h = harness(variables_document(variables))?;
        let hit = find_variable(
            &mut h.ctx,
            "legacy/highlight",
            ResolvedType::Color,
            &hex("#3355ff"),
            &fills(),
            MatchOptions::default(),
        )?
        .expect("value match");
        assert_eq!(hit.variable_id, "v-sem");
        assert_eq!(hit.phase, MatchPhase::Value);
    }
    Ok(())
}

#[test]
fn component_variables_lose_to_any_general_candidate() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let hit = find_variable(
        &mut h.ctx,
        "legacy/danger",
        ResolvedType::Color,
        &hex("#ff0000"),
        &fills(),
        MatchOptions::default(),
    )?
    .expect("value match");
    assert_eq!(hit.variable_id, "v-red-500");

    let only_component = variables_document(json!([
        { "id": "v-button-bg", "name": "component/button/bg", "variableCollectionId": "c-comp",
          "resolvedType": "COLOR", "valuesByMode": { "k1": color("#ff0000") } }
    ]));
    let mut h = harness(only_component)?;
    let hit = find_variable(
        &mut h.ctx,
        "legacy/danger",
        ResolvedType::Color,
        &hex("#ff0000"),
        &fills(),
        MatchOptions::default(),
    )?;
    assert_eq!(hit.map(|hit| hit.variable_id), Some("v-button-bg".to_string()));
    Ok(())
}

#[test]
fn translucent_and_opaque_colours_never_collide() -> Result<()> {
    let document = variables_document(json!([
        { "id": "v-white", "name": "color/white", "variableCollectionId": "c-core",
          "resolvedType": "COLOR", "valuesByMode": { "m1": color("#ffffff") } },
        { "id": "v-veil", "name": "color/white-50", "variableCollectionId": "c-core",
          "resolvedType": "COLOR", "valuesByMode": { "m1": color("#ffffff80") } }
    ]));
    let mut h = harness(document)?;
    let hit = find_variable(
        &mut h.ctx,
        "legacy/overlay",
        ResolvedType::Color,
        &hex("#ffffff80"),
        &fills(),
        MatchOptions::default(),
    )?;
    assert_eq!(hit.map(|hit| hit.variable_id), Some("v-veil".to_string()));
    Ok(())
}

fn spacing_document(named_value: f64) -> Value {
    variables_document(json!([
        { "id": "v-named", "name": "spacing/md", "variableCollectionId": "c-core",
          "resolvedType": "FLOAT", "valuesByMode": { "m1": named_value } },
        { "id": "v-exact", "name": "spacing/legacy", "variableCollectionId": "c-core",
          "resolvedType": "FLOAT", "valuesByMode": { "m1": 16 } }
    ]))
}

#[test]
fn name_match_accepts_one_unit_of_difference() -> Result<()> {
    let mut h = harness(spacing_document(17.0))?;
    let hit = find_variable(
        &mut h.ctx,
        "spacing/md",
        ResolvedType::Float,
        &ResolvedValue::Number(16.0),
        &MatchContext::for_property("itemSpacing"),
        MatchOptions::default(),
    )?
    .expect("name match");
    assert_eq!(hit.variable_id, "v-named");
    assert_eq!(hit.phase, MatchPhase::Name);
    assert_eq!(hit.confidence, ConfidenceTier::Close);
    Ok(())
}

#[test]
fn name_match_beyond_both_tolerances_falls_through() -> Result<()> {
    let mut h = harness(spacing_document(17.01))?;
    let hit = find_variable(
        &mut h.ctx,
        "spacing/md",
        ResolvedType::Float,
        &ResolvedValue::Number(16.0),
        &MatchContext::for_property("itemSpacing"),
        MatchOptions::default(),
    )?
    .expect("value match");
    assert_eq!(hit.variable_id, "v-exact");
    assert_eq!(hit.phase, MatchPhase::Value);
    Ok(())
}

#[test]
fn relative_tolerance_covers_large_values() -> Result<()> {
    let document = variables_document(json!([
        { "id": "v-width", "name": "size/panel", "variableCollectionId": "c-core",
          "resolvedType": "FLOAT", "valuesByMode": { "m1": 104 } }
    ]));
    let mut h = harness(document)?;
    let hit = find_variable(
        &mut h.ctx,
        "size/panel",
        ResolvedType::Float,
        &ResolvedValue::Number(100.0),
        &MatchContext::for_property("width"),
        MatchOptions::default(),
    )?;
    assert_eq!(hit.map(|hit| hit.variable_id), Some("v-width".to_string()));
    Ok(())
}

#[test]
fn strict_options_only_accept_identical_values() -> Result<()> {
    let mut h = harness(spacing_document(17.0))?;
    let hit = find_variable(
        &mut h.ctx,
        "spacing/md",
        ResolvedType::Float,
        &ResolvedValue::Number(16.0),
        &MatchContext::for_property("itemSpacing"),
        MatchOptions::strict(),
    )?
    .expect("value match");
    assert_eq!(hit.variable_id, "v-exact");
    assert_eq!(hit.confidence, ConfidenceTier::Exact);
    Ok(())
}

#[test]
fn close_value_pass_keeps_the_smallest_difference() -> Result<()> {
    let document = variables_document(json!([
        { "id": "v-16", "name": "spacing/md", "variableCollectionId": "c-core",
          "resolvedType": "FLOAT", "valuesByMode": { "m1": 16 } },
        { "id": "v-14-5", "name": "spacing/sm-plus", "variableCollectionId": "c-core",
          "resolvedType": "FLOAT", "valuesByMode": { "m1": 14.5 } },
        { "id": "v-20", "name": "spacing/lg", "variableCollectionId": "c-core",
          "resolvedType": "FLOAT", "valuesByMode": { "m1": 20 } }
    ]));
    let mut h = harness(document)?;
    let hit = find_variable(
        &mut h.ctx,
        "layout/gap",
        ResolvedType::Float,
        &ResolvedValue::Number(15.0),
        &MatchContext::for_property("itemSpacing"),
        MatchOptions::default(),
    )?
    .expect("close value match");
    assert_eq!(hit.variable_id, "v-14-5");
    assert_eq!(hit.phase, MatchPhase::CloseValue);
    assert_eq!(hit.confidence, ConfidenceTier::Close);

    let strict = find_variable(
        &mut h.ctx,
        "layout/gap",
        ResolvedType::Float,
        &ResolvedValue::Number(15.0),
        &MatchContext::for_property("itemSpacing"),
        MatchOptions::strict(),
    )?;
    assert!(strict.is_none());
    Ok(())
}

#[test]
fn trailing_segments_match_when_the_prefix_differs() -> Result<()> {
    let document = variables_document(json!([
        { "id": "v-primary", "name": "system/text/primary", "variableCollectionId": "c-sem",
          "resolvedType": "COLOR", "valuesByMode": { "s1": color("#111111") } }
    ]));
    let mut h = harness(document)?;
    let hit = find_variable(
        &mut h.ctx,
        "brand.text.primary",
        ResolvedType::Color,
        &hex("#111111"),
        &fills(),
        MatchOptions::default(),
    )?
    .expect("suffix match");
    assert_eq!(hit.variable_id, "v-primary");
    assert_eq!(hit.phase, MatchPhase::Name);
    Ok(())
}

#[test]
fn context_keywords_break_value_ties() -> Result<()> {
    let document = variables_document(json!([
        { "id": "v-inverse", "name": "system/background/inverse", "variableCollectionId": "c-sem",
          "resolvedType": "COLOR", "valuesByMode": { "s1": color("#111111") } },
        { "id": "v-text", "name": "system/text/primary", "variableCollectionId": "c-sem",
          "resolvedType": "COLOR", "valuesByMode": { "s1": color("#111111") } }
    ]));
    let mut h = harness(document)?;

    let on_text = MatchContext {
        node_type: Some("TEXT".to_string()),
        ..fills()
    };
    let hit = find_variable(&mut h.ctx, "legacy/ink", ResolvedType::Color, &hex("#111111"), &on_text, MatchOptions::default())?;
    assert_eq!(hit.map(|hit| hit.variable_id), Some("v-text".to_string()));

    let on_frame = MatchContext {
        node_type: Some("FRAME".to_string()),
        ..fills()
    };
    let hit = find_variable(&mut h.ctx, "legacy/ink", ResolvedType::Color, &hex("#111111"), &on_frame, MatchOptions::default())?;
    assert_eq!(hit.map(|hit| hit.variable_id), Some("v-inverse".to_string()));
    Ok(())
}

#[test]
fn keywords_follow_property_and_node() {
    let text = MatchContext {
        node_type: Some("TEXT".to_string()),
        ..MatchContext::for_property("fills")
    };
    assert_eq!(text.keywords(), ["text"]);
    assert_eq!(MatchContext::for_property("strokes").keywords(), ["border", "stroke"]);
    assert_eq!(
        MatchContext::for_property("strokeWeight").keywords(),
        ["border", "stroke", "width"]
    );
    assert_eq!(MatchContext::for_property("cornerRadius").keywords(), ["radius", "corner"]);
    let icon = MatchContext {
        node_type: Some("VECTOR".to_string()),
        ..MatchContext::for_property("fills")
    };
    assert_eq!(icon.keywords()[0], "icon");
}

fn library_document() -> Value {
    json!({
        "collections": [
            { "id": "c-core", "name": "Primitives", "defaultModeId": "m1" }
        ],
        "variables": [],
        "library": [
            {
                "key": "lib-accent",
                "name": "system/accent",
                "resolvedType": "COLOR",
                "collection": { "id": "c-lib", "name": "Brand Library", "defaultModeId": "l1", "remote": true },
                "valuesByMode": { "l1": color("#ff8800") }
            }
        ]
    })
}

#[test]
fn remote_variable_is_imported_and_indexed() -> Result<()> {
    let mut h = harness(library_document())?;
    let hit = find_variable(
        &mut h.ctx,
        "system/accent",
        ResolvedType::Color,
        &hex("#ff8800"),
        &fills(),
        MatchOptions::default(),
    )?
    .expect("library import");
    assert_eq!(hit.phase, MatchPhase::Remote);
    assert_eq!(hit.variable_id, "VariableID:lib-accent");
    assert_eq!(h.ctx.session().library_fetches(), 1);
    assert_eq!(h.ctx.session().index_builds(), 2);

    let again = find_variable(
        &mut h.ctx,
        "system/accent",
        ResolvedType::Color,
        &hex("#ff8800"),
        &fills(),
        MatchOptions::default(),
    )?
    .expect("local match");
    assert_eq!(again.phase, MatchPhase::Name);
    assert_eq!(again.variable_id, "VariableID:lib-accent");
    Ok(())
}

#[test]
fn remote_lookup_follows_the_token_alias_chain() -> Result<()> {
    let catalog = TokenCatalog::from_document(
        r##"
- path: button.primary.bg
  type: color
  value: "{brand.accent}"
- path: brand.accent
  type: color
  value: "{system.accent}"
- path: system.accent
  type: color
  value: "#ff8800"
"##,
        true,
    )?;
    let mut h = harness(library_document())?;
    h.ctx.session_mut().set_catalog(Some(std::sync::Arc::new(catalog)));

    let hit = find_variable(
        &mut h.ctx,
        "button/primary/bg",
        ResolvedType::Color,
        &hex("#ff8800"),
        &fills(),
        MatchOptions::default(),
    )?;
    assert_eq!(hit.map(|hit| hit.phase), Some(MatchPhase::Remote));
    Ok(())
}

#[test]
fn imported_variable_with_another_value_is_not_returned() -> Result<()> {
    let mut h = harness(library_document())?;
    let hit = find_variable(
        &mut h.ctx,
        "system/accent",
        ResolvedType::Color,
        &hex("#00ff00"),
        &fills(),
        MatchOptions::default(),
    )?;
    assert!(hit.is_none());
    Ok(())
}

#[test]
fn exhausted_search_is_none_not_an_error() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let hit = find_variable(
        &mut h.ctx,
        "nothing/here",
        ResolvedType::Color,
        &hex("#123456"),
        &fills(),
        MatchOptions::default(),
    )?;
    assert!(hit.is_none());

    let mismatched = find_variable(
        &mut h.ctx,
        "spacing/md",
        ResolvedType::Color,
        &ResolvedValue::Number(16.0),
        &fills(),
        MatchOptions::default(),
    )?;
    assert!(mismatched.is_none());
    Ok(())
}

fn alias(id: &str, name: &str, target: &str) -> Value {
    json!({
        "id": id, "name": name, "variableCollectionId": "c-sem", "resolvedType": "COLOR",
        "valuesByMode": { "s1": { "type": "VARIABLE_ALIAS", "id": target } }
    })
}

#[test]
fn circular_variable_aliases_resolve_to_no_match() -> Result<()> {
    let mut variables = vec![
        alias("v-a", "cycle/pair/a", "v-b"),
        alias("v-b", "cycle/pair/b", "v-a"),
        alias("v-self", "cycle/self", "v-self"),
    ];
    let ring: Vec<String> = (0..12).map(|i| format!("v-ring-{i}")).collect();
    for (i, id) in ring.iter().enumerate() {
        let next = &ring[(i + 1) % ring.len()];
        variables.push(alias(id, &format!("cycle/ring/{i}"), next));
    }
    variables.push(json!({
        "id": "v-ok", "name": "color/ok", "variableCollectionId": "c-core",
        "resolvedType": "COLOR", "valuesByMode": { "m1": color("#123456") }
    }));
    let mut h = harness(variables_document(Value::Array(variables)))?;

    let index = h.ctx.index()?;
    assert_eq!(index.len(), 16);
    for id in ["v-a", "v-b", "v-self", "v-ring-0", "v-ring-11"] {
        assert!(index.get(id).expect("indexed").resolved.is_none(), "{id} should not resolve");
    }
    assert_eq!(index.get("v-ok").and_then(|entry| entry.resolved), Some(hex("#123456")));

    for path in ["cycle/pair/a", "cycle/self", "cycle/ring/7"] {
        let hit = find_variable(
            &mut h.ctx,
            path,
            ResolvedType::Color,
            &hex("#abcdef"),
            &fills(),
            MatchOptions::default(),
        )?;
        assert!(hit.is_none(), "{path} matched through a cycle");
    }

    let hit = find_variable(
        &mut h.ctx,
        "cycle/pair/a",
        ResolvedType::Color,
        &hex("#123456"),
        &fills(),
        MatchOptions::default(),
    )?
    .expect("value phase still works");
    assert_eq!(hit.variable_id, "v-ok");
    assert_eq!(hit.phase, MatchPhase::Value);
    Ok(())
}
