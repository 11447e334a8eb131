#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};

use tokenlink_kernel::clock::ManualClock;
use tokenlink_kernel::document::{
    BindingSlot, LibraryVariable, Node, ResolvedValue, ScanScope, Style, StyleKind, Variable,
    VariableCollection, VariableLookup,
};
use tokenlink_kernel::registry::PROGRESS_CONTRACT_ID;
use tokenlink_kernel::tooling::logging::LOG_CONTRACT_ID;
use tokenlink_kernel::{engine_registry, Context, DocumentStore, EngineConfig, MemoryStore, Registry, Session};

/// Store wrapper that counts yields and can be told to reject writes.
pub struct InstrumentedStore {
    inner: MemoryStore,
    pub yields: Arc<AtomicUsize>,
    pub reject_binds: Arc<AtomicBool>,
    binds: AtomicUsize,
    /// 1-based bind call to reject; 0 rejects none.
    pub reject_bind_at: Arc<AtomicUsize>,
}

impl InstrumentedStore {
    pub fn new(document: Value) -> Result<Self> {
        Ok(Self {
            inner: MemoryStore::from_json(document)?,
            yields: Arc::new(AtomicUsize::new(0)),
            reject_binds: Arc::new(AtomicBool::new(false)),
            binds: AtomicUsize::new(0),
            reject_bind_at: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl DocumentStore for InstrumentedStore {
    fn collections(&self) -> Result<Vec<VariableCollection>> {
        self.inner.collections()
    }

    fn collection_by_id(&self, id: &str) -> Result<Option<VariableCollection>> {
        self.inner.collection_by_id(id)
    }

    fn variables(&self) -> Result<Vec<Variable>> {
        self.inner.variables()
    }

    fn lookup_variable(&self, id: &str) -> Result<VariableLookup> {
        self.inner.lookup_variable(id)
    }

    fn node(&self, id: &str) -> Result<Option<Node>> {
        self.inner.node(id)
    }

    fn scope_roots(&self, scope: &ScanScope) -> Result<Vec<Node>> {
        self.inner.scope_roots(scope)
    }

    fn style(&self, id: &str) -> Result<Option<Style>> {
        self.inner.style(id)
    }

    fn bind_variable(&mut self, node_id: &str, slot: &BindingSlot, variable_id: &str) -> Result<()> {
        if self.reject_binds.load(Ordering::SeqCst) {
            return Err(anyhow!("document is read-only"));
        }
        let call = self.binds.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.reject_bind_at.load(Ordering::SeqCst) {
            return Err(anyhow!("bind {call} rejected"));
        }
        self.inner.bind_variable(node_id, slot, variable_id)
    }

    fn unbind_variable(&mut self, node_id: &str, slot: &BindingSlot, literal: ResolvedValue) -> Result<()> {
        self.inner.unbind_variable(node_id, slot, literal)
    }

    fn detach_style(&mut self, node_id: &str, kind: StyleKind) -> Result<()> {
        self.inner.detach_style(node_id, kind)
    }

    fn library_variables(&self) -> Result<Vec<LibraryVariable>> {
        self.inner.library_variables()
    }

    fn import_library_variable(&mut self, key: &str) -> Result<Variable> {
        self.inner.import_library_variable(key)
    }

    fn select_node(&mut self, node_id: &str) -> Result<()> {
        self.inner.select_node(node_id)
    }

    fn yield_now(&mut self) {
        self.yields.fetch_add(1, Ordering::SeqCst);
    }

    fn export_snapshot(&self) -> Result<Value> {
        self.inner.export_snapshot()
    }
}

pub struct Harness {
    pub registry: Registry,
    pub ctx: Context,
    pub clock: Arc<ManualClock>,
    pub yields: Arc<AtomicUsize>,
    pub reject_binds: Arc<AtomicBool>,
    pub reject_bind_at: Arc<AtomicUsize>,
}

pub fn harness(document: Value) -> Result<Harness> {
    harness_with_config(document, EngineConfig::default())
}

pub fn harness_with_config(document: Value, config: EngineConfig) -> Result<Harness> {
    let store = InstrumentedStore::new(document)?;
    let yields = store.yields.clone();
    let reject_binds = store.reject_binds.clone();
    let reject_bind_at = store.reject_bind_at.clone();
    let clock = Arc::new(ManualClock::new());
    let session = Session::with_clock(Box::new(store), config, clock.clone());
    let registry = engine_registry();
    let ctx = registry.context(session);
    Ok(Harness {
        registry,
        ctx,
        clock,
        yields,
        reject_binds,
        reject_bind_at,
    })
}

pub fn node(ctx: &Context, id: &str) -> Node {
    ctx.session()
        .store()
        .node(id)
        .expect("store read")
        .expect("node exists")
}

/// Binds the log contract to an in-memory sink and returns the captured entries.
pub fn capture_logs(registry: &Registry) -> Arc<Mutex<Vec<Map<String, Value>>>> {
    let captured: Arc<Mutex<Vec<Map<String, Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    registry.register(
        "test://impl/logger@1",
        move |_ctx: &mut Context, input: Value| -> Result<Value> {
            if let Value::Object(map) = input {
                sink.lock().unwrap().push(map);
            }
            Ok(Value::Null)
        },
    );
    registry.set_binding(LOG_CONTRACT_ID, "test://impl/logger@1");
    captured
}

/// Binds the progress contract to an in-memory sink.
pub fn capture_progress(registry: &Registry) -> Arc<Mutex<Vec<Value>>> {
    let captured: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    registry.register(
        "test://impl/progress@1",
        move |_ctx: &mut Context, input: Value| -> Result<Value> {
            sink.lock().unwrap().push(input);
            Ok(Value::Null)
        },
    );
    registry.set_binding(PROGRESS_CONTRACT_ID, "test://impl/progress@1");
    captured
}

pub fn solid(hex: &str) -> Value {
    let color = tokenlink_kernel::color::Rgba::from_hex(hex).expect("valid hex");
    json!({ "type": "SOLID", "color": { "r": color.r, "g": color.g, "b": color.b, "a": color.a } })
}

pub fn bound(hex: &str, variable_id: &str) -> Value {
    let mut paint = solid(hex);
    paint["boundVariable"] = json!(variable_id);
    paint
}

pub fn color(hex: &str) -> Value {
    let color = tokenlink_kernel::color::Rgba::from_hex(hex).expect("valid hex");
    json!({ "r": color.r, "g": color.g, "b": color.b, "a": color.a })
}

/// Primitives, semantic tokens, component tokens and a handful of nodes.
pub fn design_document() -> Value {
    json!({
        "collections": [
            { "id": "c-core", "name": "Primitives", "defaultModeId": "m1" },
            { "id": "c-sem", "name": "Tokens", "defaultModeId": "s1" },
            { "id": "c-comp", "name": "Components", "defaultModeId": "k1" }
        ],
        "variables": [
            { "id": "v-gray-0", "name": "color/core/gray-0", "variableCollectionId": "c-core",
              "resolvedType": "COLOR", "valuesByMode": { "m1": color("#ffffff") } },
            { "id": "v-surface", "name": "system/background/surface", "variableCollectionId": "c-sem",
              "resolvedType": "COLOR", "valuesByMode": { "s1": { "type": "VARIABLE_ALIAS", "id": "v-gray-0" } } },
            { "id": "v-blue-500", "name": "color/blue/500", "variableCollectionId": "c-core",
              "resolvedType": "COLOR", "valuesByMode": { "m1": color("#3355ff") } },
            { "id": "v-accent", "name": "system/text/accent", "variableCollectionId": "c-sem",
              "resolvedType": "COLOR", "valuesByMode": { "s1": { "type": "VARIABLE_ALIAS", "id": "v-blue-500" } } },
            { "id": "v-button-bg", "name": "component/button/bg", "variableCollectionId": "c-comp",
              "resolvedType": "COLOR", "valuesByMode": { "k1": color("#ff0000") } },
            { "id": "v-red-500", "name": "color/red/500", "variableCollectionId": "c-core",
              "resolvedType": "COLOR", "valuesByMode": { "m1": color("#ff0000") } },
            { "id": "v-space-md", "name": "spacing/md", "variableCollectionId": "c-core",
              "resolvedType": "FLOAT", "valuesByMode": { "m1": 16 } },
            { "id": "v-radius-md", "name": "system/radius/md", "variableCollectionId": "c-sem",
              "resolvedType": "FLOAT", "valuesByMode": { "s1": 8 } }
        ],
        "styles": [
            { "id": "S:surface", "name": "system/background/surface", "kind": "fill" },
            { "id": "S:odd", "name": "legacy/odd", "kind": "fill" },
            { "id": "S:body", "name": "type/body", "kind": "text" }
        ],
        "nodes": [
            {
                "id": "frame-1", "name": "Card", "type": "FRAME",
                "fills": [ { "type": "SOLID", "color": color("#ffffff"), "opacity": 0.5, "blendMode": "MULTIPLY" } ],
                "strokes": [ solid("#3355ff") ],
                "numbers": {
                    "topLeftRadius": 8, "topRightRadius": 8, "bottomLeftRadius": 8, "bottomRightRadius": 8,
                    "itemSpacing": 16, "paddingLeft": 12
                },
                "children": [
                    { "id": "text-1", "name": "Link", "type": "TEXT",
                      "fills": [ solid("#3355ff") ], "fontSize": 14,
                      "styles": { "text": "S:body" } },
                    { "id": "chip-1", "name": "Chip", "type": "FRAME",
                      "fills": [ solid("#ffffff") ], "styles": { "fill": "S:surface" },
                      "numbers": { "topLeftRadius": 8, "topRightRadius": 8, "bottomLeftRadius": 4, "bottomRightRadius": 8 } },
                    { "id": "badge-1", "name": "Badge", "type": "FRAME",
                      "fills": [ solid("#abcdef") ], "styles": { "fill": "S:odd" } }
                ]
            }
        ]
    })
}
