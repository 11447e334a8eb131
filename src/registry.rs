use std::collections::HashMap;
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use crate::bulk::Progress;
use crate::fix::FixAction;
use crate::index::VariableIndex;
use crate::session::Session;
use crate::tooling::logging;

pub const PROGRESS_CONTRACT_ID: &str = "tokenlink://contract/progress@1";

#[derive(Debug)]
pub struct CancelledError;

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution cancelled")
    }
}

impl std::error::Error for CancelledError {}

pub trait Func: Send + Sync {
    fn call(&self, ctx: &mut Context, input: Value) -> Result<Value>;
}

impl<F> Func for F
where
    F: Fn(&mut Context, Value) -> Result<Value> + Send + Sync + 'static,
{
    fn call(&self, ctx: &mut Context, input: Value) -> Result<Value> {
        (self)(ctx, input)
    }
}

struct RegistryInner {
    funcs: HashMap<String, Arc<dyn Func>>,
    bindings: HashMap<String, String>,
}

impl RegistryInner {
    fn new() -> Self {
        Self {
            funcs: HashMap::new(),
            bindings: HashMap::new(),
        }
    }
}

/// Contract table shared by every context created from it.
pub struct Registry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Registry {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::new())),
        }
    }

    pub fn register<F>(&self, name: impl Into<String>, func: F)
    where
        F: Func + 'static,
    {
        let func_arc: Arc<dyn Func> = Arc::new(func);
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.funcs.insert(name.into(), func_arc);
    }

    pub fn set_binding(&self, contract: impl Into<String>, implementation: impl Into<String>) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner
            .bindings
            .insert(contract.into(), implementation.into());
    }

    pub fn call(&self, ctx: &mut Context, name: &str, input: Value) -> Result<Value> {
        ctx.call(name, input)
    }

    pub fn context(&self, session: Session) -> Context {
        Context::new(self.inner.clone(), session, Arc::new(AtomicBool::new(false)))
    }

    pub fn context_with_cancellation(&self, session: Session, token: Arc<AtomicBool>) -> Context {
        Context::new(self.inner.clone(), session, token)
    }
}

fn find_entry(inner: &RegistryInner, name: &str) -> Option<Arc<dyn Func>> {
    if let Some(func) = inner.funcs.get(name) {
        return Some(func.clone());
    }
    inner
        .bindings
        .get(name)
        .filter(|binding| binding.as_str() != name)
        .and_then(|binding| inner.funcs.get(binding).cloned())
}

/// One session's execution context: contract dispatch, the session state,
/// cancellation, log scoping and the audit trail.
pub struct Context {
    registry: Arc<Mutex<RegistryInner>>,
    session: Session,
    log_tag_stack: Vec<Map<String, Value>>,
    audit_log: Vec<FixAction>,
    cancellation: Arc<AtomicBool>,
}

impl Context {
    fn new(registry: Arc<Mutex<RegistryInner>>, session: Session, cancellation: Arc<AtomicBool>) -> Self {
        Self {
            registry,
            session,
            log_tag_stack: Vec::new(),
            audit_log: Vec::new(),
            cancellation,
        }
    }

    pub fn call(&mut self, name: &str, input: Value) -> Result<Value> {
        self.ensure_not_cancelled()?;
        self.dispatch(name, input)
    }

    /// Calls `name` without the cancellation check; log and progress
    /// delivery must still reach their handlers once a run is cancelled.
    pub(crate) fn dispatch(&mut self, name: &str, input: Value) -> Result<Value> {
        let func = {
            let inner = self.registry.lock().expect("registry poisoned");
            find_entry(&inner, name)
        };
        let Some(func) = func else {
            return Err(anyhow!("function not found: {name}"));
        };
        func.call(self, input)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn index(&mut self) -> Result<Arc<VariableIndex>> {
        let before = self.session.index_builds();
        let index = self.session.index()?;
        if self.session.index_builds() != before {
            let data = serde_json::json!({ "variables": index.len() });
            self.log("debug", "variable index rebuilt", Some(data));
        }
        Ok(index)
    }

    pub fn binding_for(&self, contract: &str) -> Option<String> {
        let inner = self.registry.lock().expect("registry poisoned");
        inner.bindings.get(contract).cloned()
    }

    pub fn set_cancellation_token(&mut self, token: Arc<AtomicBool>) {
        self.cancellation = token;
    }

    pub fn cancel(&self) {
        self.cancellation.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.load(Ordering::SeqCst)
    }

    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CancelledError.into())
        } else {
            Ok(())
        }
    }

    pub fn push_log_tags(&mut self, tags: Map<String, Value>) {
        if tags.is_empty() {
            return;
        }
        self.log_tag_stack.push(tags);
    }

    pub fn pop_log_tags(&mut self) {
        self.log_tag_stack.pop();
    }

    pub fn log_tag_stack(&self) -> &[Map<String, Value>] {
        &self.log_tag_stack
    }

    pub fn log(&mut self, level: &str, message: &str, data: Option<Value>) {
        let mut payload = Map::new();
        payload.insert("level".to_string(), Value::String(level.to_string()));
        payload.insert("message".to_string(), Value::String(message.to_string()));
        if let Some(data) = data {
            payload.insert("data".to_string(), data);
        }
        let _ = logging::emit_log(self, Value::Object(payload), true);
    }

    pub fn record_action(&mut self, action: FixAction) {
        self.audit_log.push(action);
    }

    pub fn audit_log(&self) -> &[FixAction] {
        &self.audit_log
    }

    pub fn take_audit_log(&mut self) -> Vec<FixAction> {
        std::mem::take(&mut self.audit_log)
    }

    pub fn emit_progress(&mut self, progress: &Progress) {
        let Some(target) = self.binding_for(PROGRESS_CONTRACT_ID) else {
            return;
        };
        let payload = match serde_json::to_value(progress) {
            Ok(payload) => payload,
            Err(err) => {
                self.log("error", "unable to serialise progress event", Some(serde_json::json!({ "error": err.to_string() })));
                return;
            }
        };
        if let Err(err) = self.dispatch(&target, payload) {
            self.log(
                "warn",
                "progress handler failed",
                Some(serde_json::json!({ "handler": target, "error": err.to_string() })),
            );
        }
    }
}
