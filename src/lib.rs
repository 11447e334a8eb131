pub mod alias;
pub mod bulk;
pub mod clock;
pub mod color;
pub mod config;
pub mod contracts;
pub mod document;
pub mod fix;
pub mod index;
pub mod library;
pub mod matching;
pub mod number;
pub mod path;
pub mod registry;
pub mod remap;
pub mod session;
pub mod store;
pub mod tokens;
pub mod tooling;

pub use bulk::{apply_bulk_fix, apply_remaps, bulk_detach_styles, BulkFixSummary, Progress, RemapSummary};
pub use config::EngineConfig;
pub use contracts::register_contracts;
pub use fix::{apply_fix, detach_style, unbind_variable, FixAction, FixError, FixRequest, FixResult};
pub use matching::{find_variable, MatchCandidate, MatchContext, MatchOptions, MatchPhase};
pub use registry::{CancelledError, Context, Registry};
pub use remap::{scan_for_broken_bindings, RemapEntry, RemapScanResult};
pub use session::Session;
pub use store::{DocumentStore, MemoryStore};
pub use tokens::TokenCatalog;
pub use tooling::register_tooling;

/// Registry with the logging tooling and every engine contract registered.
pub fn engine_registry() -> Registry {
    let registry = Registry::new();
    register_tooling(&registry);
    register_contracts(&registry);
    registry
}
