//! The routing guidelines engine (§4.B): parses and schema-validates one
//! guideline document, compiles its destination-class and route `match`
//! expressions, and classifies sessions and servers against it.

pub mod document;
pub mod error;
pub mod version;

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::engine::{eval_expr, EvalContext, EvalError, ResolveCache};
use crate::model::{RouterInfo, ServerInfo, SessionInfo, SqlInfo};

pub use document::{CompiledRoute, DestinationGroup, GuidelinesDocument};
pub use error::GuidelinesError;
pub use version::{is_compatible, GuidelineVersion};

use document::compile_document;

/// The outcome of resolving a session's route (§4.B `classify(session,
/// router, sql?)`).
#[derive(Debug, Clone)]
pub struct Classification {
    pub route_name: String,
    pub destination_groups: Vec<DestinationGroup>,
    pub connection_sharing_allowed: bool,
}

/// The result of evaluating every route/destination-class `match` in
/// declaration order: the winning entry (if any) plus every evaluation
/// error encountered along the way. Errors don't abort the scan — "fails
/// softly per-row: evaluation errors accumulate in `errors` and the entry
/// is skipped" (§4.B).
#[derive(Debug, Default)]
pub struct ClassifyOutcome<T> {
    pub result: Option<T>,
    pub errors: Vec<EvalError>,
}

/// Route names whose `(match, destination_groups, enabled,
/// connection_sharing_allowed)` changed, or which reference a destination
/// class whose own `match` changed, between two `update()`/`load()` calls
/// (§4.B).
pub type RouteDiff = HashSet<String>;

/// Owns the currently active guideline document plus the originally
/// captured auto-generated one `restore_default()` falls back to (§9
/// SUPPLEMENT 1): the auto-generated document is kept distinct from any
/// user-supplied one, and restoring recompiles from its *original* text
/// rather than whatever is current.
pub struct GuidelinesEngine {
    current: ArcSwap<GuidelinesDocument>,
    resolve_cache: ArcSwap<ResolveCache>,
    auto_generated_source: Mutex<Option<String>>,
    supported_version: GuidelineVersion,
}

impl GuidelinesEngine {
    pub fn new(supported_version: GuidelineVersion) -> Self {
        Self {
            current: ArcSwap::from_pointee(GuidelinesDocument::empty()),
            resolve_cache: ArcSwap::from_pointee(ResolveCache::new()),
            auto_generated_source: Mutex::new(None),
            supported_version,
        }
    }

    pub fn current(&self) -> Arc<GuidelinesDocument> {
        self.current.load_full()
    }

    /// Compiles and installs `source` as the active document, returning the
    /// set of route names whose resolution changed (§4.B `update(new)`).
    pub fn load(&self, source: &str) -> Result<RouteDiff, GuidelinesError> {
        let next = compile_document(source, self.supported_version)?;
        let prev = self.current.load_full();
        let diff = document::diff_routes(&prev, &next);
        self.current.store(Arc::new(next));
        Ok(diff)
    }

    /// Like [`Self::load`], but also captures `source` as the auto-generated
    /// baseline `restore_default()` returns to.
    pub fn load_auto_generated(&self, source: &str) -> Result<RouteDiff, GuidelinesError> {
        let diff = self.load(source)?;
        *self.auto_generated_source.lock() = Some(source.to_string());
        Ok(diff)
    }

    /// Recompiles and installs the originally captured auto-generated
    /// document, ignoring whatever user-supplied document is currently
    /// active (§9 SUPPLEMENT 1).
    pub fn restore_default(&self) -> Result<RouteDiff, GuidelinesError> {
        let source = self.auto_generated_source.lock().clone();
        let Some(source) = source else {
            return Ok(HashSet::new());
        };
        self.load(&source)
    }

    /// Hostnames referenced by `RESOLVE_V4`/`RESOLVE_V6` calls anywhere in
    /// the active document, for an external resolver to refresh (§4.B).
    pub fn hostnames_to_resolve(&self) -> Vec<String> {
        self.current.load().hostnames_to_resolve.clone()
    }

    /// Installs a freshly resolved hostname cache by atomic swap (§4.B).
    pub fn install_resolve_cache(&self, cache: ResolveCache) {
        self.resolve_cache.store(Arc::new(cache));
    }

    /// Evaluates routes in declaration order; the first *enabled* route
    /// whose match is `true` wins (§4.B).
    pub fn classify(
        &self,
        session: &SessionInfo,
        router: &RouterInfo,
        sql: Option<&SqlInfo>,
    ) -> ClassifyOutcome<Classification> {
        let doc = self.current.load();
        let cache = self.resolve_cache.load();
        let ctx = EvalContext {
            router: Some(router),
            server: None,
            session: Some(session),
            sql,
        };
        let mut errors = Vec::new();
        for route in &doc.routes {
            if !route.enabled {
                continue;
            }
            match eval_expr(&route.match_expr.program, &doc.regex_store, &ctx, Some(&cache), false) {
                Ok(v) if truthy_bool(&v) => {
                    return ClassifyOutcome {
                        result: Some(Classification {
                            route_name: route.name.clone(),
                            destination_groups: route.destination_groups.clone(),
                            connection_sharing_allowed: route.connection_sharing_allowed,
                        }),
                        errors,
                    };
                }
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
        }
        ClassifyOutcome { result: None, errors }
    }

    /// Returns every destination class whose match is `true` for `server`,
    /// preserving declaration order (§4.B `classify(server, router)`).
    pub fn classify_server(&self, server: &ServerInfo, router: &RouterInfo) -> ClassifyOutcome<Vec<String>> {
        let doc = self.current.load();
        let cache = self.resolve_cache.load();
        let ctx = EvalContext {
            router: Some(router),
            server: Some(server),
            session: None,
            sql: None,
        };
        let mut matched = Vec::new();
        let mut errors = Vec::new();
        for class in &doc.destination_classes {
            match eval_expr(&class.match_expr.program, &doc.regex_store, &ctx, Some(&cache), false) {
                Ok(v) if truthy_bool(&v) => matched.push(class.name.clone()),
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
        }
        ClassifyOutcome {
            result: Some(matched),
            errors,
        }
    }
}

fn truthy_bool(v: &crate::engine::Value) -> bool {
    matches!(v, crate::engine::Value::Bool(true))
}

impl Clone for DestinationGroup {
    fn clone(&self) -> Self {
        Self {
            strategy: self.strategy,
            priority: self.priority,
            classes: self.classes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RouterInfo, SessionInfo};

    fn doc_with_route(match_expr: &str) -> String {
        format!(
            r#"{{"version":"1.0","destinations":[{{"name":"all","match":"TRUE"}}],"routes":[{{"name":"r1","match":{match_expr:?},"destinations":[{{"classes":["all"],"strategy":"round-robin","priority":0}}]}}]}}"#
        )
    }

    #[test]
    fn classify_picks_first_enabled_matching_route() {
        let engine = GuidelinesEngine::new(GuidelineVersion::new(1, 0));
        engine.load(&doc_with_route("TRUE")).unwrap();
        let session = SessionInfo::new(1, 0.5);
        let router = RouterInfo::default();
        let outcome = engine.classify(&session, &router, None);
        assert_eq!(outcome.result.unwrap().route_name, "r1");
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn classify_skips_non_matching_route() {
        let engine = GuidesForTest::build("FALSE");
        let session = SessionInfo::new(1, 0.5);
        let router = RouterInfo::default();
        let outcome = engine.classify(&session, &router, None);
        assert!(outcome.result.is_none());
    }

    #[test]
    fn restore_default_reverts_to_captured_auto_generated_text() {
        let engine = GuidelinesEngine::new(GuidelineVersion::new(1, 0));
        engine.load_auto_generated(&doc_with_route("TRUE")).unwrap();
        engine.load(&doc_with_route("FALSE")).unwrap();
        let session = SessionInfo::new(1, 0.5);
        let router = RouterInfo::default();
        assert!(engine.classify(&session, &router, None).result.is_none());
        engine.restore_default().unwrap();
        assert!(engine.classify(&session, &router, None).result.is_some());
    }

    struct GuidesForTest;
    impl GuidesForTest {
        fn build(match_expr: &str) -> GuidelinesEngine {
            let engine = GuidelinesEngine::new(GuidelineVersion::new(1, 0));
            engine.load(&doc_with_route(match_expr)).unwrap();
            engine
        }
    }
}
