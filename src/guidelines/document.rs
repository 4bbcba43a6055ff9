//! Parsing and compiling one routing guideline document (§4.B).

use serde::Deserialize;

use crate::destination::Strategy;
use crate::engine::{compile, CompileMode, CompiledExpr, RegexStore};

use super::error::GuidelinesError;
use super::version::{is_compatible, GuidelineVersion};

#[derive(Debug, Deserialize)]
struct RawDocument {
    version: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "destinations", default)]
    destination_classes: Vec<RawDestinationClass>,
    #[serde(default)]
    routes: Vec<RawRoute>,
}

#[derive(Debug, Deserialize)]
struct RawDestinationClass {
    name: String,
    #[serde(rename = "match")]
    match_expr: String,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    name: String,
    #[serde(rename = "match")]
    match_expr: String,
    #[serde(rename = "destinations", default)]
    destination_groups: Vec<RawDestinationGroup>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    connection_sharing_allowed: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawDestinationGroup {
    classes: Vec<String>,
    strategy: String,
    #[serde(default)]
    priority: u64,
}

/// One `(strategy, priority, class names)` group within a route, in the
/// order the guideline document declared it (§4.C.2 step 1).
#[derive(Debug, Clone)]
pub struct DestinationGroup {
    pub strategy: Strategy,
    pub priority: u64,
    pub classes: Vec<String>,
}

/// A destination class compiled against the *server* scope (§4.A, §4.B).
pub struct CompiledDestinationClass {
    pub name: String,
    pub match_expr: CompiledExpr,
    source_match: String,
}

/// A route compiled against the *session* (and optional *sql*) scope.
pub struct CompiledRoute {
    pub name: String,
    pub match_expr: CompiledExpr,
    pub destination_groups: Vec<DestinationGroup>,
    pub enabled: bool,
    pub connection_sharing_allowed: bool,
    source_match: String,
}

impl CompiledRoute {
    /// The identity tuple §4.B's `update()` diffs on: "whose `(match,
    /// destination_groups, enabled, sharing_allowed)` changed".
    fn diff_key(&self) -> (&str, &[DestinationGroup], bool, bool) {
        (
            self.source_match.as_str(),
            self.destination_groups.as_slice(),
            self.enabled,
            self.connection_sharing_allowed,
        )
    }
}

impl PartialEq for DestinationGroup {
    fn eq(&self, other: &Self) -> bool {
        self.strategy == other.strategy && self.priority == other.priority && self.classes == other.classes
    }
}

fn strategy_from_str(s: &str) -> Option<Strategy> {
    match s {
        "first-available" => Some(Strategy::FirstAvailable),
        "next-available" => Some(Strategy::NextAvailable),
        "round-robin" => Some(Strategy::RoundRobin),
        _ => None,
    }
}

/// A fully compiled guideline document (§4.B): the destination classes and
/// routes it declares, the document-scoped regex store their `LIKE`/regex
/// matches compile against, and the hostnames any `RESOLVE_V4`/`RESOLVE_V6`
/// calls in it reference.
pub struct GuidelinesDocument {
    pub version: GuidelineVersion,
    pub name: String,
    pub destination_classes: Vec<CompiledDestinationClass>,
    pub routes: Vec<CompiledRoute>,
    pub regex_store: RegexStore,
    pub hostnames_to_resolve: Vec<String>,
    pub source: String,
}

impl GuidelinesDocument {
    pub fn empty() -> Self {
        Self {
            version: GuidelineVersion::new(1, 0),
            name: String::new(),
            destination_classes: Vec::new(),
            routes: Vec::new(),
            regex_store: RegexStore::new(),
            hostnames_to_resolve: Vec::new(),
            source: String::new(),
        }
    }
}

/// Compiles `source` (a guideline JSON document) into a [`GuidelinesDocument`],
/// schema-validating it against the fixed set of identifiers the expression
/// engine understands (§4.B: "schema-validates it against a built-in schema
/// naming exactly the allowed variable/keyword/function identifiers" — the
/// allowed-identifier table lives in [`crate::engine::context::classify`] and
/// [`crate::engine::token::Func`], and is enforced simply by compiling each
/// `match` expression through the real parser).
pub fn compile_document(source: &str, supported: GuidelineVersion) -> Result<GuidelinesDocument, GuidelinesError> {
    let raw: RawDocument = serde_json::from_str(source)?;
    let version: GuidelineVersion = raw.version.parse()?;
    if !is_compatible(version, supported) {
        return Err(GuidelinesError::IncompatibleVersion {
            available: version.to_string(),
            supported: supported.to_string(),
        });
    }

    // §6: "destinations (non-empty, unique, ...)" and "routes (non-empty,
    // unique, ...)".
    if raw.destination_classes.is_empty() {
        return Err(GuidelinesError::SchemaViolation("destinations must be non-empty".into()));
    }
    if raw.routes.is_empty() {
        return Err(GuidelinesError::SchemaViolation("routes must be non-empty".into()));
    }
    {
        let mut seen = std::collections::HashSet::new();
        for class in &raw.destination_classes {
            if !seen.insert(class.name.as_str()) {
                return Err(GuidelinesError::SchemaViolation(format!(
                    "duplicate destination name {:?}",
                    class.name
                )));
            }
        }
    }
    {
        let mut seen = std::collections::HashSet::new();
        for route in &raw.routes {
            if !seen.insert(route.name.as_str()) {
                return Err(GuidelinesError::SchemaViolation(format!("duplicate route name {:?}", route.name)));
            }
        }
    }

    let mut regex_store = RegexStore::new();
    let mut hostnames_to_resolve = Vec::new();

    let mut destination_classes = Vec::with_capacity(raw.destination_classes.len());
    for class in &raw.destination_classes {
        let compiled = compile(&class.match_expr, CompileMode::DestinationMatch, &mut regex_store)?;
        hostnames_to_resolve.extend(compiled.hostnames_to_resolve.iter().cloned());
        destination_classes.push(CompiledDestinationClass {
            name: class.name.clone(),
            match_expr: compiled,
            source_match: class.match_expr.clone(),
        });
    }
    let known_classes: std::collections::HashSet<&str> =
        destination_classes.iter().map(|c| c.name.as_str()).collect();

    let mut routes = Vec::with_capacity(raw.routes.len());
    for route in &raw.routes {
        let compiled = compile(&route.match_expr, CompileMode::RouteMatch, &mut regex_store)?;
        hostnames_to_resolve.extend(compiled.hostnames_to_resolve.iter().cloned());

        let mut destination_groups = Vec::with_capacity(route.destination_groups.len());
        for group in &route.destination_groups {
            let strategy = strategy_from_str(&group.strategy)
                .ok_or_else(|| GuidelinesError::SchemaViolation(format!("unknown strategy {:?}", group.strategy)))?;
            for class in &group.classes {
                if !known_classes.contains(class.as_str()) {
                    return Err(GuidelinesError::UnknownDestinationClass {
                        route: route.name.clone(),
                        class: class.clone(),
                    });
                }
            }
            destination_groups.push(DestinationGroup {
                strategy,
                priority: group.priority,
                classes: group.classes.clone(),
            });
        }
        destination_groups.sort_by_key(|g| g.priority);

        routes.push(CompiledRoute {
            name: route.name.clone(),
            match_expr: compiled,
            destination_groups,
            enabled: route.enabled,
            connection_sharing_allowed: route.connection_sharing_allowed,
            source_match: route.match_expr.clone(),
        });
    }

    hostnames_to_resolve.sort();
    hostnames_to_resolve.dedup();

    Ok(GuidelinesDocument {
        version,
        name: raw.name,
        destination_classes,
        routes,
        regex_store,
        hostnames_to_resolve,
        source: source.to_string(),
    })
}

/// Route names whose compiled `(match, destination_groups, enabled,
/// connection_sharing_allowed)` tuple differs between `prev` and `next`, or
/// whose destination groups reference a destination class whose own `match`
/// changed (§4.B `update()`).
pub fn diff_routes(prev: &GuidelinesDocument, next: &GuidelinesDocument) -> std::collections::HashSet<String> {
    use std::collections::{HashMap, HashSet};

    let mut changed = HashSet::new();

    let prev_classes: HashMap<&str, &str> = prev
        .destination_classes
        .iter()
        .map(|c| (c.name.as_str(), c.source_match.as_str()))
        .collect();
    let next_classes: HashMap<&str, &str> = next
        .destination_classes
        .iter()
        .map(|c| (c.name.as_str(), c.source_match.as_str()))
        .collect();
    let mut changed_classes: HashSet<&str> = HashSet::new();
    for (name, text) in &next_classes {
        match prev_classes.get(name) {
            Some(prev_text) if prev_text == text => {}
            _ => {
                changed_classes.insert(name);
            }
        }
    }
    for name in prev_classes.keys() {
        if !next_classes.contains_key(name) {
            changed_classes.insert(name);
        }
    }

    let prev_routes: HashMap<&str, &CompiledRoute> = prev.routes.iter().map(|r| (r.name.as_str(), r)).collect();
    for route in &next.routes {
        let references_changed_class = route
            .destination_groups
            .iter()
            .any(|g| g.classes.iter().any(|c| changed_classes.contains(c.as_str())));
        let identity_changed = match prev_routes.get(route.name.as_str()) {
            Some(prev_route) => prev_route.diff_key() != route.diff_key(),
            None => true,
        };
        if references_changed_class || identity_changed {
            changed.insert(route.name.clone());
        }
    }
    for name in prev_routes.keys() {
        if !next.routes.iter().any(|r| r.name == *name) {
            changed.insert((*name).to_string());
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(routes_json: &str) -> String {
        format!(
            r#"{{"version":"1.0","name":"test","destinations":[{{"name":"all","match":"TRUE"}}],"routes":[{routes_json}]}}"#
        )
    }

    #[test]
    fn compiles_minimal_document() {
        let src = doc(r#"{"name":"r1","match":"TRUE","destinations":[{"classes":["all"],"strategy":"round-robin","priority":0}]}"#);
        let compiled = compile_document(&src, GuidelineVersion::new(1, 0)).unwrap();
        assert_eq!(compiled.routes.len(), 1);
        assert_eq!(compiled.routes[0].destination_groups[0].strategy, Strategy::RoundRobin);
    }

    #[test]
    fn rejects_unknown_destination_class() {
        let src = doc(r#"{"name":"r1","match":"TRUE","destinations":[{"classes":["missing"],"strategy":"round-robin","priority":0}]}"#);
        assert!(compile_document(&src, GuidelineVersion::new(1, 0)).is_err());
    }

    #[test]
    fn rejects_empty_destinations_or_routes() {
        let no_classes = r#"{"version":"1.0","destinations":[],"routes":[{"name":"r1","match":"TRUE","destinations":[]}]}"#;
        assert!(compile_document(no_classes, GuidelineVersion::new(1, 0)).is_err());
        let no_routes = r#"{"version":"1.0","destinations":[{"name":"all","match":"TRUE"}],"routes":[]}"#;
        assert!(compile_document(no_routes, GuidelineVersion::new(1, 0)).is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let dup_classes = r#"{"version":"1.0","destinations":[{"name":"all","match":"TRUE"},{"name":"all","match":"FALSE"}],"routes":[{"name":"r1","match":"TRUE","destinations":[]}]}"#;
        assert!(compile_document(dup_classes, GuidelineVersion::new(1, 0)).is_err());
        let dup_routes = r#"{"version":"1.0","destinations":[{"name":"all","match":"TRUE"}],"routes":[{"name":"r1","match":"TRUE","destinations":[]},{"name":"r1","match":"FALSE","destinations":[]}]}"#;
        assert!(compile_document(dup_routes, GuidelineVersion::new(1, 0)).is_err());
    }

    #[test]
    fn rejects_incompatible_version() {
        let src = r#"{"version":"5.0","destinations":[],"routes":[]}"#;
        assert!(compile_document(src, GuidelineVersion::new(1, 0)).is_err());
    }

    #[test]
    fn diff_detects_changed_match() {
        let src_a = doc(r#"{"name":"r1","match":"TRUE","destinations":[]}"#);
        let src_b = doc(r#"{"name":"r1","match":"FALSE","destinations":[]}"#);
        let a = compile_document(&src_a, GuidelineVersion::new(1, 0)).unwrap();
        let b = compile_document(&src_b, GuidelineVersion::new(1, 0)).unwrap();
        let changed = diff_routes(&a, &b);
        assert!(changed.contains("r1"));
    }

    #[test]
    fn diff_is_empty_for_identical_documents() {
        let src = doc(r#"{"name":"r1","match":"TRUE","destinations":[]}"#);
        let a = compile_document(&src, GuidelineVersion::new(1, 0)).unwrap();
        let b = compile_document(&src, GuidelineVersion::new(1, 0)).unwrap();
        assert!(diff_routes(&a, &b).is_empty());
    }

    #[test]
    fn diff_detects_changed_referenced_destination_class() {
        let src_a = r#"{"version":"1.0","destinations":[{"name":"all","match":"TRUE"}],"routes":[{"name":"r1","match":"TRUE","destinations":[{"classes":["all"],"strategy":"round-robin","priority":0}]}]}"#;
        let src_b = r#"{"version":"1.0","destinations":[{"name":"all","match":"FALSE"}],"routes":[{"name":"r1","match":"TRUE","destinations":[{"classes":["all"],"strategy":"round-robin","priority":0}]}]}"#;
        let a = compile_document(src_a, GuidelineVersion::new(1, 0)).unwrap();
        let b = compile_document(src_b, GuidelineVersion::new(1, 0)).unwrap();
        assert!(diff_routes(&a, &b).contains("r1"));
    }
}
