use super::error::EvalError;
use super::token::{Reference, Role, RoleKind, Scope, StaticType, Value};
use crate::model::{RouterInfo, ServerInfo, SessionInfo, SqlInfo};

/// Classifies a known `$.<scope>.<path>` reference for the compiler: its
/// static type, and whether it may legitimately resolve to `NULL` because
/// the underlying field is optional (§4.A: "`=` and `<>` with a `NULL`
/// operand: returns `false` if one side is a 'missing variable' ... parse-
/// time recorded"). `None` means the reference is unknown and compilation
/// must fail.
pub fn classify(scope: Scope, path: &str) -> Option<(StaticType, bool)> {
    use StaticType::*;

    match scope {
        Scope::Router => match path {
            "portRo" | "portRw" | "portRwSplit" => Some((Num, true)),
            "localCluster" | "hostname" | "bindAddress" | "routeName" | "name" => {
                Some((Str, false))
            }
            _ if path.starts_with("tags.") => Some((Str, true)),
            _ => None,
        },
        Scope::Server => match path {
            "label" | "address" | "uuid" | "version" => Some((Str, false)),
            "port" | "portX" => Some((Num, false)),
            "memberRole" => Some((Role(Some(RoleKind::Member)), true)),
            "clusterRole" => Some((Role(Some(RoleKind::Cluster)), true)),
            "clusterName" | "clusterSetName" => Some((Str, true)),
            "clusterIsInvalidated" => Some((Bool, false)),
            _ if path.starts_with("tags.") => Some((Str, true)),
            _ => None,
        },
        Scope::Session => match path {
            "user" | "schema" => Some((Str, false)),
            "targetPort" | "id" | "randomValue" => Some((Num, false)),
            "targetIp" | "sourceIp" => Some((Str, true)),
            _ if path.starts_with("connectAttrs.") => Some((Str, true)),
            _ => None,
        },
        Scope::Sql => match path {
            "defaultSchema" => Some((Str, false)),
            "isRead" | "isUpdate" | "isDdl" => Some((Bool, false)),
            _ if path.starts_with("queryTags.") || path.starts_with("queryHints.") => {
                Some((Str, true))
            }
            _ => None,
        },
    }
}

/// Whether a known reference may legitimately resolve to `NULL` (see
/// [`classify`]).
pub fn lookup(scope: Scope, path: &str) -> Option<bool> {
    classify(scope, path).map(|(_, missing_ok)| missing_ok)
}

/// The four optional context pointers an expression may reference (§4.A
/// scopes). A route match expression runs with `server = None`; a
/// destination-class match runs with `session = None` and `sql = None`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvalContext<'a> {
    pub router: Option<&'a RouterInfo>,
    pub server: Option<&'a ServerInfo>,
    pub session: Option<&'a SessionInfo>,
    pub sql: Option<&'a SqlInfo>,
}

impl<'a> EvalContext<'a> {
    pub fn resolve(&self, reference: &Reference) -> Result<Value, EvalError> {
        let path = reference.path.as_str();
        match reference.scope {
            Scope::Router => {
                let r = self
                    .router
                    .ok_or_else(|| missing_scope(reference))?;
                Ok(match path {
                    "portRo" => opt_num(r.port_ro),
                    "portRw" => opt_num(r.port_rw),
                    "portRwSplit" => opt_num(r.port_rw_split),
                    "localCluster" => Value::Str(r.local_cluster.to_string()),
                    "hostname" => Value::Str(r.hostname.to_string()),
                    "bindAddress" => Value::Str(r.bind_address.to_string()),
                    "routeName" => Value::Str(r.route_name.to_string()),
                    "name" => Value::Str(r.name.to_string()),
                    _ if path.starts_with("tags.") => tag_lookup(&r.tags, &path[5..]),
                    _ => return Err(missing_scope(reference)),
                })
            }
            Scope::Server => {
                let s = self
                    .server
                    .ok_or_else(|| missing_scope(reference))?;
                Ok(match path {
                    "label" => Value::Str(s.label.to_string()),
                    "address" => Value::Str(s.address.to_string()),
                    "port" => Value::Num(s.port as f64),
                    "portX" => Value::Num(s.port_x as f64),
                    "uuid" => Value::Str(s.uuid.to_string()),
                    "version" => Value::Str(s.version.to_string()),
                    "memberRole" => match s.member_role {
                        Some(role) => Value::Role(Role {
                            name: role.as_str().to_string(),
                            kind: RoleKind::Member,
                        }),
                        None => Value::Null,
                    },
                    "clusterRole" => match s.cluster_role {
                        Some(role) => Value::Role(Role {
                            name: role.as_str().to_string(),
                            kind: RoleKind::Cluster,
                        }),
                        None => Value::Null,
                    },
                    "clusterName" => non_empty_str(&s.cluster_name),
                    "clusterSetName" => non_empty_str(&s.cluster_set_name),
                    "clusterIsInvalidated" => Value::Bool(s.cluster_is_invalidated),
                    _ if path.starts_with("tags.") => tag_lookup(&s.tags, &path[5..]),
                    _ => return Err(missing_scope(reference)),
                })
            }
            Scope::Session => {
                let sess = self
                    .session
                    .ok_or_else(|| missing_scope(reference))?;
                Ok(match path {
                    "targetIp" => match sess.target_ip {
                        Some(ip) => Value::Str(ip.to_string()),
                        None => Value::Null,
                    },
                    "targetPort" => Value::Num(sess.target_port as f64),
                    "sourceIp" => match sess.source_ip {
                        Some(ip) => Value::Str(ip.to_string()),
                        None => Value::Null,
                    },
                    "user" => Value::Str(sess.user.to_string()),
                    "schema" => Value::Str(sess.schema.to_string()),
                    "id" => Value::Num(sess.id as f64),
                    "randomValue" => Value::Num(sess.random_value),
                    _ if path.starts_with("connectAttrs.") => {
                        tag_lookup(&sess.connect_attrs, &path[13..])
                    }
                    _ => return Err(missing_scope(reference)),
                })
            }
            Scope::Sql => {
                let sql = self.sql.ok_or_else(|| missing_scope(reference))?;
                Ok(match path {
                    "defaultSchema" => Value::Str(sql.default_schema.to_string()),
                    "isRead" => Value::Bool(sql.is_read),
                    "isUpdate" => Value::Bool(sql.is_update),
                    "isDdl" => Value::Bool(sql.is_ddl),
                    _ if path.starts_with("queryTags.") => tag_lookup(&sql.query_tags, &path[10..]),
                    _ if path.starts_with("queryHints.") => {
                        tag_lookup(&sql.query_hints, &path[11..])
                    }
                    _ => return Err(missing_scope(reference)),
                })
            }
        }
    }
}

fn missing_scope(reference: &Reference) -> EvalError {
    EvalError::Raised(format!("{} is not available in this context", reference.full_name()))
}

fn opt_num(v: Option<u16>) -> Value {
    match v {
        Some(n) => Value::Num(n as f64),
        None => Value::Null,
    }
}

fn non_empty_str(s: &faststr::FastStr) -> Value {
    if s.is_empty() {
        Value::Null
    } else {
        Value::Str(s.to_string())
    }
}

fn tag_lookup(map: &std::collections::HashMap<String, String>, key: &str) -> Value {
    match map.get(key) {
        Some(v) => Value::Str(v.clone()),
        None => Value::Null,
    }
}
