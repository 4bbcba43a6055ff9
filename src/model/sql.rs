use std::collections::HashMap;

use faststr::FastStr;

/// Per-statement classification facts, populated only when the router is
/// configured to inspect individual statements (§3, `$.sql.*` scope).
#[derive(Debug, Clone, Default)]
pub struct SqlInfo {
    pub default_schema: FastStr,
    pub is_read: bool,
    pub is_update: bool,
    pub is_ddl: bool,
    pub query_tags: HashMap<String, String>,
    pub query_hints: HashMap<String, String>,
}
