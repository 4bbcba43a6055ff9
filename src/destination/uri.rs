//! Parses the `metadata-cache://` destination URI scheme (§6).

use std::collections::HashMap;

use thiserror::Error;

use super::metadata_manager::RoleFilter;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("not a metadata-cache:// URI")]
    WrongScheme,

    #[error("metadata-cache:// URI is missing the cache name or cluster path")]
    MissingPath,

    #[error("unknown role {0:?}")]
    UnknownRole(String),

    #[error("allow_primary_reads is not supported; use role=PRIMARY_AND_SECONDARY instead")]
    AllowPrimaryReadsRejected,

    #[error("unknown query parameter {0:?}")]
    UnknownParam(String),

    #[error("{0:?} must be \"yes\" or \"no\"")]
    BadBool(String),
}

/// A parsed `metadata-cache://<cache-name>/<cluster>?role=...` URI (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataCacheUri {
    pub cache_name: String,
    pub cluster: String,
    pub role: RoleFilter,
    pub disconnect_on_promoted_to_primary: bool,
    pub disconnect_on_metadata_unavailable: bool,
}

/// Parses the `metadata-cache://` scheme (§6). Unknown query keys and the
/// legacy `allow_primary_reads` key are rejected with a helpful error, same
/// as the reference router.
pub fn parse(uri: &str) -> Result<MetadataCacheUri, UriError> {
    let rest = uri.strip_prefix("metadata-cache://").ok_or(UriError::WrongScheme)?;
    let (authority_and_path, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };
    let mut parts = authority_and_path.splitn(2, '/');
    let cache_name = parts.next().filter(|s| !s.is_empty()).ok_or(UriError::MissingPath)?;
    let cluster = parts.next().filter(|s| !s.is_empty()).ok_or(UriError::MissingPath)?;

    let mut params: HashMap<&str, &str> = HashMap::new();
    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(k, v);
        }
    }

    if params.contains_key("allow_primary_reads") {
        return Err(UriError::AllowPrimaryReadsRejected);
    }

    let role = match params.get("role").copied() {
        Some("PRIMARY") => RoleFilter::Primary,
        Some("SECONDARY") => RoleFilter::Secondary,
        Some("PRIMARY_AND_SECONDARY") | None => RoleFilter::PrimaryAndSecondary,
        Some(other) => return Err(UriError::UnknownRole(other.to_string())),
    };

    let disconnect_on_promoted_to_primary = parse_yes_no(&params, "disconnect_on_promoted_to_primary", false)?;
    let disconnect_on_metadata_unavailable = parse_yes_no(&params, "disconnect_on_metadata_unavailable", false)?;

    for key in params.keys() {
        if !matches!(
            *key,
            "role" | "disconnect_on_promoted_to_primary" | "disconnect_on_metadata_unavailable"
        ) {
            return Err(UriError::UnknownParam((*key).to_string()));
        }
    }

    Ok(MetadataCacheUri {
        cache_name: cache_name.to_string(),
        cluster: cluster.to_string(),
        role,
        disconnect_on_promoted_to_primary,
        disconnect_on_metadata_unavailable,
    })
}

fn parse_yes_no(params: &HashMap<&str, &str>, key: &str, default: bool) -> Result<bool, UriError> {
    match params.get(key).copied() {
        None => Ok(default),
        Some("yes") => Ok(true),
        Some("no") => Ok(false),
        Some(_) => Err(UriError::BadBool(key.to_string())),
    }
}

/// Parses the comma-separated static destination list form: `host[:port]`
/// or `local:/path` entries (§6 "Static destination list"). `local:` is
/// only valid on Unix.
pub fn parse_static_list(list: &str) -> Result<Vec<crate::model::Endpoint>, UriError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_static_entry)
        .collect()
}

fn parse_static_entry(entry: &str) -> Result<crate::model::Endpoint, UriError> {
    if let Some(path) = entry.strip_prefix("local:") {
        #[cfg(target_family = "unix")]
        {
            return Ok(crate::model::Endpoint::local(path));
        }
        #[cfg(not(target_family = "unix"))]
        {
            let _ = path;
            return Err(UriError::UnknownParam("local: sockets are rejected on this platform".into()));
        }
    }
    let (host, port) = match entry.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str
                .parse()
                .map_err(|_| UriError::BadBool(format!("invalid port in {entry:?}")))?;
            (host, port)
        }
        None => (entry, 3306),
    };
    if host.is_empty() {
        return Err(UriError::MissingPath);
    }
    Ok(crate::model::Endpoint::tcp(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_uri() {
        let u = parse("metadata-cache://default/mycluster").unwrap();
        assert_eq!(u.cache_name, "default");
        assert_eq!(u.cluster, "mycluster");
        assert_eq!(u.role, RoleFilter::PrimaryAndSecondary);
        assert!(!u.disconnect_on_promoted_to_primary);
    }

    #[test]
    fn parses_role_and_flags() {
        let u = parse(
            "metadata-cache://default/mycluster?role=SECONDARY&disconnect_on_promoted_to_primary=yes",
        )
        .unwrap();
        assert_eq!(u.role, RoleFilter::Secondary);
        assert!(u.disconnect_on_promoted_to_primary);
    }

    #[test]
    fn rejects_allow_primary_reads() {
        let err = parse("metadata-cache://default/mycluster?allow_primary_reads=yes").unwrap_err();
        assert_eq!(err, UriError::AllowPrimaryReadsRejected);
    }

    #[test]
    fn rejects_unknown_param() {
        assert!(parse("metadata-cache://default/mycluster?bogus=1").is_err());
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert_eq!(parse("static://a,b").unwrap_err(), UriError::WrongScheme);
    }

    #[test]
    fn parses_static_list_with_default_port() {
        let endpoints = parse_static_list("db1,db2:3307").unwrap();
        assert_eq!(endpoints, vec![
            crate::model::Endpoint::tcp("db1", 3306),
            crate::model::Endpoint::tcp("db2", 3307),
        ]);
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn parses_local_socket_entry() {
        let endpoints = parse_static_list("local:/tmp/mysql.sock").unwrap();
        assert_eq!(endpoints, vec![crate::model::Endpoint::local("/tmp/mysql.sock")]);
    }
}
