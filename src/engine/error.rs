use thiserror::Error;

/// A compile-time failure of the expression engine (§4.A).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("unexpected character '{0}' at {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unexpected token {found:?}, expected {expected}")]
    UnexpectedToken { found: String, expected: &'static str },

    #[error("unknown reference '{0}'")]
    UnknownReference(String),

    #[error("'{0}' is not allowed in this context")]
    ScopeNotAllowed(String),

    #[error("LIKE right-hand side must be a string literal")]
    LikeRhsNotLiteral,

    #[error("RESOLVE_V4/RESOLVE_V6 argument must be a string literal matching a valid hostname")]
    ResolveArgNotLiteral,

    #[error("mixed-type comparison between {0} and {1}")]
    MixedTypeComparison(&'static str, &'static str),

    #[error("comparison operator not allowed for type {0}")]
    ComparisonNotAllowed(&'static str),

    #[error("comparing a member-role reference against a cluster-role literal (or vice versa)")]
    RoleKindMismatch,

    #[error("arithmetic operand must be numeric, found {0}")]
    NonNumericOperand(&'static str),

    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    ArityMismatch {
        name: &'static str,
        expected: usize,
        got: usize,
    },
}

/// A failure raised while evaluating an already-compiled expression (§4.A).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("{0}")]
    Raised(String),

    #[error("no cache entry for host {0}")]
    NoResolveCacheEntry(String),

    #[error("NETWORK function invalid netmask value: {0}")]
    InvalidNetmask(i32),
}

impl EvalError {
    pub fn with_span(self, code: &str, start: usize, end: usize) -> EvalError {
        let excerpt = code.get(start..end).unwrap_or_default();
        EvalError::Raised(format!("{self} (in '{excerpt}')"))
    }
}
