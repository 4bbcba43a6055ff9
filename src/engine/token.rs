/// The scope a `$.<scope>.<path>` reference lives in (§4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Router,
    Server,
    Session,
    Sql,
}

impl Scope {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Server => "server",
            Self::Session => "session",
            Self::Sql => "sql",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "router" => Some(Self::Router),
            "server" => Some(Self::Server),
            "session" => Some(Self::Session),
            "sql" => Some(Self::Sql),
            _ => None,
        }
    }
}

/// The kind of role membership set a [`Value::Role`] belongs to (§4.A:
/// "comparing a member-role variable to a cluster-role literal is a compile
/// error").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Member,
    Cluster,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub name: String,
    pub kind: RoleKind,
}

/// A runtime value, tagged per §4.A ("Primitive" and "Semantic" value
/// kinds). `List` never appears as a runtime value on the stack outside of
/// `IN`/`CONCAT` reduction bookkeeping, handled directly by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
    Role(Role),
    Null,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Num(_) => "NUM",
            Value::Str(_) => "STR",
            Value::Bool(_) => "BOOL",
            Value::Role(_) => "ROLE",
            Value::Null => "NULL",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// The compile-time type of an expression node, tracked alongside each
/// parsed subtree so the parser can reject mixed-type comparisons and
/// resolve ambiguous role-literal kinds (§4.A compile-time obligations).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticType {
    Num,
    Str,
    Bool,
    /// `None` for a bare role-name literal whose kind (member vs cluster)
    /// is not yet known; resolved against the other side of a comparison.
    Role(Option<RoleKind>),
    Null,
}

impl StaticType {
    pub fn name(&self) -> &'static str {
        match self {
            StaticType::Num => "NUM",
            StaticType::Str => "STR",
            StaticType::Bool => "BOOL",
            StaticType::Role(_) => "ROLE",
            StaticType::Null => "NULL",
        }
    }
}

/// A dotted reference into one of the four scopes: a fixed struct field
/// (`member_role`, `user`, …) or a dynamic tag-map lookup (`tags.<key>`,
/// `connectAttrs.<key>`, `queryTags.<key>`, `queryHints.<key>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub scope: Scope,
    pub path: String,
}

impl Reference {
    pub fn new(scope: Scope, path: impl Into<String>) -> Self {
        Self {
            scope,
            path: path.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("$.{}.{}", self.scope.name(), self.path)
    }
}

/// One function supported by calls in a guideline expression (§4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sqrt,
    Number,
    IsIpv4,
    IsIpv6,
    RegexpLike,
    SubstringIndex,
    StartsWith,
    EndsWith,
    Contains,
}

impl Func {
    pub fn name(&self) -> &'static str {
        match self {
            Func::Sqrt => "SQRT",
            Func::Number => "NUMBER",
            Func::IsIpv4 => "IS_IPV4",
            Func::IsIpv6 => "IS_IPV6",
            Func::RegexpLike => "REGEXP_LIKE",
            Func::SubstringIndex => "SUBSTRING_INDEX",
            Func::StartsWith => "STARTSWITH",
            Func::EndsWith => "ENDSWITH",
            Func::Contains => "CONTAINS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "SQRT" => Func::Sqrt,
            "NUMBER" => Func::Number,
            "IS_IPV4" => Func::IsIpv4,
            "IS_IPV6" => Func::IsIpv6,
            "REGEXP_LIKE" => Func::RegexpLike,
            "SUBSTRING_INDEX" => Func::SubstringIndex,
            "STARTSWITH" => Func::StartsWith,
            "ENDSWITH" => Func::EndsWith,
            "CONTAINS" => Func::Contains,
            _ => return None,
        })
    }

    pub fn arity(&self) -> usize {
        match self {
            Func::Sqrt | Func::Number | Func::IsIpv4 | Func::IsIpv6 => 1,
            Func::RegexpLike | Func::StartsWith | Func::EndsWith | Func::Contains => 2,
            Func::SubstringIndex => 3,
        }
    }
}

/// One instruction of a compiled RPN program. Carries an optional source
/// span used to decorate evaluation errors with the offending substring
/// (§4.A: "Every RPN token optionally carries a source-span").
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub op: Op,
    pub span: Option<(usize, usize)>,
}

impl Instr {
    pub fn new(op: Op) -> Self {
        Self { op, span: None }
    }

    pub fn with_span(op: Op, span: (usize, usize)) -> Self {
        Self {
            op,
            span: Some(span),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Push(Value),
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    /// `IN` with the needle plus the given number of candidates already on
    /// the stack (needle pushed first, then each candidate).
    In(usize),
    Not,
    And,
    /// Short-circuit skip: if the top-of-stack is `false`, jump forward by
    /// the given instruction count instead of evaluating the right side
    /// (mirrors `MID_AND` in the reference engine).
    MidAnd(usize),
    Or,
    /// Short-circuit skip for `OR` (mirrors `MID_OR`).
    MidOr(usize),
    /// `true` if the reference is a "missing variable" recorded at compile
    /// time (i.e. references an optional field that may not be set, such
    /// as `$.server.cluster_name` for a standalone server). Used to decide
    /// whether a `NULL` comparison should raise or silently return `false`.
    Ref { reference: Reference, missing_ok: bool },
    Func(Func),
    ResolveV4(String),
    ResolveV6(String),
    Concat(usize),
    /// References a pattern previously interned into the regex store.
    Regexp(usize),
    Network(i32),
}
