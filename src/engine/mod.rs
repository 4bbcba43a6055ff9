//! The typed expression language embedded in routing guideline documents
//! (§4.A): lexing, parsing to an RPN program, and evaluating that program
//! against a session/server/router/sql context.

pub mod context;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod like;
pub mod parser;
pub mod regex_store;
pub mod resolve_cache;
pub mod token;

pub use context::EvalContext;
pub use error::{CompileError, EvalError};
pub use eval::eval as eval_expr;
pub use parser::{compile, CompileMode, CompiledExpr};
pub use regex_store::RegexStore;
pub use resolve_cache::ResolveCache;
pub use token::{Func, Instr, Op, Reference, Role, RoleKind, Scope, StaticType, Value};
