use super::context;
use super::error::CompileError;
use super::lexer::{lex, Spanned, Tok};
use super::like::{lower_like, LikeLowering};
use super::regex_store::RegexStore;
use super::token::{Func, Instr, Op, RoleKind, Scope, StaticType, Value};

const MEMBER_ROLE_NAMES: &[&str] = &["PRIMARY", "SECONDARY", "READ_REPLICA", "UNDEFINED"];
const CLUSTER_ROLE_NAMES: &[&str] = &["PRIMARY", "REPLICA", "UNDEFINED"];

fn is_role_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    MEMBER_ROLE_NAMES.contains(&upper.as_str()) || CLUSTER_ROLE_NAMES.contains(&upper.as_str())
}

/// Which scopes an expression is allowed to reference (§4.A: "`$.server.*`
/// is rejected in route match; `$.session.*` is rejected in destination
/// match").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    RouteMatch,
    DestinationMatch,
}

impl CompileMode {
    fn allows(&self, scope: Scope) -> bool {
        match (self, scope) {
            (CompileMode::RouteMatch, Scope::Server) => false,
            (CompileMode::DestinationMatch, Scope::Session) => false,
            (CompileMode::DestinationMatch, Scope::Sql) => false,
            _ => true,
        }
    }
}

/// The output of compiling one guideline expression: RPN program plus the
/// hostnames that `RESOLVE_V4`/`RESOLVE_V6` calls reference (§4.B
/// "`hostnames_to_resolve()`").
#[derive(Debug, Clone, Default)]
pub struct CompiledExpr {
    pub program: Vec<Instr>,
    pub hostnames_to_resolve: Vec<String>,
}

struct Parser<'a> {
    toks: Vec<Spanned>,
    pos: usize,
    mode: CompileMode,
    regex_store: &'a mut RegexStore,
    hostnames: Vec<String>,
    src: &'a str,
}

pub fn compile(src: &str, mode: CompileMode, regex_store: &mut RegexStore) -> Result<CompiledExpr, CompileError> {
    let toks = lex(src)?;
    let mut parser = Parser {
        toks,
        pos: 0,
        mode,
        regex_store,
        hostnames: Vec::new(),
        src,
    };
    let (program, _ty) = parser.parse_or()?;
    parser.expect_eof()?;
    Ok(CompiledExpr {
        program,
        hostnames_to_resolve: parser.hostnames,
    })
}

type Parsed = (Vec<Instr>, StaticType);

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].tok
    }

    fn span(&self) -> (usize, usize) {
        (self.toks[self.pos].start, self.toks[self.pos].end)
    }

    fn advance(&mut self) -> Spanned {
        let t = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_eof(&self) -> Result<(), CompileError> {
        if matches!(self.peek(), Tok::Eof) {
            Ok(())
        } else {
            Err(CompileError::UnexpectedToken {
                found: format!("{:?}", self.peek()),
                expected: "end of expression",
            })
        }
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s.eq_ignore_ascii_case(word))
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.is_ident(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Parsed, CompileError> {
        let (mut prog, mut ty) = self.parse_and()?;
        while self.eat_ident("OR") {
            check_bool(&ty, "OR")?;
            let (rhs, rhs_ty) = self.parse_and()?;
            check_bool(&rhs_ty, "OR")?;
            // MID_OR sits right after the LHS; it skips the RHS program
            // plus the trailing Or instruction when the LHS is already true.
            let skip = rhs.len() + 1;
            prog.push(Instr::new(Op::MidOr(skip)));
            prog.extend(rhs);
            prog.push(Instr::new(Op::Or));
            ty = StaticType::Bool;
        }
        Ok((prog, ty))
    }

    fn parse_and(&mut self) -> Result<Parsed, CompileError> {
        let (mut prog, mut ty) = self.parse_not()?;
        while self.eat_ident("AND") {
            check_bool(&ty, "AND")?;
            let (rhs, rhs_ty) = self.parse_not()?;
            check_bool(&rhs_ty, "AND")?;
            let skip = rhs.len() + 1;
            prog.push(Instr::new(Op::MidAnd(skip)));
            prog.extend(rhs);
            prog.push(Instr::new(Op::And));
            ty = StaticType::Bool;
        }
        Ok((prog, ty))
    }

    fn parse_not(&mut self) -> Result<Parsed, CompileError> {
        if self.eat_ident("NOT") {
            let (mut prog, ty) = self.parse_not()?;
            check_bool(&ty, "NOT")?;
            prog.push(Instr::new(Op::Not));
            return Ok((prog, StaticType::Bool));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Parsed, CompileError> {
        let (lhs, lhs_ty) = self.parse_additive()?;

        if self.is_ident("LIKE") {
            self.advance();
            return self.parse_like(lhs, lhs_ty);
        }

        let negate_in = if self.is_ident("NOT") && self.peek_is_in_after_not() {
            self.advance();
            true
        } else {
            false
        };
        if self.eat_ident("IN") {
            return self.parse_in(lhs, lhs_ty, negate_in);
        }
        if negate_in {
            return Err(CompileError::UnexpectedToken {
                found: "NOT".into(),
                expected: "IN",
            });
        }

        let op = match self.peek() {
            Tok::Eq => Some(Op::Eq),
            Tok::Ne => Some(Op::Ne),
            Tok::Lt => Some(Op::Lt),
            Tok::Le => Some(Op::Le),
            Tok::Gt => Some(Op::Gt),
            Tok::Ge => Some(Op::Ge),
            _ => None,
        };
        let Some(op) = op else {
            return Ok((lhs, lhs_ty));
        };
        let is_equality = matches!(op, Op::Eq | Op::Ne);
        self.advance();
        let (rhs, rhs_ty) = self.parse_additive()?;

        let (lhs_ty, rhs_ty) = resolve_role_kinds(lhs_ty, rhs_ty)?;
        if !is_equality {
            if matches!(lhs_ty, StaticType::Bool | StaticType::Role(_))
                || matches!(rhs_ty, StaticType::Bool | StaticType::Role(_))
            {
                return Err(CompileError::ComparisonNotAllowed(lhs_ty.name()));
            }
        }
        check_comparable(&lhs_ty, &rhs_ty)?;

        let mut prog = lhs;
        prog.extend(rhs);
        prog.push(Instr::new(op));
        Ok((prog, StaticType::Bool))
    }

    fn peek_is_in_after_not(&self) -> bool {
        matches!(&self.toks.get(self.pos + 1).map(|s| &s.tok), Some(Tok::Ident(s)) if s.eq_ignore_ascii_case("IN"))
    }

    fn parse_like(&mut self, lhs: Vec<Instr>, lhs_ty: StaticType) -> Result<Parsed, CompileError> {
        if !matches!(lhs_ty, StaticType::Str | StaticType::Null) {
            return Err(CompileError::ComparisonNotAllowed(lhs_ty.name()));
        }
        let span = self.span();
        let pattern = match self.peek().clone() {
            Tok::Str(s) => {
                self.advance();
                s
            }
            _ => return Err(CompileError::LikeRhsNotLiteral),
        };
        let mut prog = match lower_like(&pattern) {
            LikeLowering::AlwaysTrue => vec![Instr::new(Op::Push(Value::Bool(true)))],
            LikeLowering::StartsWith(s) => {
                let mut p = lhs;
                p.push(Instr::new(Op::Push(Value::Str(s))));
                p.push(Instr::with_span(Op::Func(Func::StartsWith), span));
                p
            }
            LikeLowering::Contains(s) => {
                let mut p = lhs;
                p.push(Instr::new(Op::Push(Value::Str(s))));
                p.push(Instr::with_span(Op::Func(Func::Contains), span));
                p
            }
            LikeLowering::EndsWith(s) => {
                let mut p = lhs;
                p.push(Instr::new(Op::Push(Value::Str(s))));
                p.push(Instr::with_span(Op::Func(Func::EndsWith), span));
                p
            }
            LikeLowering::Regex(pattern) => {
                let idx = self
                    .regex_store
                    .intern(&pattern)
                    .map_err(|_| CompileError::InvalidRegex(pattern.clone()))?;
                let mut p = lhs;
                p.push(Instr::with_span(Op::Regexp(idx), span));
                p
            }
        };
        prog.shrink_to_fit();
        Ok((prog, StaticType::Bool))
    }

    fn parse_in(
        &mut self,
        lhs: Vec<Instr>,
        lhs_ty: StaticType,
        negate: bool,
    ) -> Result<Parsed, CompileError> {
        self.expect(Tok::LParen)?;
        let mut candidates = Vec::new();
        loop {
            let (expr, ty) = self.parse_additive()?;
            check_comparable(&lhs_ty, &ty)?;
            candidates.push(expr);
            if matches!(self.peek(), Tok::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(Tok::RParen)?;
        let n = candidates.len();
        let mut prog = lhs;
        for c in candidates {
            prog.extend(c);
        }
        prog.push(Instr::new(Op::In(n)));
        if negate {
            prog.push(Instr::new(Op::Not));
        }
        Ok((prog, StaticType::Bool))
    }

    fn parse_additive(&mut self) -> Result<Parsed, CompileError> {
        let (mut prog, mut ty) = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => Op::Add,
                Tok::Minus => Op::Sub,
                _ => break,
            };
            self.advance();
            let (rhs, rhs_ty) = self.parse_term()?;
            check_numeric(&ty)?;
            check_numeric(&rhs_ty)?;
            prog.extend(rhs);
            prog.push(Instr::new(op));
            ty = StaticType::Num;
        }
        Ok((prog, ty))
    }

    fn parse_term(&mut self) -> Result<Parsed, CompileError> {
        let (mut prog, mut ty) = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => Op::Mul,
                Tok::Slash => Op::Div,
                Tok::Percent => Op::Mod,
                _ => break,
            };
            self.advance();
            let (rhs, rhs_ty) = self.parse_unary()?;
            check_numeric(&ty)?;
            check_numeric(&rhs_ty)?;
            prog.extend(rhs);
            prog.push(Instr::new(op));
            ty = StaticType::Num;
        }
        Ok((prog, ty))
    }

    fn parse_unary(&mut self) -> Result<Parsed, CompileError> {
        if matches!(self.peek(), Tok::Minus) {
            self.advance();
            let (mut prog, ty) = self.parse_unary()?;
            check_numeric(&ty)?;
            prog.push(Instr::new(Op::Neg));
            return Ok((prog, StaticType::Num));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Parsed, CompileError> {
        let span = self.span();
        match self.peek().clone() {
            Tok::Num(n) => {
                self.advance();
                Ok((vec![Instr::new(Op::Push(Value::Num(n)))], StaticType::Num))
            }
            Tok::Str(s) => {
                self.advance();
                Ok((vec![Instr::new(Op::Push(Value::Str(s)))], StaticType::Str))
            }
            Tok::Reference(path) => {
                self.advance();
                self.parse_reference(&path, span)
            }
            Tok::LParen => {
                self.advance();
                let (prog, ty) = self.parse_or()?;
                self.expect(Tok::RParen)?;
                Ok((prog, ty))
            }
            Tok::Ident(name) => {
                self.advance();
                self.parse_ident_primary(&name, span)
            }
            other => Err(CompileError::UnexpectedToken {
                found: format!("{other:?}"),
                expected: "an expression",
            }),
        }
    }

    fn parse_reference(&mut self, path: &str, span: (usize, usize)) -> Result<Parsed, CompileError> {
        let (scope_name, rest) = path.split_once('.').unwrap_or((path.as_ref(), ""));
        let scope = Scope::from_name(scope_name)
            .ok_or_else(|| CompileError::UnknownReference(format!("$.{path}")))?;
        if !self.mode.allows(scope) {
            return Err(CompileError::ScopeNotAllowed(format!("$.{path}")));
        }
        let (ty, missing_ok) = context::classify(scope, rest)
            .ok_or_else(|| CompileError::UnknownReference(format!("$.{path}")))?;
        let reference = super::token::Reference::new(scope, rest.to_string());
        Ok((
            vec![Instr::with_span(Op::Ref { reference, missing_ok }, span)],
            ty,
        ))
    }

    fn parse_ident_primary(&mut self, name: &str, span: (usize, usize)) -> Result<Parsed, CompileError> {
        let upper = name.to_ascii_uppercase();
        if upper == "TRUE" {
            return Ok((vec![Instr::new(Op::Push(Value::Bool(true)))], StaticType::Bool));
        }
        if upper == "FALSE" {
            return Ok((vec![Instr::new(Op::Push(Value::Bool(false)))], StaticType::Bool));
        }
        if upper == "NULL" {
            return Ok((vec![Instr::new(Op::Push(Value::Null))], StaticType::Null));
        }

        if matches!(self.peek(), Tok::LParen) {
            return self.parse_call(&upper, span);
        }

        if is_role_name(name) {
            return Ok((
                vec![Instr::new(Op::Push(Value::Role(super::token::Role {
                    name: name.to_string(),
                    kind: RoleKind::Member,
                })))],
                StaticType::Role(None),
            ));
        }

        Err(CompileError::UnknownReference(name.to_string()))
    }

    fn parse_call(&mut self, name: &str, span: (usize, usize)) -> Result<Parsed, CompileError> {
        self.expect(Tok::LParen)?;
        match name {
            "RESOLVE_V4" | "RESOLVE_V6" => {
                let host = match self.peek().clone() {
                    Tok::Str(s) => {
                        self.advance();
                        s
                    }
                    _ => return Err(CompileError::ResolveArgNotLiteral),
                };
                validate_hostname(&host)?;
                self.expect(Tok::RParen)?;
                self.hostnames.push(host.clone());
                let op = if name == "RESOLVE_V4" {
                    Op::ResolveV4(host)
                } else {
                    Op::ResolveV6(host)
                };
                Ok((vec![Instr::with_span(op, span)], StaticType::Str))
            }
            "NETWORK" => {
                let (ip_prog, ip_ty) = self.parse_or()?;
                check_type(&ip_ty, StaticType::Str)?;
                self.expect(Tok::Comma)?;
                let bits = match self.peek().clone() {
                    Tok::Num(n) => {
                        self.advance();
                        n as i32
                    }
                    _ => {
                        return Err(CompileError::UnexpectedToken {
                            found: format!("{:?}", self.peek()),
                            expected: "a literal netmask",
                        })
                    }
                };
                if !(1..=32).contains(&bits) {
                    return Err(CompileError::UnexpectedToken {
                        found: bits.to_string(),
                        expected: "a netmask in [1,32]",
                    });
                }
                self.expect(Tok::RParen)?;
                let mut prog = ip_prog;
                prog.push(Instr::with_span(Op::Network(bits), span));
                Ok((prog, StaticType::Str))
            }
            "CONCAT" => {
                let mut prog = Vec::new();
                let mut n = 0;
                loop {
                    let (arg, _ty) = self.parse_or()?;
                    prog.extend(arg);
                    n += 1;
                    if matches!(self.peek(), Tok::Comma) {
                        self.advance();
                        continue;
                    }
                    break;
                }
                self.expect(Tok::RParen)?;
                prog.push(Instr::with_span(Op::Concat(n), span));
                Ok((prog, StaticType::Str))
            }
            other => {
                let func = Func::from_name(other)
                    .ok_or_else(|| CompileError::UnknownFunction(other.to_string()))?;
                let mut prog = Vec::new();
                let mut n = 0;
                if !matches!(self.peek(), Tok::RParen) {
                    loop {
                        let (arg, _ty) = self.parse_or()?;
                        prog.extend(arg);
                        n += 1;
                        if matches!(self.peek(), Tok::Comma) {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(Tok::RParen)?;
                if n != func.arity() {
                    return Err(CompileError::ArityMismatch {
                        name: func.name(),
                        expected: func.arity(),
                        got: n,
                    });
                }
                let ret_ty = match func {
                    Func::Sqrt | Func::Number => StaticType::Num,
                    Func::SubstringIndex => StaticType::Str,
                    _ => StaticType::Bool,
                };
                prog.push(Instr::with_span(Op::Func(func), span));
                Ok((prog, ret_ty))
            }
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), CompileError> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(CompileError::UnexpectedToken {
                found: format!("{:?}", self.peek()),
                expected: "expected token",
            })
        }
    }
}

fn check_bool(ty: &StaticType, ctx: &str) -> Result<(), CompileError> {
    match ty {
        StaticType::Bool | StaticType::Null => Ok(()),
        other => Err(CompileError::UnexpectedToken {
            found: other.name().to_string(),
            expected: ctx,
        }),
    }
}

fn check_numeric(ty: &StaticType) -> Result<(), CompileError> {
    match ty {
        StaticType::Num | StaticType::Null => Ok(()),
        other => Err(CompileError::NonNumericOperand(other.name())),
    }
}

fn check_type(ty: &StaticType, expected: StaticType) -> Result<(), CompileError> {
    if *ty == expected || matches!(ty, StaticType::Null) {
        Ok(())
    } else {
        Err(CompileError::MixedTypeComparison(ty.name(), expected.name()))
    }
}

fn check_comparable(lhs: &StaticType, rhs: &StaticType) -> Result<(), CompileError> {
    if matches!(lhs, StaticType::Null) || matches!(rhs, StaticType::Null) {
        return Ok(());
    }
    match (lhs, rhs) {
        (StaticType::Role(a), StaticType::Role(b)) => match (a, b) {
            (Some(ka), Some(kb)) if ka != kb => Err(CompileError::RoleKindMismatch),
            _ => Ok(()),
        },
        (a, b) if a == b => Ok(()),
        (a, b) => Err(CompileError::MixedTypeComparison(a.name(), b.name())),
    }
}

/// When comparing a role literal of unresolved kind against a side whose
/// kind is already known, adopt that kind on both sides.
fn resolve_role_kinds(
    lhs: StaticType,
    rhs: StaticType,
) -> Result<(StaticType, StaticType), CompileError> {
    match (lhs, rhs) {
        (StaticType::Role(None), StaticType::Role(Some(k))) => {
            Ok((StaticType::Role(Some(k)), StaticType::Role(Some(k))))
        }
        (StaticType::Role(Some(k)), StaticType::Role(None)) => {
            Ok((StaticType::Role(Some(k)), StaticType::Role(Some(k))))
        }
        (StaticType::Role(None), StaticType::Role(None)) => Ok((
            StaticType::Role(Some(RoleKind::Member)),
            StaticType::Role(Some(RoleKind::Member)),
        )),
        other => Ok(other),
    }
}

/// A conservative hostname grammar: labels of alphanumerics/hyphens
/// separated by dots (§4.A: "the literal must match a strict hostname
/// regex").
fn validate_hostname(host: &str) -> Result<(), CompileError> {
    let valid = !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        });
    if valid {
        Ok(())
    } else {
        Err(CompileError::ResolveArgNotLiteral)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::EvalContext;
    use crate::engine::eval::eval;

    fn compiled(src: &str, mode: CompileMode) -> CompiledExpr {
        let mut store = RegexStore::new();
        compile(src, mode, &mut store).unwrap()
    }

    #[test]
    fn simple_boolean_literal() {
        let c = compiled("TRUE", CompileMode::RouteMatch);
        let store = RegexStore::new();
        let v = eval(&c.program, &store, &EvalContext::default(), None, true).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn like_prefix_lowers_to_startswith() {
        let c = compiled("'abcdef' LIKE 'abc%'", CompileMode::RouteMatch);
        let store = RegexStore::new();
        let v = eval(&c.program, &store, &EvalContext::default(), None, true).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn or_short_circuits_and_skips_division_by_zero() {
        let c = compiled("TRUE OR (1 / 0 = 1)", CompileMode::RouteMatch);
        let v = eval(&c.program, &RegexStore::new(), &EvalContext::default(), None, true).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn server_scope_rejected_in_route_match() {
        let mut store = RegexStore::new();
        let err = compile("$.server.label = 'x'", CompileMode::RouteMatch, &mut store);
        assert!(matches!(err, Err(CompileError::ScopeNotAllowed(_))));
    }

    #[test]
    fn session_scope_rejected_in_destination_match() {
        let mut store = RegexStore::new();
        let err = compile(
            "$.session.user = 'x'",
            CompileMode::DestinationMatch,
            &mut store,
        );
        assert!(matches!(err, Err(CompileError::ScopeNotAllowed(_))));
    }

    #[test]
    fn resolve_v4_requires_string_literal_hostname() {
        let mut store = RegexStore::new();
        let err = compile("RESOLVE_V4($.router.name)", CompileMode::RouteMatch, &mut store);
        assert!(err.is_err());
    }

    #[test]
    fn in_list_membership() {
        let c = compiled("1 IN (1, 2, 3)", CompileMode::RouteMatch);
        let v = eval(&c.program, &RegexStore::new(), &EvalContext::default(), None, true).unwrap();
        assert_eq!(v, Value::Bool(true));
    }
}
