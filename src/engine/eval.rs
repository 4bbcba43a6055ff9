use std::cmp::Ordering;

use ipnet::Ipv4Net;

use super::context::EvalContext;
use super::error::EvalError;
use super::regex_store::RegexStore;
use super::resolve_cache::ResolveCache;
use super::token::{Func, Instr, Op, Role, RoleKind, Value};

/// Evaluates a compiled RPN program against a context (§4.A "Evaluation
/// semantics"). `cache` is only consulted by `RESOLVE_V4`/`RESOLVE_V6`;
/// `dry_run` substitutes the literal hostname instead of requiring a cache
/// hit, matching the reference engine's test mode.
pub fn eval(
    program: &[Instr],
    regex_store: &RegexStore,
    ctx: &EvalContext<'_>,
    cache: Option<&ResolveCache>,
    dry_run: bool,
) -> Result<Value, EvalError> {
    let mut stack: Vec<Value> = Vec::with_capacity(program.len());
    let mut i = 0usize;
    while i < program.len() {
        let instr = &program[i];
        let result = step(instr, &mut stack, regex_store, ctx, cache, dry_run, &mut i);
        if let Err(e) = result {
            return Err(match instr.span {
                Some((start, end)) => EvalError::Raised(format!("{e} [{start}:{end}]")),
                None => e,
            });
        }
        i += 1;
    }
    Ok(stack.pop().unwrap_or(Value::Null))
}

fn step(
    instr: &Instr,
    stack: &mut Vec<Value>,
    regex_store: &RegexStore,
    ctx: &EvalContext<'_>,
    cache: Option<&ResolveCache>,
    dry_run: bool,
    i: &mut usize,
) -> Result<(), EvalError> {
    match &instr.op {
        Op::Push(v) => stack.push(v.clone()),
        Op::Neg => {
            let top = stack.last_mut().expect("stack underflow");
            if !top.is_null() {
                match top {
                    Value::Num(n) => *n = -*n,
                    other => {
                        return Err(EvalError::Raised(format!(
                            "only numbers can be negated, found {}",
                            other.type_name()
                        )))
                    }
                }
            }
        }
        Op::Add => math_op(stack, |a, b| a + b)?,
        Op::Sub => math_op(stack, |a, b| a - b)?,
        Op::Mul => math_op(stack, |a, b| a * b)?,
        Op::Div => math_op(stack, |a, b| a / b)?,
        Op::Mod => modulo_op(stack)?,
        Op::Lt => comparison(stack, |o| o == Ordering::Less)?,
        Op::Gt => comparison(stack, |o| o == Ordering::Greater)?,
        Op::Le => comparison(stack, |o| o != Ordering::Greater)?,
        Op::Ge => comparison(stack, |o| o != Ordering::Less)?,
        Op::Eq => equality(stack, false)?,
        Op::Ne => equality(stack, true)?,
        Op::In(n) => in_op(stack, *n)?,
        Op::Not => {
            let top = stack.pop().expect("stack underflow");
            stack.push(Value::Bool(!truthy(&top)?));
        }
        Op::And => {
            let rhs = stack.pop().expect("stack underflow");
            let lhs = stack.pop().expect("stack underflow");
            stack.push(Value::Bool(truthy(&lhs)? && truthy(&rhs)?));
        }
        Op::MidAnd(skip) => {
            let top = stack.last().expect("stack underflow");
            if !truthy(top)? {
                *i += *skip;
            }
        }
        Op::Or => {
            let rhs = stack.pop().expect("stack underflow");
            let lhs = stack.pop().expect("stack underflow");
            stack.push(Value::Bool(truthy(&lhs)? || truthy(&rhs)?));
        }
        Op::MidOr(skip) => {
            let top = stack.last().expect("stack underflow");
            if truthy(top)? {
                *i += *skip;
            }
        }
        Op::Ref { reference, .. } => {
            stack.push(ctx.resolve(reference)?);
        }
        Op::Func(f) => call_func(*f, stack)?,
        Op::ResolveV4(host) => stack.push(resolve(host, cache, dry_run, true)?),
        Op::ResolveV6(host) => stack.push(resolve(host, cache, dry_run, false)?),
        Op::Concat(n) => concat(stack, *n)?,
        Op::Regexp(idx) => {
            let top = stack.last_mut().expect("stack underflow");
            if !top.is_null() {
                let s = top
                    .as_str()
                    .ok_or_else(|| EvalError::Raised("REGEXP operand must be a string".into()))?;
                let matched = regex_store.get(*idx).is_match(s);
                *top = Value::Bool(matched);
            }
        }
        Op::Network(bits) => network(stack, *bits, dry_run)?,
    }
    Ok(())
}

fn math_op(stack: &mut Vec<Value>, f: impl Fn(f64, f64) -> f64) -> Result<(), EvalError> {
    let rhs = stack.pop().expect("stack underflow");
    let lhs = stack.pop().expect("stack underflow");
    let result = match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (Value::Num(a), Value::Num(b)) => Value::Num(f(a, b)),
        (a, _) => {
            return Err(EvalError::Raised(format!(
                "arithmetic operand must be numeric, found {}",
                a.type_name()
            )))
        }
    };
    stack.push(result);
    Ok(())
}

fn modulo_op(stack: &mut Vec<Value>) -> Result<(), EvalError> {
    let rhs = stack.pop().expect("stack underflow");
    let lhs = stack.pop().expect("stack underflow");
    let result = match (lhs, rhs) {
        (Value::Null, _) => Value::Null,
        (lhs, Value::Null) => {
            lhs.as_num()
                .ok_or_else(|| EvalError::Raised("left operand of modulo needs to be a number".into()))?;
            Value::Null
        }
        (Value::Num(a), Value::Num(b)) => Value::Num(a % b),
        (a, _) => {
            return Err(EvalError::Raised(format!(
                "left operand of modulo needs to be a number, found {}",
                a.type_name()
            )))
        }
    };
    stack.push(result);
    Ok(())
}

fn truthy(v: &Value) -> Result<bool, EvalError> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(EvalError::Raised(format!(
            "expected boolean, found {}",
            other.type_name()
        ))),
    }
}

fn ordering(lhs: &Value, rhs: &Value) -> Result<Option<Ordering>, EvalError> {
    match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => Ok(a.partial_cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (a, b) => Err(EvalError::Raised(format!(
            "cannot order {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn comparison(stack: &mut Vec<Value>, accept: impl Fn(Ordering) -> bool) -> Result<(), EvalError> {
    let rhs = stack.pop().expect("stack underflow");
    let lhs = stack.pop().expect("stack underflow");
    let result = if lhs.is_null() || rhs.is_null() {
        false
    } else {
        match ordering(&lhs, &rhs)? {
            Some(o) => accept(o),
            None => false,
        }
    };
    stack.push(Value::Bool(result));
    Ok(())
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a.eq_ignore_ascii_case(b),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::Role(a), Value::Role(b)) => role_eq(a, b),
        _ => false,
    }
}

fn role_eq(a: &Role, b: &Role) -> bool {
    if a.kind != b.kind {
        return false;
    }
    if a.name.eq_ignore_ascii_case("UNDEFINED") || b.name.eq_ignore_ascii_case("UNDEFINED") {
        return false;
    }
    a.name.eq_ignore_ascii_case(&b.name)
}

fn equality(stack: &mut Vec<Value>, negate: bool) -> Result<(), EvalError> {
    let rhs = stack.pop().expect("stack underflow");
    let lhs = stack.pop().expect("stack underflow");
    let eq = if lhs.is_null() || rhs.is_null() {
        lhs.is_null() && rhs.is_null()
    } else {
        values_equal(&lhs, &rhs)
    };
    stack.push(Value::Bool(if negate { !eq } else { eq }));
    Ok(())
}

fn in_op(stack: &mut Vec<Value>, n: usize) -> Result<(), EvalError> {
    let candidates = stack.split_off(stack.len() - n);
    let needle = stack.pop().expect("stack underflow");
    let found = candidates.iter().any(|c| {
        !needle.is_null() && !c.is_null() && values_equal(&needle, c)
    });
    stack.push(Value::Bool(found));
    Ok(())
}

fn call_func(f: Func, stack: &mut Vec<Value>) -> Result<(), EvalError> {
    let arity = f.arity();
    let args: Vec<Value> = stack.split_off(stack.len() - arity);
    let result = match f {
        Func::Sqrt => numeric1(&args, f64::sqrt)?,
        Func::Number => match &args[0] {
            Value::Null => Value::Null,
            Value::Num(n) => Value::Num(*n),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Num)
                .unwrap_or(Value::Null),
            other => {
                return Err(EvalError::Raised(format!(
                    "NUMBER() cannot convert {}",
                    other.type_name()
                )))
            }
        },
        Func::IsIpv4 => bool_from_str(&args, |s| s.parse::<std::net::Ipv4Addr>().is_ok())?,
        Func::IsIpv6 => bool_from_str(&args, |s| is_ipv6_with_scope(s))?,
        Func::RegexpLike => {
            let s = str_arg(&args, 0)?;
            let pattern = str_arg(&args, 1)?;
            let re = regex::RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| EvalError::Raised(format!("invalid REGEXP_LIKE pattern: {e}")))?;
            Value::Bool(re.is_match(s))
        }
        Func::SubstringIndex => {
            let s = str_arg(&args, 0)?;
            let delim = str_arg(&args, 1)?;
            let count = args[2]
                .as_num()
                .ok_or_else(|| EvalError::Raised("SUBSTRING_INDEX count must be numeric".into()))?
                as i64;
            Value::Str(substring_index(s, delim, count))
        }
        Func::StartsWith => {
            let s = str_arg(&args, 0)?;
            let prefix = str_arg(&args, 1)?;
            Value::Bool(s.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase()))
        }
        Func::EndsWith => {
            let s = str_arg(&args, 0)?;
            let suffix = str_arg(&args, 1)?;
            Value::Bool(s.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()))
        }
        Func::Contains => {
            let s = str_arg(&args, 0)?;
            let needle = str_arg(&args, 1)?;
            Value::Bool(s.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()))
        }
    };
    stack.push(result);
    Ok(())
}

fn numeric1(args: &[Value], f: impl Fn(f64) -> f64) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Num(n) => Ok(Value::Num(f(*n))),
        other => Err(EvalError::Raised(format!(
            "expected a number, found {}",
            other.type_name()
        ))),
    }
}

/// `std::net::Ipv6Addr`'s `FromStr` doesn't accept the zone-id suffix
/// (`fe80::1%eth0`); strip it before parsing so scoped link-local
/// addresses still classify as IPv6 (§8 boundary behavior).
fn is_ipv6_with_scope(s: &str) -> bool {
    let addr = s.split('%').next().unwrap_or(s);
    addr.parse::<std::net::Ipv6Addr>().is_ok()
}

fn bool_from_str(args: &[Value], f: impl Fn(&str) -> bool) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Bool(f(s))),
        other => Err(EvalError::Raised(format!(
            "expected a string, found {}",
            other.type_name()
        ))),
    }
}

fn str_arg<'a>(args: &'a [Value], idx: usize) -> Result<&'a str, EvalError> {
    args[idx]
        .as_str()
        .ok_or_else(|| EvalError::Raised("expected a string argument".into()))
}

fn substring_index(s: &str, delim: &str, count: i64) -> String {
    if delim.is_empty() || count == 0 {
        return String::new();
    }
    let parts: Vec<&str> = s.split(delim).collect();
    if count > 0 {
        let n = (count as usize).min(parts.len());
        parts[..n].join(delim)
    } else {
        let n = ((-count) as usize).min(parts.len());
        parts[parts.len() - n..].join(delim)
    }
}

fn resolve(
    host: &str,
    cache: Option<&ResolveCache>,
    dry_run: bool,
    want_v4: bool,
) -> Result<Value, EvalError> {
    if dry_run {
        return Ok(Value::Str(host.to_string()));
    }
    let addr = cache.and_then(|c| c.get(host));
    match addr {
        Some(ip) if want_v4 && ip.is_ipv4() => Ok(Value::Str(ip.to_string())),
        Some(ip) if !want_v4 && ip.is_ipv6() => Ok(Value::Str(ip.to_string())),
        _ => Err(EvalError::NoResolveCacheEntry(host.to_string())),
    }
}

fn concat(stack: &mut Vec<Value>, n: usize) -> Result<(), EvalError> {
    let args = stack.split_off(stack.len() - n);
    let mut out = String::new();
    for a in &args {
        match a {
            Value::Str(s) => out.push_str(s),
            Value::Role(r) => out.push_str(&r.name),
            Value::Num(n) => out.push_str(&n.to_string()),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Null => return Ok(stack.push(Value::Null)),
        }
    }
    stack.push(Value::Str(out));
    Ok(())
}

fn network(stack: &mut Vec<Value>, bits: i32, dry_run: bool) -> Result<(), EvalError> {
    if dry_run {
        let top = stack.last_mut().expect("stack underflow");
        if !(1..=32).contains(&bits) {
            return Err(EvalError::InvalidNetmask(bits));
        }
        *top = Value::Str(bits.to_string());
        return Ok(());
    }
    if !(1..=32).contains(&bits) {
        return Err(EvalError::InvalidNetmask(bits));
    }
    let top = stack.last_mut().expect("stack underflow");
    if top.is_null() {
        return Ok(());
    }
    let ip_str = top
        .as_str()
        .ok_or_else(|| EvalError::Raised("NETWORK() first argument must be a string IPv4 address".into()))?;
    let ip: std::net::Ipv4Addr = ip_str
        .parse()
        .map_err(|_| EvalError::Raised(format!("NETWORK() invalid IPv4 address: {ip_str}")))?;
    let net = Ipv4Net::new(ip, bits as u8)
        .map_err(|_| EvalError::InvalidNetmask(bits))?
        .trunc();
    *top = Value::Str(net.addr().to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::token::Reference;

    fn run(program: Vec<Instr>) -> Value {
        let store = RegexStore::new();
        let ctx = EvalContext::default();
        eval(&program, &store, &ctx, None, false).unwrap()
    }

    #[test]
    fn arithmetic_short_circuits_null() {
        let v = run(vec![
            Instr::new(Op::Push(Value::Null)),
            Instr::new(Op::Push(Value::Num(1.0))),
            Instr::new(Op::Add),
        ]);
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn string_equality_is_case_insensitive() {
        let v = run(vec![
            Instr::new(Op::Push(Value::Str("Primary".into()))),
            Instr::new(Op::Push(Value::Str("PRIMARY".into()))),
            Instr::new(Op::Eq),
        ]);
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn undefined_role_never_equals_itself() {
        let role = |n: &str| {
            Value::Role(Role {
                name: n.to_string(),
                kind: RoleKind::Member,
            })
        };
        let v = run(vec![
            Instr::new(Op::Push(role("UNDEFINED"))),
            Instr::new(Op::Push(role("UNDEFINED"))),
            Instr::new(Op::Eq),
        ]);
        assert_eq!(v, Value::Bool(false));
    }

    #[test]
    fn mid_and_short_circuits() {
        // false AND <never evaluated> -> false, skipping the RHS push+AND.
        let program = vec![
            Instr::new(Op::Push(Value::Bool(false))),
            Instr::new(Op::MidAnd(2)),
            Instr::new(Op::Push(Value::Bool(true))),
            Instr::new(Op::And),
        ];
        assert_eq!(run(program), Value::Bool(false));
    }

    #[test]
    fn is_ipv6_accepts_scoped_link_local_address() {
        assert!(is_ipv6_with_scope("fe80::1%eth0"));
        assert!(is_ipv6_with_scope(
            "FEDC:BA98:7654:3210:FEDC:BA98:7654:3210"
        ));
        assert!(!is_ipv6_with_scope("255.255.255.256"));
    }

    #[test]
    fn unknown_reference_without_scope_errors() {
        let store = RegexStore::new();
        let ctx = EvalContext::default();
        let program = vec![Instr::new(Op::Ref {
            reference: Reference::new(super::super::token::Scope::Server, "label".into()),
            missing_ok: false,
        })];
        assert!(eval(&program, &store, &ctx, None, false).is_err());
    }
}
