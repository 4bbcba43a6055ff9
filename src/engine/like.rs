/// The outcome of lowering a SQL `LIKE` pattern (§4.A).
#[derive(Debug, Clone, PartialEq)]
pub enum LikeLowering {
    /// Pattern `""` or `"%"`: always matches.
    AlwaysTrue,
    StartsWith(String),
    Contains(String),
    EndsWith(String),
    /// No simple form applies; translate to a case-insensitive regex.
    Regex(String),
}

/// Scans `pattern` and reports, for each byte position, whether an
/// unescaped SQL wildcard (`%` or `_`) occurs there. `\%` and `\_` are
/// escapes; any other use of `\` is passed through literally (§4.A:
/// "Unescape `\%` and `\_` during lowering").
fn has_unescaped_wildcard(s: &str) -> bool {
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if matches!(chars.peek(), Some('%') | Some('_')) {
                chars.next();
                continue;
            }
            continue;
        }
        if c == '%' || c == '_' {
            return true;
        }
    }
    false
}

fn unescape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '%' || next == '_' {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
            out.push(c);
            continue;
        }
        out.push(c);
    }
    out
}

/// Translates a SQL `LIKE` wildcard pattern into an ECMAScript-style regex
/// body (no anchors; callers wrap with `^`/`$` as needed). `%` becomes
/// `.*`, `_` becomes `.`, `\%`/`\_` become literal `%`/`_`, and any other
/// regex metacharacter in the literal portions is escaped.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some('%') | Some('_')) => {
                let next = chars.next().unwrap();
                out.push_str(&regex::escape(&next.to_string()));
            }
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

/// Lowers a `LIKE` pattern per §4.A's rules, preferring the cheapest
/// equivalent form the evaluator can apply without a regex engine.
pub fn lower_like(pattern: &str) -> LikeLowering {
    if pattern.is_empty() || pattern == "%" {
        return LikeLowering::AlwaysTrue;
    }

    let starts_with_pct = pattern.starts_with('%');
    let ends_with_unescaped_pct = {
        // '%' at the very end is never an escape target (there's nothing
        // after it), so it is always a wildcard.
        pattern.ends_with('%')
    };

    let (lead_stripped, leading) = if starts_with_pct {
        (&pattern[1..], true)
    } else {
        (pattern, false)
    };
    let (middle, trailing) = if ends_with_unescaped_pct && lead_stripped.len() <= pattern.len() - 1
    {
        let mut end = lead_stripped.len();
        if end > 0 {
            end -= 1;
        }
        (&lead_stripped[..end], true)
    } else {
        (lead_stripped, false)
    };

    if !has_unescaped_wildcard(middle) {
        return match (leading, trailing) {
            (false, true) => LikeLowering::StartsWith(unescape_literal(middle)),
            (true, true) => LikeLowering::Contains(unescape_literal(middle)),
            (true, false) => LikeLowering::EndsWith(unescape_literal(middle)),
            (false, false) => LikeLowering::Regex(like_to_regex(pattern)),
        };
    }

    LikeLowering::Regex(like_to_regex(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_bare_percent_fold_to_true() {
        assert_eq!(lower_like(""), LikeLowering::AlwaysTrue);
        assert_eq!(lower_like("%"), LikeLowering::AlwaysTrue);
    }

    #[test]
    fn prefix_pattern_becomes_starts_with() {
        assert_eq!(lower_like("foo%"), LikeLowering::StartsWith("foo".into()));
    }

    #[test]
    fn wrapped_pattern_becomes_contains() {
        assert_eq!(lower_like("%foo%"), LikeLowering::Contains("foo".into()));
    }

    #[test]
    fn suffix_pattern_becomes_ends_with() {
        assert_eq!(lower_like("%foo"), LikeLowering::EndsWith("foo".into()));
    }

    #[test]
    fn escaped_wildcards_are_unescaped_in_literal_forms() {
        assert_eq!(
            lower_like("100\\%%"),
            LikeLowering::StartsWith("100%".into())
        );
    }

    #[test]
    fn interior_wildcard_forces_regex() {
        match lower_like("a%b_c") {
            LikeLowering::Regex(_) => {}
            other => panic!("expected Regex, got {other:?}"),
        }
    }
}
