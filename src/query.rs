//! Free-form infix query language → parameterised SQL tokens.

use std::collections::{HashMap, HashSet};

/// Value-formatting rules applied to every bare/quoted term before it is
/// bound as a `LIKE` parameter.
///
/// 1. A quoted term has `% _ ^ $` escaped with `\` (preserving existing
///    escapes) and never receives wildcard expansion.
/// 2. Unless the term already starts with `^`/`%` (stripped of one leading
///    `^`), a field in the `likes` set gets a leading `%`.
/// 3. Unless the term already ends with an unescaped `%`/`$` (stripped of
///    one trailing `$`), a field in the `likes` set gets a trailing `%`.
pub fn format_value(term: &str, field: &str, likes: &HashSet<String>) -> String {
    let quoted = term.len() >= 2 && term.starts_with('"') && term.ends_with('"');
    let mut value = if quoted {
        escape_quoted(&term[1..term.len() - 1])
    } else {
        term.to_string()
    };

    let like = likes.contains(field);

    if starts_with_wildcard_marker(&value) {
        value = value.strip_prefix('^').unwrap_or(&value).to_string();
    } else if like {
        value = format!("%{value}");
    }

    if ends_with_unescaped_wildcard_marker(&value) {
        value = value.strip_suffix('$').unwrap_or(&value).to_string();
    } else if like {
        value.push('%');
    }

    value
}

fn starts_with_wildcard_marker(value: &str) -> bool {
    value.starts_with('%') || value.starts_with('^')
}

fn ends_with_unescaped_wildcard_marker(value: &str) -> bool {
    let Some(last) = value.chars().last() else {
        return false;
    };
    if last != '%' && last != '$' {
        return false;
    }
    let before = &value[..value.len() - last.len_utf8()];
    !before.ends_with('\\') || count_trailing_backslashes(before) % 2 == 0
}

fn count_trailing_backslashes(s: &str) -> usize {
    s.chars().rev().take_while(|&c| c == '\\').count()
}

fn escape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let chars: Vec<char> = value.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            // Preserve an existing escape run verbatim.
            let mut j = i;
            while j < chars.len() && chars[j] == '\\' {
                out.push('\\');
                j += 1;
            }
            i = j;
            continue;
        }
        if matches!(c, '%' | '_' | '^' | '$') {
            out.push('\\');
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Tokenised query: one SQL fragment per AND/OR/operand/parenthesis token,
/// plus the parallel bound-parameter list (fragments and parameters don't
/// line up 1:1 — only `(field [not] like ? escape '\')` tokens consume a
/// parameter).
pub struct ParsedQuery {
    pub tokens: Vec<String>,
    pub values: Vec<String>,
}

/// Parse a free-form infix query into SQL tokens + bound values.
///
/// `default_field` is the field scope before any `@field` directive.
/// `likes` names fields that get automatic `%…%` wrapping.
/// `aliases` remaps a field name to a SQL expression (e.g. normalising
/// `AUTHOR` to `replace(lower(AUTHOR), '_', '')`).
pub fn query_to_sql(
    query: &str,
    default_field: &str,
    likes: &HashSet<String>,
    aliases: &HashMap<String, String>,
) -> ParsedQuery {
    if query.is_empty() {
        return ParsedQuery {
            tokens: Vec::new(),
            values: Vec::new(),
        };
    }

    let query = strip_edge_noise(query);
    let query = collapse_operator_runs_before_grouping(&query);

    let mut tokens = Vec::new();
    let mut values = Vec::new();
    let mut field = default_field.to_ascii_lowercase();
    let mut prev = String::new();

    for raw in tokenize(&query) {
        let elem = raw.trim();
        if elem.is_empty() {
            continue;
        }

        if let Some(name) = parse_field_directive(elem) {
            field = name.to_ascii_lowercase();
            continue;
        }

        match elem {
            "&" => {
                tokens.push("and".to_string());
                prev = elem.to_string();
                continue;
            }
            "|" => {
                tokens.push("or".to_string());
                prev = elem.to_string();
                continue;
            }
            "(" => {
                if !matches!(prev.as_str(), "" | "&" | "|" | "(") {
                    tokens.push("and".to_string());
                }
                tokens.push("(".to_string());
                prev = elem.to_string();
                continue;
            }
            ")" => {
                tokens.push(")".to_string());
                prev = elem.to_string();
                continue;
            }
            _ => {}
        }

        let (negated, term) = match elem.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, elem),
        };
        if term.is_empty() {
            prev = elem.to_string();
            continue;
        }

        if !matches!(prev.as_str(), "" | "&" | "|" | "(") {
            tokens.push("and".to_string());
        }

        let column = aliases.get(&field).cloned().unwrap_or_else(|| field.clone());
        let not_ = if negated { " not" } else { "" };
        tokens.push(format!("({column}{not_} like ? escape '\\')"));
        values.push(format_value(term, &field, likes));

        prev = elem.to_string();
    }

    ParsedQuery { tokens, values }
}

fn parse_field_directive(elem: &str) -> Option<&str> {
    let rest = elem.strip_prefix('@')?;
    if !rest.is_empty() && rest.chars().all(|c| c.is_alphanumeric() || c == '_') {
        Some(rest)
    } else {
        None
    }
}

/// Strip leading/trailing operator noise (`&`, `|`, spaces) so a dangling
/// operator never starts or ends the token stream.
fn strip_edge_noise(query: &str) -> String {
    let leading_trimmed = query.trim_start_matches(|c: char| c == '&' || c == '|' || c == ' ');
    let mut end = leading_trimmed.len();
    let bytes = leading_trimmed.as_bytes();
    while end > 0 {
        let c = bytes[end - 1] as char;
        if c == ' ' {
            end -= 1;
        } else if (c == '&' || c == '|') && !is_escaped_at(leading_trimmed, end - 1) {
            end -= 1;
        } else {
            break;
        }
    }
    leading_trimmed[..end].to_string()
}

fn is_escaped_at(s: &str, idx: usize) -> bool {
    idx > 0 && s.as_bytes()[idx - 1] == b'\\'
}

/// Remove *duplicated* operator runs that sit directly before a `@field` or
/// `(` directive (e.g. `a && @b` collapses to `a @b`, letting a single
/// explicit or implicit connective stand). A lone operator before `@`/`(`
/// is left untouched — it is the query's only connective there, not noise.
fn collapse_operator_runs_before_grouping(query: &str) -> String {
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len());
    let mut i = 0;
    while i < chars.len() {
        if matches!(chars[i], '&' | '|') {
            let start = i;
            let mut operator_count = 0;
            while i < chars.len() && matches!(chars[i], '&' | '|' | ' ') {
                if chars[i] != ' ' {
                    operator_count += 1;
                }
                i += 1;
            }
            let mut look = i;
            while look < chars.len() && chars[look] == ' ' {
                look += 1;
            }
            let followed_by_grouping = look < chars.len() && (chars[look] == '@' || chars[look] == '(');
            if operator_count >= 2 && followed_by_grouping {
                continue;
            }
            out.extend(&chars[start..i]);
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Split on quoted strings, bare parens/operators, and whitespace, keeping
/// quoted segments intact (including internal whitespace).
fn tokenize(query: &str) -> Vec<String> {
    let chars: Vec<char> = query.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    let flush = |current: &mut String, tokens: &mut Vec<String>| {
        if !current.is_empty() {
            tokens.push(std::mem::take(current));
        }
    };

    while i < chars.len() {
        let c = chars[i];
        let is_quote_start = (c == '"' || (c == '!' && chars.get(i + 1) == Some(&'"')))
            && !is_escaped_char(&chars, i);
        if is_quote_start {
            let neg_prefix = if c == '!' { "!" } else { "" };
            let quote_start = i + neg_prefix.len();
            let mut j = quote_start + 1;
            while j < chars.len() {
                if chars[j] == '"' && !is_escaped_char(&chars, j) {
                    break;
                }
                j += 1;
            }
            flush(&mut current, &mut tokens);
            let segment: String = chars[i..=j.min(chars.len() - 1)].iter().collect();
            tokens.push(segment);
            i = j + 1;
            continue;
        }

        match c {
            '(' | ')' | '&' | '|' => {
                flush(&mut current, &mut tokens);
                tokens.push(c.to_string());
                i += 1;
            }
            ' ' => {
                flush(&mut current, &mut tokens);
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

fn is_escaped_char(chars: &[char], idx: usize) -> bool {
    idx > 0 && chars[idx - 1] == '\\'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn likes(fields: &[&str]) -> HashSet<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn format_value_strips_anchors() {
        assert_eq!(format_value("^abc$", "author", &likes(&["author"])), "abc");
    }

    #[test]
    fn format_value_wraps_likes_field() {
        assert_eq!(format_value("abc", "author", &likes(&["author"])), "%abc%");
    }

    #[test]
    fn format_value_escapes_quoted_wildcards() {
        assert_eq!(
            format_value("\"ab%cd\"", "author", &likes(&["author"])),
            "%ab\\%cd%"
        );
    }

    #[test]
    fn query_author_or_title_example() {
        let mut aliases = HashMap::new();
        aliases.insert(
            "author".to_string(),
            "replace(lower(author),'_','')".to_string(),
        );
        let parsed = query_to_sql(
            "@author alice | @title !\"draft 1\"",
            "title",
            &likes(&["author"]),
            &aliases,
        );
        assert_eq!(
            parsed.tokens,
            vec![
                "(replace(lower(author),'_','') like ? escape '\\')".to_string(),
                "or".to_string(),
                "(title not like ? escape '\\')".to_string(),
            ]
        );
        assert_eq!(parsed.values, vec!["%alice%".to_string(), "draft 1".to_string()]);
    }

    #[test]
    fn implicit_and_inserted_between_bare_terms() {
        let parsed = query_to_sql("foo bar", "title", &HashSet::new(), &HashMap::new());
        assert_eq!(
            parsed.tokens,
            vec![
                "(title like ? escape '\\')".to_string(),
                "and".to_string(),
                "(title like ? escape '\\')".to_string(),
            ]
        );
    }

    #[test]
    fn empty_query_returns_empty() {
        let parsed = query_to_sql("", "title", &HashSet::new(), &HashMap::new());
        assert!(parsed.tokens.is_empty());
        assert!(parsed.values.is_empty());
    }
}
