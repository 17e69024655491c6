//! SQL text helpers.
//!
//! Definitions arrive from two sources with different formatting habits: the
//! declaration in source code, and whatever the database catalog renders.
//! Equality checks therefore run over a canonical form: whitespace collapsed
//! to single spaces, terminating semicolon stripped, and keywords folded to
//! lowercase. String literals are left untouched.

/// SQL keywords folded to lowercase by [`normalize`].
///
/// Case folding only applies to bare words matching this list, so quoted
/// identifiers and string literals keep their casing.
const KEYWORDS: &[&str] = &[
    "select", "from", "where", "as", "returns", "return", "language", "begin",
    "end", "if", "then", "else", "elsif", "create", "or", "replace",
    "function", "procedure", "view", "materialized", "trigger", "policy",
    "extension", "on", "table", "grant", "revoke", "to", "for", "each", "row",
    "statement", "before", "after", "instead", "of", "insert", "update",
    "delete", "truncate", "using", "with", "check", "exists", "not", "null",
    "and", "is", "in", "join", "left", "right", "inner", "outer", "cross",
    "group", "by", "order", "limit", "offset", "union", "all", "distinct",
    "case", "when", "execute", "security", "definer", "invoker", "volatile",
    "stable", "immutable", "strict", "setof", "declare", "between", "like",
    "ilike", "cascade", "restrict", "coalesce", "values", "into", "having",
];

/// Collapse all runs of whitespace to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove terminating semicolons from a SQL statement if any exist.
pub fn strip_terminating_semicolon(sql: &str) -> &str {
    let mut sql = sql.trim();
    loop {
        let stripped = sql.trim_end_matches(';').trim_end();
        if stripped == sql {
            return sql;
        }
        sql = stripped;
    }
}

/// Remove surrounding double quotes from an identifier.
pub fn strip_double_quotes(ident: &str) -> &str {
    ident.trim().trim_matches('"').trim()
}

/// Coerce a possibly-qualified identifier to its unquoted form.
///
/// `"public"."account"` and `public.account` both become `public.account`.
pub fn coerce_to_unquoted(ident: &str) -> String {
    ident.chars().filter(|c| *c != '"').collect()
}

/// Coerce a possibly-qualified identifier to its double quoted form.
///
/// Useful when emitting statements that must survive reserved words.
pub fn coerce_to_quoted(ident: &str) -> String {
    if let Some((schema, name)) = ident.split_once('.') {
        format!(
            "\"{}\".\"{}\"",
            strip_double_quotes(schema),
            strip_double_quotes(name)
        )
    } else {
        format!("\"{}\"", strip_double_quotes(ident))
    }
}

/// Canonicalize a definition for equality comparison.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`. Cosmetic
/// reformatting of a definition never changes its canonical form, so it can
/// never flip a classification.
pub fn normalize(definition: &str) -> String {
    let collapsed = normalize_whitespace(definition);
    fold_keywords(strip_terminating_semicolon(&collapsed))
}

/// Lowercase bare keyword tokens outside of string literals.
fn fold_keywords(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut word = String::new();
    let mut in_string = false;

    let flush = |word: &mut String, out: &mut String| {
        if word.is_empty() {
            return;
        }
        if KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word)) {
            out.extend(word.chars().map(|c| c.to_ascii_lowercase()));
        } else {
            out.push_str(word);
        }
        word.clear();
    };

    for ch in sql.chars() {
        if ch == '\'' {
            flush(&mut word, &mut out);
            in_string = !in_string;
            out.push(ch);
        } else if !in_string && (ch.is_alphanumeric() || ch == '_') {
            word.push(ch);
        } else {
            flush(&mut word, &mut out);
            out.push(ch);
        }
    }
    flush(&mut word, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a   b\n\tc "), "a b c");
        assert_eq!(normalize_whitespace(""), "");
    }

    #[test]
    fn test_strip_terminating_semicolon() {
        assert_eq!(strip_terminating_semicolon("select 1;"), "select 1");
        assert_eq!(strip_terminating_semicolon("select 1 ; "), "select 1");
        assert_eq!(strip_terminating_semicolon("select 1 ; ;"), "select 1");
        assert_eq!(strip_terminating_semicolon("select 1"), "select 1");
    }

    #[test]
    fn test_coerce_to_unquoted() {
        assert_eq!(coerce_to_unquoted("\"public\""), "public");
        assert_eq!(coerce_to_unquoted("\"public\".account"), "public.account");
        assert_eq!(coerce_to_unquoted("public.account"), "public.account");
    }

    #[test]
    fn test_coerce_to_quoted() {
        assert_eq!(coerce_to_quoted("public"), "\"public\"");
        assert_eq!(coerce_to_quoted("public.account"), "\"public\".\"account\"");
        assert_eq!(
            coerce_to_quoted("\"public\".account"),
            "\"public\".\"account\""
        );
    }

    #[test]
    fn test_normalize_folds_keywords() {
        assert_eq!(
            normalize("SELECT  id\nFROM account;"),
            "select id from account"
        );
        // identifiers that happen not to be keywords keep their case
        assert_eq!(normalize("SELECT MyColumn FROM t"), "select MyColumn from t");
    }

    #[test]
    fn test_normalize_preserves_string_literals() {
        assert_eq!(
            normalize("SELECT 'FROM HERE' FROM t"),
            "select 'FROM HERE' from t"
        );
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(input in ".{0,200}") {
            let once = normalize(&input);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn normalize_ignores_whitespace_runs(n_spaces in 1usize..10) {
            let spread = format!(
                "SELECT{}id,{}email FROM account",
                " ".repeat(n_spaces),
                "\n".repeat(n_spaces),
            );
            prop_assert_eq!(normalize(&spread), "select id, email from account");
        }
    }
}
