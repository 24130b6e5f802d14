//! Source-identifier mangling.
//!
//! Lisp symbol names are far richer than Dart identifiers, so every name
//! crossing into emitted code goes through [`munge`]. The transformation is
//! injective: distinct source names always produce distinct Dart names, which
//! the gensym layer relies on when deriving hints.

/// Dart reserved words; a plain reserved word mangles to `$word_`.
const RESERVED: &[&str] = &[
    "abstract", "as", "assert", "async", "await", "base", "break", "case", "catch", "class",
    "const", "continue", "covariant", "default", "deferred", "do", "dynamic", "else", "enum",
    "export", "extends", "extension", "external", "factory", "false", "final", "finally", "for",
    "Function", "get", "hide", "if", "implements", "import", "in", "interface", "is", "late",
    "library", "mixin", "new", "null", "on", "operator", "part", "required", "rethrow", "return",
    "sealed", "set", "show", "static", "super", "switch", "sync", "this", "throw", "true", "try",
    "typedef", "var", "void", "when", "while", "with", "yield",
];

/// True when `name` is a Dart reserved word.
pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}

/// Spelled-out replacement for a special character, or `None` for the
/// hex fallback.
fn spelled(c: char) -> Option<&'static str> {
    Some(match c {
        '-' => "_",
        '_' => "$UNDERSCORE_",
        '$' => "$DOLLAR_",
        ':' => "$COLON_",
        '+' => "$PLUS_",
        '>' => "$GT_",
        '<' => "$LT_",
        '=' => "$EQ_",
        '~' => "$TILDE_",
        '!' => "$BANG_",
        '@' => "$CIRCA_",
        '#' => "$SHARP_",
        '\'' => "$SINGLEQUOTE_",
        '"' => "$DOUBLEQUOTE_",
        '%' => "$PERCENT_",
        '^' => "$CARET_",
        '&' => "$AMPERSAND_",
        '*' => "$STAR_",
        '|' => "$BAR_",
        '{' => "$LBRACE_",
        '}' => "$RBRACE_",
        '[' => "$LBRACK_",
        ']' => "$RBRACK_",
        '/' => "$SLASH_",
        '\\' => "$BSLASH_",
        '?' => "$QMARK_",
        _ => return None,
    })
}

/// Mangles a source identifier into a valid Dart identifier.
///
/// Rules, in order:
/// - a standalone `__auto__` becomes `$AUTO_`;
/// - Dart reserved words are wrapped as `$word_`;
/// - a leading `-` becomes `$_`;
/// - `__` followed by digits becomes `$digits_`;
/// - special characters map to their spelled-out forms;
/// - anything else non-alphanumeric becomes `$u<hex>_`.
pub fn munge(name: &str) -> String {
    if name == "__auto__" {
        return "$AUTO_".to_string();
    }
    if is_reserved(name) {
        return format!("${name}_");
    }

    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 8);
    let mut i = 0;

    if chars.first() == Some(&'-') {
        out.push_str("$_");
        i = 1;
    }

    while i < chars.len() {
        let c = chars[i];
        // `__` followed by digits collapses to `$digits_`.
        if c == '_' && chars.get(i + 1) == Some(&'_') && chars.get(i + 2).is_some_and(|d| d.is_ascii_digit()) {
            let mut j = i + 2;
            let mut digits = String::new();
            while j < chars.len() && chars[j].is_ascii_digit() {
                digits.push(chars[j]);
                j += 1;
            }
            out.push('$');
            out.push_str(&digits);
            out.push('_');
            i = j;
            continue;
        }
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if let Some(s) = spelled(c) {
            out.push_str(s);
        } else {
            out.push_str(&format!("$u{:x}_", c as u32));
        }
        i += 1;
    }
    out
}

/// Derives a gensym hint from a source name: the munged name, which keeps
/// hints valid as Dart identifier prefixes.
pub fn hint(name: &str) -> String {
    munge(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_words_are_wrapped() {
        assert_eq!(munge("class"), "$class_");
        assert_eq!(munge("if"), "$if_");
        assert_eq!(munge("classy"), "classy");
    }

    #[test]
    fn leading_dash_and_table_entries() {
        assert_eq!(munge("-invoke"), "$_invoke");
        assert_eq!(munge("nil?"), "nil$QMARK_");
        assert_eq!(munge("set!"), "set$BANG_");
        assert_eq!(munge("a-b"), "a_b");
        assert_eq!(munge("a_b"), "a$UNDERSCORE_b");
        assert_eq!(munge("->name"), "$_$GT_name");
        assert_eq!(munge("+"), "$PLUS_");
        assert_eq!(munge("a/b"), "a$SLASH_b");
    }

    #[test]
    fn double_underscore_digits_and_auto() {
        assert_eq!(munge("x__12"), "x$12_");
        assert_eq!(munge("__auto__"), "$AUTO_");
        assert_eq!(munge("x__12y"), "x$12_y");
    }

    #[test]
    fn hex_fallback_for_exotic_characters() {
        assert_eq!(munge("π"), "$u3c0_");
        assert_eq!(munge("a b"), "a$u20_b");
    }
}
