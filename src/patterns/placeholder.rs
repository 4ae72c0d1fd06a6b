//! Placeholder recognition for pattern text.
//!
//! `...` is not valid JavaScript outside a spread, so the rest wildcard is
//! rewritten to a reserved identifier before the pattern reaches the parser.
//! Metavariables (`$URL`, `$METHOD`) are already legal identifiers and are
//! recognised after parsing.

/// Identifier the rest wildcard is rewritten to. `$$` can never start a
/// metavariable name.
pub const WILDCARD_TOKEN: &str = "$$WILDCARD";

/// `$` followed by one or more of `A-Z`, `0-9`, `_`, not starting with a digit.
pub fn is_metavariable(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('$') else {
        return false;
    };
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Rewrite every wildcard `...` into [`WILDCARD_TOKEN`]. Spreads (`...args`)
/// and anything inside strings or comments are left untouched.
pub fn rewrite_ellipses(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;
    let mut copied = 0;

    while i < bytes.len() {
        match bytes[i] {
            q @ (b'"' | b'\'' | b'`') => {
                i = skip_string(bytes, i + 1, q);
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = bytes[i..]
                    .iter()
                    .position(|b| *b == b'\n')
                    .map_or(bytes.len(), |p| i + p);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = text[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
            }
            b'.' if text[i..].starts_with("...") && !bytes.get(i + 3).is_some_and(|b| *b == b'.') => {
                if ends_element(&bytes[i + 3..]) {
                    out.push_str(&text[copied..i]);
                    out.push_str(WILDCARD_TOKEN);
                    copied = i + 3;
                }
                i += 3;
            }
            _ => i += 1,
        }
    }
    out.push_str(&text[copied..]);
    out
}

fn skip_string(bytes: &[u8], mut i: usize, quote: u8) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// True when the text after a `...` closes the current element, i.e. the
/// dots are not the start of a spread.
fn ends_element(rest: &[u8]) -> bool {
    for b in rest {
        match b {
            b'\n' => return true,
            b' ' | b'\t' | b'\r' => continue,
            b')' | b',' | b']' | b'}' | b';' => return true,
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metavariable_names() {
        for ok in ["$X", "$URL", "$_TMP", "$ARG2"] {
            assert!(is_metavariable(ok), "{ok}");
        }
        for bad in ["$", "$x", "$2X", "URL", "$$WILDCARD", "$Url"] {
            assert!(!is_metavariable(bad), "{bad}");
        }
    }

    #[test]
    fn argument_wildcards_are_rewritten() {
        assert_eq!(rewrite_ellipses("fetch($URL, ...)"), "fetch($URL, $$WILDCARD)");
        assert_eq!(rewrite_ellipses("$X.open(...);"), "$X.open($$WILDCARD);");
        assert_eq!(rewrite_ellipses("f(..., $Y)"), "f($$WILDCARD, $Y)");
    }

    #[test]
    fn spreads_strings_and_comments_are_kept() {
        assert_eq!(rewrite_ellipses("f(...args)"), "f(...args)");
        assert_eq!(rewrite_ellipses("f(\"...\")"), "f(\"...\")");
        assert_eq!(rewrite_ellipses("f(`a ... b`)"), "f(`a ... b`)");
        assert_eq!(rewrite_ellipses("f() // ..."), "f() // ...");
        assert_eq!(rewrite_ellipses("f() /* ... */"), "f() /* ... */");
    }

    #[test]
    fn statement_wildcards_are_rewritten() {
        let text = "var $X = a();\n...\n$X.b();";
        assert_eq!(rewrite_ellipses(text), "var $X = a();\n$$WILDCARD\n$X.b();");
        assert_eq!(rewrite_ellipses("a();\n..."), "a();\n$$WILDCARD");
    }
}
