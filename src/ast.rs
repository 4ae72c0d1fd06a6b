use crate::errors::ParseError;
use crate::lang::Lang;
use phf::phf_set;
use serde::Serialize;
use std::cell::RefCell;
use tree_sitter::{Node, Point};

thread_local! {
    static PARSER: RefCell<tree_sitter::Parser> = RefCell::new(tree_sitter::Parser::new());
}

/// Parents whose named children form a list (arguments, statements,
/// elements, ..). A rest wildcard may stand in for part of that list.
pub static SEQUENCE_KINDS: phf::Set<&'static str> = phf_set! {
    "program",
    "arguments",
    "statement_block",
    "array",
    "object",
    "formal_parameters",
    "class_body",
};

/// 1-based line / column.
///
/// Columns in a lowered tree count bytes, as tree-sitter reports them.
/// Match results are converted with [`Span::with_char_columns`] so their
/// columns count characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

impl From<Point> for Position {
    fn from(p: Point) -> Self {
        Position {
            line: p.row + 1,
            col: p.column + 1,
        }
    }
}

impl Position {
    fn in_chars(self, source: &str, byte: usize) -> Position {
        let line_start = byte.saturating_sub(self.col.saturating_sub(1));
        match source.get(line_start..byte) {
            Some(prefix) => Position {
                line: self.line,
                col: prefix.chars().count() + 1,
            },
            None => self,
        }
    }
}

/// A region of source text, in bytes and in line/column form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start: Position,
    pub end: Position,
}

impl Span {
    fn of(node: Node<'_>) -> Self {
        Span {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start: node.start_position().into(),
            end: node.end_position().into(),
        }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn cover(self, other: Span) -> Span {
        let (start_byte, start) = if other.start_byte < self.start_byte {
            (other.start_byte, other.start)
        } else {
            (self.start_byte, self.start)
        };
        let (end_byte, end) = if other.end_byte > self.end_byte {
            (other.end_byte, other.end)
        } else {
            (self.end_byte, self.end)
        };
        Span {
            start_byte,
            end_byte,
            start,
            end,
        }
    }

    /// Recount the columns of a span taken from a lowered tree of `source`
    /// in characters. Apply once.
    pub fn with_char_columns(self, source: &str) -> Span {
        Span {
            start: self.start.in_chars(source, self.start_byte),
            end: self.end.in_chars(source, self.end_byte),
            ..self
        }
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
    }

    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        source.get(self.start_byte..self.end_byte).unwrap_or_default()
    }
}

/// Normalized syntax node.
///
/// Only named children survive. Leaves carry their text in `token`; inner
/// nodes carry their operator (if the grammar gives them one). A node made
/// only of keywords and punctuation (`new.target`, `string` in a type) keeps
/// that text, whitespace removed.
#[derive(Debug)]
pub struct AstNode {
    pub kind: &'static str,
    pub token: Option<Box<str>>,
    pub span: Span,
    pub children: Vec<AstNode>,
}

impl AstNode {
    pub fn is_identifier(&self) -> bool {
        self.kind.ends_with("identifier")
    }

    /// Syntactic equality: same shape and tokens, whitespace and comments
    /// ignored. Identifier flavours (`identifier`, `property_identifier`, ..)
    /// compare by name only.
    pub fn same_tokens(&self, other: &AstNode) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            if a.is_identifier() && b.is_identifier() {
                if a.token != b.token {
                    return false;
                }
                continue;
            }
            if a.kind != b.kind || a.token != b.token || a.children.len() != b.children.len() {
                return false;
            }
            pending.extend(a.children.iter().zip(&b.children));
        }
        true
    }

    /// Pre-order walk over this node and all of its descendants.
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder { stack: vec![self] }
    }
}

// Nesting depth is input-controlled; unlink children without recursing.
impl Drop for AstNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

pub struct Preorder<'a> {
    stack: Vec<&'a AstNode>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = &'a AstNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Parse `source` and lower the tree-sitter CST into an [`AstNode`] tree.
///
/// With `partial` unset any ERROR / MISSING node fails the whole parse.
pub fn parse(source: &str, lang: Lang, partial: bool) -> Result<AstNode, ParseError> {
    let tree = PARSER.with(|cell| {
        let mut parser = cell.borrow_mut();
        parser
            .set_language(&lang.ts_language())
            .map_err(|_| ParseError::Grammar(lang.tag()))?;
        parser.parse(source, None).ok_or(ParseError::NoTree)
    })?;

    let root = tree.root_node();
    if !partial && root.has_error() {
        let at = first_error(root).start_position();
        return Err(ParseError::Syntax {
            line: at.row + 1,
            column: at.column + 1,
        });
    }

    Ok(lower(root, source))
}

fn first_error(mut node: Node<'_>) -> Node<'_> {
    loop {
        if node.is_error() || node.is_missing() {
            return node;
        }
        let mut cursor = node.walk();
        let next = node
            .children(&mut cursor)
            .find(|c| c.has_error() || c.is_missing());
        match next {
            Some(child) => node = child,
            None => return node,
        }
    }
}

/// A node whose children are still being lowered.
struct Open {
    kind: &'static str,
    span: Span,
    token: Option<Box<str>>,
    /// Text of the anonymous children, concatenated.
    bare: String,
    children: Vec<AstNode>,
    /// Parenthesised expression with one inner expression: replaced by it.
    transparent: bool,
}

impl Open {
    fn close(mut self) -> AstNode {
        if self.transparent && self.children.len() == 1 {
            if let Some(inner) = self.children.pop() {
                return inner;
            }
        }
        let token = match self.token {
            Some(op) => Some(op),
            None if self.children.is_empty()
                && !self.bare.is_empty()
                && !SEQUENCE_KINDS.contains(self.kind) =>
            {
                Some(self.bare.into())
            }
            None => None,
        };
        AstNode {
            kind: self.kind,
            token,
            span: self.span,
            children: self.children,
        }
    }
}

enum Lowered {
    Leaf(AstNode),
    Open(Open),
}

fn enter(node: Node<'_>, source: &str) -> Lowered {
    let text = node.utf8_text(source.as_bytes()).unwrap_or_default();
    let span = Span::of(node);
    let kind = normalize_kind(node.kind());

    if kind == "string" || node.child_count() == 0 {
        let token = if kind == "string" { unquote(text) } else { text };
        return Lowered::Leaf(AstNode {
            kind,
            token: Some(token.into()),
            span,
            children: Vec::new(),
        });
    }

    let transparent = kind == "parenthesized_expression" && {
        let mut cursor = node.walk();
        node.named_children(&mut cursor).filter(|c| !c.is_extra()).count() == 1
    };
    Lowered::Open(Open {
        kind,
        span,
        token: None,
        bare: String::new(),
        children: Vec::new(),
        transparent,
    })
}

fn innermost<'a>(root: &'a mut Open, stack: &'a mut [Open]) -> &'a mut Open {
    match stack.last_mut() {
        Some(open) => open,
        None => root,
    }
}

/// Depth-first lowering driven by a single tree cursor, so nesting depth
/// costs heap, not stack.
fn lower(node: Node<'_>, source: &str) -> AstNode {
    let mut root = match enter(node, source) {
        Lowered::Leaf(leaf) => return leaf,
        Lowered::Open(open) => open,
    };
    let mut stack: Vec<Open> = Vec::new();
    let mut cursor = node.walk();
    cursor.goto_first_child();

    loop {
        let child = cursor.node();
        match (child.is_extra(), child.is_named()) {
            (true, _) => {} // comments
            (false, true) => match enter(child, source) {
                Lowered::Leaf(leaf) => innermost(&mut root, &mut stack).children.push(leaf),
                Lowered::Open(open) => {
                    stack.push(open);
                    cursor.goto_first_child();
                    continue;
                }
            },
            (false, false) => {
                let text = child.utf8_text(source.as_bytes()).unwrap_or_default();
                let parent = innermost(&mut root, &mut stack);
                if cursor.field_name() == Some("operator") {
                    parent.token = Some(text.into());
                }
                parent.bare.push_str(text);
            }
        }

        while !cursor.goto_next_sibling() {
            cursor.goto_parent();
            match stack.pop() {
                Some(done) => {
                    let done = done.close();
                    innermost(&mut root, &mut stack).children.push(done);
                }
                None => return root.close(),
            }
        }
    }
}

fn normalize_kind(kind: &'static str) -> &'static str {
    match kind {
        "lexical_declaration" => "variable_declaration",
        other => other,
    }
}

fn unquote(text: &str) -> &str {
    let bytes = text.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(b'"'), Some(b'"')) | (Some(b'\''), Some(b'\'')) if text.len() >= 2 => {
            &text[1..text.len() - 1]
        }
        _ => text,
    }
}

/// Rough binary sniff: more than 1% NUL bytes.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().filter(|b| **b == 0).count() * 100 > bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(node: &AstNode) -> Vec<&'static str> {
        node.preorder().map(|n| n.kind).collect()
    }

    #[test]
    fn comments_and_parentheses_are_normalized_away() {
        let src = "fetch(/* where */ (url));";
        let root = parse(src, Lang::JavaScript, false).unwrap();
        let k = kinds(&root);
        assert!(!k.contains(&"comment"));
        assert!(!k.contains(&"parenthesized_expression"));

        let plain = parse("fetch(url);", Lang::JavaScript, false).unwrap();
        assert!(root.same_tokens(&plain));
    }

    #[test]
    fn let_const_and_var_share_a_kind() {
        for src in ["var x = 1;", "let x = 1;", "const x = 1;"] {
            let root = parse(src, Lang::JavaScript, false).unwrap();
            assert_eq!(root.children[0].kind, "variable_declaration", "{src}");
        }
    }

    #[test]
    fn string_quotes_do_not_matter() {
        let a = parse("f('http://x')", Lang::JavaScript, false).unwrap();
        let b = parse("f(\"http://x\")", Lang::JavaScript, false).unwrap();
        assert!(a.same_tokens(&b));
    }

    #[test]
    fn operators_are_recorded() {
        let a = parse("a + b", Lang::JavaScript, false).unwrap();
        let b = parse("a - b", Lang::JavaScript, false).unwrap();
        assert!(!a.same_tokens(&b));
    }

    #[test]
    fn spans_are_one_based() {
        let root = parse("\n  fetch(x)", Lang::JavaScript, false).unwrap();
        let call = root.preorder().find(|n| n.kind == "call_expression").unwrap();
        assert_eq!(call.span.start, Position { line: 2, col: 3 });
        assert_eq!(call.span.text("\n  fetch(x)"), "fetch(x)");
    }

    #[test]
    fn syntax_errors_are_reported_unless_partial() {
        let src = "fetch(\"x\";\n";
        let err = parse(src, Lang::JavaScript, false).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { line: 1, .. }));
        assert!(parse(src, Lang::JavaScript, true).is_ok());
    }

    #[test]
    fn typescript_and_tsx_parse() {
        assert!(parse("const n: number = fetch(u) as any;", Lang::TypeScript, false).is_ok());
        assert!(parse("const el = <div>{fetch(u)}</div>;", Lang::Tsx, false).is_ok());
    }

    #[test]
    fn binary_guard_triggers_on_nul_bytes() {
        assert!(looks_binary(&[0u8; 64]));
        assert!(!looks_binary(b"fetch('x')"));
        assert!(!looks_binary(b""));
    }

    #[test]
    fn binary_guard_threshold_is_one_percent() {
        let mut bytes = vec![b'a'; 200];
        bytes[..2].fill(0);
        assert!(!looks_binary(&bytes));
        bytes[2] = 0;
        assert!(looks_binary(&bytes));
    }

    #[test]
    fn keyword_only_nodes_keep_their_text() {
        let a = parse("x = new.target;", Lang::JavaScript, false).unwrap();
        let b = parse("x = import.meta;", Lang::JavaScript, false).unwrap();
        assert!(!a.same_tokens(&b));

        let s = parse("let v: string;", Lang::TypeScript, false).unwrap();
        let n = parse("let v: number;", Lang::TypeScript, false).unwrap();
        assert!(!s.same_tokens(&n));
    }

    #[test]
    fn empty_lists_carry_no_token() {
        let call = parse("fetch()", Lang::JavaScript, false).unwrap();
        let args = call.preorder().find(|n| n.kind == "arguments").unwrap();
        assert_eq!(args.token, None);
        assert!(args.children.is_empty());
    }

    #[test]
    fn deeply_nested_input_lowers_and_drops() {
        let depth = 20_000;
        let src = format!("fetch({}x{});", "[".repeat(depth), "]".repeat(depth));
        let a = parse(&src, Lang::JavaScript, false).unwrap();
        let b = parse(&src, Lang::JavaScript, false).unwrap();
        assert!(a.preorder().count() > depth);
        assert!(a.same_tokens(&b));
    }

    #[test]
    fn char_columns_count_characters_not_bytes() {
        let src = "const s = \"ééé\"; fetch(u);";
        let root = parse(src, Lang::JavaScript, false).unwrap();
        let call = root.preorder().find(|n| n.kind == "call_expression").unwrap();
        assert_eq!(call.span.start.col, 21);
        let chars = call.span.with_char_columns(src);
        assert_eq!(chars.start, Position { line: 1, col: 18 });
        assert_eq!(chars.end, Position { line: 1, col: 26 });
        assert_eq!(chars.start_byte, call.span.start_byte);
    }
}
