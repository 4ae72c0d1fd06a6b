//! Structural unification of compiled patterns against normalized trees.
//!
//! A mismatch is never an error: it simply yields no [`BindingSet`].

use crate::ast::{AstNode, Span};
use crate::patterns::{PatternAlt, PatternNode, PatternRoot};
use serde::Serialize;
use std::collections::BTreeMap;

/// The source a metavariable was bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub span: Span,
    pub text: String,
}

/// Result of one successful match attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSet {
    /// Covering span of every node the attempt consumed.
    pub span: Span,
    pub bindings: BTreeMap<String, Binding>,
}

impl BindingSet {
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }
}

/// Bindings of an in-flight attempt. Appended in order so a failed branch
/// can be undone by truncating back to a mark.
struct Scratch<'p, 't> {
    entries: Vec<(&'p str, &'t AstNode)>,
}

impl<'p, 't> Scratch<'p, 't> {
    fn new() -> Self {
        Scratch {
            entries: Vec::new(),
        }
    }

    fn mark(&self) -> usize {
        self.entries.len()
    }

    fn rollback(&mut self, mark: usize) {
        self.entries.truncate(mark);
    }

    /// Bind on first sight; afterwards require the same tokens.
    fn bind(&mut self, name: &'p str, node: &'t AstNode) -> bool {
        match self.entries.iter().find(|(n, _)| *n == name) {
            Some((_, prior)) => prior.same_tokens(node),
            None => {
                self.entries.push((name, node));
                true
            }
        }
    }

    fn finish(self, span: Span, source: &str) -> BindingSet {
        let bindings = self
            .entries
            .into_iter()
            .map(|(name, node)| {
                let binding = Binding {
                    span: node.span.with_char_columns(source),
                    text: node.span.text(source).to_owned(),
                };
                (name.to_owned(), binding)
            })
            .collect();
        BindingSet {
            span: span.with_char_columns(source),
            bindings,
        }
    }
}

fn match_node<'p, 't>(pat: &'p PatternNode, node: &'t AstNode, b: &mut Scratch<'p, 't>) -> bool {
    match pat {
        PatternNode::Metavariable(name) => b.bind(name, node),
        PatternNode::WildcardArgs => false,
        PatternNode::Concrete {
            kind,
            token,
            children,
        } => {
            *kind == node.kind
                && token.as_deref() == node.token.as_deref()
                && match_seq(children, &node.children, true, b).is_some()
        }
    }
}

fn match_each<'p, 't>(pats: &'p [PatternNode], nodes: &'t [AstNode], b: &mut Scratch<'p, 't>) -> bool {
    pats.iter().zip(nodes).all(|(p, n)| match_node(p, n, b))
}

/// Match `pats` against a prefix of `nodes` and return how many nodes were
/// consumed. `anchored` requires the whole of `nodes` to be consumed.
///
/// A wildcard first consumes nothing and grows one sibling at a time until
/// the patterns after it line up. Bindings of failed tries are undone.
fn match_seq<'p, 't>(
    pats: &'p [PatternNode],
    nodes: &'t [AstNode],
    anchored: bool,
    b: &mut Scratch<'p, 't>,
) -> Option<usize> {
    let wildcard = pats.iter().position(PatternNode::is_wildcard);
    let (head, tail) = match wildcard {
        Some(w) => (&pats[..w], &pats[w + 1..]),
        None => (pats, &pats[pats.len()..]),
    };
    let fixed = head.len() + tail.len();
    if nodes.len() < fixed || (anchored && wildcard.is_none() && nodes.len() != fixed) {
        return None;
    }

    let mark = b.mark();
    if !match_each(head, &nodes[..head.len()], b) {
        b.rollback(mark);
        return None;
    }
    if wildcard.is_none() {
        return Some(head.len());
    }

    let after_head = b.mark();
    for skipped in 0..=nodes.len() - fixed {
        let from = head.len() + skipped;
        let end = from + tail.len();
        if anchored && end != nodes.len() {
            continue;
        }
        if match_each(tail, &nodes[from..end], b) {
            return Some(end);
        }
        b.rollback(after_head);
    }
    b.rollback(mark);
    None
}

fn admits(pat: &PatternNode, node: &AstNode) -> bool {
    pat.anchor_kind().is_none_or(|k| k == node.kind)
}

/// Attempt `alt` rooted exactly at `node`. Sequence patterns are tried at
/// every child of `node` as a starting sibling.
pub fn match_at<'a>(
    alt: &'a PatternAlt,
    node: &'a AstNode,
    source: &'a str,
) -> impl Iterator<Item = BindingSet> + 'a {
    let starts = match &alt.root {
        PatternRoot::Node(_) => 0..1,
        PatternRoot::Sequence(_) => 0..node.children.len(),
    };
    starts.filter_map(move |start| attempt(alt, node, start, source))
}

fn attempt(alt: &PatternAlt, node: &AstNode, start: usize, source: &str) -> Option<BindingSet> {
    let mut b = Scratch::new();
    match &alt.root {
        PatternRoot::Node(pat) => {
            if !admits(pat, node) || !match_node(pat, node, &mut b) {
                return None;
            }
            Some(b.finish(node.span, source))
        }
        PatternRoot::Sequence(pats) => {
            let siblings = &node.children[start..];
            let first = pats.first()?;
            if !first.is_wildcard() && !admits(first, siblings.first()?) {
                return None;
            }
            let consumed = match_seq(pats, siblings, false, &mut b)?;
            let covered = &siblings[..consumed];
            let span = covered
                .iter()
                .map(|n| n.span)
                .reduce(Span::cover)?;
            Some(b.finish(span, source))
        }
    }
}

/// Every match of `alt` anywhere under (and including) `root`, in pre-order.
pub fn find_matches<'a>(
    alt: &'a PatternAlt,
    root: &'a AstNode,
    source: &'a str,
) -> impl Iterator<Item = BindingSet> + 'a {
    root.preorder()
        .flat_map(move |node| match_at(alt, node, source))
}
