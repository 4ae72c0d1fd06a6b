pub mod placeholder;

use crate::ast::{self, AstNode, SEQUENCE_KINDS};
use crate::errors::{WiretapError, WiretapResult};
use crate::lang::Lang;
use console::style;
use placeholder::{WILDCARD_TOKEN, is_metavariable, rewrite_ellipses};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[serde(alias = "info", alias = "Info")]
    Info,
    #[serde(alias = "warning", alias = "Warning")]
    Warning,
    #[serde(alias = "error", alias = "Error")]
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Severity::Error => style("ERROR").red().bold().to_string(),
            Severity::Warning => style("WARNING").yellow().bold().to_string(),
            Severity::Info => style("INFO").cyan().bold().to_string(),
        };
        f.write_str(&s)
    }
}

impl Severity {
    /// Plain upper-case name, no terminal styling.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("unknown severity `{other}` (expected INFO, WARNING or ERROR)")),
        }
    }
}

/// One position of a compiled pattern tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternNode {
    Concrete {
        kind: &'static str,
        token: Option<Box<str>>,
        children: Vec<PatternNode>,
    },
    Metavariable(Box<str>),
    WildcardArgs,
}

impl PatternNode {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, PatternNode::WildcardArgs)
    }

    /// Node kind an AST node must have for this pattern to be worth trying.
    /// `None` means any node will do.
    pub fn anchor_kind(&self) -> Option<&'static str> {
        match self {
            PatternNode::Concrete { kind, .. } => Some(kind),
            _ => None,
        }
    }

    fn collect_metavariables(&self, out: &mut BTreeSet<String>) {
        match self {
            PatternNode::Metavariable(name) => {
                out.insert(name.to_string());
            }
            PatternNode::Concrete { children, .. } => {
                for c in children {
                    c.collect_metavariables(out);
                }
            }
            PatternNode::WildcardArgs => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternRoot {
    /// Matches a single node at any depth.
    Node(PatternNode),
    /// Matches contiguous siblings, in order.
    Sequence(Vec<PatternNode>),
}

/// One compiled alternative of a rule, for one grammar.
#[derive(Debug, Clone)]
pub struct PatternAlt {
    pub source: String,
    pub lang: Lang,
    pub root: PatternRoot,
    metavariables: BTreeSet<String>,
}

impl PatternAlt {
    pub fn metavariables(&self) -> &BTreeSet<String> {
        &self.metavariables
    }
}

/// Compile one pattern string for `lang`.
pub fn compile_pattern(rule_id: &str, text: &str, lang: Lang) -> WiretapResult<PatternAlt> {
    let syntax_error = |reason: String| WiretapError::PatternSyntax {
        rule_id: rule_id.to_owned(),
        pattern: text.to_owned(),
        reason,
    };

    // `{ a: 1 }` parses as a block; retry such patterns, and unparsable ones,
    // as a parenthesised expression.
    let prepared = rewrite_ellipses(text.trim());
    let root = match build_root(&prepared, lang) {
        Ok(root) if !is_bare_block(&root) => root,
        raw => match build_root(&format!("({prepared})"), lang) {
            Ok(root) => root,
            Err(_) => raw.map_err(syntax_error)?,
        },
    };

    let mut metavariables = BTreeSet::new();
    match &root {
        PatternRoot::Node(n) => n.collect_metavariables(&mut metavariables),
        PatternRoot::Sequence(nodes) => {
            for n in nodes {
                n.collect_metavariables(&mut metavariables);
            }
        }
    }

    Ok(PatternAlt {
        source: text.to_owned(),
        lang,
        root,
        metavariables,
    })
}

fn build_root(prepared: &str, lang: Lang) -> Result<PatternRoot, String> {
    let program = ast::parse(prepared, lang, false).map_err(|e| e.to_string())?;
    match program.children.as_slice() {
        [] => Err("pattern is empty".into()),
        [only] => {
            let lifted = match single_expression(only) {
                Some(expr) => lift(expr, false),
                None => lift(only, false),
            };
            lifted.map(PatternRoot::Node)
        }
        stmts => {
            let mut seq = lift_sequence(stmts)?;
            if seq.iter().all(PatternNode::is_wildcard) {
                return Err("pattern matches nothing but `...`".into());
            }
            // Sequences are tried at every sibling, so a leading `...` only
            // repeats the same match from earlier starts.
            if seq.first().is_some_and(PatternNode::is_wildcard) {
                seq.remove(0);
            }
            Ok(PatternRoot::Sequence(seq))
        }
    }
}

fn is_bare_block(root: &PatternRoot) -> bool {
    matches!(
        root,
        PatternRoot::Node(PatternNode::Concrete { kind: "statement_block", .. })
    )
}

fn single_expression(stmt: &AstNode) -> Option<&AstNode> {
    match (stmt.kind, stmt.children.as_slice()) {
        ("expression_statement", [expr]) => Some(expr),
        _ => None,
    }
}

fn is_wildcard_node(node: &AstNode) -> bool {
    if node.is_identifier() {
        return node.token.as_deref() == Some(WILDCARD_TOKEN);
    }
    single_expression(node).is_some_and(is_wildcard_node)
}

fn lift_sequence(nodes: &[AstNode]) -> Result<Vec<PatternNode>, String> {
    let lifted = nodes
        .iter()
        .map(|n| lift(n, true))
        .collect::<Result<Vec<_>, _>>()?;
    if lifted.iter().filter(|n| n.is_wildcard()).count() > 1 {
        return Err("only one `...` is allowed per sequence".into());
    }
    Ok(lifted)
}

fn lift(node: &AstNode, in_sequence: bool) -> Result<PatternNode, String> {
    if is_wildcard_node(node) {
        return if in_sequence {
            Ok(PatternNode::WildcardArgs)
        } else {
            Err(format!("`...` cannot stand in for a `{}`", node.kind))
        };
    }

    if node.is_identifier() {
        if let Some(name) = node.token.as_deref().filter(|t| is_metavariable(t)) {
            return Ok(PatternNode::Metavariable(name.into()));
        }
    }

    let children = if SEQUENCE_KINDS.contains(node.kind) {
        lift_sequence(&node.children)?
    } else {
        node.children
            .iter()
            .map(|c| lift(c, false))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(PatternNode::Concrete {
        kind: node.kind,
        token: node.token.clone(),
        children,
    })
}
