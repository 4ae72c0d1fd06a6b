use thiserror::Error;

pub type WiretapResult<T, E = WiretapError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum WiretapError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("tree-sitter error: {0}")]
  TreeSitter(#[from] tree_sitter::LanguageError),

  #[error("config error: {0}")]
  Config(#[from] toml::de::Error),

  #[error("cannot read rule file {path}: {source}")]
  RuleFile {
    path: String,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("rule `{rule_id}`: pattern `{pattern}` does not parse: {reason}")]
  PatternSyntax {
    rule_id: String,
    pattern: String,
    reason: String,
  },

  #[error("rule `{rule_id}`: constraint references `{name}`, which no pattern binds")]
  UnknownMetavariable { rule_id: String, name: String },

  #[error("metavariable `{0}` is not bound in this match")]
  UnboundMetavariable(String),

  #[error("rule `{rule_id}`: invalid regex: {source}")]
  InvalidRegex {
    rule_id: String,
    #[source]
    source: regex::Error,
  },

  #[error("rule `{rule_id}`: {reason}")]
  InvalidRule { rule_id: String, reason: String },

  #[error("duplicate rule id `{0}`")]
  DuplicateRule(String),

  #[error("cannot parse {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: ParseError,
  },

  #[error("other: {0}")]
  Other(String),
}

impl From<&str> for WiretapError {
  fn from(msg: &str) -> Self {
    WiretapError::Other(msg.to_owned())
  }
}

/// Why a piece of source text could not be turned into a syntax tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
  #[error("syntax error at line {line}, column {column}")]
  Syntax { line: usize, column: usize },

  #[error("source is not valid UTF-8")]
  Encoding,

  #[error("{0} grammar could not be loaded")]
  Grammar(&'static str),

  #[error("tree-sitter produced no tree")]
  NoTree,
}

#[test]
fn parse_error_message_carries_path_and_location() {
  let err = WiretapError::Parse {
    path: "src/a.js".into(),
    source: ParseError::Syntax { line: 3, column: 7 },
  };
  assert_eq!(
    err.to_string(),
    "cannot parse src/a.js: syntax error at line 3, column 7"
  );
}
