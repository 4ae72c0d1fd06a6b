use crate::constraints::Constraint;
use crate::errors::{WiretapError, WiretapResult};
use crate::lang::{Lang, LangSet};
use crate::patterns::{PatternAlt, Severity, compile_pattern};
use ignore::WalkBuilder;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static BUILTIN_RULES: &str = include_str!("network.yaml");

/// Opaque per-rule metadata, passed through to every match.
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<RuleSource>,
}

/// A rule as written in a rule file, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuleSource {
    pub id: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub pattern_either: Vec<EitherClause>,
    #[serde(default)]
    pub metavariable_regex: OneOrMany<RegexSource>,
    #[serde(default)]
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EitherClause {
    pub pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegexSource {
    pub metavariable: String,
    pub regex: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(t) => vec![t],
            OneOrMany::Many(v) => v,
        }
    }
}

/// A validated rule with its patterns compiled for every grammar it covers.
/// Immutable once built.
#[derive(Debug)]
pub struct Rule {
    pub id: String,
    pub languages: LangSet,
    /// Pattern text as written, in declaration order.
    pub patterns: Vec<String>,
    alternatives: HashMap<Lang, Vec<PatternAlt>>,
    pub constraints: Vec<Constraint>,
    pub message: String,
    pub severity: Severity,
    pub metadata: Arc<Metadata>,
}

impl Rule {
    /// OR-alternatives compiled for `lang`; empty when the rule does not
    /// cover it.
    pub fn alternatives(&self, lang: Lang) -> &[PatternAlt] {
        self.alternatives.get(&lang).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Validate `source` and compile every pattern in it.
pub fn compile(source: RuleSource) -> WiretapResult<Rule> {
    let id = source.id.trim().to_owned();
    let invalid = |reason: String| WiretapError::InvalidRule {
        rule_id: if id.is_empty() { "<unnamed>".into() } else { id.clone() },
        reason,
    };
    if id.is_empty() {
        return Err(invalid("rule id must not be empty".into()));
    }

    let mut languages = LangSet::empty();
    for tag in &source.languages {
        languages |= LangSet::from_tag(tag).ok_or_else(|| invalid(format!("unknown language `{tag}`")))?;
    }
    if languages.is_empty() {
        return Err(invalid("no languages given".into()));
    }

    let patterns: Vec<String> = source
        .pattern
        .into_iter()
        .chain(source.patterns)
        .chain(source.pattern_either.into_iter().map(|c| c.pattern))
        .collect();
    if patterns.is_empty() {
        return Err(invalid("no patterns given".into()));
    }

    let mut alternatives = HashMap::new();
    let mut bound = BTreeSet::new();
    for lang in languages.grammars() {
        let compiled = patterns
            .iter()
            .map(|p| compile_pattern(&id, p, lang))
            .collect::<WiretapResult<Vec<_>>>()?;
        for alt in &compiled {
            bound.extend(alt.metavariables().iter().cloned());
        }
        alternatives.insert(lang, compiled);
    }

    let constraints = source
        .metavariable_regex
        .into_vec()
        .into_iter()
        .map(|c| {
            if !bound.contains(&c.metavariable) {
                return Err(WiretapError::UnknownMetavariable {
                    rule_id: id.clone(),
                    name: c.metavariable,
                });
            }
            Constraint::metavariable_regex(&id, &c.metavariable, &c.regex)
        })
        .collect::<WiretapResult<Vec<_>>>()?;

    tracing::debug!(rule = %id, patterns = patterns.len(), "compiled rule");

    Ok(Rule {
        id,
        languages,
        patterns,
        alternatives,
        constraints,
        message: source.message,
        severity: source.severity,
        metadata: Arc::new(source.metadata),
    })
}

/// Ordered collection of compiled rules with unique ids.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Parse and compile every rule in a YAML rule document. `origin` names
    /// the document in errors.
    pub fn from_yaml(text: &str, origin: &str) -> WiretapResult<RuleSet> {
        let file: RuleFile = serde_yaml::from_str(text).map_err(|source| WiretapError::RuleFile {
            path: origin.to_owned(),
            source,
        })?;
        let mut set = RuleSet::default();
        for source in file.rules {
            set.push(compile(source)?)?;
        }
        Ok(set)
    }

    /// The network-communication rules shipped with the scanner.
    pub fn builtin() -> WiretapResult<RuleSet> {
        RuleSet::from_yaml(BUILTIN_RULES, "<builtin>")
    }

    /// Built-in rules (if wanted) followed by every rule file found at
    /// `paths`. Directories are searched for `*.yaml` / `*.yml`.
    pub fn load(builtin: bool, paths: &[PathBuf]) -> WiretapResult<RuleSet> {
        let mut set = if builtin { RuleSet::builtin()? } else { RuleSet::default() };
        for path in paths {
            for file in rule_files(path)? {
                let text = fs::read_to_string(&file)?;
                let origin = file.display().to_string();
                let loaded = RuleSet::from_yaml(&text, &origin)?;
                tracing::debug!(path = %origin, rules = loaded.len(), "loaded rule file");
                set.extend(loaded)?;
            }
        }
        Ok(set)
    }

    pub fn push(&mut self, rule: Rule) -> WiretapResult<()> {
        if self.get(&rule.id).is_some() {
            return Err(WiretapError::DuplicateRule(rule.id));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn extend(&mut self, other: RuleSet) -> WiretapResult<()> {
        other.rules.into_iter().try_for_each(|r| self.push(r))
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn rule_files(path: &Path) -> WiretapResult<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(WiretapError::Other(format!("rule path {} does not exist", path.display())));
    }

    let mut files: Vec<PathBuf> = WalkBuilder::new(path)
        .hidden(true)
        .git_ignore(false)
        .build()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(yaml: &str) -> WiretapResult<RuleSet> {
        RuleSet::from_yaml(yaml, "test.yaml")
    }

    #[test]
    fn builtin_rules_compile() {
        let set = RuleSet::builtin().expect("built-in rules must compile");
        for id in [
            "detect-fetch-requests",
            "detect-axios-requests",
            "detect-xmlhttprequest",
            "detect-node-http-requests",
            "detect-websocket-connections",
            "detect-raw-sockets",
            "detect-custom-http-libraries",
            "detect-dynamic-imports",
        ] {
            let rule = set.get(id).unwrap_or_else(|| panic!("missing {id}"));
            assert!(!rule.alternatives(Lang::JavaScript).is_empty(), "{id}");
            assert!(!rule.alternatives(Lang::Tsx).is_empty(), "{id}");
        }
        let axios = set.get("detect-axios-requests").unwrap();
        assert_eq!(axios.alternatives(Lang::JavaScript).len(), 2);
    }

    #[test]
    fn pattern_aliases_are_all_alternatives() {
        let set = one(
            r#"rules:
  - id: r
    languages: [js]
    pattern: a()
    patterns: [b()]
    pattern-either:
      - pattern: c()
    message: m
    severity: info
"#,
        )
        .unwrap();
        let rule = set.get("r").unwrap();
        assert_eq!(rule.patterns, vec!["a()", "b()", "c()"]);
        assert_eq!(rule.severity, Severity::Info);
        assert!(rule.alternatives(Lang::TypeScript).is_empty());
    }

    #[test]
    fn metadata_passes_through() {
        let set = one(
            r#"rules:
  - id: r
    languages: [javascript]
    patterns: [fetch($URL)]
    message: m
    severity: ERROR
    metadata:
      cwe: "CWE-200"
      confidence: 3
"#,
        )
        .unwrap();
        let meta = &set.get("r").unwrap().metadata;
        assert_eq!(meta["cwe"], serde_json::json!("CWE-200"));
        assert_eq!(meta["confidence"], serde_json::json!(3));
    }

    #[test]
    fn constraint_on_unbound_metavariable_is_fatal() {
        let err = one(
            r#"rules:
  - id: r
    languages: [javascript]
    patterns: [fetch($URL)]
    metavariable-regex:
      metavariable: $HOST
      regex: x
    message: m
    severity: ERROR
"#,
        )
        .unwrap_err();
        assert!(matches!(err, WiretapError::UnknownMetavariable { ref name, .. } if name == "$HOST"));
    }

    #[test]
    fn broken_pattern_is_fatal() {
        let err = one(
            r#"rules:
  - id: r
    languages: [javascript]
    patterns: ["fetch($URL"]
    message: m
    severity: ERROR
"#,
        )
        .unwrap_err();
        assert!(matches!(err, WiretapError::PatternSyntax { ref rule_id, .. } if rule_id == "r"));
    }

    #[test]
    fn invalid_records_are_rejected() {
        let cases = [
            ("id: \"\"\n    languages: [js]\n    patterns: [a()]", "empty id"),
            ("id: r\n    languages: []\n    patterns: [a()]", "no languages"),
            ("id: r\n    languages: [cobol]\n    patterns: [a()]", "unknown language"),
            ("id: r\n    languages: [js]", "no patterns"),
        ];
        for (body, what) in cases {
            let yaml = format!("rules:\n  - {body}\n    message: m\n    severity: INFO\n");
            let err = one(&yaml).unwrap_err();
            assert!(matches!(err, WiretapError::InvalidRule { .. }), "{what}: {err}");
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let yaml = r#"rules:
  - id: r
    languages: [js]
    patterns: [a()]
    severity: INFO
  - id: r
    languages: [js]
    patterns: [b()]
    severity: INFO
"#;
        assert!(matches!(one(yaml).unwrap_err(), WiretapError::DuplicateRule(id) if id == "r"));
    }

    #[test]
    fn malformed_yaml_names_the_file() {
        let err = one("rules: [").unwrap_err();
        assert!(err.to_string().contains("test.yaml"));
    }

    #[test]
    fn load_reads_rule_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("extra.yml"),
            "rules:\n  - id: custom\n    languages: [ts]\n    patterns: [beacon($X)]\n    severity: INFO\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a rule").unwrap();

        let set = RuleSet::load(false, &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get("custom").unwrap().languages.admits(Lang::Tsx));

        let both = RuleSet::load(true, &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(both.len(), RuleSet::builtin().unwrap().len() + 1);

        let clash = RuleSet::load(true, &[dir.path().to_path_buf(), dir.path().to_path_buf()]);
        assert!(matches!(clash, Err(WiretapError::DuplicateRule(_))));
    }
}
