use bitflags::bitflags;
use phf::phf_map;
use std::fmt;
use std::path::Path;
use tree_sitter::Language;

/// A grammar the scanner can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lang {
    JavaScript,
    TypeScript,
    Tsx,
}

static EXTENSIONS: phf::Map<&'static str, Lang> = phf_map! {
    "js"  => Lang::JavaScript,
    "mjs" => Lang::JavaScript,
    "cjs" => Lang::JavaScript,
    "jsx" => Lang::JavaScript,
    "ts"  => Lang::TypeScript,
    "mts" => Lang::TypeScript,
    "cts" => Lang::TypeScript,
    "tsx" => Lang::Tsx,
};

impl Lang {
    pub const ALL: [Lang; 3] = [Lang::JavaScript, Lang::TypeScript, Lang::Tsx];

    /// Detect the grammar from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Lang> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        EXTENSIONS.get(ext.as_str()).copied()
    }

    /// The tag a rule uses to opt in to this grammar.
    pub fn tag(self) -> &'static str {
        match self {
            Lang::JavaScript => "javascript",
            Lang::TypeScript | Lang::Tsx => "typescript",
        }
    }

    pub fn family(self) -> LangSet {
        match self {
            Lang::JavaScript => LangSet::JAVASCRIPT,
            Lang::TypeScript | Lang::Tsx => LangSet::TYPESCRIPT,
        }
    }

    pub fn ts_language(self) -> Language {
        match self {
            Lang::JavaScript => Language::from(tree_sitter_javascript::LANGUAGE),
            Lang::TypeScript => Language::from(tree_sitter_typescript::LANGUAGE_TYPESCRIPT),
            Lang::Tsx => Language::from(tree_sitter_typescript::LANGUAGE_TSX),
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lang::JavaScript => "javascript",
            Lang::TypeScript => "typescript",
            Lang::Tsx => "tsx",
        })
    }
}

bitflags! {
    /// The `languages` a rule declares.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LangSet: u8 {
        const JAVASCRIPT = 0b0000_0001;
        const TYPESCRIPT = 0b0000_0010;
    }
}

impl LangSet {
    /// Map a rule language tag (case-insensitive) to its flag.
    pub fn from_tag(tag: &str) -> Option<LangSet> {
        match tag.to_ascii_lowercase().as_str() {
            "javascript" | "js" => Some(LangSet::JAVASCRIPT),
            "typescript" | "ts" | "tsx" => Some(LangSet::TYPESCRIPT),
            _ => None,
        }
    }

    pub fn admits(self, lang: Lang) -> bool {
        self.intersects(lang.family())
    }

    /// Every grammar a pattern of this set must be compiled for.
    pub fn grammars(self) -> impl Iterator<Item = Lang> {
        Lang::ALL.into_iter().filter(move |l| self.admits(*l))
    }

    pub fn tags(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.contains(LangSet::JAVASCRIPT) {
            out.push("javascript");
        }
        if self.contains(LangSet::TYPESCRIPT) {
            out.push("typescript");
        }
        out
    }
}

#[test]
fn from_path_recognises_known_extensions() {
    let cases = [
        ("index.js", Some(Lang::JavaScript)),
        ("INDEX.JS", Some(Lang::JavaScript)),
        ("worker.mjs", Some(Lang::JavaScript)),
        ("App.jsx", Some(Lang::JavaScript)),
        ("api.ts", Some(Lang::TypeScript)),
        ("App.tsx", Some(Lang::Tsx)),
        ("style.css", None),
        ("Makefile", None),
    ];

    for (file, expected) in cases {
        assert_eq!(Lang::from_path(Path::new(file)), expected, "case: {file}");
    }
}

#[test]
fn typescript_tag_covers_tsx_grammar() {
    let ts = LangSet::from_tag("TypeScript").unwrap();
    assert!(ts.admits(Lang::TypeScript));
    assert!(ts.admits(Lang::Tsx));
    assert!(!ts.admits(Lang::JavaScript));
    assert_eq!(ts.grammars().collect::<Vec<_>>(), vec![Lang::TypeScript, Lang::Tsx]);

    assert!(LangSet::from_tag("python").is_none());
}
