//! Syntax validation of oracle output.
//!
//! A [`ValidatorSet`] maps a target path to at most one
//! [`SyntaxValidator`]. Configured rules (glob → validator) are consulted
//! first, in order; otherwise a built-in validator is chosen by file
//! extension:
//!
//! | Extension                       | Validator                         |
//! |---------------------------------|-----------------------------------|
//! | `json`                          | `serde_json`                      |
//! | `toml`                          | `toml`                            |
//! | `rs` `py` `ts` `tsx` `js` `jsx` `mjs` `cjs` `go` | tree-sitter (`syntax-check` feature) |
//!
//! Files with no validator are accepted as-is.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{PathGlob, ValidatorConfig};
use crate::exec;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Verdict on one candidate file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validation {
    /// Content is acceptable.
    Valid,
    /// Content is rejected.
    Invalid {
        /// What is wrong, fed back to the oracle on retry.
        message: String,
    },
}

impl Validation {
    /// Shorthand for [`Validation::Invalid`].
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// `true` for [`Validation::Valid`].
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Checks that content is syntactically acceptable for its path.
pub trait SyntaxValidator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Judge `content`, destined for `path`.
    fn validate(&self, path: &Path, content: &str) -> Validation;
}

// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

/// JSON documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonValidator;

impl SyntaxValidator for JsonValidator {
    fn name(&self) -> &str {
        "json"
    }

    fn validate(&self, _path: &Path, content: &str) -> Validation {
        match serde_json::from_str::<serde_json::Value>(content) {
            Ok(_) => Validation::Valid,
            Err(e) => Validation::invalid(format!("invalid JSON: {e}")),
        }
    }
}

/// TOML documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct TomlValidator;

impl SyntaxValidator for TomlValidator {
    fn name(&self) -> &str {
        "toml"
    }

    fn validate(&self, _path: &Path, content: &str) -> Validation {
        match toml::from_str::<toml::Table>(content) {
            Ok(_) => Validation::Valid,
            Err(e) => Validation::invalid(format!("invalid TOML: {}", e.message())),
        }
    }
}

#[cfg(feature = "syntax-check")]
pub use tree_sitter_check::{SourceLanguage, TreeSitterValidator};

#[cfg(feature = "syntax-check")]
mod tree_sitter_check {
    use std::path::Path;

    use tree_sitter::{Language, Node, Parser};

    use super::{SyntaxValidator, Validation};

    /// Languages with a tree-sitter grammar.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum SourceLanguage {
        Rust,
        Python,
        TypeScript,
        Tsx,
        JavaScript,
        Go,
    }

    impl SourceLanguage {
        /// Detect language from file extension.
        #[must_use]
        pub fn from_path(path: &Path) -> Option<Self> {
            match path.extension()?.to_str()? {
                "rs" => Some(Self::Rust),
                "py" => Some(Self::Python),
                "ts" => Some(Self::TypeScript),
                "tsx" => Some(Self::Tsx),
                "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
                "go" => Some(Self::Go),
                _ => None,
            }
        }

        fn grammar(self) -> Language {
            match self {
                Self::Rust => tree_sitter_rust::LANGUAGE.into(),
                Self::Python => tree_sitter_python::LANGUAGE.into(),
                Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
                Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
                Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
                Self::Go => tree_sitter_go::LANGUAGE.into(),
            }
        }

        const fn label(self) -> &'static str {
            match self {
                Self::Rust => "rust",
                Self::Python => "python",
                Self::TypeScript => "typescript",
                Self::Tsx => "tsx",
                Self::JavaScript => "javascript",
                Self::Go => "go",
            }
        }
    }

    /// Rejects source that does not parse cleanly: any `ERROR` or missing
    /// node in the tree is a failure.
    #[derive(Clone, Copy, Debug)]
    pub struct TreeSitterValidator {
        language: SourceLanguage,
    }

    impl TreeSitterValidator {
        #[must_use]
        pub const fn new(language: SourceLanguage) -> Self {
            Self { language }
        }
    }

    impl SyntaxValidator for TreeSitterValidator {
        fn name(&self) -> &str {
            self.language.label()
        }

        fn validate(&self, _path: &Path, content: &str) -> Validation {
            let mut parser = Parser::new();
            if let Err(e) = parser.set_language(&self.language.grammar()) {
                return Validation::invalid(format!("{} parser setup failed: {e}", self.name()));
            }
            let Some(tree) = parser.parse(content, None) else {
                return Validation::invalid(format!("{} parser gave up", self.name()));
            };
            let root = tree.root_node();
            if !root.has_error() {
                return Validation::Valid;
            }
            match first_error(root) {
                Some(node) => {
                    let pos = node.start_position();
                    let what = if node.is_missing() {
                        format!("missing `{}`", node.kind())
                    } else {
                        "syntax error".to_owned()
                    };
                    Validation::invalid(format!(
                        "{} {what} at line {}, column {}",
                        self.name(),
                        pos.row + 1,
                        pos.column + 1
                    ))
                }
                None => Validation::invalid(format!("{} syntax error", self.name())),
            }
        }
    }

    /// Depth-first search for the first error or missing node.
    fn first_error(node: Node<'_>) -> Option<Node<'_>> {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if !node.has_error() {
            return None;
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();
        children.into_iter().find_map(first_error)
    }
}

// ---------------------------------------------------------------------------
// CommandValidator
// ---------------------------------------------------------------------------

/// Runs a shell command with the candidate content on stdin; exit 0 means
/// valid, anything else is invalid with stderr (or stdout) as the message.
#[derive(Clone, Debug)]
pub struct CommandValidator {
    command: String,
    cwd: PathBuf,
    timeout: Duration,
}

impl CommandValidator {
    #[must_use]
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            timeout,
        }
    }
}

impl SyntaxValidator for CommandValidator {
    fn name(&self) -> &str {
        &self.command
    }

    fn validate(&self, path: &Path, content: &str) -> Validation {
        let env = [("TASKMERGE_PATH", path.as_os_str().to_owned())];
        match exec::run_shell(
            &self.command,
            &self.cwd,
            &env,
            Some(content.as_bytes()),
            self.timeout,
        ) {
            Ok(out) if out.success() => Validation::Valid,
            Ok(out) => {
                let mut summary = out.failure_summary();
                if out.stderr.trim().is_empty() {
                    let stdout = String::from_utf8_lossy(&out.stdout);
                    let stdout = stdout.trim();
                    if !stdout.is_empty() {
                        summary = format!("{summary}: {stdout}");
                    }
                }
                Validation::invalid(format!("`{}` rejected the content: {summary}", self.command))
            }
            Err(e) => Validation::invalid(format!("could not run `{}`: {e}", self.command)),
        }
    }
}

// ---------------------------------------------------------------------------
// ValidatorSet
// ---------------------------------------------------------------------------

/// Chooses the validator for a path.
pub struct ValidatorSet {
    rules: Vec<(PathGlob, Box<dyn SyntaxValidator>)>,
    builtins: bool,
}

impl fmt::Debug for ValidatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorSet")
            .field(
                "rules",
                &self
                    .rules
                    .iter()
                    .map(|(g, v)| (g.as_str(), v.name()))
                    .collect::<Vec<_>>(),
            )
            .field("builtins", &self.builtins)
            .finish()
    }
}

impl Default for ValidatorSet {
    fn default() -> Self {
        Self::builtin()
    }
}

static JSON: JsonValidator = JsonValidator;
static TOML: TomlValidator = TomlValidator;

impl ValidatorSet {
    /// Built-in validators only.
    #[must_use]
    pub const fn builtin() -> Self {
        Self {
            rules: Vec::new(),
            builtins: true,
        }
    }

    /// No validation at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            rules: Vec::new(),
            builtins: false,
        }
    }

    /// Built-ins plus one [`CommandValidator`] per configured entry, run
    /// from `cwd`.
    ///
    /// # Errors
    /// Returns the offending pattern if a `match` glob does not compile.
    pub fn from_config(validators: &[ValidatorConfig], cwd: &Path) -> Result<Self, String> {
        let mut set = Self::builtin();
        for v in validators {
            let validator = CommandValidator::new(
                v.command.clone(),
                cwd,
                Duration::from_secs(v.timeout_secs),
            );
            set = set.with_rule(&v.match_glob, Box::new(validator))?;
        }
        Ok(set)
    }

    /// Add a rule. Rules are consulted in insertion order, before built-ins.
    ///
    /// # Errors
    /// Returns a message if `pattern` does not compile.
    pub fn with_rule(
        mut self,
        pattern: &str,
        validator: Box<dyn SyntaxValidator>,
    ) -> Result<Self, String> {
        let glob = PathGlob::new(pattern).map_err(|e| format!("{pattern:?}: {e}"))?;
        self.rules.push((glob, validator));
        Ok(self)
    }

    /// The validator for `path`, if any.
    #[must_use]
    pub fn for_path(&self, path: &Path) -> Option<&dyn SyntaxValidator> {
        if let Some((_, v)) = self.rules.iter().find(|(g, _)| g.matches(path)) {
            return Some(v.as_ref());
        }
        if !self.builtins {
            return None;
        }
        builtin_for(path)
    }
}

fn builtin_for(path: &Path) -> Option<&'static dyn SyntaxValidator> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => return Some(&JSON),
        Some("toml") => return Some(&TOML),
        _ => {}
    }
    source_validator(path)
}

#[cfg(feature = "syntax-check")]
fn source_validator(path: &Path) -> Option<&'static dyn SyntaxValidator> {
    static RUST: TreeSitterValidator = TreeSitterValidator::new(SourceLanguage::Rust);
    static PYTHON: TreeSitterValidator = TreeSitterValidator::new(SourceLanguage::Python);
    static TYPESCRIPT: TreeSitterValidator = TreeSitterValidator::new(SourceLanguage::TypeScript);
    static TSX: TreeSitterValidator = TreeSitterValidator::new(SourceLanguage::Tsx);
    static JAVASCRIPT: TreeSitterValidator = TreeSitterValidator::new(SourceLanguage::JavaScript);
    static GO: TreeSitterValidator = TreeSitterValidator::new(SourceLanguage::Go);

    Some(match SourceLanguage::from_path(path)? {
        SourceLanguage::Rust => &RUST,
        SourceLanguage::Python => &PYTHON,
        SourceLanguage::TypeScript => &TYPESCRIPT,
        SourceLanguage::Tsx => &TSX,
        SourceLanguage::JavaScript => &JAVASCRIPT,
        SourceLanguage::Go => &GO,
    })
}

#[cfg(not(feature = "syntax-check"))]
const fn source_validator(_path: &Path) -> Option<&'static dyn SyntaxValidator> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(path: &str, content: &str) -> Option<Validation> {
        let set = ValidatorSet::builtin();
        set.for_path(Path::new(path))
            .map(|v| v.validate(Path::new(path), content))
    }

    #[test]
    fn json_and_toml() {
        assert_eq!(check("a.json", r#"{"a": 1}"#), Some(Validation::Valid));
        assert!(matches!(
            check("a.json", r#"{"a": 1"#),
            Some(Validation::Invalid { message }) if message.contains("invalid JSON")
        ));
        assert_eq!(check("Cargo.toml", "[package]\nname = \"x\"\n"), Some(Validation::Valid));
        assert!(matches!(check("x.toml", "[package\n"), Some(Validation::Invalid { .. })));
    }

    #[test]
    fn unknown_extension_has_no_validator() {
        assert_eq!(check("notes.txt", "{{{"), None);
        assert_eq!(check("Makefile", "{{{"), None);
    }

    #[test]
    fn none_set_validates_nothing() {
        assert!(ValidatorSet::none().for_path(Path::new("a.json")).is_none());
    }

    #[cfg(feature = "syntax-check")]
    #[test]
    fn tree_sitter_accepts_valid_and_locates_errors() {
        assert_eq!(check("lib.rs", "fn main() { let x = 1; }\n"), Some(Validation::Valid));
        let Some(Validation::Invalid { message }) = check("lib.rs", "fn main() {\n    let x = ;\n}\n")
        else {
            panic!("expected invalid");
        };
        assert!(message.starts_with("rust"), "{message}");
        assert!(message.contains("line "), "{message}");

        assert_eq!(check("a.py", "def f():\n    return 1\n"), Some(Validation::Valid));
        assert!(matches!(check("a.py", "def f(:\n"), Some(Validation::Invalid { .. })));
        assert_eq!(check("a.go", "package main\n\nfunc main() {}\n"), Some(Validation::Valid));
        assert_eq!(check("a.ts", "const x: number = 1;\n"), Some(Validation::Valid));
        assert_eq!(check("a.tsx", "const x = <div>hi</div>;\n"), Some(Validation::Valid));
        assert_eq!(check("a.js", "function f() { return 1; }\n"), Some(Validation::Valid));
    }

    #[test]
    fn rules_take_precedence_over_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let set = ValidatorSet::builtin()
            .with_rule(
                "*.json",
                Box::new(CommandValidator::new("grep -q ok", dir.path(), Duration::from_secs(10))),
            )
            .unwrap();
        let v = set.for_path(Path::new("cfg/a.json")).unwrap();
        assert_eq!(v.name(), "grep -q ok");
        // Not JSON at all, but the rule only wants "ok".
        assert!(v.validate(Path::new("cfg/a.json"), "ok then").is_valid());
        assert!(!v.validate(Path::new("cfg/a.json"), "{}").is_valid());
    }

    #[test]
    fn command_validator_reports_output() {
        let dir = tempfile::tempdir().unwrap();
        let v = CommandValidator::new(
            "echo \"bad indent in $TASKMERGE_PATH\" >&2; exit 1",
            dir.path(),
            Duration::from_secs(10),
        );
        let Validation::Invalid { message } = v.validate(Path::new("a.yaml"), "x: [") else {
            panic!("expected invalid");
        };
        assert!(message.contains("bad indent in a.yaml"), "{message}");
    }

    #[test]
    fn from_config_builds_rules() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = vec![ValidatorConfig {
            match_glob: "*.yaml".to_owned(),
            command: "cat >/dev/null".to_owned(),
            timeout_secs: 5,
        }];
        let set = ValidatorSet::from_config(&cfg, dir.path()).unwrap();
        assert_eq!(set.for_path(Path::new("a.yaml")).unwrap().name(), "cat >/dev/null");
        assert_eq!(set.for_path(Path::new("a.json")).unwrap().name(), "json");
    }
}
