use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's Rust sources. Anything else in the checkout
// (build output, vendored reference material) is not ours to police.
const SOURCE_DIRS: &[&str] = &["survloss", "discretize", "labels", "loss", "tests", "benches"];

const FORBIDDEN_WORDS: &[&str] = &[
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

/// Which rule a collector enforces; decides both the line filter and the report.
#[derive(Clone, Copy)]
enum Rule {
    UnderscoreBinding,
    ForbiddenWord,
    StarsInComment,
    ShoutingComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscoreBinding => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWord => format!(r"(//|/\*).*(?:{})", FORBIDDEN_WORDS.join("|")),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::ShoutingComment => r"(//|/\*).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn applies_to_build_script(self) -> bool {
        matches!(self, Rule::UnderscoreBinding)
    }

    fn headline(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => "underscore-prefixed variables",
            Rule::ForbiddenWord | Rule::StarsInComment | Rule::ShoutingComment => {
                "forbidden comment patterns"
            }
            Rule::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => {
                "Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely."
            }
            Rule::ForbiddenWord => {
                "Comments describing edits (FIXED, NEW, CHANGED, UPDATED and friends) are not allowed.\n   Describe what the code does, not how it got there."
            }
            Rule::StarsInComment => {
                "The '**' pattern is not allowed in regular comments (doc comments may use it)."
            }
            Rule::ShoutingComment => {
                "Comments containing only uppercase alphabetic characters are not allowed."
            }
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] attributes are not allowed.\n   Either use the code or remove it completely."
            }
        }
    }

    /// Second-stage filter on a line the regex already matched.
    fn is_violation(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Rule::UnderscoreBinding => !is_comment(trimmed) && !inside_string(line),
            Rule::ForbiddenWord | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !trimmed.starts_with("///") && !trimmed.starts_with("//!"),
            Rule::ShoutingComment => match comment_text(line) {
                Some(text) => {
                    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                    letters.peek().is_some() && letters.all(char::is_uppercase)
                }
                None => false,
            },
        }
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

// An identifier between a pair of quotes belongs to a string literal.
fn inside_string(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn comment_text(line: &str) -> Option<&str> {
    let start = line.find("//")?;
    Some(line[start..].trim_start_matches('/').trim_start_matches('!').trim())
}

struct Collector {
    rule: Rule,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl Collector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.headline(),
            self.file_path.display()
        );
        for violation in &self.violations {
            msg.push_str(&format!("   {violation}\n"));
        }
        msg.push_str(&format!("\n⚠️ {}\n", self.rule.advice()));
        Some(msg)
    }
}

impl Sink for Collector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(rule: Rule, files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();
    let build_script = Path::new("build.rs");
    let targets = files
        .iter()
        .map(PathBuf::as_path)
        .chain(rule.applies_to_build_script().then_some(build_script));
    for path in targets {
        let mut collector = Collector::new(rule, path);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(msg) = collector.error_message() {
            return Err(msg.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let files = rust_sources();
    let rules = [
        Rule::UnderscoreBinding,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::ShoutingComment,
        Rule::AllowDeadCode,
    ];
    for rule in rules {
        if let Err(e) = scan(rule, &files) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
