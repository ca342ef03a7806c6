//! Compiled ref/path pattern matcher.
//!
//! One pattern string compiles to a single AST supporting globs (`*`, `?`,
//! character classes), nested brace alternation (`{a,b}`), numeric and
//! stepped ranges (`{1..10}`, `{1..9..2}`), extglob groups (`?(…)`, `*(…)`,
//! `+(…)`, `!(…)`, `@(…)`), and capture groups (`(?<name>…)`, `(…)`).
//! Matches are always anchored to the whole candidate string, and `*`/`?`
//! never cross a `/` boundary. Host globbing libraries disagree on exactly
//! those two points (and on stepped ranges), which is why this lives here.

use std::collections::HashMap;

use thiserror::Error;

mod matcher;
mod parse;

pub use matcher::Captures;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("unterminated group in pattern '{0}'")]
    UnterminatedGroup(String),
    #[error("unterminated character class in pattern '{0}'")]
    UnterminatedClass(String),
    #[error("empty pattern")]
    Empty,
}

/// Controls the leading-dot rule used for path matching. Ref names never
/// need it; start-path matching does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// When set, a wildcard (`*`, `?`, `[…]`, extglob span) cannot match a
    /// `.` at the start of a path segment; only a literal `.` in the
    /// pattern can.
    pub require_literal_leading_dot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClassItem {
    Ch(char),
    Range(char, char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupKind {
    /// `@(…)`, `(…)`, `(?<name>…)` — exactly one branch occurrence
    Exact,
    /// `?(…)`
    ZeroOrOne,
    /// `*(…)`
    ZeroOrMore,
    /// `+(…)`
    OneOrMore,
    /// `!(…)` — any segment span not matched by a branch
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Lit(String),
    /// `?`
    Any,
    /// `*`
    Star,
    /// `**`
    Globstar,
    Class {
        negated: bool,
        items: Vec<ClassItem>,
    },
    /// Brace alternation; each branch is a sub-sequence
    Alt(Vec<Vec<Node>>),
    Group {
        kind: GroupKind,
        branches: Vec<Vec<Node>>,
        /// 1-based capture index; `Not` groups also capture their span
        index: usize,
        name: Option<String>,
    },
}

/// A compiled pattern. Negation (leading `!`) is recorded but does not
/// change what [`Pattern::matches`] reports for the body; list semantics
/// live in [`PatternList`].
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    negated: bool,
    nodes: Vec<Node>,
    capture_count: usize,
    names: HashMap<String, usize>,
    options: MatchOptions,
}

impl Pattern {
    pub fn compile(source: &str) -> Result<Self, PatternError> {
        Self::compile_with(source, MatchOptions::default())
    }

    pub fn compile_with(source: &str, options: MatchOptions) -> Result<Self, PatternError> {
        if source.is_empty() {
            return Err(PatternError::Empty);
        }
        let (negated, body) = match source.strip_prefix('!') {
            // `!(…)` is an extglob group, not a negation marker
            Some(rest) if !rest.starts_with('(') => (true, rest),
            _ => (false, source),
        };
        if body.is_empty() {
            return Err(PatternError::Empty);
        }
        let mut parser = parse::Parser::new(body, source);
        let nodes = parser.parse_top()?;
        Ok(Self {
            source: source.to_string(),
            negated,
            nodes,
            capture_count: parser.capture_count(),
            names: parser.take_names(),
            options,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Anchored match of the pattern body (negation ignored).
    pub fn matches(&self, candidate: &str) -> bool {
        matcher::matches(&self.nodes, candidate, self.options, self.capture_count).is_some()
    }

    /// Anchored match returning capture spans for `$<name>`/`$n`/`$&`
    /// expansion.
    pub fn captures<'a>(&self, candidate: &'a str) -> Option<Captures<'a>> {
        matcher::matches(&self.nodes, candidate, self.options, self.capture_count)
            .map(|spans| Captures::new(candidate, spans, &self.names))
    }
}

/// An ordered include/exclude pattern list. A candidate matches when some
/// include pattern accepts it and no later exclusion removes it; exclusions
/// never match on their own, and an include appearing after an exclusion can
/// re-add the candidate.
#[derive(Debug, Clone)]
pub struct PatternList {
    patterns: Vec<Pattern>,
}

impl PatternList {
    pub fn compile<S: AsRef<str>>(
        sources: &[S],
        options: MatchOptions,
    ) -> Result<Self, PatternError> {
        let patterns = sources
            .iter()
            .map(|s| Pattern::compile_with(s.as_ref(), options))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let mut matched = false;
        for pattern in &self.patterns {
            if pattern.is_negated() {
                if matched && pattern.matches(candidate) {
                    matched = false;
                }
            } else if !matched && pattern.matches(candidate) {
                matched = true;
            }
        }
        matched
    }
}

/// Expands every brace alternation and numeric range in `source` into the
/// list of literal alternatives, leaving all other glob syntax untouched.
/// A `{` with no matching `}` (or an empty/invalid body) is literal.
pub fn expand_braces(source: &str) -> Vec<String> {
    parse::expand_braces(source)
}

/// True when `s` still contains glob syntax after brace expansion, i.e. it
/// cannot be treated as a literal path.
pub fn has_magic(s: &str) -> bool {
    let mut chars = s.chars().peekable();
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '*' | '?' | '[' | '(' => return true,
            '!' if chars.peek() == Some(&'(') => return true,
            _ => {}
        }
    }
    false
}
