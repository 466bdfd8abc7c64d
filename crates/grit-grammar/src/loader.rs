//! Grammar documents and loading them by id.
//!
//! ```text
//! grammar Calc;
//! import Base;
//!
//! fragment DIGIT: [0-9];
//! NUM: DIGIT+;
//! WS { "options": "skip" }: [ \t\r\n]+;
//! sum { "order": 1, "categories": ["expression"] }: NUM ('+' NUM)* -> fold(add);
//! ```

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    error::CompileError,
    grammar::{CompileOptions, Grammar, GrammarBuilder, RuleDefinition},
};

static HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^grammar\s+([A-Za-z_][\w.\-]*)$").expect("header pattern"));
static IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^import\s+([A-Za-z_][\w.\-]*)$").expect("import pattern"));
static RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(fragment\s+)?([A-Za-z_]\w*)\s*(\{.*?\})?\s*:(.*)$").expect("rule pattern")
});
static TAG_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ ,]+").expect("tag separator pattern"));

#[derive(Clone, Debug)]
pub struct GrammarDocument {
    pub name: String,
    pub parent: Option<String>,
    pub rules: Vec<RuleDefinition>,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RuleAttributes {
    order: Option<i64>,
    categories: Tags,
    options: Tags,
}

/// Either `["a", "b"]` or `"a b"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Tags {
    List(Vec<String>),
    Text(String),
}

impl Default for Tags {
    fn default() -> Self {
        Tags::List(Vec::new())
    }
}

impl Tags {
    fn into_vec(self) -> Vec<String> {
        match self {
            Tags::List(list) => list,
            Tags::Text(text) => TAG_SEPARATOR
                .split(&text)
                .filter(|tag| !tag.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}

struct Statement {
    line: usize,
    text: String,
}

/// Splits a document at top-level `;`, dropping comments.
fn split_statements(src: &str) -> Result<Vec<Statement>, CompileError> {
    let bytes = src.as_bytes();
    let malformed = |line, message| CompileError::MalformedDeclaration { line, message };

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut start_line = None;
    let mut line = 1;
    let mut parens = 0usize;
    let mut braces = 0usize;

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if start_line.is_none() && !b.is_ascii_whitespace() && b != b'/' {
            start_line = Some(line);
        }

        let segment_end = match b {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let end = src[i..].find('\n').map_or(src.len(), |n| i + n);
                i = end;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let Some(n) = src[i + 2..].find("*/") else {
                    return Err(malformed(line, "Unterminated block comment"));
                };
                let end = i + 2 + n + 2;
                line += src[i..end].matches('\n').count();
                current.push(' ');
                i = end;
                continue;
            }
            b'\'' | b'"' => {
                let mut j = i + 1;
                loop {
                    match bytes.get(j) {
                        Some(b'\\') => j += 2,
                        Some(&q) if q == b => break j + 1,
                        Some(_) => j += 1,
                        None => return Err(malformed(line, "Unterminated literal")),
                    }
                }
            }
            b'[' if braces == 0 => {
                let mut j = i + 1;
                loop {
                    match bytes.get(j) {
                        Some(b'\\') => j += 2,
                        Some(b']') if j > i + 1 => break j + 1,
                        Some(_) => j += 1,
                        None => return Err(malformed(line, "Unterminated character class")),
                    }
                }
            }
            b'(' => {
                parens += 1;
                i + 1
            }
            b')' => {
                parens = parens.saturating_sub(1);
                i + 1
            }
            b'{' => {
                braces += 1;
                i + 1
            }
            b'}' => {
                braces = braces.saturating_sub(1);
                i + 1
            }
            b';' if parens == 0 && braces == 0 => {
                let text = current.trim();
                if !text.is_empty() {
                    statements.push(Statement {
                        line: start_line.unwrap_or(line),
                        text: text.to_owned(),
                    });
                }
                current.clear();
                start_line = None;
                i += 1;
                continue;
            }
            _ => i + src[i..].chars().next().map_or(1, char::len_utf8),
        };

        let segment = &src[i..segment_end];
        line += segment.matches('\n').count();
        current.push_str(segment);
        i = segment_end;
    }

    if !current.trim().is_empty() {
        return Err(malformed(start_line.unwrap_or(line), "Missing `;`"));
    }

    Ok(statements)
}

pub fn parse_document(src: &str) -> Result<GrammarDocument, CompileError> {
    let mut statements = split_statements(src)?.into_iter();

    let header = statements.next().ok_or(CompileError::MissingHeader)?;
    let name = HEADER
        .captures(&header.text)
        .and_then(|captures| captures.get(1))
        .ok_or(CompileError::MissingHeader)?
        .as_str()
        .to_owned();

    let mut document = GrammarDocument {
        name,
        parent: None,
        rules: Vec::new(),
    };

    for Statement { line, text } in statements {
        if text.starts_with("import") && !text.contains(':') {
            let Some(parent) = IMPORT.captures(&text).and_then(|c| c.get(1)) else {
                return Err(CompileError::MalformedDeclaration {
                    line,
                    message: "Expected a single grammar name after `import`",
                });
            };
            if document.parent.is_some() {
                return Err(CompileError::MalformedDeclaration {
                    line,
                    message: "Only one parent grammar can be imported",
                });
            }
            document.parent = Some(parent.as_str().to_owned());
            continue;
        }

        let Some(captures) = RULE.captures(&text) else {
            return Err(CompileError::MalformedDeclaration {
                line,
                message: "Expected a rule declaration",
            });
        };

        let id = captures[2].to_owned();
        let attributes: RuleAttributes = match captures.get(3) {
            Some(json) => serde_json::from_str(json.as_str()).map_err(|source| {
                CompileError::InvalidAttributes {
                    rule: id.clone(),
                    source,
                }
            })?,
            None => RuleAttributes::default(),
        };

        let mut options = attributes.options.into_vec();
        if captures.get(1).is_some() && !options.iter().any(|o| o == "fragment") {
            options.push("fragment".to_owned());
        }

        document.rules.push(RuleDefinition {
            id,
            body: captures[4].trim().to_owned(),
            order: attributes.order,
            categories: attributes.categories.into_vec(),
            options,
        });
    }

    Ok(document)
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("grammar `{0}` was not found")]
    NotFound(String),
    #[error("grammar imports form a cycle: {}", .0.join(" -> "))]
    CyclicImport(Vec<String>),
    #[error("failed to read `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to compile grammar `{id}`")]
    Compile {
        id: String,
        #[source]
        source: CompileError,
    },
}

/// Somewhere grammar documents can be looked up by id.
pub trait GrammarSource {
    fn read_grammar(&self, id: &str) -> Result<String, LoadError>;
}

impl GrammarSource for HashMap<String, String> {
    fn read_grammar(&self, id: &str) -> Result<String, LoadError> {
        self.get(id)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(id.to_owned()))
    }
}

/// Looks for `<dir>/<id>.grammar` or `<dir>/<id>.grammar/grammar.g` in each directory in turn.
#[derive(Clone, Default, Debug)]
pub struct SearchPaths {
    dirs: Vec<PathBuf>,
}

impl SearchPaths {
    pub fn new<P: Into<PathBuf>>(dirs: impl IntoIterator<Item = P>) -> SearchPaths {
        SearchPaths {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }
    pub fn push(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push(dir.into());
    }
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
    fn find(&self, id: &str) -> Option<PathBuf> {
        self.dirs.iter().find_map(|dir| {
            let file = dir.join(format!("{id}.grammar"));
            if file.is_file() {
                return Some(file);
            }
            let bundled = file.join("grammar.g");
            bundled.is_file().then_some(bundled)
        })
    }
}

impl GrammarSource for SearchPaths {
    fn read_grammar(&self, id: &str) -> Result<String, LoadError> {
        let path = self
            .find(id)
            .ok_or_else(|| LoadError::NotFound(id.to_owned()))?;
        read_file(&path)
    }
}

pub fn read_file(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_owned(),
        source,
    })
}

/// Builds grammars from documents, resolving their imports through a [`GrammarSource`].
pub struct GrammarLoader<S> {
    source: S,
    options: CompileOptions,
    cache: HashMap<String, Grammar>,
}

impl<S: GrammarSource> GrammarLoader<S> {
    pub fn new(source: S) -> GrammarLoader<S> {
        Self::with_options(source, CompileOptions::default())
    }

    pub fn with_options(source: S, options: CompileOptions) -> GrammarLoader<S> {
        GrammarLoader {
            source,
            options,
            cache: HashMap::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn load(&mut self, id: &str) -> Result<Grammar, LoadError> {
        self.load_id(id, &mut Vec::new())
    }

    /// Builds a grammar from document text, its imports are still looked up by id.
    pub fn load_str(&mut self, src: &str) -> Result<Grammar, LoadError> {
        let document = parse_document(src).map_err(|source| LoadError::Compile {
            id: "<input>".to_owned(),
            source,
        })?;
        self.build(document, &mut Vec::new())
    }

    fn load_id(&mut self, id: &str, stack: &mut Vec<String>) -> Result<Grammar, LoadError> {
        if let Some(grammar) = self.cache.get(id) {
            return Ok(grammar.clone());
        }

        let text = self.source.read_grammar(id)?;
        let document = parse_document(&text).map_err(|source| LoadError::Compile {
            id: id.to_owned(),
            source,
        })?;
        if document.name != id {
            log::warn!("grammar `{id}` declares itself as `{}`", document.name);
        }

        let grammar = self.build(document, stack)?;
        self.cache.insert(id.to_owned(), grammar.clone());
        Ok(grammar)
    }

    fn build(
        &mut self,
        document: GrammarDocument,
        stack: &mut Vec<String>,
    ) -> Result<Grammar, LoadError> {
        if stack.contains(&document.name) {
            let mut chain = stack.clone();
            chain.push(document.name);
            return Err(LoadError::CyclicImport(chain));
        }

        stack.push(document.name.clone());
        let builder = match &document.parent {
            Some(parent) => self
                .load_id(parent, stack)
                .map(|parent| GrammarBuilder::extending(&parent)),
            None => Ok(GrammarBuilder::with_options(self.options.clone())),
        };
        stack.pop();

        let mut builder = builder?;
        builder.set_name(&document.name);
        log::debug!(
            "building grammar `{}` with {} rules",
            document.name,
            document.rules.len()
        );
        builder
            .compile_all(document.rules)
            .map_err(|source| LoadError::Compile {
                id: document.name.clone(),
                source,
            })?;
        Ok(builder.build())
    }
}
