//! Column-position recovery from SAS data-step declarations.
//!
//! The declaration text is tokenized once and split into statements. Only
//! the `INPUT` statement creates layout entries; every other statement
//! (`LENGTH`, `FORMAT`, `INFORMAT`, `LABEL`, ...) can at most supply a width
//! for a variable that `INPUT` placed at a single column.
//!
//! Grammar accepted inside `INPUT`, one declaration at a time:
//!
//! ```text
//! declaration := [ "@" INT ] NAME [ "$" ] position [ informat ]
//!              | "@" INT NAME [ "$" ] informat
//! position    := INT "-" INT | INT
//! informat    := [ "$" ] ( INT "." [INT] | WORD "." [INT] )
//! ```
//!
//! Width precedence for a variable: explicit `start-end` range, then a
//! discovered width (trailing informat, or an override found in another
//! statement), then the [`WidthPolicy`] fallback.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
};

use encoding_rs::Encoding;
use log::debug;
use serde::Serialize;

use crate::{
    dialect::{Dialect, WidthPolicy},
    error::{IngestError, IngestResult},
};

const OVERRIDE_WIDTH_MIN: usize = 1;
const OVERRIDE_WIDTH_MAX: usize = 12;

/// Zero-indexed, half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    /// Builds a range from SAS's 1-indexed inclusive columns.
    pub fn from_columns(first: usize, last: usize) -> Option<Self> {
        if first == 0 || last < first {
            return None;
        }
        Some(Self {
            start: first - 1,
            end: last,
        })
    }

    pub fn from_start_width(first: usize, width: usize) -> Option<Self> {
        if width == 0 {
            return None;
        }
        Self::from_columns(first, first.checked_add(width - 1)?)
    }

    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start + 1, self.end)
    }
}

/// Where a field's width came from, ordered by precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidthSource {
    DefaultOne,
    Override,
    Informat,
    Range,
}

impl WidthSource {
    fn rank(self) -> u8 {
        match self {
            WidthSource::DefaultOne => 1,
            WidthSource::Override | WidthSource::Informat => 2,
            WidthSource::Range => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WidthSource::DefaultOne => "default",
            WidthSource::Override => "override",
            WidthSource::Informat => "informat",
            WidthSource::Range => "range",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub range: ByteRange,
    pub source: WidthSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnLayout {
    fields: BTreeMap<String, FieldSpec>,
    unresolved: Vec<String>,
}

impl ColumnLayout {
    /// Reads and parses a declaration file. Undecodable bytes are replaced,
    /// never fatal.
    pub fn from_path(
        path: &Path,
        encoding: &'static Encoding,
        policy: WidthPolicy,
    ) -> IngestResult<Self> {
        let bytes = std::fs::read(path).map_err(|err| IngestError::io(path, err))?;
        let (text, _, _) = encoding.decode(&bytes);
        Self::parse_named(&text, &format!("{path:?}"), policy)
    }

    pub fn parse(text: &str, policy: WidthPolicy) -> IngestResult<Self> {
        Self::parse_named(text, "<inline>", policy)
    }

    pub fn parse_named(text: &str, origin: &str, policy: WidthPolicy) -> IngestResult<Self> {
        let statements = split_statements(tokenize(text));
        let input_idx = statements
            .iter()
            .position(Statement::is_input)
            .ok_or_else(|| IngestError::NoDeclaration {
                origin: origin.to_string(),
            })?;

        let mut layout = ColumnLayout::default();
        let mut pending: Vec<(String, usize)> = Vec::new();

        for declaration in parse_input(&statements[input_idx].tokens) {
            match declaration.width {
                DeclaredWidth::Through(last) => match ByteRange::from_columns(declaration.first, last) {
                    Some(range) => layout.offer(declaration.name, range, WidthSource::Range),
                    None => debug!(
                        "Ignoring '{}': invalid columns {}-{}",
                        declaration.name, declaration.first, last
                    ),
                },
                DeclaredWidth::Exactly(width) => {
                    match ByteRange::from_start_width(declaration.first, width) {
                        Some(range) => layout.offer(declaration.name, range, WidthSource::Informat),
                        None => debug!(
                            "Ignoring '{}': invalid column {} width {}",
                            declaration.name, declaration.first, width
                        ),
                    }
                }
                DeclaredWidth::Unknown => {
                    if declaration.first == 0 {
                        debug!("Ignoring '{}': column 0", declaration.name);
                    } else {
                        pending.push((declaration.name, declaration.first));
                    }
                }
            }
        }

        let overrides = collect_width_overrides(
            statements
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != input_idx)
                .map(|(_, statement)| statement),
        );

        for (name, first) in pending {
            if layout
                .fields
                .get(&name)
                .is_some_and(|existing| existing.source.rank() >= WidthSource::Override.rank())
            {
                continue;
            }
            if let Some(&width) = overrides.get(&name) {
                debug!("Width override for '{name}': {width}");
                if let Some(range) = ByteRange::from_start_width(first, width) {
                    layout.offer(name, range, WidthSource::Override);
                }
                continue;
            }
            match policy {
                WidthPolicy::DefaultOne => {
                    if let Some(range) = ByteRange::from_start_width(first, 1) {
                        layout.offer(name, range, WidthSource::DefaultOne);
                    }
                }
                WidthPolicy::Reject => {
                    if !layout.fields.contains_key(&name) && !layout.unresolved.contains(&name) {
                        debug!("No width found for '{name}' at column {first}; variable dropped");
                        layout.unresolved.push(name);
                    }
                }
            }
        }

        Ok(layout)
    }

    fn offer(&mut self, name: String, range: ByteRange, source: WidthSource) {
        let replace = match self.fields.get(&name) {
            Some(existing) => {
                debug!(
                    "'{}' declared again ({} via {}, previously {} via {})",
                    name,
                    range,
                    source.label(),
                    existing.range,
                    existing.source.label()
                );
                source.rank() >= existing.source.rank()
            }
            None => true,
        };
        if replace {
            self.unresolved.retain(|pending| pending != &name);
            self.fields.insert(name, FieldSpec { range, source });
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn range(&self, name: &str) -> Option<ByteRange> {
        self.fields.get(name).map(|spec| spec.range)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Single-position variables dropped for lack of a width.
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    /// Furthest byte any field reaches.
    pub fn max_end(&self) -> usize {
        self.fields
            .values()
            .map(|spec| spec.range.end)
            .max()
            .unwrap_or(0)
    }

    /// Ranges for the requested names that this layout declares, in request order.
    pub fn select(&self, names: &[String]) -> Vec<(String, ByteRange)> {
        names
            .iter()
            .filter_map(|name| self.range(name).map(|range| (name.clone(), range)))
            .collect()
    }

    /// Canonical variables reachable directly or through an alias.
    pub fn resolved_count(&self, dialect: &Dialect) -> usize {
        dialect
            .variables
            .iter()
            .filter(|canonical| {
                self.contains(canonical)
                    || dialect
                        .aliases_for(canonical)
                        .iter()
                        .any(|alias| self.contains(alias))
            })
            .count()
    }

    pub fn ensure_usable(&self, dialect: &Dialect) -> IngestResult<()> {
        let required = dialect.min_resolved.min(dialect.variables.len());
        let resolved = self.resolved_count(dialect);
        if resolved < required {
            return Err(IngestError::TooFewVariables { resolved, required });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Number(usize),
    /// `named` is false for bare `n.` widths, true for `BEST12.`, `F8.2` and the like.
    Informat { width: Option<usize>, named: bool },
    Dash,
    Dollar,
    At,
    Equals,
    Quoted,
    Symbol(char),
    End,
}

fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut idx = 0;
    let mut statement_start = true;

    while idx < chars.len() {
        let ch = chars[idx];
        if ch.is_whitespace() {
            idx += 1;
            continue;
        }
        if ch == '/' && chars.get(idx + 1) == Some(&'*') {
            idx = skip_block_comment(&chars, idx + 2);
            continue;
        }
        if statement_start && ch == '*' {
            // `* comment ;` statement
            idx = skip_until(&chars, idx, ';') + 1;
            continue;
        }
        statement_start = false;
        match ch {
            ';' => {
                tokens.push(Token::End);
                statement_start = true;
                idx += 1;
            }
            '\'' | '"' => {
                idx = skip_quoted(&chars, idx);
                tokens.push(Token::Quoted);
            }
            '-' => {
                tokens.push(Token::Dash);
                idx += 1;
            }
            '$' => {
                tokens.push(Token::Dollar);
                idx += 1;
            }
            '@' => {
                tokens.push(Token::At);
                idx += 1;
            }
            '=' => {
                tokens.push(Token::Equals);
                idx += 1;
            }
            c if c.is_ascii_digit() => {
                let (digits, next) = take_while(&chars, idx, |c| c.is_ascii_digit());
                idx = next;
                if chars.get(idx) == Some(&'.') {
                    idx = take_while(&chars, idx + 1, |c| c.is_ascii_digit()).1;
                    tokens.push(Token::Informat {
                        width: digits.parse().ok(),
                        named: false,
                    });
                } else {
                    match digits.parse() {
                        Ok(value) => tokens.push(Token::Number(value)),
                        Err(_) => tokens.push(Token::Symbol('#')),
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let (word, next) =
                    take_while(&chars, idx, |c| c.is_ascii_alphanumeric() || c == '_');
                idx = next;
                if chars.get(idx) == Some(&'.') {
                    idx = take_while(&chars, idx + 1, |c| c.is_ascii_digit()).1;
                    tokens.push(Token::Informat {
                        width: trailing_width(&word),
                        named: true,
                    });
                } else {
                    tokens.push(Token::Word(word.to_ascii_uppercase()));
                }
            }
            other => {
                tokens.push(Token::Symbol(other));
                idx += 1;
            }
        }
    }
    tokens
}

fn take_while(chars: &[char], start: usize, predicate: impl Fn(char) -> bool) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && predicate(chars[end]) {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn skip_block_comment(chars: &[char], mut idx: usize) -> usize {
    while idx + 1 < chars.len() {
        if chars[idx] == '*' && chars[idx + 1] == '/' {
            return idx + 2;
        }
        idx += 1;
    }
    chars.len()
}

fn skip_until(chars: &[char], mut idx: usize, stop: char) -> usize {
    while idx < chars.len() && chars[idx] != stop {
        idx += 1;
    }
    idx
}

/// Skips a quoted literal, honouring SAS's doubled-quote escape.
fn skip_quoted(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut idx = start + 1;
    while idx < chars.len() {
        if chars[idx] == quote {
            if chars.get(idx + 1) == Some(&quote) {
                idx += 2;
                continue;
            }
            return idx + 1;
        }
        idx += 1;
    }
    chars.len()
}

/// `F3` -> 3, `BEST12` -> 12, `AGEF` -> None.
fn trailing_width(word: &str) -> Option<usize> {
    let digits_at = word
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(idx, _)| idx)?;
    word[digits_at..].parse().ok()
}

#[derive(Debug)]
struct Statement {
    tokens: Vec<Token>,
    terminated: bool,
}

impl Statement {
    fn is_input(&self) -> bool {
        self.terminated && matches!(self.tokens.first(), Some(Token::Word(word)) if word == "INPUT")
    }
}

fn split_statements(tokens: Vec<Token>) -> Vec<Statement> {
    let mut statements = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if token == Token::End {
            statements.push(Statement {
                tokens: std::mem::take(&mut current),
                terminated: true,
            });
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        statements.push(Statement {
            tokens: current,
            terminated: false,
        });
    }
    statements
}

#[derive(Debug, PartialEq, Eq)]
enum DeclaredWidth {
    Through(usize),
    Exactly(usize),
    Unknown,
}

#[derive(Debug)]
struct Declaration {
    name: String,
    first: usize,
    width: DeclaredWidth,
}

/// Walks the `INPUT` statement (keyword included) and yields declarations
/// in source order. Tokens outside the grammar are skipped.
fn parse_input(tokens: &[Token]) -> Vec<Declaration> {
    let mut declarations = Vec::new();
    let mut pointer: Option<usize> = Some(1);
    let mut idx = 1;

    while idx < tokens.len() {
        match &tokens[idx] {
            Token::At => {
                if let Some(Token::Number(column)) = tokens.get(idx + 1) {
                    pointer = Some(*column);
                    idx += 2;
                } else {
                    idx += 1;
                }
            }
            Token::Word(name) => {
                let mut cursor = idx + 1;
                if tokens.get(cursor) == Some(&Token::Dollar) {
                    cursor += 1;
                }
                match (tokens.get(cursor), tokens.get(cursor + 1), tokens.get(cursor + 2)) {
                    (Some(Token::Number(first)), Some(Token::Dash), Some(Token::Number(last))) => {
                        cursor += 3;
                        cursor = skip_informat(tokens, cursor).0;
                        declarations.push(Declaration {
                            name: name.clone(),
                            first: *first,
                            width: DeclaredWidth::Through(*last),
                        });
                        pointer = last.checked_add(1);
                    }
                    (Some(Token::Number(first)), _, _) => {
                        cursor += 1;
                        let (next, width) = skip_informat(tokens, cursor);
                        cursor = next;
                        let width = match width {
                            Some(width) if width > 0 => DeclaredWidth::Exactly(width),
                            _ => DeclaredWidth::Unknown,
                        };
                        pointer = match width {
                            DeclaredWidth::Exactly(w) => first.checked_add(w),
                            _ => None,
                        };
                        declarations.push(Declaration {
                            name: name.clone(),
                            first: *first,
                            width,
                        });
                    }
                    (Some(Token::Informat { width, .. }), _, _) => {
                        cursor += 1;
                        match pointer {
                            Some(first) => {
                                let width = match width {
                                    Some(width) if *width > 0 => DeclaredWidth::Exactly(*width),
                                    _ => DeclaredWidth::Unknown,
                                };
                                pointer = match width {
                                    DeclaredWidth::Exactly(w) => first.checked_add(w),
                                    _ => None,
                                };
                                declarations.push(Declaration {
                                    name: name.clone(),
                                    first,
                                    width,
                                });
                            }
                            None => debug!("Skipping '{name}': formatted input without a column"),
                        }
                    }
                    _ => debug!("Skipping '{name}': no column position"),
                }
                idx = cursor;
            }
            _ => idx += 1,
        }
    }
    declarations
}

/// Consumes an optional `[$] informat` at `cursor`, returning the next index
/// and the informat's width.
fn skip_informat(tokens: &[Token], cursor: usize) -> (usize, Option<usize>) {
    let mut probe = cursor;
    if tokens.get(probe) == Some(&Token::Dollar) {
        probe += 1;
    }
    match tokens.get(probe) {
        Some(Token::Informat { width, .. }) => (probe + 1, *width),
        _ => (cursor, None),
    }
}

/// First `NAME [$] n` or `NAME [$] n.` per name outside `INPUT`, keeping
/// only plausible field widths. Named formats such as `BEST12.` describe
/// display, not the record, and are ignored.
fn collect_width_overrides<'a>(
    statements: impl Iterator<Item = &'a Statement>,
) -> HashMap<String, usize> {
    let mut overrides = HashMap::new();
    for statement in statements {
        let tokens = &statement.tokens;
        for (idx, token) in tokens.iter().enumerate() {
            let Token::Word(name) = token else {
                continue;
            };
            if overrides.contains_key(name) {
                continue;
            }
            let mut cursor = idx + 1;
            if tokens.get(cursor) == Some(&Token::Dollar) {
                cursor += 1;
            }
            let candidate = match tokens.get(cursor) {
                Some(Token::Number(width)) => Some(*width),
                Some(Token::Informat { width, named: false }) => *width,
                _ => None,
            };
            if let Some(width) = candidate
                && (OVERRIDE_WIDTH_MIN..=OVERRIDE_WIDTH_MAX).contains(&width)
            {
                overrides.insert(name.clone(), width);
            }
        }
    }
    overrides
}
