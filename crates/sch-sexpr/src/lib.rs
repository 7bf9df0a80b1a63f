//! A lossless S-expression parser for KiCad schematic files.
//!
//! Every parsed node remembers the byte [`Span`] it was read from, so callers
//! can leave untouched regions of a file exactly as they were and only splice
//! in the regions they changed.
//!
//! # Tree Traversal and Patching
//!
//! - [`Sexpr::walk`] - Depth-first traversal with ancestor context
//! - [`PatchSet`] - Collect replacements/insertions/deletions against the
//!   original source and stream the patched text to any `std::io::Write`
//! - [`formatter`] - Render newly built nodes in KiCad's tab-indented layout

pub mod formatter;
pub mod kicad;

use std::fmt;

/// Find a direct child list `(name ...)` within a list of [`Sexpr`] nodes.
pub fn find_child_list<'a>(items: &'a [Sexpr], name: &str) -> Option<&'a [Sexpr]> {
    find_child_node(items, name).and_then(Sexpr::as_list)
}

/// Find the direct child node `(name ...)` itself, keeping access to its span.
pub fn find_child_node<'a>(items: &'a [Sexpr], name: &str) -> Option<&'a Sexpr> {
    items.iter().find(|item| item.tag() == Some(name))
}

/// Coerce a number atom into f64.
///
/// KiCad writes whole numbers as ints and everything else as floats.
pub fn number_as_f64(node: &Sexpr) -> Option<f64> {
    node.as_float().or_else(|| node.as_int().map(|v| v as f64))
}

/// Context provided while walking the S-expression tree.
#[derive(Debug, Clone)]
pub struct WalkCtx<'a> {
    /// Ancestors from root to parent of the current node (root first).
    pub ancestors: &'a [&'a Sexpr],
    /// Index of this node in its parent list, if it has a parent.
    pub index_in_parent: Option<usize>,
}

impl<'a> WalkCtx<'a> {
    pub fn parent(&self) -> Option<&'a Sexpr> {
        self.ancestors.last().copied()
    }

    pub fn grandparent(&self) -> Option<&'a Sexpr> {
        let len = self.ancestors.len();
        (len >= 2).then(|| self.ancestors[len - 2])
    }

    /// Tag of the parent list (its leading symbol).
    pub fn parent_tag(&self) -> Option<&'a str> {
        self.parent()?.tag()
    }

    pub fn grandparent_tag(&self) -> Option<&'a str> {
        self.grandparent()?.tag()
    }
}

/// Byte span in source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// An empty span for nodes that were built in memory.
    pub fn synthetic() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn is_synthetic(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// Zero-width span at `offset`, used for insertions.
    pub fn point(offset: usize) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Slice `source` by this span.
    pub fn slice<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start..self.end]
    }
}

/// The kind of S-expression value
#[derive(Debug, Clone, PartialEq)]
pub enum SexprKind {
    /// An unquoted identifier such as `yes` or `input`
    Symbol(String),
    /// A quoted string, stored unescaped
    String(String),
    Int(i64),
    F64(f64),
    List(Vec<Sexpr>),
}

/// An S-expression value with source span
#[derive(Debug, Clone)]
pub struct Sexpr {
    pub kind: SexprKind,
    pub span: Span,
}

impl PartialEq for Sexpr {
    fn eq(&self, other: &Self) -> bool {
        // Spans are positional metadata, not part of the value.
        self.kind == other.kind
    }
}

impl Sexpr {
    pub fn with_span(kind: SexprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Create a symbol (unquoted atom) with synthetic span
    pub fn symbol(s: impl Into<String>) -> Self {
        Self::with_span(SexprKind::Symbol(s.into()), Span::synthetic())
    }

    /// Create a string (quoted atom) with synthetic span
    pub fn string(s: impl Into<String>) -> Self {
        Self::with_span(SexprKind::String(s.into()), Span::synthetic())
    }

    pub fn int(n: i64) -> Self {
        Self::with_span(SexprKind::Int(n), Span::synthetic())
    }

    pub fn float(f: f64) -> Self {
        Self::with_span(SexprKind::F64(f), Span::synthetic())
    }

    pub fn list(items: Vec<Sexpr>) -> Self {
        Self::with_span(SexprKind::List(items), Span::synthetic())
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, SexprKind::List(_))
    }

    /// The leading symbol of a list, e.g. `symbol` for `(symbol ...)`.
    pub fn tag(&self) -> Option<&str> {
        self.as_list()?.first()?.as_sym()
    }

    /// Symbol or string content.
    pub fn as_atom(&self) -> Option<&str> {
        match &self.kind {
            SexprKind::Symbol(s) | SexprKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sym(&self) -> Option<&str> {
        match &self.kind {
            SexprKind::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            SexprKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.kind {
            SexprKind::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &self.kind {
            SexprKind::F64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexpr]> {
        match &self.kind {
            SexprKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Sexpr>> {
        match &mut self.kind {
            SexprKind::List(items) => Some(items),
            _ => None,
        }
    }

    /// Find a child list with the given tag
    pub fn find_list(&self, name: &str) -> Option<&[Sexpr]> {
        find_child_list(self.as_list()?, name)
    }

    /// Find the child node with the given tag
    pub fn find_node(&self, name: &str) -> Option<&Sexpr> {
        find_child_node(self.as_list()?, name)
    }

    /// Direct child nodes with the given tag, keeping their spans.
    pub fn children_tagged<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Sexpr> + 'a {
        self.as_list()
            .unwrap_or_default()
            .iter()
            .filter(move |item| item.tag() == Some(name))
    }

    /// Depth-first traversal of the tree, visiting every node once.
    ///
    /// # Example
    ///
    /// ```
    /// use sch_sexpr::{parse, SexprKind};
    ///
    /// let sexpr = parse("(a (b c) d)").unwrap();
    /// let mut symbols = Vec::new();
    /// sexpr.walk(|node, _ctx| {
    ///     if let SexprKind::Symbol(s) = &node.kind {
    ///         symbols.push(s.clone());
    ///     }
    /// });
    /// assert_eq!(symbols, vec!["a", "b", "c", "d"]);
    /// ```
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(&Sexpr, WalkCtx<'_>),
    {
        fn walk_recursive<'a, F>(
            node: &'a Sexpr,
            stack: &mut Vec<&'a Sexpr>,
            f: &mut F,
            index_in_parent: Option<usize>,
        ) where
            F: FnMut(&Sexpr, WalkCtx<'_>),
        {
            f(
                node,
                WalkCtx {
                    ancestors: stack,
                    index_in_parent,
                },
            );

            if let Some(children) = node.as_list() {
                stack.push(node);
                for (i, child) in children.iter().enumerate() {
                    walk_recursive(child, stack, f, Some(i));
                }
                stack.pop();
            }
        }

        let mut stack = Vec::new();
        walk_recursive(self, &mut stack, &mut f, None);
    }

}

/// Create a key-value pair list
pub fn kv<K: Into<String>, V: Into<Sexpr>>(k: K, v: V) -> Sexpr {
    Sexpr::list(vec![Sexpr::symbol(k), v.into()])
}

/// A builder for constructing lists incrementally
#[derive(Debug, Default)]
pub struct ListBuilder {
    items: Vec<Sexpr>,
}

impl ListBuilder {
    /// Start a list whose first item is the symbol `name`.
    pub fn node(name: &str) -> Self {
        Self {
            items: vec![Sexpr::symbol(name)],
        }
    }

    pub fn push<V: Into<Sexpr>>(mut self, v: V) -> Self {
        self.items.push(v.into());
        self
    }

    pub fn push_if<V: Into<Sexpr>>(self, cond: bool, v: V) -> Self {
        if cond { self.push(v) } else { self }
    }

    pub fn extend<I, V>(mut self, iter: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Sexpr>,
    {
        self.items.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Sexpr {
        Sexpr::list(self.items)
    }
}

impl From<&str> for Sexpr {
    fn from(s: &str) -> Self {
        Self::symbol(s)
    }
}

impl From<String> for Sexpr {
    fn from(s: String) -> Self {
        Self::symbol(s)
    }
}

impl From<i64> for Sexpr {
    fn from(n: i64) -> Self {
        Sexpr::int(n)
    }
}

impl From<u32> for Sexpr {
    fn from(n: u32) -> Self {
        Sexpr::int(n as i64)
    }
}

impl From<f64> for Sexpr {
    fn from(n: f64) -> Self {
        Sexpr::float(n)
    }
}

impl From<bool> for Sexpr {
    fn from(b: bool) -> Self {
        Self::symbol(if b { "yes" } else { "no" })
    }
}

/// Parser for S-expressions
pub struct Parser<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Parser {
            input,
            chars: input.char_indices().peekable(),
            current_pos: 0,
        }
    }

    /// Parse one expression.
    pub fn parse(&mut self) -> Result<Sexpr, ParseError> {
        self.skip_trivia();
        match self.peek_char() {
            None => Err(ParseError::UnexpectedEof),
            Some('(') => self.parse_list(),
            Some(')') => Err(ParseError::UnbalancedClose {
                offset: self.current_pos,
            }),
            Some(_) => self.parse_atom(),
        }
    }

    /// Parse exactly one expression; only whitespace and comments may follow it.
    pub fn parse_single(&mut self) -> Result<Sexpr, ParseError> {
        let root = self.parse()?;
        self.skip_trivia();
        if !self.is_at_end() {
            return Err(ParseError::TrailingInput {
                offset: self.current_pos,
            });
        }
        Ok(root)
    }

    fn parse_list(&mut self) -> Result<Sexpr, ParseError> {
        let start_pos = self.current_pos;
        self.expect('(')?;
        let mut items = Vec::new();

        loop {
            self.skip_trivia();
            match self.peek_char() {
                None => return Err(ParseError::UnclosedList { offset: start_pos }),
                Some(')') => {
                    self.advance();
                    break;
                }
                Some(_) => items.push(self.parse()?),
            }

            if items.len() % 1000 == 0 {
                log::trace!("Parsed {} items in list at {start_pos}", items.len());
            }
        }

        Ok(Sexpr::with_span(
            SexprKind::List(items),
            Span::new(start_pos, self.current_pos),
        ))
    }

    fn parse_atom(&mut self) -> Result<Sexpr, ParseError> {
        if self.peek_char() == Some('"') {
            return self.parse_string();
        }

        let start = self.current_pos;
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() || ch == '(' || ch == ')' || ch == '"' {
                break;
            }
            self.advance();
        }

        if self.current_pos == start {
            return Err(ParseError::EmptyAtom { offset: start });
        }

        let atom = &self.input[start..self.current_pos];
        let span = Span::new(start, self.current_pos);

        let kind = if let Ok(int_val) = atom.parse::<i64>() {
            SexprKind::Int(int_val)
        } else if let Some(float_val) = parse_float_atom(atom) {
            SexprKind::F64(float_val)
        } else {
            SexprKind::Symbol(atom.to_string())
        };
        Ok(Sexpr::with_span(kind, span))
    }

    fn parse_string(&mut self) -> Result<Sexpr, ParseError> {
        let start_pos = self.current_pos;
        self.expect('"')?;
        let mut result = String::new();

        loop {
            match self.peek_char() {
                None => return Err(ParseError::UnterminatedString { offset: start_pos }),
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let Some(escaped) = self.peek_char() else {
                        return Err(ParseError::UnterminatedString { offset: start_pos });
                    };
                    result.push(formatter::unescape_char(escaped));
                    self.advance();
                }
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }

        Ok(Sexpr::with_span(
            SexprKind::String(result),
            Span::new(start_pos, self.current_pos),
        ))
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == ';' {
                while let Some(ch) = self.peek_char() {
                    self.advance();
                    if ch == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn advance(&mut self) {
        if let Some((pos, ch)) = self.chars.next() {
            self.current_pos = pos + ch.len_utf8();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        match self.peek_char() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(found) => Err(ParseError::UnexpectedChar {
                found,
                expected,
                offset: self.current_pos,
            }),
            None => Err(ParseError::UnexpectedEof),
        }
    }

    fn is_at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }
}

/// Rust accepts `inf`/`nan` as floats; KiCad never writes them and they are
/// symbols in practice.
fn parse_float_atom(atom: &str) -> Option<f64> {
    let first = atom.chars().next()?;
    if !(first.is_ascii_digit() || first == '-' || first == '+' || first == '.') {
        return None;
    }
    atom.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse a string into an S-expression
pub fn parse(input: &str) -> Result<Sexpr, ParseError> {
    log::trace!("Parsing S-expression from {} bytes of input", input.len());
    Parser::new(input).parse()
}

/// Parse a whole document: exactly one top-level expression.
pub fn parse_document(input: &str) -> Result<Sexpr, ParseError> {
    log::trace!("Parsing S-expression document of {} bytes", input.len());
    let result = Parser::new(input).parse_single();
    if let Err(e) = &result {
        log::trace!("Failed to parse S-expression document: {e}");
    }
    result
}

/// Errors that can occur during parsing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("expected '{expected}', found '{found}' at byte {offset}")]
    UnexpectedChar {
        found: char,
        expected: char,
        offset: usize,
    },
    #[error("list opened at byte {offset} is never closed")]
    UnclosedList { offset: usize },
    #[error("unbalanced ')' at byte {offset}")]
    UnbalancedClose { offset: usize },
    #[error("string starting at byte {offset} is not terminated")]
    UnterminatedString { offset: usize },
    #[error("empty atom at byte {offset}")]
    EmptyAtom { offset: usize },
    #[error("unexpected content after the top-level expression at byte {offset}")]
    TrailingInput { offset: usize },
}

/// A single patch to apply to source text.
#[derive(Debug, Clone)]
pub struct Patch {
    /// Byte span to replace; zero-width for insertions
    pub span: Span,
    pub new_text: String,
}

/// A collection of patches to apply to source text.
///
/// Patches are sorted by span start (insertion order breaks ties) and applied
/// in a single forward pass, writing directly to any `std::io::Write`.
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    patches: Vec<Patch>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, mut other: PatchSet) {
        self.patches.append(&mut other.patches);
    }

    /// Replace a string atom. `new_value` is unescaped; quoting happens here.
    pub fn replace_string(&mut self, span: Span, new_value: &str) {
        self.replace_raw(span, formatter::quote_string(new_value));
    }

    /// Replace a span with exact text.
    ///
    /// Replacing the same non-empty span twice keeps only the latest text.
    pub fn replace_raw(&mut self, span: Span, new_text: String) {
        if !span.is_empty()
            && let Some(existing) = self.patches.iter_mut().find(|p| p.span == span)
        {
            existing.new_text = new_text;
            return;
        }
        self.patches.push(Patch { span, new_text });
    }

    /// Insert text at a byte offset.
    pub fn insert(&mut self, offset: usize, text: String) {
        self.replace_raw(Span::point(offset), text);
    }

    /// Delete a span.
    pub fn delete(&mut self, span: Span) {
        self.replace_raw(span, String::new());
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Patches in application order.
    fn sorted(&self) -> Vec<&Patch> {
        let mut sorted: Vec<&Patch> = self.patches.iter().collect();
        sorted.sort_by_key(|p| p.span.start);
        sorted
    }

    /// Write the patched `window` of `source` to a writer.
    ///
    /// Only patches inside `window` are honoured; this lets a document keep
    /// one patch set per element and stream each element independently.
    pub fn write_window<W: std::io::Write>(
        &self,
        source: &str,
        window: Span,
        mut writer: W,
    ) -> std::io::Result<()> {
        let sorted = self.sorted();
        debug_assert!(
            sorted.windows(2).all(|w| w[0].span.end <= w[1].span.start),
            "overlapping patches"
        );

        let bytes = source.as_bytes();
        let mut cursor = window.start;
        for patch in sorted {
            if patch.span.start < window.start || patch.span.end > window.end {
                continue;
            }
            if patch.span.start > cursor {
                writer.write_all(&bytes[cursor..patch.span.start])?;
            }
            writer.write_all(patch.new_text.as_bytes())?;
            cursor = cursor.max(patch.span.end);
        }
        if cursor < window.end {
            writer.write_all(&bytes[cursor..window.end])?;
        }
        Ok(())
    }

    /// Write the whole patched source to a writer.
    pub fn write_to<W: std::io::Write>(&self, source: &str, writer: W) -> std::io::Result<()> {
        self.write_window(source, Span::new(0, source.len()), writer)
    }

    /// Apply all patches and return the resulting text.
    pub fn apply(&self, source: &str) -> String {
        let mut buf = Vec::with_capacity(source.len());
        // Writing into a Vec cannot fail.
        let _ = self.write_to(source, &mut buf);
        String::from_utf8(buf).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into())
    }
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&formatter::format_tree(self, 0))
    }
}
