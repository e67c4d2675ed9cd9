//! CSS-like selectors used as resolution paths and operation targets.
//!
//! The grammar covers selector lists, the four combinators, type/universal,
//! id, class, attribute (with the six match operators) and pseudo-class
//! selectors. Parsing is what the validator uses to reject malformed targets;
//! matching is implemented by documents through [`SelectorTree`].

use std::fmt;

use thiserror::Error;

/// Reasons a selector fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    /// Blank selector.
    #[error("empty selector")]
    Empty,
    /// A combinator or comma with nothing on one side.
    #[error("dangling combinator at offset {0}")]
    DanglingCombinator(usize),
    /// `[`, `(` or a quote without its closing counterpart.
    #[error("unbalanced {0:?}")]
    Unbalanced(char),
    /// A character that cannot appear at this point.
    #[error("unexpected character {ch:?} at offset {offset}")]
    Unexpected {
        /// Offending character.
        ch: char,
        /// Byte offset.
        offset: usize,
    },
    /// `#`, `.`, `:` or `[` with no name after it.
    #[error("missing name at offset {0}")]
    MissingName(usize),
}

/// How two compounds relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Whitespace: any ancestor.
    Descendant,
    /// `>`: parent.
    Child,
    /// `+`: immediately preceding sibling.
    NextSibling,
    /// `~`: any preceding sibling.
    SubsequentSibling,
}

/// Attribute match operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOp {
    /// `[a]`
    Exists,
    /// `[a=v]`
    Equals,
    /// `[a~=v]`
    Includes,
    /// `[a|=v]`
    DashMatch,
    /// `[a^=v]`
    Prefix,
    /// `[a$=v]`
    Suffix,
    /// `[a*=v]`
    Substring,
}

/// One attribute condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrSelector {
    /// Attribute name.
    pub name: String,
    /// Operator.
    pub op: AttrOp,
    /// Operand (empty for [`AttrOp::Exists`]).
    pub value: String,
}

impl AttrSelector {
    /// Test an attribute value.
    #[must_use]
    pub fn matches(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        let v = self.value.as_str();
        match self.op {
            AttrOp::Exists => true,
            AttrOp::Equals => actual == v,
            AttrOp::Includes => actual.split_whitespace().any(|w| w == v),
            AttrOp::DashMatch => actual == v || actual.starts_with(&format!("{v}-")),
            AttrOp::Prefix => !v.is_empty() && actual.starts_with(v),
            AttrOp::Suffix => !v.is_empty() && actual.ends_with(v),
            AttrOp::Substring => !v.is_empty() && actual.contains(v),
        }
    }
}

/// Pseudo-class condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pseudo {
    /// `:root`
    Root,
    /// `:first-child`
    FirstChild,
    /// `:last-child`
    LastChild,
    /// `:nth-of-type(n)` with a plain index.
    NthOfType(usize),
    /// `:nth-child(n)` with a plain index.
    NthChild(usize),
    /// Anything else; syntactically valid, never matched structurally.
    Other(String),
}

/// A sequence of simple selectors with no combinator between them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    /// Type selector (`None` or `*` matches any tag).
    pub tag: Option<String>,
    /// `#id` conditions.
    pub ids: Vec<String>,
    /// `.class` conditions.
    pub classes: Vec<String>,
    /// Attribute conditions.
    pub attributes: Vec<AttrSelector>,
    /// Pseudo-class conditions.
    pub pseudos: Vec<Pseudo>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.ids.is_empty()
            && self.classes.is_empty()
            && self.attributes.is_empty()
            && self.pseudos.is_empty()
    }
}

/// Compounds joined by combinators, stored left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Complex {
    /// First compound.
    pub head: Compound,
    /// Following `(combinator, compound)` pairs.
    pub tail: Vec<(Combinator, Compound)>,
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    /// Alternatives separated by commas.
    pub alternatives: Vec<Complex>,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Selector {
    /// Every `#id` operand and exact `[attr="value"]` operand, across all
    /// alternatives and compounds.
    pub fn exact_identifiers(&self) -> impl Iterator<Item = &str> + '_ {
        self.alternatives
            .iter()
            .flat_map(|c| std::iter::once(&c.head).chain(c.tail.iter().map(|(_, x)| x)))
            .flat_map(|c| {
                c.ids.iter().map(String::as_str).chain(
                    c.attributes
                        .iter()
                        .filter(|a| a.op == AttrOp::Equals)
                        .map(|a| a.value.as_str()),
                )
            })
    }

    /// Parse a selector list.
    ///
    /// # Errors
    ///
    /// Returns a [`SelectorError`] describing the first syntax problem.
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }
        let mut parser = Parser {
            chars: trimmed.char_indices().collect(),
            pos: 0,
        };
        let mut alternatives = vec![parser.complex()?];
        while parser.peek() == Some(',') {
            parser.bump();
            parser.skip_ws();
            alternatives.push(parser.complex()?);
        }
        if let Some((offset, ch)) = parser.current() {
            return Err(SelectorError::Unexpected { ch, offset });
        }
        Ok(Self {
            source: trimmed.to_string(),
            alternatives,
        })
    }

    /// Whether no alternative uses a combinator, e.g. `body` or `:root`.
    #[must_use]
    pub fn is_single_compound(&self) -> bool {
        self.alternatives.iter().all(|c| c.tail.is_empty())
    }

    /// Test whether `node` in `tree` matches any alternative.
    pub fn matches<T: SelectorTree + ?Sized>(&self, tree: &T, node: T::Node) -> bool {
        self.alternatives
            .iter()
            .any(|complex| matches_complex(tree, node, complex))
    }
}

/// The structural queries selector matching needs from a document tree.
pub trait SelectorTree {
    /// Node handle type.
    type Node: Copy + PartialEq;

    /// Lower-case tag name.
    fn tag(&self, node: Self::Node) -> Option<String>;
    /// Attribute value.
    fn attr(&self, node: Self::Node, name: &str) -> Option<String>;
    /// Parent element.
    fn parent(&self, node: Self::Node) -> Option<Self::Node>;
    /// Element siblings preceding `node`, nearest first.
    fn preceding_siblings(&self, node: Self::Node) -> Vec<Self::Node>;
    /// Element siblings following `node`, nearest first.
    fn following_siblings(&self, node: Self::Node) -> Vec<Self::Node>;
    /// Whether this is the document element.
    fn is_root(&self, node: Self::Node) -> bool {
        self.parent(node).is_none()
    }
}

fn matches_complex<T: SelectorTree + ?Sized>(tree: &T, node: T::Node, complex: &Complex) -> bool {
    // Right to left, each compound paired with the combinator to its left.
    let mut chain: Vec<(&Compound, Option<Combinator>)> = complex
        .tail
        .iter()
        .rev()
        .map(|(comb, compound)| (compound, Some(*comb)))
        .collect();
    chain.push((&complex.head, None));
    match_chain(tree, node, &chain)
}

fn match_chain<T: SelectorTree + ?Sized>(
    tree: &T,
    node: T::Node,
    chain: &[(&Compound, Option<Combinator>)],
) -> bool {
    let Some(((compound, combinator), rest)) = chain.split_first() else {
        return true;
    };
    if !matches_compound(tree, node, compound) {
        return false;
    }
    match combinator {
        None => true,
        Some(Combinator::Child) => tree
            .parent(node)
            .is_some_and(|p| match_chain(tree, p, rest)),
        Some(Combinator::Descendant) => {
            let mut current = tree.parent(node);
            while let Some(ancestor) = current {
                if match_chain(tree, ancestor, rest) {
                    return true;
                }
                current = tree.parent(ancestor);
            }
            false
        }
        Some(Combinator::NextSibling) => tree
            .preceding_siblings(node)
            .first()
            .is_some_and(|s| match_chain(tree, *s, rest)),
        Some(Combinator::SubsequentSibling) => tree
            .preceding_siblings(node)
            .into_iter()
            .any(|s| match_chain(tree, s, rest)),
    }
}

fn matches_compound<T: SelectorTree + ?Sized>(tree: &T, node: T::Node, compound: &Compound) -> bool {
    let tag = tree.tag(node).unwrap_or_default();
    if let Some(expected) = &compound.tag {
        if expected != "*" && !expected.eq_ignore_ascii_case(&tag) {
            return false;
        }
    }
    if !compound
        .ids
        .iter()
        .all(|id| tree.attr(node, "id").as_deref() == Some(id.as_str()))
    {
        return false;
    }
    if !compound.classes.is_empty() {
        let class = tree.attr(node, "class").unwrap_or_default();
        if !compound
            .classes
            .iter()
            .all(|c| class.split_whitespace().any(|w| w == c))
        {
            return false;
        }
    }
    if !compound
        .attributes
        .iter()
        .all(|a| a.matches(tree.attr(node, &a.name).as_deref()))
    {
        return false;
    }
    compound.pseudos.iter().all(|pseudo| match pseudo {
        Pseudo::Root => tree.is_root(node),
        Pseudo::FirstChild => tree.preceding_siblings(node).is_empty(),
        Pseudo::LastChild => tree.following_siblings(node).is_empty(),
        Pseudo::NthChild(n) => tree.preceding_siblings(node).len() + 1 == *n,
        Pseudo::NthOfType(n) => {
            let same = tree
                .preceding_siblings(node)
                .into_iter()
                .filter(|s| tree.tag(*s).is_some_and(|t| t.eq_ignore_ascii_case(&tag)))
                .count();
            same + 1 == *n
        }
        Pseudo::Other(_) => false,
    })
}

struct Parser {
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> Option<(usize, char)> {
        self.chars.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.current().map(|(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.current()
            .map_or_else(|| self.chars.last().map_or(0, |(o, c)| o + c.len_utf8()), |(o, _)| o)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn complex(&mut self) -> Result<Complex, SelectorError> {
        let head = self.compound()?;
        let mut tail = Vec::new();
        loop {
            let had_ws = self.skip_ws();
            let comb = match self.peek() {
                Some('>') => Some(Combinator::Child),
                Some('+') => Some(Combinator::NextSibling),
                Some('~') => Some(Combinator::SubsequentSibling),
                None | Some(',') => None,
                Some(_) if had_ws => {
                    tail.push((Combinator::Descendant, self.compound()?));
                    continue;
                }
                Some(_) => None,
            };
            let Some(comb) = comb else {
                break;
            };
            self.bump();
            self.skip_ws();
            tail.push((comb, self.compound()?));
        }
        Ok(Complex { head, tail })
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let start = self.offset();
        let mut compound = Compound::default();
        if self.peek() == Some('*') {
            self.bump();
            compound.tag = Some("*".to_string());
        } else if self.peek().is_some_and(is_ident_start) {
            compound.tag = Some(self.ident()?.to_ascii_lowercase());
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.bump();
                    compound.ids.push(self.name()?);
                }
                Some('.') => {
                    self.bump();
                    compound.classes.push(self.name()?);
                }
                Some('[') => {
                    self.bump();
                    compound.attributes.push(self.attribute()?);
                }
                Some(':') => {
                    self.bump();
                    if self.peek() == Some(':') {
                        self.bump();
                    }
                    compound.pseudos.push(self.pseudo()?);
                }
                _ => break,
            }
        }
        if compound.is_empty() {
            return Err(match self.current() {
                None | Some((_, ',' | '>' | '+' | '~')) => SelectorError::DanglingCombinator(start),
                Some((offset, ch)) => SelectorError::Unexpected { ch, offset },
            });
        }
        Ok(compound)
    }

    fn name(&mut self) -> Result<String, SelectorError> {
        let offset = self.offset();
        if !self.peek().is_some_and(is_ident_char) {
            return Err(SelectorError::MissingName(offset));
        }
        self.ident()
    }

    fn ident(&mut self) -> Result<String, SelectorError> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.bump();
                let escaped = self.bump().ok_or(SelectorError::Unbalanced('\\'))?;
                out.push(escaped);
            } else if is_ident_char(c) {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Ok(out)
    }

    fn attribute(&mut self) -> Result<AttrSelector, SelectorError> {
        self.skip_ws();
        let name = self.name().map_err(|e| match self.peek() {
            None => SelectorError::Unbalanced('['),
            _ => e,
        })?;
        self.skip_ws();
        let op = match self.bump() {
            Some(']') => {
                return Ok(AttrSelector {
                    name,
                    op: AttrOp::Exists,
                    value: String::new(),
                })
            }
            Some('=') => AttrOp::Equals,
            Some(c @ ('~' | '|' | '^' | '$' | '*')) => {
                let offset = self.offset();
                if self.bump() != Some('=') {
                    return Err(SelectorError::Unexpected { ch: c, offset });
                }
                match c {
                    '~' => AttrOp::Includes,
                    '|' => AttrOp::DashMatch,
                    '^' => AttrOp::Prefix,
                    '$' => AttrOp::Suffix,
                    _ => AttrOp::Substring,
                }
            }
            None => return Err(SelectorError::Unbalanced('[')),
            Some(ch) => {
                return Err(SelectorError::Unexpected {
                    ch,
                    offset: self.offset().saturating_sub(ch.len_utf8()),
                })
            }
        };
        self.skip_ws();
        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                self.quoted(q)?
            }
            Some(c) if is_ident_char(c) => self.ident()?,
            None => return Err(SelectorError::Unbalanced('[')),
            Some(_) => return Err(SelectorError::MissingName(self.offset())),
        };
        self.skip_ws();
        match self.bump() {
            Some(']') => Ok(AttrSelector { name, op, value }),
            None => Err(SelectorError::Unbalanced('[')),
            Some(ch) => Err(SelectorError::Unexpected {
                ch,
                offset: self.offset().saturating_sub(ch.len_utf8()),
            }),
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(SelectorError::Unbalanced(quote)),
                Some('\\') => {
                    let escaped = self.bump().ok_or(SelectorError::Unbalanced(quote))?;
                    out.push(escaped);
                }
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn pseudo(&mut self) -> Result<Pseudo, SelectorError> {
        let name = self.name()?.to_ascii_lowercase();
        let argument = if self.peek() == Some('(') {
            self.bump();
            let mut depth = 1usize;
            let mut arg = String::new();
            loop {
                match self.bump() {
                    None => return Err(SelectorError::Unbalanced('(')),
                    Some('(') => {
                        depth += 1;
                        arg.push('(');
                    }
                    Some(')') => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                        arg.push(')');
                    }
                    Some(q @ ('"' | '\'')) => {
                        let inner = self.quoted(q)?;
                        arg.push(q);
                        arg.push_str(&inner);
                        arg.push(q);
                    }
                    Some(c) => arg.push(c),
                }
            }
            Some(arg.trim().to_string())
        } else {
            None
        };
        let index = argument.as_deref().and_then(|a| a.parse::<usize>().ok());
        Ok(match (name.as_str(), index) {
            ("root", _) if argument.is_none() => Pseudo::Root,
            ("first-child", _) if argument.is_none() => Pseudo::FirstChild,
            ("last-child", _) if argument.is_none() => Pseudo::LastChild,
            ("nth-of-type", Some(n)) => Pseudo::NthOfType(n),
            ("nth-child", Some(n)) => Pseudo::NthChild(n),
            _ => Pseudo::Other(match argument {
                Some(arg) => format!("{name}({arg})"),
                None => name,
            }),
        })
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '-' || c == '\\' || !c.is_ascii()
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '\\' || !c.is_ascii()
}

/// Quote a value for use inside an attribute selector.
#[must_use]
pub fn quote_attr_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
