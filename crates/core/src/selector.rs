//! The subset of CSS selectors needed to read supported chat pages.
//!
//! Supported: type selectors, `*`, `#id`, `.class`, attribute selectors with
//! `=`, `*=`, `^=`, `$=` and `~=`, compound selectors, the descendant
//! combinator, and comma-separated lists. Other combinators and
//! pseudo-classes are rejected at parse time.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::SelectorError;

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[A-Za-z_][A-Za-z0-9_-]*").unwrap());
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\[\s*(-?[A-Za-z_][A-Za-z0-9_-]*)\s*(?:([*^$~]?=)\s*(?:"([^"]*)"|'([^']*)'|(-?[A-Za-z0-9_-]+))\s*)?\]"#,
    )
    .unwrap()
});

/// Read-only view of an element, enough to evaluate a selector.
pub trait Element: Sized {
    /// Lower-case tag name.
    fn tag_name(&self) -> &str;
    fn attribute(&self, name: &str) -> Option<&str>;
    fn parent_element(&self) -> Option<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Contains,
    Prefix,
    Suffix,
    Includes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrMatch {
    name: String,
    op: AttrOp,
    value: String,
}

impl AttrMatch {
    fn matches(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self.op {
            AttrOp::Exists => true,
            AttrOp::Equals => actual == self.value,
            // An empty operand never matches for the substring operators
            AttrOp::Contains => !self.value.is_empty() && actual.contains(&self.value),
            AttrOp::Prefix => !self.value.is_empty() && actual.starts_with(&self.value),
            AttrOp::Suffix => !self.value.is_empty() && actual.ends_with(&self.value),
            AttrOp::Includes => actual.split_whitespace().any(|w| w == self.value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

impl Compound {
    fn matches<E: Element>(&self, el: &E) -> bool {
        if let Some(tag) = &self.tag {
            if !el.tag_name().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if el.attribute("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_attr = el.attribute("class").unwrap_or("");
            let present = |c: &String| class_attr.split_whitespace().any(|have| have == c);
            if !self.classes.iter().all(present) {
                return false;
            }
        }
        self.attrs.iter().all(|a| a.matches(el.attribute(&a.name)))
    }
}

/// Compounds joined by descendant combinators; the last one is the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    compounds: Vec<Compound>,
}

impl Complex {
    fn matches<E: Element>(&self, el: &E) -> bool {
        let Some((subject, ancestors)) = self.compounds.split_last() else {
            return false;
        };
        if !subject.matches(el) {
            return false;
        }
        // Greedy right-to-left ancestor walk is exact for descendant-only chains
        let mut remaining = ancestors.iter().rev().peekable();
        let mut current = el.parent_element();
        while let Some(wanted) = remaining.peek() {
            match current {
                Some(node) => {
                    if wanted.matches(&node) {
                        remaining.next();
                    }
                    current = node.parent_element();
                }
                None => return false,
            }
        }
        true
    }
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Selector, SelectorError> {
        let parts = split_top_level(input)?;
        let mut alternatives = Vec::with_capacity(parts.len());
        for (offset, part) in parts {
            alternatives.push(parse_complex(input, offset, part)?);
        }
        Ok(Selector {
            source: input.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches<E: Element>(&self, el: &E) -> bool {
        self.alternatives.iter().any(|c| c.matches(el))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Split on commas outside brackets and quotes, keeping each part's offset.
fn split_top_level(input: &str) -> Result<Vec<(usize, &str)>, SelectorError> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, ch) in input.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push((start, &input[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push((start, &input[start..]));

    if parts.iter().any(|(_, p)| p.trim().is_empty()) {
        return Err(SelectorError::Empty);
    }
    Ok(parts)
}

fn parse_complex(source: &str, base: usize, part: &str) -> Result<Complex, SelectorError> {
    let mut compounds = Vec::new();
    let mut pos = 0;

    loop {
        let skipped = part[pos..].len() - part[pos..].trim_start().len();
        pos += skipped;
        if pos >= part.len() {
            break;
        }
        let next = part[pos..].chars().next().unwrap_or(' ');
        if matches!(next, '>' | '+' | '~') {
            return Err(SelectorError::Unsupported {
                selector: source.to_string(),
                syntax: next.to_string(),
            });
        }
        let (compound, consumed) = parse_compound(source, base + pos, &part[pos..])?;
        compounds.push(compound);
        pos += consumed;
    }

    if compounds.is_empty() {
        return Err(SelectorError::Empty);
    }
    Ok(Complex { compounds })
}

/// Parse one compound selector from the start of `rest`, returning it with
/// the number of bytes consumed.
fn parse_compound(
    source: &str,
    offset: usize,
    rest: &str,
) -> Result<(Compound, usize), SelectorError> {
    let mut compound = Compound::default();
    let mut pos = 0;
    let mut universal = false;

    if rest.starts_with('*') {
        universal = true;
        pos += 1;
    } else if let Some(m) = IDENT_RE.find(rest) {
        compound.tag = Some(m.as_str().to_ascii_lowercase());
        pos += m.end();
    }

    loop {
        let tail = &rest[pos..];
        let Some(ch) = tail.chars().next() else {
            break;
        };
        match ch {
            '#' | '.' => {
                let m = IDENT_RE.find(&tail[1..]).ok_or_else(|| unexpected(source, offset + pos, tail))?;
                let name = m.as_str().to_string();
                if ch == '#' {
                    compound.id = Some(name);
                } else {
                    compound.classes.push(name);
                }
                pos += 1 + m.end();
            }
            '[' => {
                let caps = match ATTR_RE.captures(tail) {
                    Some(caps) => caps,
                    None if !tail.contains(']') => {
                        return Err(SelectorError::UnterminatedAttribute(source.to_string()))
                    }
                    None => return Err(unexpected(source, offset + pos, tail)),
                };
                let op = match caps.get(2).map(|m| m.as_str()) {
                    None => AttrOp::Exists,
                    Some("=") => AttrOp::Equals,
                    Some("*=") => AttrOp::Contains,
                    Some("^=") => AttrOp::Prefix,
                    Some("$=") => AttrOp::Suffix,
                    Some(_) => AttrOp::Includes,
                };
                let value = caps
                    .get(3)
                    .or_else(|| caps.get(4))
                    .or_else(|| caps.get(5))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                compound.attrs.push(AttrMatch {
                    name: caps[1].to_ascii_lowercase(),
                    op,
                    value,
                });
                pos += caps[0].len();
            }
            ':' => {
                return Err(SelectorError::Unsupported {
                    selector: source.to_string(),
                    syntax: "pseudo-class".to_string(),
                })
            }
            c if c.is_whitespace() || matches!(c, '>' | '+' | '~') => break,
            _ => return Err(unexpected(source, offset + pos, tail)),
        }
    }

    if pos == 0 || (compound == Compound::default() && !universal) {
        return Err(unexpected(source, offset, rest));
    }
    Ok((compound, pos))
}

fn unexpected(source: &str, offset: usize, tail: &str) -> SelectorError {
    SelectorError::Unexpected {
        selector: source.to_string(),
        offset,
        found: tail.chars().next().unwrap_or(' '),
    }
}
