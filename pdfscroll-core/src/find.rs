//! Text search over materialized text layers.

use serde::{Deserialize, Serialize};

use crate::geometry::{PageViewport, Rect};
use crate::virtualizer::TextLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    pub case_sensitive: bool,
    pub highlight_all: bool,
    pub whole_word: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            highlight_all: true,
            whole_word: false,
        }
    }
}

/// One occurrence of the query inside a single text span.
#[derive(Debug, Clone, PartialEq)]
pub struct FindMatch {
    /// 1-indexed page.
    pub page: usize,
    pub span: usize,
    /// Character offsets into the span's text.
    pub start: usize,
    pub end: usize,
    /// Approximate bounds in unscaled, unrotated page space.
    pub page_rect: Rect,
}

impl FindMatch {
    /// Bounds under the page's current scale and rotation.
    pub fn rect_in(&self, viewport: &PageViewport) -> Rect {
        viewport.convert_rect(self.page_rect)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FindSession {
    query: String,
    options: FindOptions,
    matches: Vec<FindMatch>,
    current: Option<usize>,
}

impl FindSession {
    /// Scans `layers` (page number, layer) in order. The first match, if any,
    /// becomes current.
    pub fn search<'a, I>(query: &str, options: FindOptions, layers: I) -> Self
    where
        I: IntoIterator<Item = (usize, &'a TextLayer)>,
    {
        let needle = fold(query, options.case_sensitive);
        let mut matches = Vec::new();
        if !needle.is_empty() {
            for (page, layer) in layers {
                for (index, span) in layer.spans.iter().enumerate() {
                    collect_matches(page, index, span, &needle, options, &mut matches);
                }
            }
        }
        let current = (!matches.is_empty()).then_some(0);
        Self {
            query: query.to_string(),
            options,
            matches,
            current,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn options(&self) -> FindOptions {
        self.options
    }

    pub fn matches(&self) -> &[FindMatch] {
        &self.matches
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&FindMatch> {
        self.matches.get(self.current?)
    }

    /// Advances cyclically; with a single match it stays current.
    pub fn next(&mut self) -> Option<&FindMatch> {
        self.step(1)
    }

    pub fn previous(&mut self) -> Option<&FindMatch> {
        self.step(self.matches.len().saturating_sub(1))
    }

    fn step(&mut self, delta: usize) -> Option<&FindMatch> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        let next = match self.current {
            Some(current) => (current + delta) % len,
            None => 0,
        };
        self.current = Some(next);
        self.matches.get(next)
    }

    /// Matches to paint, paired with whether each is the current one.
    pub fn highlights(&self) -> Vec<(&FindMatch, bool)> {
        self.matches
            .iter()
            .enumerate()
            .filter(|(index, _)| self.options.highlight_all || Some(*index) == self.current)
            .map(|(index, found)| (found, Some(index) == self.current))
            .collect()
    }
}

fn fold(text: &str, case_sensitive: bool) -> Vec<char> {
    if case_sensitive {
        text.chars().collect()
    } else {
        text.chars().map(fold_char).collect()
    }
}

fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn collect_matches(
    page: usize,
    index: usize,
    span: &crate::virtualizer::TextSpan,
    needle: &[char],
    options: FindOptions,
    out: &mut Vec<FindMatch>,
) {
    let haystack = fold(&span.text, options.case_sensitive);
    if haystack.len() < needle.len() {
        return;
    }
    let total = haystack.len() as f32;
    let mut start = 0;
    while start + needle.len() <= haystack.len() {
        let end = start + needle.len();
        if haystack[start..end] != *needle {
            start += 1;
            continue;
        }
        let bounded = !options.whole_word
            || ((start == 0 || !is_word_char(haystack[start - 1]))
                && (end == haystack.len() || !is_word_char(haystack[end])));
        if !bounded {
            start += 1;
            continue;
        }

        let rect = span.page_rect;
        out.push(FindMatch {
            page,
            span: index,
            start,
            end,
            page_rect: Rect::new(
                rect.x + rect.width * start as f32 / total,
                rect.y,
                rect.width * needle.len() as f32 / total,
                rect.height,
            ),
        });
        start = end;
    }
}
