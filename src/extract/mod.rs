//! HTML extraction heuristics.
//!
//! Sites change their markup without notice, so every field is extracted
//! through a [`Cascade`]: an ordered list of CSS selectors tried in
//! priority order, where the first selector producing at least one usable
//! value wins. Later selectors are never merged into an earlier result.
//!
//! # Submodules
//!
//! - [`listing`]: listing/archive pages to [`ArticleRef`](crate::models::ArticleRef)s
//! - [`article`]: article pages to [`ParsedArticle`](crate::models::ParsedArticle)s
//! - [`dates`]: tolerant publish-date parsing
//!
//! All functions here are synchronous and return owned data; documents are
//! never kept alive across an `.await`.

pub mod article;
pub mod dates;
pub mod listing;

use crate::errors::ExtractError;
use scraper::{ElementRef, Html, Selector};

/// Compile a CSS selector, keeping the selector text in the error.
pub fn compile(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// A successful cascade evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched<T> {
    /// The selector that produced the values.
    pub selector: String,
    pub values: Vec<T>,
}

/// Ordered selector rules evaluated with a first-match-wins strategy.
#[derive(Debug, Clone)]
pub struct Cascade {
    rules: Vec<(String, Selector)>,
}

impl Cascade {
    pub fn new(selectors: &[&str]) -> Result<Self, ExtractError> {
        let rules = selectors
            .iter()
            .map(|s| compile(s).map(|compiled| (s.to_string(), compiled)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Evaluate the rules against `root` in order.
    ///
    /// `field` maps each matched element to a value, or `None` to discard
    /// it. The first rule yielding at least one value wins.
    pub fn first_match<'a, T, F>(&self, root: ElementRef<'a>, mut field: F) -> Option<Matched<T>>
    where
        F: FnMut(ElementRef<'a>) -> Option<T>,
    {
        for (label, selector) in &self.rules {
            let values: Vec<T> = root.select(selector).filter_map(&mut field).collect();
            if !values.is_empty() {
                return Some(Matched {
                    selector: label.clone(),
                    values,
                });
            }
        }
        None
    }

    /// Same as [`Cascade::first_match`] over a whole document.
    pub fn first_match_in<'a, T, F>(&self, document: &'a Html, field: F) -> Option<Matched<T>>
    where
        F: FnMut(ElementRef<'a>) -> Option<T>,
    {
        self.first_match(document.root_element(), field)
    }
}

/// Text content of an element with whitespace collapsed.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether any class of `element` contains one of `needles`.
pub fn has_class_like(element: ElementRef<'_>, needles: &[&str]) -> bool {
    element.value().classes().any(|class| {
        let class = class.to_ascii_lowercase();
        needles.iter().any(|n| class.contains(n))
    })
}
