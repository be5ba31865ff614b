//! Captured subfield values of one datafield.

use std::collections::BTreeMap;

/// All subfield values of one datafield, keyed by subfield code.
///
/// Values keep document order within each code. A subfield that appeared
/// with empty content is recorded with an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldGroup {
    tag: String,
    ind1: char,
    ind2: char,
    subfields: BTreeMap<char, Vec<String>>,
}

impl FieldGroup {
    pub fn new(tag: impl Into<String>, ind1: char, ind2: char) -> Self {
        Self {
            tag: tag.into(),
            ind1,
            ind2,
            subfields: BTreeMap::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn indicators(&self) -> (char, char) {
        (self.ind1, self.ind2)
    }

    pub fn push(&mut self, code: char, value: impl Into<String>) {
        self.subfields.entry(code).or_default().push(value.into());
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(mut self, code: char, value: impl Into<String>) -> Self {
        self.push(code, value);
        self
    }

    /// All values of subfield `code`, in document order.
    pub fn values(&self, code: char) -> &[String] {
        self.subfields.get(&code).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, code: char) -> Option<&str> {
        self.values(code).first().map(String::as_str)
    }

    pub fn contains(&self, code: char) -> bool {
        self.subfields.contains_key(&code)
    }

    /// Values of pseudo subfield `ext` carried inside subfield `code`.
    ///
    /// `$9 d:2` is pseudo subfield `d` of `$9` with value `"2"`.
    pub fn pseudo_values(&self, code: char, ext: char) -> Vec<&str> {
        self.values(code)
            .iter()
            .filter_map(|value| split_pseudo(value, ext))
            .collect()
    }

    pub fn pseudo_first(&self, code: char, ext: char) -> Option<&str> {
        self.values(code)
            .iter()
            .find_map(|value| split_pseudo(value, ext))
    }

    pub fn is_empty(&self) -> bool {
        self.subfields.is_empty()
    }
}

fn split_pseudo(value: &str, ext: char) -> Option<&str> {
    let mut chars = value.chars();
    (chars.next() == Some(ext) && chars.next() == Some(':')).then(|| chars.as_str())
}
