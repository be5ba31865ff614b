//! Display names composed from several subfields.

use serde::{Deserialize, Serialize};

use crate::field::FieldGroup;

/// How subfields combine into one display name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameStyle {
    /// `$a` alone.
    #[default]
    Plain,
    /// `$a [$b] <$c>...`: name, numeration, titles.
    Person,
    /// `$a. $b... ($g)...`: name, subordinate units, additions.
    Corporate,
    /// `$a <$g>...`: term and its contexts.
    Topical,
}

/// Build the display name for `field`, or `None` when there is nothing to
/// show.
///
/// Corporate names tolerate a missing `$a` as long as units or additions
/// remain; every other style needs `$a`.
pub fn compose(style: NameStyle, field: &FieldGroup) -> Option<String> {
    let name = field.first('a');
    let mut full = match (style, name) {
        (NameStyle::Corporate, None) => String::new(),
        (_, None) => return None,
        (_, Some(name)) => name.to_string(),
    };

    match style {
        NameStyle::Plain => {}
        NameStyle::Person => {
            if let Some(numeration) = field.first('b') {
                full.push(' ');
                full.push_str(numeration);
            }
            for title in field.values('c') {
                full.push_str(&format!(" <{title}>"));
            }
        }
        NameStyle::Corporate => {
            for unit in field.values('b') {
                full.push_str(". ");
                full.push_str(unit);
            }
            for addition in field.values('g') {
                full.push_str(&format!(" ({addition})"));
            }
        }
        NameStyle::Topical => {
            for context in field.values('g') {
                full.push_str(&format!(" <{context}>"));
            }
        }
    }

    (!full.is_empty()).then_some(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_name() {
        let field = FieldGroup::new("100", '0', ' ')
            .with('a', "Ambrosius")
            .with('b', "III")
            .with('c', "de Lombez")
            .with('c', "other title");
        assert_eq!(
            compose(NameStyle::Person, &field).as_deref(),
            Some("Ambrosius III <de Lombez> <other title>")
        );
    }

    #[test]
    fn test_corporate_name() {
        let field = FieldGroup::new("410", '1', ' ')
            .with('a', "USA")
            .with('b', "Department of Agriculture")
            .with('b', "Interagency Agricultural Projections Committee")
            .with('g', "USA");
        assert_eq!(
            compose(NameStyle::Corporate, &field).as_deref(),
            Some("USA. Department of Agriculture. Interagency Agricultural Projections Committee (USA)")
        );
    }

    #[test]
    fn test_corporate_without_a() {
        let field = FieldGroup::new("510", '2', ' ').with('g', "Test");
        assert_eq!(compose(NameStyle::Corporate, &field).as_deref(), Some(" (Test)"));
        let empty = FieldGroup::new("510", '2', ' ');
        assert_eq!(compose(NameStyle::Corporate, &empty), None);
    }

    #[test]
    fn test_topical_name() {
        let field = FieldGroup::new("150", ' ', ' ')
            .with('a', "Bank")
            .with('g', "Möbel");
        assert_eq!(compose(NameStyle::Topical, &field).as_deref(), Some("Bank <Möbel>"));
    }

    #[test]
    fn test_name_requires_a() {
        let field = FieldGroup::new("100", '1', ' ').with('b', "III");
        assert_eq!(compose(NameStyle::Person, &field), None);
        assert_eq!(compose(NameStyle::Topical, &field), None);
        assert_eq!(compose(NameStyle::Plain, &field), None);
    }
}
