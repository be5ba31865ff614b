//! Tag-driven field dispatch.
//!
//! A [`DispatchTable`] maps a datafield tag to the rules that copy its
//! subfields into the [`Document`]. The table is data: it is loaded from
//! JSON, and the default GND table is embedded in the binary.
//!
//! ```json
//! {
//!   "referral_prefix": "(DE-588)",
//!   "tags": {
//!     "035": [{ "rule": "identifier", "subfield": "a", "prefix": "(DE-588)" }],
//!     "450": [{ "rule": "name", "style": "topical", "field": "synonyms" }]
//!   }
//! }
//! ```
//!
//! Tags without an entry have no rules and are ignored.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use log::{debug, info, trace, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::coordinates;
use crate::document::{self, Document};
use crate::error::{ConfigError, FieldError};
use crate::field::FieldGroup;
use crate::lookup::AuthorityLookup;
use crate::names::{self, NameStyle};

const GND_TABLE: &str = include_str!("../dispatch/gnd.json");

/// Identifier prefix of GND records.
pub const GND_PREFIX: &str = "(DE-588)";

/// How a rule writes into its target field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// First writer wins.
    Unique,
    /// Last writer wins.
    Replace,
    /// Accumulate distinct values.
    #[default]
    Multi,
}

/// One rule as written in the table file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum RuleSpec {
    Copy {
        subfield: char,
        field: String,
        #[serde(default)]
        mode: WriteMode,
        /// Values fully matching this pattern are skipped.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exclude: Option<String>,
        /// Matches of this pattern are removed from each value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strip: Option<String>,
        /// Use only the first value of the subfield.
        #[serde(default)]
        first: bool,
    },
    Identifier {
        subfield: char,
        prefix: String,
    },
    Coordinates,
    Dewey,
    Name {
        style: NameStyle,
        field: String,
        #[serde(default)]
        mode: WriteMode,
    },
    Flag {
        subfield: char,
        marker: String,
        field: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableSpec {
    #[serde(default = "default_referral_prefix")]
    referral_prefix: String,
    tags: BTreeMap<String, Vec<RuleSpec>>,
}

fn default_referral_prefix() -> String {
    GND_PREFIX.to_string()
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub enum Rule {
    Copy {
        subfield: char,
        field: String,
        mode: WriteMode,
        exclude: Option<Regex>,
        strip: Option<Regex>,
        first: bool,
    },
    Identifier {
        subfield: char,
        prefix: String,
    },
    Coordinates,
    Dewey,
    Name {
        style: NameStyle,
        field: String,
        mode: WriteMode,
    },
    Flag {
        subfield: char,
        marker: String,
        field: String,
    },
}

/// Compile `pattern` so that it only matches whole values.
pub fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

fn compile(tag: &str, spec: RuleSpec) -> Result<Rule, ConfigError> {
    let pattern_error = |what: &str| {
        let name = format!("{what} of tag {tag}");
        move |source: regex::Error| ConfigError::InvalidPattern { name, source }
    };
    let non_empty = |field: &str| {
        if field.is_empty() {
            Err(ConfigError::InvalidParameter {
                parameter: format!("tags.{tag}.field"),
                reason: "target field name is empty".to_string(),
            })
        } else {
            Ok(())
        }
    };

    Ok(match spec {
        RuleSpec::Copy {
            subfield,
            field,
            mode,
            exclude,
            strip,
            first,
        } => {
            non_empty(&field)?;
            Rule::Copy {
                subfield,
                field,
                mode,
                exclude: exclude
                    .as_deref()
                    .map(anchored)
                    .transpose()
                    .map_err(pattern_error("exclude"))?,
                strip: strip
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(pattern_error("strip"))?,
                first,
            }
        }
        RuleSpec::Identifier { subfield, prefix } => Rule::Identifier { subfield, prefix },
        RuleSpec::Coordinates => Rule::Coordinates,
        RuleSpec::Dewey => Rule::Dewey,
        RuleSpec::Name { style, field, mode } => {
            non_empty(&field)?;
            Rule::Name { style, field, mode }
        }
        RuleSpec::Flag {
            subfield,
            marker,
            field,
        } => {
            non_empty(&field)?;
            Rule::Flag {
                subfield,
                marker,
                field,
            }
        }
    })
}

/// Everything a rule may touch while evaluating one datafield.
pub struct Context<'a> {
    pub doc: &'a mut Document,
    pub lookup: Option<&'a dyn AuthorityLookup>,
    pub referral_prefix: &'a str,
}

impl Context<'_> {
    fn record_id(&self) -> String {
        self.doc.primary_id().unwrap_or("<no id>").to_string()
    }

    fn write(&mut self, mode: WriteMode, field: &str, value: &str) {
        match mode {
            WriteMode::Unique => {
                self.doc.store_unique(field, value);
            }
            WriteMode::Replace => {
                self.doc.replace_unique(field, value, None);
            }
            WriteMode::Multi => {
                self.doc.store_multi(field, value);
            }
        }
    }
}

impl Rule {
    /// Apply this rule to one datafield.
    pub fn apply(&self, source: &FieldGroup, ctx: &mut Context<'_>) -> Result<(), FieldError> {
        match self {
            Rule::Copy {
                subfield,
                field,
                mode,
                exclude,
                strip,
                first,
            } => {
                let mut values = source.values(*subfield);
                if values.len() > 1 && (*first || *mode != WriteMode::Multi) {
                    if *mode != WriteMode::Multi {
                        warn!(
                            "{}: subfield {}${subfield} should not repeat, using the first value",
                            ctx.record_id(),
                            source.tag()
                        );
                    }
                    values = &values[..1];
                }
                for raw in values {
                    let value = match strip {
                        Some(strip) => strip.replace_all(raw, ""),
                        None => raw.as_str().into(),
                    };
                    match exclude {
                        Some(exclude) if *mode == WriteMode::Multi => {
                            ctx.doc.store_filtered(field, &value, exclude);
                        }
                        Some(exclude) if exclude.is_match(&value) => {
                            trace!("{}: skip \"{value}\" for {field}", ctx.record_id());
                        }
                        _ => ctx.write(*mode, field, &value),
                    }
                }
                Ok(())
            }

            Rule::Identifier { subfield, prefix } => {
                let Some(candidate) = source.first(*subfield).filter(|id| !id.is_empty()) else {
                    trace!("{}: {} without ${subfield}", ctx.record_id(), source.tag());
                    return Ok(());
                };
                match ctx.doc.primary_id() {
                    None => {
                        trace!("{candidate}: first identifier");
                        ctx.doc.store_unique(document::ID, candidate);
                    }
                    Some(current) if current == candidate => {}
                    Some(_) if candidate.starts_with(prefix.as_str()) => {
                        ctx.doc
                            .replace_unique(document::ID, candidate, Some(document::SAME_AS));
                    }
                    Some(_) => {
                        ctx.doc.store_multi(document::SAME_AS, candidate);
                    }
                }
                Ok(())
            }

            Rule::Coordinates => match coordinates::normalize(source)? {
                Some(point) => {
                    ctx.doc.store_multi(document::COORDINATES, &point.to_string());
                    if let Some(same_as) = source.first('0') {
                        ctx.doc.store_multi(document::SAME_AS, same_as);
                    }
                    Ok(())
                }
                None => {
                    info!(
                        "{}: no coordinate coding given or detectable, skipping {}",
                        ctx.record_id(),
                        source.tag()
                    );
                    Ok(())
                }
            },

            Rule::Dewey => {
                let Some(ddc) = source.first('a') else {
                    return Ok(());
                };
                let value = match source
                    .pseudo_first('9', 'd')
                    .and_then(|level| level.chars().next())
                {
                    Some(level) => format!("{level}:{ddc}"),
                    None => ddc.to_string(),
                };
                ctx.doc.store_multi(document::DDC, &value);
                Ok(())
            }

            Rule::Name { style, field, mode } => {
                if let Some(name) = names::compose(*style, source) {
                    ctx.write(*mode, field, &name);
                    return Ok(());
                }
                match style {
                    NameStyle::Topical => {
                        if let Some(label) = resolve_referral(source, ctx) {
                            ctx.write(*mode, field, &label);
                        }
                        Ok(())
                    }
                    NameStyle::Person => Err(FieldError::MissingSubfield('a')),
                    NameStyle::Plain | NameStyle::Corporate => {
                        debug!("{}: {} has no name", ctx.record_id(), source.tag());
                        Ok(())
                    }
                }
            }

            Rule::Flag {
                subfield,
                marker,
                field,
            } => {
                if source.values(*subfield).iter().any(|value| value == marker) {
                    debug!("{}: {marker} marks {field}", ctx.record_id());
                    ctx.doc.replace_unique(field, "true", None);
                }
                Ok(())
            }
        }
    }
}

/// A name field without `$a` may refer to another record through `$0`. The
/// record is then flagged `look4me`, and the referred record's label is
/// returned when a lookup knows it.
fn resolve_referral(source: &FieldGroup, ctx: &mut Context<'_>) -> Option<String> {
    let reference = source
        .values('0')
        .iter()
        .find(|id| id.starts_with(ctx.referral_prefix))?;
    debug!("{}: {} refers to {reference}", ctx.record_id(), source.tag());
    ctx.doc.replace_unique(document::LOOK4ME, "true", None);
    ctx.lookup?.lookup(reference).map(|record| record.preferred)
}

/// Compiled mapping from datafield tag to rules.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    rules: HashMap<String, Vec<Rule>>,
    referral_prefix: String,
}

impl DispatchTable {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let spec: TableSpec = serde_json::from_str(json)?;
        let mut rules = HashMap::with_capacity(spec.tags.len());
        for (tag, specs) in spec.tags {
            let compiled = specs
                .into_iter()
                .map(|rule| compile(&tag, rule))
                .collect::<Result<Vec<_>, _>>()?;
            rules.insert(tag, compiled);
        }
        debug!("dispatch table with {} tags", rules.len());
        Ok(Self {
            rules,
            referral_prefix: spec.referral_prefix,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// The embedded table for GND authority records.
    pub fn gnd() -> Result<Self, ConfigError> {
        Self::from_json_str(GND_TABLE)
    }

    /// Rules for `tag`; empty for tags without an entry.
    pub fn rules_for(&self, tag: &str) -> &[Rule] {
        self.rules.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn referral_prefix(&self) -> &str {
        &self.referral_prefix
    }

    /// Tags with at least one rule, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Apply all rules of the field's tag. A field is applied as a whole:
    /// if one rule fails, the writes of the tag's earlier rules are dropped.
    pub fn apply(
        &self,
        field: &FieldGroup,
        doc: &mut Document,
        lookup: Option<&dyn AuthorityLookup>,
    ) -> Result<(), FieldError> {
        let rules = self.rules_for(field.tag());
        if rules.is_empty() {
            trace!("no rules for tag {}", field.tag());
            return Ok(());
        }
        // a single rule fails before it writes
        let mut scratch = (rules.len() > 1).then(|| doc.clone());
        let mut ctx = Context {
            doc: scratch.as_mut().unwrap_or(&mut *doc),
            lookup,
            referral_prefix: &self.referral_prefix,
        };
        rules.iter().try_for_each(|rule| rule.apply(field, &mut ctx))?;
        if let Some(applied) = scratch {
            *doc = applied;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PREFERRED, RELATED, RELATED_IDS, SAME_AS, SEE_ALSO, SYNONYMS};
    use crate::lookup::InMemoryLookup;

    fn gnd() -> DispatchTable {
        DispatchTable::gnd().unwrap()
    }

    fn apply_all(table: &DispatchTable, fields: &[FieldGroup]) -> Document {
        let mut doc = Document::new();
        for field in fields {
            table.apply(field, &mut doc, None).unwrap();
        }
        doc
    }

    // --- Table loading ---

    #[test]
    fn test_embedded_table_covers_gnd_tags() {
        let table = gnd();
        assert_eq!(
            table.tags(),
            vec![
                "034", "035", "079", "083", "100", "110", "111", "130", "150", "151", "260",
                "400", "410", "411", "430", "450", "451", "500", "510", "511", "530", "550",
                "551", "700", "710", "711", "730", "750", "751"
            ]
        );
        assert_eq!(table.referral_prefix(), GND_PREFIX);
        assert!(table.rules_for("999").is_empty());
    }

    #[test]
    fn test_invalid_tables() {
        assert!(matches!(
            DispatchTable::from_json_str("{"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            DispatchTable::from_json_str(
                r#"{"tags": {"100": [{"rule": "copy", "subfield": "a", "field": "x", "exclude": "("}]}}"#
            ),
            Err(ConfigError::InvalidPattern { .. })
        ));
        assert!(matches!(
            DispatchTable::from_json_str(
                r#"{"tags": {"100": [{"rule": "copy", "subfield": "a", "field": ""}]}}"#
            ),
            Err(ConfigError::InvalidParameter { .. })
        ));
        assert!(matches!(
            DispatchTable::from_json_str(r#"{"tags": {"100": [{"rule": "teleport"}]}}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_anchored_is_full_match() {
        let pattern = anchored("http.+").unwrap();
        assert!(pattern.is_match("http://anywhere.edu"));
        assert!(!pattern.is_match("see http://anywhere.edu"));
    }

    // --- Identifier resolution ---

    #[test]
    fn test_prefixed_identifier_supersedes() {
        let table = gnd();
        let doc = apply_all(
            &table,
            &[
                FieldGroup::new("035", ' ', ' ').with('a', "(DE-101)interalId"),
                FieldGroup::new("035", ' ', ' ').with('a', "(DE-588)gndId"),
                FieldGroup::new("035", ' ', ' ').with('a', "(foobar)anyId"),
                FieldGroup::new("035", ' ', ' ').with('z', "(DE-588_3)oldId"),
            ],
        );
        assert_eq!(doc.primary_id(), Some("(DE-588)gndId"));
        assert_eq!(doc.alternate_ids(), &["(DE-101)interalId", "(foobar)anyId"]);
    }

    #[test]
    fn test_repeated_identifier_is_not_an_alternate() {
        let table = gnd();
        let doc = apply_all(
            &table,
            &[
                FieldGroup::new("035", ' ', ' ').with('a', "(DE-101)1"),
                FieldGroup::new("035", ' ', ' ').with('a', "(DE-101)1"),
            ],
        );
        assert_eq!(doc.primary_id(), Some("(DE-101)1"));
        assert!(doc.alternate_ids().is_empty());
    }

    // --- Field rules ---

    #[test]
    fn test_type_and_quality() {
        let doc = apply_all(
            &gnd(),
            &[FieldGroup::new("079", ' ', ' ')
                .with('b', "s")
                .with('c', "9")
                .with('c', "1")],
        );
        assert_eq!(doc.unique(document::AUTHORITY_TYPE), Some("s"));
        assert_eq!(doc.unique(document::QUALITY_LEVEL), Some("9"));
    }

    #[test]
    fn test_dewey_with_determination() {
        let doc = apply_all(
            &gnd(),
            &[
                FieldGroup::new("083", ' ', ' ').with('a', "999"),
                FieldGroup::new("083", ' ', ' ')
                    .with('a', "999")
                    .with('9', "d:4")
                    .with('9', "t:2011-05-01"),
            ],
        );
        assert_eq!(doc.multi(document::DDC), &["999", "4:999"]);
    }

    #[test]
    fn test_person_heading_and_tracing() {
        let doc = apply_all(
            &gnd(),
            &[
                FieldGroup::new("100", '0', ' ')
                    .with('a', "Ambrosius")
                    .with('b', "III")
                    .with('c', "de Lombez"),
                FieldGroup::new("400", '0', ' ')
                    .with('a', "Ambroise")
                    .with('9', "4:navi"),
            ],
        );
        assert_eq!(doc.preferred(), Some("Ambrosius III <de Lombez>"));
        assert_eq!(doc.multi(SYNONYMS), &["Ambroise"]);
        assert_eq!(doc.unique(document::LOOK4ME), Some("true"));
    }

    #[test]
    fn test_person_without_name_is_a_field_error() {
        let mut doc = Document::new();
        let field = FieldGroup::new("100", '1', ' ').with('d', "1749-1832");
        assert_eq!(
            gnd().apply(&field, &mut doc, None),
            Err(FieldError::MissingSubfield('a'))
        );
    }

    #[test]
    fn test_related_filters_dnb_uris() {
        let doc = apply_all(
            &gnd(),
            &[FieldGroup::new("550", ' ', ' ')
                .with('0', "(DE-588)4027242-4")
                .with('0', "https://d-nb.info/gnd/4027242-4")
                .with('a', "Hip-Hop")],
        );
        assert_eq!(doc.multi(RELATED_IDS), &["(DE-588)4027242-4"]);
        assert_eq!(doc.multi(RELATED), &["Hip-Hop"]);
    }

    #[test]
    fn test_exclusion_in_every_write_mode() {
        let table = DispatchTable::from_json_str(
            r#"{"tags": {"024": [
                {"rule": "copy", "subfield": "a", "field": "uris", "exclude": "urn:.*"},
                {"rule": "copy", "subfield": "a", "field": "uri", "mode": "unique", "exclude": "urn:.*"}
            ]}}"#,
        )
        .unwrap();
        let doc = apply_all(
            &table,
            &[
                FieldGroup::new("024", '7', ' ')
                    .with('a', "urn:nbn:de:101")
                    .with('a', "http://viaf.org/viaf/1"),
                FieldGroup::new("024", '7', ' ').with('a', "http://viaf.org/viaf/2"),
            ],
        );
        assert_eq!(
            doc.multi("uris"),
            &["http://viaf.org/viaf/1", "http://viaf.org/viaf/2"]
        );
        // unique mode only looks at the first value, which is excluded
        assert_eq!(doc.unique("uri"), Some("http://viaf.org/viaf/2"));
    }

    #[test]
    fn test_failing_rule_drops_the_whole_field() {
        let table = DispatchTable::from_json_str(
            r#"{"tags": {"700": [
                {"rule": "copy", "subfield": "0", "field": "sameAs"},
                {"rule": "name", "style": "person", "field": "synonyms"}
            ]}}"#,
        )
        .unwrap();
        let mut doc = Document::new();
        doc.store_multi(SAME_AS, "(DE-101)1");

        let field = FieldGroup::new("700", '1', '7')
            .with('0', "(DE-588)2")
            .with('d', "1900-1980");
        assert_eq!(
            table.apply(&field, &mut doc, None),
            Err(FieldError::MissingSubfield('a'))
        );
        assert_eq!(doc.multi(SAME_AS), &["(DE-101)1"]);
        assert!(doc.multi(SYNONYMS).is_empty());

        table
            .apply(&field.with('a', "Doe, Jane"), &mut doc, None)
            .unwrap();
        assert_eq!(doc.multi(SAME_AS), &["(DE-101)1", "(DE-588)2"]);
    }

    #[test]
    fn test_complex_see_reference() {
        let doc = apply_all(
            &gnd(),
            &[FieldGroup::new("260", ' ', ' ')
                .with('0', "https://d-nb.info/gnd/4027242-4")
                .with('0', "(DE-588)4027242-4")
                .with('a', "hip hop")],
        );
        assert_eq!(doc.multi(SEE_ALSO), &["(DE-588)4027242-4"]);
        assert_eq!(doc.multi(SYNONYMS), &["hip hop"]);
    }

    #[test]
    fn test_linking_entry_strips_and_filters() {
        let doc = apply_all(
            &gnd(),
            &[FieldGroup::new("700", '1', '7')
                .with('a', "Jon Doh%DE3-1-2")
                .with('a', "Second")
                .with('0', "(isil) foo bar")
                .with('0', "http://anywhere.edu")],
        );
        assert_eq!(doc.multi(SYNONYMS), &["Jon Doh"]);
        assert_eq!(doc.multi(SAME_AS), &["(isil) foo bar"]);
    }

    #[test]
    fn test_corporate_linking_entry() {
        let doc = apply_all(
            &gnd(),
            &[FieldGroup::new("710", '2', '7')
                .with('a', "联合国")
                .with('b', "Sekretariat")
                .with('0', "http://anywhere.edu")],
        );
        assert_eq!(doc.multi(SYNONYMS), &["联合国", "联合国. Sekretariat"]);
        assert!(doc.alternate_ids().is_empty());
    }

    #[test]
    fn test_heading_repeat_uses_first() {
        let doc = apply_all(
            &gnd(),
            &[FieldGroup::new("151", ' ', ' ')
                .with('a', "Uschlag")
                .with('a', "Other")],
        );
        assert_eq!(doc.preferred(), Some("Uschlag"));
    }

    #[test]
    fn test_coordinates_store_point_and_reference() {
        let doc = apply_all(
            &gnd(),
            &[FieldGroup::new("034", ' ', ' ')
                .with('0', "http://sws.geonames.org/3103556")
                .with('d', "E015.987500")
                .with('e', "E015.987502")
                .with('f', "N054.694400")
                .with('g', "N054.694402")
                .with('9', "A:dgx")],
        );
        assert_eq!(doc.multi(document::COORDINATES), &["54.694401, 15.987501"]);
        assert_eq!(doc.alternate_ids(), &["http://sws.geonames.org/3103556"]);
    }

    // --- Referrals ---

    #[test]
    fn test_topical_referral_sets_look4me() {
        let field = FieldGroup::new("450", ' ', ' ').with('0', "(DE-588)4027242-4");
        let doc = apply_all(&gnd(), &[field]);
        assert_eq!(doc.unique(document::LOOK4ME), Some("true"));
        assert!(doc.multi(SYNONYMS).is_empty());
    }

    #[test]
    fn test_topical_referral_uses_lookup() {
        let mut lookup = InMemoryLookup::new();
        lookup.insert("(DE-588)4027242-4", "Hip-Hop");
        let field = FieldGroup::new("450", ' ', ' ').with('0', "(DE-588)4027242-4");
        let mut doc = Document::new();
        gnd().apply(&field, &mut doc, Some(&lookup)).unwrap();
        assert_eq!(doc.multi(SYNONYMS), &["Hip-Hop"]);
        assert_eq!(doc.unique(document::LOOK4ME), Some("true"));
    }

    #[test]
    fn test_preferred_not_overwritten() {
        let doc = apply_all(
            &gnd(),
            &[
                FieldGroup::new("150", ' ', ' ').with('a', "TopTop"),
                FieldGroup::new("150", ' ', ' ').with('a', "Second"),
            ],
        );
        assert_eq!(doc.get(PREFERRED), Some(&document::FieldValue::Unique("TopTop".to_string())));
    }
}
