//! Catalog selection: which streams and properties a tap extracts.
//!
//! A tap's discovery mode emits a [`Catalog`]. Before the sync run, the user's ordered
//! [`SelectionOverride`] list is applied to it by a [`CatalogSelector`]; the result is handed to
//! the tap as its run-time catalog.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CatalogError;

const PROPERTIES_SEGMENT: &str = "properties";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Catalog {
    pub streams: Vec<DiscoverStream>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DiscoverStream {
    #[serde(rename = "stream")]
    pub stream_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_stream_id: Option<String>,
    #[serde(default)]
    pub schema: Value,
    #[serde(default)]
    pub metadata: Vec<Metadata>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Metadata {
    #[serde(default)]
    pub breadcrumb: Vec<String>,
    pub metadata: DiscoverMetadataPayload,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct DiscoverMetadataPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(
        rename = "replication-method",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub replication_method: Option<String>,
    #[serde(
        rename = "replication-key",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub replication_key: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Catalog {
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, CatalogError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn stream(&self, stream_name: &str) -> Option<&DiscoverStream> {
        self.streams
            .iter()
            .find(|stream| stream.stream_name == stream_name)
    }

    /// Names of streams whose root metadata entry is selected.
    pub fn selected_streams(&self) -> Vec<&str> {
        self.streams
            .iter()
            .filter(|stream| stream.is_selected())
            .map(|stream| stream.stream_name.as_str())
            .collect()
    }
}

impl DiscoverStream {
    pub fn root_metadata(&self) -> Option<&Metadata> {
        self.metadata.iter().find(|entry| entry.is_root())
    }

    pub fn is_selected(&self) -> bool {
        self.root_metadata()
            .and_then(|entry| entry.metadata.selected)
            .unwrap_or(false)
    }

    pub fn property_metadata(&self, dotted: &str) -> Option<&Metadata> {
        self.metadata
            .iter()
            .find(|entry| !entry.is_root() && entry.dotted_breadcrumb() == dotted)
    }
}

impl Metadata {
    /// Breadcrumb with every `properties` segment dropped, joined with `.`.
    pub fn dotted_breadcrumb(&self) -> String {
        dotted_breadcrumb(&self.breadcrumb)
    }

    /// The stream-level entry; the only one where replication settings mean anything.
    pub fn is_root(&self) -> bool {
        self.breadcrumb
            .iter()
            .all(|segment| segment == PROPERTIES_SEGMENT)
    }
}

pub fn dotted_breadcrumb(breadcrumb: &[String]) -> String {
    breadcrumb
        .iter()
        .map(String::as_str)
        .filter(|segment| *segment != PROPERTIES_SEGMENT)
        .collect::<Vec<_>>()
        .join(".")
}

/// One user rule. Absent `stream` matches every stream; empty `properties` matches every
/// metadata entry of the matched streams.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SelectionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    pub selected: bool,
    #[serde(default, alias = "patterns", skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
}

impl SelectionOverride {
    pub fn all_streams(selected: bool) -> Self {
        Self {
            selected,
            ..Self::default()
        }
    }

    pub fn stream(name: impl Into<String>, selected: bool) -> Self {
        Self {
            stream: Some(name.into()),
            selected,
            ..Self::default()
        }
    }

    pub fn properties<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn replication(mut self, method: impl Into<String>, key: Option<String>) -> Self {
        self.replication_method = Some(method.into());
        self.replication_key = key;
        self
    }
}

#[derive(Clone, Debug)]
struct CompiledOverride {
    rule: SelectionOverride,
    patterns: Vec<Regex>,
}

impl CompiledOverride {
    fn compile(rule: SelectionOverride) -> Result<Self, CatalogError> {
        let patterns = rule
            .properties
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
                    CatalogError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rule, patterns })
    }

    fn matches_stream(&self, stream_name: &str) -> bool {
        self.rule
            .stream
            .as_deref()
            .map_or(true, |name| name == stream_name)
    }

    fn matches_entry(&self, dotted: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(dotted))
    }

    fn apply_to(&self, entry: &mut Metadata) {
        let is_root = entry.is_root();
        let payload = &mut entry.metadata;
        payload.selected = Some(self.rule.selected);
        if is_root {
            payload.replication_method = self.rule.replication_method.clone();
            payload.replication_key = self.rule.replication_key.clone();
        }
    }
}

/// Applies an ordered override list to catalogs.
///
/// Overrides are applied strictly in list order, so for any metadata entry the last matching
/// override decides its `selected` flag (and, on the root entry, its replication settings).
#[derive(Clone, Debug, Default)]
pub struct CatalogSelector {
    overrides: Vec<CompiledOverride>,
}

impl CatalogSelector {
    /// Compiles every property pattern; an invalid regex is the only failure.
    pub fn new<I>(overrides: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = SelectionOverride>,
    {
        let overrides = overrides
            .into_iter()
            .map(CompiledOverride::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { overrides })
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn apply(&self, mut catalog: Catalog) -> Catalog {
        for stream in &mut catalog.streams {
            self.apply_to_stream(stream);
        }
        catalog
    }

    pub fn apply_to_stream(&self, stream: &mut DiscoverStream) {
        for rule in &self.overrides {
            if !rule.matches_stream(&stream.stream_name) {
                continue;
            }
            let mut touched = 0usize;
            for entry in &mut stream.metadata {
                if rule.matches_entry(&entry.dotted_breadcrumb()) {
                    rule.apply_to(entry);
                    touched += 1;
                }
            }
            debug!(
                stream = %stream.stream_name,
                selected = rule.rule.selected,
                touched,
                "applied selection override"
            );
        }
    }
}

/// Compiles `overrides` and applies them to `catalog` in one step.
pub fn apply_overrides(
    catalog: Catalog,
    overrides: &[SelectionOverride],
) -> Result<Catalog, CatalogError> {
    Ok(CatalogSelector::new(overrides.iter().cloned())?.apply(catalog))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(breadcrumb: &[&str], selected: Option<bool>) -> Metadata {
        Metadata {
            breadcrumb: breadcrumb.iter().map(|s| s.to_string()).collect(),
            metadata: DiscoverMetadataPayload {
                selected,
                ..DiscoverMetadataPayload::default()
            },
        }
    }

    #[test]
    fn dotted_breadcrumb_drops_properties_segments() {
        let nested = entry(&["properties", "address", "properties", "city"], None);
        assert_eq!(nested.dotted_breadcrumb(), "address.city");
        assert!(!nested.is_root());
        assert!(entry(&[], None).is_root());
        assert!(entry(&["properties"], None).is_root());
    }

    #[test]
    fn patterns_must_match_the_whole_breadcrumb() {
        let rule = CompiledOverride::compile(
            SelectionOverride::stream("x", false).properties(["name"]),
        )
        .unwrap();
        assert!(rule.matches_entry("name"));
        assert!(!rule.matches_entry("first_name"));
        assert!(!rule.matches_entry("name.first"));
        assert!(!rule.matches_entry(""));
    }

    #[test]
    fn invalid_pattern_is_rejected_up_front() {
        let err = CatalogSelector::new([SelectionOverride::all_streams(true).properties(["("])])
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPattern { pattern, .. } if pattern == "("));
    }

    #[test]
    fn root_only_gets_replication_settings() {
        let mut stream = DiscoverStream {
            stream_name: "orders".to_string(),
            tap_stream_id: None,
            schema: json!({}),
            metadata: vec![entry(&[], Some(false)), entry(&["properties", "id"], None)],
            extra: Map::new(),
        };
        let selector = CatalogSelector::new([SelectionOverride::stream("orders", true)
            .replication("INCREMENTAL", Some("updated_at".to_string()))])
        .unwrap();
        selector.apply_to_stream(&mut stream);

        let root = &stream.metadata[0].metadata;
        assert_eq!(root.selected, Some(true));
        assert_eq!(root.replication_method.as_deref(), Some("INCREMENTAL"));
        assert_eq!(root.replication_key.as_deref(), Some("updated_at"));

        let property = &stream.metadata[1].metadata;
        assert_eq!(property.selected, Some(true));
        assert_eq!(property.replication_method, None);
        assert_eq!(property.replication_key, None);
    }

    #[test]
    fn matching_rule_without_replication_clears_discovered_values() {
        let mut root = entry(&[], Some(true));
        root.metadata.replication_method = Some("FULL_TABLE".to_string());
        root.metadata.replication_key = Some("id".to_string());
        let mut stream = DiscoverStream {
            stream_name: "orders".to_string(),
            tap_stream_id: None,
            schema: json!({}),
            metadata: vec![root],
            extra: Map::new(),
        };
        CatalogSelector::new([SelectionOverride::stream("orders", false)])
            .unwrap()
            .apply_to_stream(&mut stream);

        let root = &stream.metadata[0].metadata;
        assert_eq!(root.selected, Some(false));
        assert_eq!(root.replication_method, None);
        assert_eq!(root.replication_key, None);
    }

    #[test]
    fn unmatched_streams_keep_discovered_values() {
        let mut root = entry(&[], Some(false));
        root.metadata.replication_method = Some("FULL_TABLE".to_string());
        let mut stream = DiscoverStream {
            stream_name: "orders".to_string(),
            tap_stream_id: None,
            schema: json!({}),
            metadata: vec![root],
            extra: Map::new(),
        };
        CatalogSelector::new([SelectionOverride::stream("customers", true)])
            .unwrap()
            .apply_to_stream(&mut stream);

        let root = &stream.metadata[0].metadata;
        assert_eq!(root.selected, Some(false));
        assert_eq!(root.replication_method.as_deref(), Some("FULL_TABLE"));
    }
}
