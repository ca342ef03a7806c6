//! Component descriptor (`antora.yml`) parsing. The descriptor anchors a
//! start path to a `(component, version)` bucket; beyond the known keys it
//! is an open bag of metadata that downstream stages read, so arbitrary
//! keys are preserved (snake_case keys camel-cased, matching how the rest
//! of the toolchain addresses them).

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use serde_yaml::Value as YamlValue;
use thiserror::Error;

pub const DESCRIPTOR_FILENAME: &str = "antora.yml";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("antora.yml has invalid syntax: {0}")]
    Syntax(String),
    #[error("antora.yml is missing a name")]
    MissingName,
    #[error("name in antora.yml cannot contain '/': {0}")]
    InvalidName(String),
    #[error("version in antora.yml cannot contain '/': {0}")]
    InvalidVersion(String),
    #[error("invalid version in antora.yml: false")]
    VersionFalse,
}

/// The descriptor's `version` key distinguishes four states with different
/// derivation behavior.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VersionValue {
    /// A pinned version string.
    Literal(String),
    /// `version: true` — derive from the ref shortname.
    Derive,
    /// `version: ~` — the versionless (empty) version.
    Empty,
    /// No `version` key; only legal when the source supplies one.
    #[default]
    Unset,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDesc {
    pub name: String,
    #[serde(skip)]
    pub version: VersionValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asciidoc: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

pub fn parse(bytes: &[u8]) -> Result<ComponentDesc, DescriptorError> {
    let value: YamlValue =
        serde_yaml::from_slice(bytes).map_err(|e| DescriptorError::Syntax(e.to_string()))?;
    let YamlValue::Mapping(mapping) = value else {
        return Err(DescriptorError::Syntax("expected a YAML mapping".to_string()));
    };

    let mut name = None;
    let mut version = VersionValue::Unset;
    let mut title = None;
    let mut display_version = None;
    let mut start_page = None;
    let mut prerelease = None;
    let mut nav = None;
    let mut asciidoc = None;
    let mut extra = Map::new();

    for (key, value) in mapping {
        let Some(key) = key.as_str().map(str::to_string) else {
            continue;
        };
        match key.as_str() {
            "name" => {
                let value = scalar_string(&value).ok_or(DescriptorError::MissingName)?;
                if value.contains('/') {
                    return Err(DescriptorError::InvalidName(value));
                }
                name = Some(value);
            }
            "version" => {
                version = match value {
                    YamlValue::Null => VersionValue::Empty,
                    YamlValue::Bool(true) => VersionValue::Derive,
                    YamlValue::Bool(false) => return Err(DescriptorError::VersionFalse),
                    other => {
                        let literal = scalar_string(&other)
                            .ok_or_else(|| DescriptorError::Syntax("invalid version".into()))?;
                        if literal.contains('/') {
                            return Err(DescriptorError::InvalidVersion(literal));
                        }
                        VersionValue::Literal(literal)
                    }
                };
            }
            "title" => title = scalar_string(&value),
            "display_version" => display_version = scalar_string(&value),
            "start_page" => start_page = scalar_string(&value),
            "prerelease" => prerelease = Some(yaml_to_json(&value)),
            "nav" => {
                if let YamlValue::Sequence(items) = value {
                    nav = Some(items.iter().filter_map(scalar_string).collect());
                }
            }
            "asciidoc" => {
                // attribute names stay exactly as authored
                asciidoc = Some(camelize(yaml_to_json(&value), Some("attributes")));
            }
            _ => {
                extra.insert(camel_key(&key), camelize(yaml_to_json(&value), None));
            }
        }
    }

    Ok(ComponentDesc {
        name: name.ok_or(DescriptorError::MissingName)?,
        version,
        title,
        display_version,
        start_page,
        prerelease,
        nav,
        asciidoc,
        extra,
    })
}

fn scalar_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(number_string(n)),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// An integral float keeps its decimal point: `version: 2.0` is "2.0".
fn number_string(n: &serde_yaml::Number) -> String {
    if n.is_i64() || n.is_u64() {
        n.to_string()
    } else {
        match n.as_f64() {
            Some(f) if f.is_finite() && f.fract() == 0.0 => format!("{f:.1}"),
            _ => n.to_string(),
        }
    }
}

fn yaml_to_json(value: &YamlValue) -> JsonValue {
    match value {
        YamlValue::Null => JsonValue::Null,
        YamlValue::Bool(b) => JsonValue::Bool(*b),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                JsonValue::from(i)
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null)
            } else {
                JsonValue::Null
            }
        }
        YamlValue::String(s) => JsonValue::String(s.clone()),
        YamlValue::Sequence(items) => {
            JsonValue::Array(items.iter().map(yaml_to_json).collect())
        }
        YamlValue::Mapping(mapping) => {
            let mut out = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    YamlValue::String(s) => s.clone(),
                    other => scalar_string(other).unwrap_or_default(),
                };
                out.insert(key, yaml_to_json(value));
            }
            JsonValue::Object(out)
        }
        YamlValue::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// `snake_case` → `camelCase` for a single key.
fn camel_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Deep key camel-casing; a map under `stop_key` keeps its keys verbatim.
fn camelize(value: JsonValue, stop_key: Option<&str>) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                if stop_key == Some(key.as_str()) {
                    out.insert(camel_key(&key), value);
                } else {
                    out.insert(camel_key(&key), camelize(value, stop_key));
                }
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => JsonValue::Array(
            items.into_iter().map(|v| camelize(v, stop_key)).collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_descriptor() {
        let desc = parse(b"name: the-component\nversion: v1.2.3\n").unwrap();
        assert_eq!(desc.name, "the-component");
        assert_eq!(desc.version, VersionValue::Literal("v1.2.3".into()));
        assert!(desc.title.is_none());
    }

    #[test]
    fn version_states() {
        assert_eq!(
            parse(b"name: c\nversion: true\n").unwrap().version,
            VersionValue::Derive
        );
        assert_eq!(
            parse(b"name: c\nversion: ~\n").unwrap().version,
            VersionValue::Empty
        );
        assert_eq!(parse(b"name: c\n").unwrap().version, VersionValue::Unset);
        assert!(matches!(
            parse(b"name: c\nversion: false\n").unwrap_err(),
            DescriptorError::VersionFalse
        ));
    }

    #[test]
    fn numeric_version_is_coerced() {
        assert_eq!(
            parse(b"name: c\nversion: 2.0\n").unwrap().version,
            VersionValue::Literal("2.0".into())
        );
    }

    #[test]
    fn missing_name_is_an_error() {
        assert!(matches!(
            parse(b"version: v1\n").unwrap_err(),
            DescriptorError::MissingName
        ));
    }

    #[test]
    fn name_and_version_reject_slashes() {
        assert!(matches!(
            parse(b"name: a/b\nversion: v1\n").unwrap_err(),
            DescriptorError::InvalidName(_)
        ));
        assert!(matches!(
            parse(b"name: c\nversion: v1/2\n").unwrap_err(),
            DescriptorError::InvalidVersion(_)
        ));
    }

    #[test]
    fn invalid_yaml_reports_syntax() {
        let err = parse(b"name: [unclosed\n").unwrap_err();
        assert!(err.to_string().contains("invalid syntax"));
    }

    #[test]
    fn known_keys_and_nav() {
        let desc = parse(
            b"name: c\nversion: v1\ntitle: The Component\ndisplay_version: '1.0 LTS'\nstart_page: intro.adoc\nnav:\n- modules/ROOT/nav.adoc\n",
        )
        .unwrap();
        assert_eq!(desc.title.as_deref(), Some("The Component"));
        assert_eq!(desc.display_version.as_deref(), Some("1.0 LTS"));
        assert_eq!(desc.start_page.as_deref(), Some("intro.adoc"));
        assert_eq!(desc.nav.as_deref(), Some(&["modules/ROOT/nav.adoc".to_string()][..]));
    }

    #[test]
    fn extra_keys_are_camel_cased_deeply() {
        let desc = parse(b"name: c\nversion: v1\nextra_meta:\n  some_key: 1\n").unwrap();
        let extra = desc.extra.get("extraMeta").unwrap();
        assert!(extra.get("someKey").is_some());
    }

    #[test]
    fn asciidoc_attributes_keep_their_keys() {
        let desc = parse(
            b"name: c\nversion: v1\nasciidoc:\n  attributes:\n    page-toclevels: 3\n    source_language: rust\n",
        )
        .unwrap();
        let attributes = desc.asciidoc.unwrap();
        let attributes = attributes.get("attributes").unwrap();
        assert!(attributes.get("page-toclevels").is_some());
        // no camel-casing below the attributes key
        assert!(attributes.get("source_language").is_some());
    }
}
