// src/config/mod.rs

pub mod template;

use anyhow::{Context, Result};
use scraper::Selector;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, env, fmt, fs, path::Path, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::export::{OutputFormat, OutputTarget};
use crate::extract::{Field, MissingFieldPolicy};
pub use template::{PageVars, UrlTemplate};

static PRESETS: &str = include_str!("../../config/presets.yaml");

const DEFAULT_RATE_LIMIT_WAIT_MS: u64 = 30_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("endpoint `{0}` has no fields")]
    NoFields(String),
    #[error("endpoint `{endpoint}`: field `{field}` listed twice")]
    DuplicateField { endpoint: String, field: String },
    #[error("endpoint `{endpoint}`: numeric field `{field}` is not in the field list")]
    UnknownNumeric { endpoint: String, field: String },
    #[error("endpoint `{0}`: page_size must be at least 1")]
    ZeroPageSize(String),
    #[error("endpoint `{0}`: concurrency must be at least 1")]
    ZeroConcurrency(String),
    #[error("endpoint `{0}`: set exactly one of `total_pages` or `total_count_field`")]
    PageCount(String),
    #[error("endpoint `{0}`: set either `url` or `urls`")]
    NoUrl(String),
    #[error("endpoint `{endpoint}`: unknown placeholder `{{{placeholder}}}`")]
    UnknownPlaceholder {
        endpoint: String,
        placeholder: String,
    },
    #[error("endpoint `{endpoint}`: invalid URL {url:?}: {reason}")]
    InvalidUrl {
        endpoint: String,
        url: String,
        reason: String,
    },
    #[error("endpoint `{endpoint}`: invalid CSS selector {selector:?}: {reason}")]
    InvalidSelector {
        endpoint: String,
        selector: String,
        reason: String,
    },
    #[error("endpoint `{endpoint}`: URL needs a service key but `{var}` is not set")]
    MissingKey { endpoint: String, var: String },
    #[error("endpoint `{endpoint}`: URL uses {{key}} but no `key_env` is configured")]
    NoKeyEnv { endpoint: String },
    #[error("endpoint `{endpoint}`: delimiter {delimiter:?} is not a single ASCII character")]
    InvalidDelimiter { endpoint: String, delimiter: char },
    #[error("unknown endpoint `{0}`")]
    UnknownEndpoint(String),
}

/// Response body type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[default]
    Xml,
    Html,
}

/// What to do when a page cannot be fetched (transport error or non-2xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpErrorPolicy {
    Skip,
    #[default]
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        join: Option<String>,
    },
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        match self {
            FieldSpec::Name(n) => n,
            FieldSpec::Detailed { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaginationSpec {
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_first_page")]
    pub first_page: u64,
    #[serde(default)]
    pub total_pages: Option<u64>,
    /// XML element name (or CSS selector for HTML) holding the upstream total.
    #[serde(default)]
    pub total_count_field: Option<String>,
}

impl Default for PaginationSpec {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            first_page: default_first_page(),
            total_pages: None,
            total_count_field: None,
        }
    }
}

fn default_page_size() -> u64 {
    10
}

fn default_first_page() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}

fn default_rate_limit_wait_ms() -> u64 {
    DEFAULT_RATE_LIMIT_WAIT_MS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default = "default_true")]
    pub bom: bool,
}

/// One endpoint as written in YAML, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub format: BodyFormat,
    #[serde(default)]
    pub url: Option<String>,
    /// Fixed list of pages; replaces `url` + `pagination`.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, deserialize_with = "ordered_pairs")]
    pub query: Vec<(String, String)>,
    #[serde(default, deserialize_with = "ordered_pairs")]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub key_env: Option<String>,
    #[serde(default)]
    pub pagination: PaginationSpec,
    pub item: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub numeric: Vec<String>,
    #[serde(default)]
    pub on_http_error: HttpErrorPolicy,
    #[serde(default)]
    pub on_missing_field: MissingFieldPolicy,
    #[serde(default)]
    pub request_delay_ms: u64,
    #[serde(default = "default_rate_limit_wait_ms")]
    pub rate_limit_wait_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub output: OutputSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub endpoints: Vec<EndpointSpec>,
}

impl Config {
    pub fn find(&self, name: &str) -> Result<&EndpointSpec, ConfigError> {
        self.endpoints
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ConfigError::UnknownEndpoint(name.to_string()))
    }
}

/// Load endpoint definitions from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let cfg = parse_config(&text).with_context(|| format!("parsing {:?}", path))?;
    debug!(path = %path.display(), endpoints = cfg.endpoints.len(), "loaded config");
    Ok(cfg)
}

pub fn parse_config(text: &str) -> Result<Config> {
    Ok(serde_yaml::from_str(text)?)
}

/// The bundled endpoint definitions.
pub fn presets() -> Result<Config> {
    parse_config(PRESETS).context("parsing bundled presets")
}

/// How the pages of a run are enumerated.
#[derive(Debug, Clone)]
pub enum Pages {
    Template {
        url: UrlTemplate,
        page_size: u64,
        first_page: u64,
        count: PageCount,
    },
    List(Vec<Url>),
}

#[derive(Debug, Clone)]
pub enum PageCount {
    Fixed(u64),
    /// `ceil(total / page_size)`, with `total` read from the first response.
    FromTotal(TotalLocator),
}

#[derive(Debug, Clone)]
pub struct TotalLocator {
    pub name: String,
    /// Compiled form of `name` for HTML bodies.
    pub selector: Option<Selector>,
}

#[derive(Debug, Clone)]
pub enum ItemLocator {
    Element(String),
    Css(Selector),
}

/// A validated, ready-to-run endpoint configuration.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub format: BodyFormat,
    pub pages: Pages,
    pub headers: Vec<(String, String)>,
    pub item: ItemLocator,
    pub fields: Vec<Field>,
    pub on_http_error: HttpErrorPolicy,
    pub on_missing_field: MissingFieldPolicy,
    pub request_delay: Duration,
    pub rate_limit_wait: Duration,
    pub concurrency: usize,
    pub output: OutputTarget,
}

impl Endpoint {
    pub fn columns(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn numeric_columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.numeric)
            .map(|f| f.name.clone())
            .collect()
    }

    /// URL of the page at 0-based position `ordinal`.
    pub fn page_url(&self, ordinal: u64) -> Result<Url> {
        match &self.pages {
            Pages::List(urls) => urls
                .get(ordinal as usize)
                .cloned()
                .with_context(|| format!("page {} beyond url list", ordinal)),
            Pages::Template {
                url,
                page_size,
                first_page,
                ..
            } => {
                let vars = PageVars::for_ordinal(ordinal, *first_page, *page_size)
                    .with_context(|| format!("page {} overflows the row range", ordinal))?;
                url.render(&vars)
                    .with_context(|| format!("rendering URL for page {}", ordinal))
            }
        }
    }
}

impl EndpointSpec {
    /// Validate, reading the service key (if any) from the environment.
    pub fn compile(&self) -> Result<Endpoint, ConfigError> {
        let key = match &self.key_env {
            Some(var) if self.needs_key() => Some(env::var(var).map_err(|_| {
                ConfigError::MissingKey {
                    endpoint: self.name.clone(),
                    var: var.clone(),
                }
            })?),
            _ => None,
        };
        self.compile_with_key(key)
    }

    fn needs_key(&self) -> bool {
        self.url
            .as_deref()
            .map(|u| UrlTemplate::uses_key(u, &self.query))
            .unwrap_or(false)
    }

    /// Validate with an explicitly supplied service key.
    pub fn compile_with_key(&self, key: Option<String>) -> Result<Endpoint, ConfigError> {
        let name = &self.name;
        if self.fields.is_empty() {
            return Err(ConfigError::NoFields(name.clone()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency(name.clone()));
        }

        let mut seen = HashSet::new();
        for f in &self.fields {
            if !seen.insert(f.name()) {
                return Err(ConfigError::DuplicateField {
                    endpoint: name.clone(),
                    field: f.name().to_string(),
                });
            }
        }
        if let Some(bad) = self.numeric.iter().find(|n| !seen.contains(n.as_str())) {
            return Err(ConfigError::UnknownNumeric {
                endpoint: name.clone(),
                field: bad.clone(),
            });
        }

        let fields = self
            .fields
            .iter()
            .map(|spec| self.compile_field(spec))
            .collect::<Result<Vec<_>, _>>()?;

        let item = match self.format {
            BodyFormat::Xml => ItemLocator::Element(self.item.clone()),
            BodyFormat::Html => ItemLocator::Css(self.selector(&self.item)?),
        };

        let pages = self.compile_pages(key)?;

        let delimiter = match self.output.delimiter {
            Some(c) if c.is_ascii() => c as u8,
            Some(c) => {
                return Err(ConfigError::InvalidDelimiter {
                    endpoint: name.clone(),
                    delimiter: c,
                })
            }
            None => b',',
        };

        let output = OutputTarget {
            path: self.output.path.clone(),
            format: self
                .output
                .format
                .unwrap_or_else(|| OutputFormat::from_path(&self.output.path)),
            delimiter,
            bom: self.output.bom,
        };

        Ok(Endpoint {
            name: name.clone(),
            format: self.format,
            pages,
            headers: self.headers.clone(),
            item,
            fields,
            on_http_error: self.on_http_error,
            on_missing_field: self.on_missing_field,
            request_delay: Duration::from_millis(self.request_delay_ms),
            rate_limit_wait: Duration::from_millis(self.rate_limit_wait_ms),
            concurrency: self.concurrency,
            output,
        })
    }

    fn compile_field(&self, spec: &FieldSpec) -> Result<Field, ConfigError> {
        let (field_name, css, join) = match spec {
            FieldSpec::Name(n) => (n.as_str(), None, None),
            FieldSpec::Detailed {
                name,
                selector,
                join,
            } => (name.as_str(), selector.as_deref(), join.clone()),
        };
        let selector = match self.format {
            // HTML fields default to matching an element of the same name
            BodyFormat::Html => Some(self.selector(css.unwrap_or(field_name))?),
            BodyFormat::Xml => None,
        };
        Ok(Field {
            name: field_name.to_string(),
            numeric: self.numeric.iter().any(|n| n == field_name),
            selector,
            join,
        })
    }

    fn compile_pages(&self, key: Option<String>) -> Result<Pages, ConfigError> {
        let name = &self.name;
        if !self.urls.is_empty() {
            let urls = self
                .urls
                .iter()
                .map(|u| {
                    Url::parse(u).map_err(|e| ConfigError::InvalidUrl {
                        endpoint: name.clone(),
                        url: u.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Pages::List(urls));
        }

        let base = self.url.as_deref().ok_or_else(|| ConfigError::NoUrl(name.clone()))?;
        if self.needs_key() && key.is_none() {
            return Err(match &self.key_env {
                Some(var) => ConfigError::MissingKey {
                    endpoint: name.clone(),
                    var: var.clone(),
                },
                None => ConfigError::NoKeyEnv {
                    endpoint: name.clone(),
                },
            });
        }

        let p = &self.pagination;
        if p.page_size == 0 {
            return Err(ConfigError::ZeroPageSize(name.clone()));
        }
        let count = match (&p.total_pages, &p.total_count_field) {
            (Some(n), None) => PageCount::Fixed(*n),
            (None, Some(field)) => PageCount::FromTotal(TotalLocator {
                name: field.clone(),
                selector: match self.format {
                    BodyFormat::Html => Some(self.selector(field)?),
                    BodyFormat::Xml => None,
                },
            }),
            _ => return Err(ConfigError::PageCount(name.clone())),
        };

        Ok(Pages::Template {
            url: UrlTemplate::new(name, base, &self.query, key)?,
            page_size: p.page_size,
            first_page: p.first_page,
            count,
        })
    }

    fn selector(&self, css: &str) -> Result<Selector, ConfigError> {
        Selector::parse(css).map_err(|e| ConfigError::InvalidSelector {
            endpoint: self.name.clone(),
            selector: css.to_string(),
            reason: format!("{:?}", e),
        })
    }
}

/// Deserialize a YAML mapping into ordered `(name, value)` pairs, rendering
/// scalar values as strings.
fn ordered_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of string keys to scalar values")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some((k, v)) = map.next_entry::<String, serde_yaml::Value>()? {
                let v = match v {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(serde::de::Error::custom(format!(
                            "`{}` must be a scalar, got {:?}",
                            k, other
                        )))
                    }
                };
                out.push((k, v));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(PairsVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEMS_YAML: &str = r#"
endpoints:
  - name: items
    url: "http://localhost/items"
    query:
      serviceKey: "{key}"
      pageNo: "{page}"
      numOfRows: 10
      type: xml
    key_env: FOODHARVEST_TEST_KEY
    pagination:
      page_size: 10
      total_pages: 3
    item: item
    fields: [id, name, kcal]
    numeric: [kcal]
    output:
      path: out/items.csv
"#;

    #[test]
    fn parses_and_compiles() {
        let cfg = parse_config(ITEMS_YAML).unwrap();
        let spec = cfg.find("items").unwrap();
        assert_eq!(
            spec.query,
            vec![
                ("serviceKey".to_string(), "{key}".to_string()),
                ("pageNo".to_string(), "{page}".to_string()),
                ("numOfRows".to_string(), "10".to_string()),
                ("type".to_string(), "xml".to_string()),
            ]
        );

        let ep = spec.compile_with_key(Some("secret".into())).unwrap();
        assert_eq!(ep.columns(), vec!["id", "name", "kcal"]);
        assert_eq!(ep.numeric_columns(), vec!["kcal"]);
        assert_eq!(ep.output.format, OutputFormat::Csv);
        assert_eq!(ep.output.delimiter, b',');
        assert!(ep.output.bom);
        assert_eq!(ep.rate_limit_wait, Duration::from_secs(30));
        assert!(matches!(
            ep.pages,
            Pages::Template {
                count: PageCount::Fixed(3),
                ..
            }
        ));
        assert_eq!(
            ep.page_url(2).unwrap().as_str(),
            "http://localhost/items?serviceKey=secret&pageNo=3&numOfRows=10&type=xml"
        );
    }

    #[test]
    fn missing_key_is_reported() {
        let cfg = parse_config(ITEMS_YAML).unwrap();
        let err = cfg.find("items").unwrap().compile_with_key(None).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingKey {
                endpoint: "items".into(),
                var: "FOODHARVEST_TEST_KEY".into()
            }
        );
    }

    #[test]
    fn rejects_ambiguous_page_count() {
        let mut spec = parse_config(ITEMS_YAML).unwrap().endpoints.remove(0);
        spec.pagination.total_count_field = Some("totalCount".into());
        assert_eq!(
            spec.compile_with_key(Some("k".into())).unwrap_err(),
            ConfigError::PageCount("items".into())
        );
        spec.pagination.total_pages = None;
        spec.pagination.total_count_field = None;
        assert_eq!(
            spec.compile_with_key(Some("k".into())).unwrap_err(),
            ConfigError::PageCount("items".into())
        );
    }

    #[test]
    fn rejects_bad_field_lists() {
        let mut spec = parse_config(ITEMS_YAML).unwrap().endpoints.remove(0);
        spec.numeric = vec!["protein".into()];
        assert!(matches!(
            spec.compile_with_key(Some("k".into())),
            Err(ConfigError::UnknownNumeric { .. })
        ));

        spec.numeric.clear();
        spec.fields.push(FieldSpec::Name("id".into()));
        assert!(matches!(
            spec.compile_with_key(Some("k".into())),
            Err(ConfigError::DuplicateField { .. })
        ));

        spec.fields.clear();
        assert_eq!(
            spec.compile_with_key(Some("k".into())).unwrap_err(),
            ConfigError::NoFields("items".into())
        );
    }

    #[test]
    fn html_fields_compile_selectors() {
        let yaml = r#"
endpoints:
  - name: facts
    format: html
    urls:
      - "https://www.example.kr/food/1"
      - "https://www.example.kr/food/2"
    item: "div.nutrition_facts.international"
    fields:
      - { name: facts, selector: div, join: " | " }
      - h1
    on_http_error: skip
    output: { path: facts.parquet }
"#;
        let ep = parse_config(yaml).unwrap().endpoints[0]
            .compile_with_key(None)
            .unwrap();
        assert!(matches!(ep.item, ItemLocator::Css(_)));
        assert!(ep.fields.iter().all(|f| f.selector.is_some()));
        assert_eq!(ep.fields[0].join.as_deref(), Some(" | "));
        assert_eq!(ep.output.format, OutputFormat::Parquet);
        assert_eq!(ep.on_http_error, HttpErrorPolicy::Skip);
        assert!(matches!(ep.pages, Pages::List(ref u) if u.len() == 2));
    }

    #[test]
    fn invalid_selector_is_reported() {
        let yaml = r#"
endpoints:
  - name: broken
    format: html
    urls: ["https://www.example.kr/"]
    item: "div[["
    fields: [h1]
    output: { path: broken.csv }
"#;
        let err = parse_config(yaml).unwrap().endpoints[0]
            .compile_with_key(None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSelector { .. }));
    }

    #[test]
    fn bundled_presets_are_valid() {
        let cfg = presets().unwrap();
        let names: Vec<_> = cfg.endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["food-codes", "cooking-terms", "recipes", "nutrition-facts"]
        );
        for spec in &cfg.endpoints {
            spec.compile_with_key(Some("test-key".into()))
                .unwrap_or_else(|e| panic!("{}: {}", spec.name, e));
        }
    }

    #[test]
    fn oversized_page_is_an_error() {
        let mut spec = parse_config(ITEMS_YAML).unwrap().endpoints.remove(0);
        spec.pagination.page_size = u64::MAX;
        let ep = spec.compile_with_key(Some("k".into())).unwrap();
        assert!(ep.page_url(0).is_ok());
        let err = ep.page_url(2).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn unknown_endpoint() {
        let cfg = presets().unwrap();
        assert_eq!(
            cfg.find("nope").unwrap_err(),
            ConfigError::UnknownEndpoint("nope".into())
        );
    }
}
