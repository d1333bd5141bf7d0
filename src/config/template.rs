// src/config/template.rs

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

use super::ConfigError;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_]+)\}").expect("placeholder pattern should compile"));

const KNOWN: &[&str] = &["page", "size", "start", "end", "key"];

/// Values substituted into a template for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageVars {
    /// Page index as the upstream API counts it (offset by `first_page`).
    pub page: u64,
    pub size: u64,
    /// 1-based inclusive row range covered by this page.
    pub start: u64,
    pub end: u64,
}

impl PageVars {
    /// Variables for the page at 0-based position `ordinal`, or `None` if
    /// the page index or row range does not fit in a `u64`.
    pub fn for_ordinal(ordinal: u64, first_page: u64, size: u64) -> Option<Self> {
        let start = ordinal.checked_mul(size)?.checked_add(1)?;
        Some(Self {
            page: first_page.checked_add(ordinal)?,
            size,
            start,
            end: start.checked_add(size.saturating_sub(1))?,
        })
    }
}

/// A base URL plus ordered query parameters, both of which may carry
/// `{page}`, `{size}`, `{start}`, `{end}` and `{key}` placeholders.
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    base: String,
    query: Vec<(String, String)>,
    key: Option<String>,
}

impl UrlTemplate {
    pub fn new(
        endpoint: &str,
        base: &str,
        query: &[(String, String)],
        key: Option<String>,
    ) -> Result<Self, ConfigError> {
        let texts = std::iter::once(base).chain(query.iter().map(|(_, v)| v.as_str()));
        for text in texts {
            for caps in PLACEHOLDER.captures_iter(text) {
                let name = &caps[1];
                if !KNOWN.contains(&name) {
                    return Err(ConfigError::UnknownPlaceholder {
                        endpoint: endpoint.to_string(),
                        placeholder: name.to_string(),
                    });
                }
            }
        }

        let template = Self {
            base: base.to_string(),
            query: query.to_vec(),
            key,
        };

        let probe = PageVars {
            page: 1,
            size: 1,
            start: 1,
            end: 1,
        };
        // surface a bad base URL at load time rather than on the first request
        template
            .render(&probe)
            .map_err(|reason| ConfigError::InvalidUrl {
                endpoint: endpoint.to_string(),
                url: base.to_string(),
                reason: reason.to_string(),
            })?;
        Ok(template)
    }

    /// True if any part of the template refers to `{key}`.
    pub fn uses_key(base: &str, query: &[(String, String)]) -> bool {
        std::iter::once(base)
            .chain(query.iter().map(|(_, v)| v.as_str()))
            .any(|t| PLACEHOLDER.captures_iter(t).any(|c| &c[1] == "key"))
    }

    pub fn render(&self, vars: &PageVars) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.substitute(&self.base, vars, true))?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query {
                pairs.append_pair(name, &self.substitute(value, vars, false));
            }
        }
        Ok(url)
    }

    /// Fill placeholders in `text`. In the base URL the key is
    /// percent-encoded; query values are encoded later by `append_pair`.
    fn substitute(&self, text: &str, vars: &PageVars, in_base: bool) -> String {
        PLACEHOLDER
            .replace_all(text, |caps: &Captures| match &caps[1] {
                "page" => vars.page.to_string(),
                "size" => vars.size.to_string(),
                "start" => vars.start.to_string(),
                "end" => vars.end.to_string(),
                "key" => {
                    let key = self.key.as_deref().unwrap_or_default();
                    if in_base {
                        urlencoding::encode(key).into_owned()
                    } else {
                        key.to_string()
                    }
                }
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(p: &[(&str, &str)]) -> Vec<(String, String)> {
        p.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn row_range_pages() {
        let t = UrlTemplate::new(
            "recipes",
            "http://openapi.example.kr/api/{key}/COOKRCP01/xml/{start}/{end}",
            &[],
            Some("abc".into()),
        )
        .unwrap();
        let url = t.render(&PageVars::for_ordinal(2, 1, 100).unwrap()).unwrap();
        assert_eq!(
            url.as_str(),
            "http://openapi.example.kr/api/abc/COOKRCP01/xml/201/300"
        );
    }

    #[test]
    fn query_parameters_keep_order_and_encode() {
        let t = UrlTemplate::new(
            "terms",
            "http://apis.example.kr/FdCkry/list",
            &pairs(&[
                ("serviceKey", "{key}"),
                ("page_No", "{page}"),
                ("ckry_Name", "조리"),
                ("Page_Size", "{size}"),
            ]),
            Some("k1".into()),
        )
        .unwrap();
        let url = t.render(&PageVars::for_ordinal(0, 1, 20).unwrap()).unwrap();
        let got: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            got,
            pairs(&[
                ("serviceKey", "k1"),
                ("page_No", "1"),
                ("ckry_Name", "조리"),
                ("Page_Size", "20"),
            ])
        );
        assert!(url.as_str().contains("ckry_Name=%EC%A1%B0%EB%A6%AC"));
    }

    #[test]
    fn zero_based_page_index() {
        let t = UrlTemplate::new("s", "https://x.example/search?pg={page}", &[], None).unwrap();
        let url = t.render(&PageVars::for_ordinal(0, 0, 10).unwrap()).unwrap();
        assert_eq!(url.as_str(), "https://x.example/search?pg=0");
    }

    #[test]
    fn key_in_path_is_percent_encoded() {
        let t = UrlTemplate::new(
            "recipes",
            "http://openapi.example.kr/api/{key}/COOKRCP01/xml/{start}/{end}",
            &pairs(&[("serviceKey", "{key}")]),
            Some("a/b?c#d e".into()),
        )
        .unwrap();
        let url = t.render(&PageVars::for_ordinal(0, 1, 100).unwrap()).unwrap();
        assert_eq!(url.path(), "/api/a%2Fb%3Fc%23d%20e/COOKRCP01/xml/1/100");
        assert_eq!(url.fragment(), None);
        let got: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(got, pairs(&[("serviceKey", "a/b?c#d e")]));
    }

    #[test]
    fn oversized_row_range_is_none() {
        assert_eq!(PageVars::for_ordinal(2, 1, u64::MAX), None);
        assert_eq!(PageVars::for_ordinal(u64::MAX, 1, 1), None);
        assert_eq!(
            PageVars::for_ordinal(1, 0, 10),
            Some(PageVars {
                page: 1,
                size: 10,
                start: 11,
                end: 20
            })
        );
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let err = UrlTemplate::new("s", "https://x.example/{offset}", &[], None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownPlaceholder { ref placeholder, .. } if placeholder == "offset"
        ));
    }

    #[test]
    fn detects_key_usage() {
        assert!(UrlTemplate::uses_key(
            "https://x.example/",
            &pairs(&[("serviceKey", "{key}")])
        ));
        assert!(!UrlTemplate::uses_key("https://x.example/{page}", &[]));
    }
}
