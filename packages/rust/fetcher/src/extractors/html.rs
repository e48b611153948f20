use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};

use jobpulse_shared::{JobPulseError, Result};

use super::{FieldMap, ListingExtractor};

/// CSS-selector extraction for server-rendered listing pages.
///
/// Field selectors are evaluated inside each item element. A trailing
/// `@attr` (e.g. `a.job-link@href`) reads an attribute instead of the text.
pub struct HtmlExtractor {
    item: Selector,
    fields: Vec<FieldRule>,
}

struct FieldRule {
    name: String,
    selector: Selector,
    attr: Option<String>,
}

impl HtmlExtractor {
    pub fn new(item: &str, fields: &BTreeMap<String, String>) -> Result<Self> {
        let item = parse_selector(item)?;
        let fields = fields
            .iter()
            .map(|(name, raw)| {
                let (css, attr) = split_attr(raw);
                Ok(FieldRule {
                    name: name.clone(),
                    selector: parse_selector(css)?,
                    attr: attr.map(str::to_string),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { item, fields })
    }

    fn extract_item(&self, item: ElementRef<'_>) -> FieldMap {
        let mut map = FieldMap::new();
        for rule in &self.fields {
            let Some(el) = item.select(&rule.selector).next() else {
                continue;
            };
            let value = match &rule.attr {
                Some(attr) => el.value().attr(attr).unwrap_or_default().trim().to_string(),
                None => element_text(el),
            };
            if !value.is_empty() {
                map.insert(rule.name.clone(), value);
            }
        }
        map
    }
}

impl ListingExtractor for HtmlExtractor {
    fn extract(&self, body: &str) -> Result<Vec<FieldMap>> {
        let doc = Html::parse_document(body);
        Ok(doc
            .select(&self.item)
            .map(|item| self.extract_item(item))
            .filter(|map| !map.is_empty())
            .collect())
    }

    fn name(&self) -> &str {
        "html"
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| JobPulseError::config(format!("invalid selector {css:?}: {e:?}")))
}

/// Split `a.link@href` into (`a.link`, Some(`href`)).
fn split_attr(raw: &str) -> (&str, Option<&str>) {
    match raw.rsplit_once('@') {
        Some((css, attr))
            if !css.trim().is_empty()
                && !attr.is_empty()
                && attr.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            (css.trim(), Some(attr))
        }
        _ => (raw.trim(), None),
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn extracts_text_and_attributes() {
        let html = r#"<ul>
            <li class="job"><a class="t" href="/jobs/1">Rust 开发</a><span class="c">甲公司</span></li>
            <li class="job"><a class="t" href="/jobs/2">Go <b>后端</b></a></li>
            <li class="job"></li>
        </ul>"#;
        let extractor = HtmlExtractor::new(
            "li.job",
            &fields(&[("title", "a.t"), ("url", "a.t@href"), ("company", ".c")]),
        )
        .unwrap();

        let items = extractor.extract(html).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["title"], "Rust 开发");
        assert_eq!(items[0]["url"], "/jobs/1");
        assert_eq!(items[0]["company"], "甲公司");
        assert_eq!(items[1]["title"], "Go 后端");
        assert!(!items[1].contains_key("company"));
    }

    #[test]
    fn invalid_selector_is_config_error() {
        let err = HtmlExtractor::new("li[", &BTreeMap::new()).err().unwrap();
        assert!(matches!(err, JobPulseError::Config { .. }));
    }

    #[test]
    fn split_attr_only_takes_plain_names() {
        assert_eq!(split_attr("a@href"), ("a", Some("href")));
        assert_eq!(split_attr("a.title"), ("a.title", None));
        assert_eq!(split_attr("a[data-x='@y z']"), ("a[data-x='@y z']", None));
    }
}
