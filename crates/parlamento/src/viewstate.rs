use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::config::SiteConfig;
use crate::transport::{Fetcher, TransportError};

pub const EVENT_TARGET: &str = "__EVENTTARGET";
pub const EVENT_ARGUMENT: &str = "__EVENTARGUMENT";
pub const REQUEST_DIGEST: &str = "__REQUESTDIGEST";
pub const SCRIPT_MANAGER: &str = "ctl00$ScriptManager";

const DIGEST_ACTION: &str = "http://schemas.microsoft.com/sharepoint/soap/GetUpdatedFormDigest";
const DIGEST_ENVELOPE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <GetUpdatedFormDigest xmlns="http://schemas.microsoft.com/sharepoint/soap/" />
  </soap:Body>
</soap:Envelope>"#;

static RE_DIGEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?GetUpdatedFormDigestResult[^>]*>(.*?)</(?:\w+:)?GetUpdatedFormDigestResult>")
        .expect("invalid regex: digest")
});

#[derive(Debug, thiserror::Error)]
pub enum ViewStateError {
    #[error("Page has no postback form")]
    MissingForm,
    #[error("Digest service returned no digest: {0}")]
    MissingDigest(String),
    #[error("Digest request failed: {0}")]
    Transport(#[from] TransportError),
}

/// What a postback asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Postback {
    /// Go to page N of the results grid.
    Page(u32),
    /// Re-run the search with a different legislature selected.
    SwitchLegislature,
}

/// Ordered form fields, round-tripped on every postback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    /// Overwrites `name` in place, or appends it when absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value,
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }
}

/// Collects the inputs of the page's postback form.
///
/// The site search box is always dropped; the search button is only kept
/// when the postback switches legislature. Inputs without a value are sent
/// as empty strings.
pub fn read_form(
    html: &str,
    site: &SiteConfig,
    postback: Postback,
) -> Result<FormFields, ViewStateError> {
    let document = Html::parse_document(html);
    let form_sel = Selector::parse("form#aspnetForm").unwrap();
    let any_form_sel = Selector::parse("form").unwrap();
    let input_sel = Selector::parse("input").unwrap();

    let form = document
        .select(&form_sel)
        .next()
        .or_else(|| document.select(&any_form_sel).next())
        .ok_or(ViewStateError::MissingForm)?;

    let search_button = site.search_button();
    let mut fields = FormFields::default();

    for input in form.select(&input_sel) {
        let Some(name) = input.value().attr("name").filter(|n| !n.is_empty()) else {
            continue;
        };
        if input.value().id() == Some(site.search_input_id.as_str()) {
            continue;
        }
        if name == search_button && postback != Postback::SwitchLegislature {
            continue;
        }
        fields.set(name, input.value().attr("value").unwrap_or_default());
    }

    Ok(fields)
}

/// Points `fields` at `legislature` and sets the event fields for `postback`.
pub fn prepare_postback(
    fields: &mut FormFields,
    site: &SiteConfig,
    legislature: &str,
    postback: Postback,
) {
    fields.set(&site.legislature_field(), legislature);

    match postback {
        Postback::Page(page) => {
            let grid = site.results_grid();
            fields.set(EVENT_ARGUMENT, format!("Page${}", page));
            fields.set(EVENT_TARGET, grid.as_str());
            fields.set(
                SCRIPT_MANAGER,
                format!("{}|{}", site.update_panel(), grid),
            );
        }
        Postback::SwitchLegislature => {
            fields.set(
                SCRIPT_MANAGER,
                format!("{}|{}", site.update_panel(), site.search_button()),
            );
            fields.set(EVENT_ARGUMENT, "");
            fields.set(EVENT_TARGET, "");
        }
    }
}

pub fn parse_digest(response: &str) -> Result<String, ViewStateError> {
    RE_DIGEST
        .captures(response)
        .map(|caps| caps[1].trim().to_string())
        .filter(|digest| !digest.is_empty())
        .ok_or_else(|| {
            let preview: String = response.chars().take(200).collect();
            ViewStateError::MissingDigest(preview)
        })
}

/// Asks the companion SOAP service for a fresh request digest.
pub async fn request_digest<F: Fetcher>(
    fetcher: &mut F,
    site: &SiteConfig,
) -> Result<String, ViewStateError> {
    let response = fetcher
        .call_soap(&site.digest_url, DIGEST_ACTION, DIGEST_ENVELOPE)
        .await?;
    parse_digest(&response.body)
}

/// Builds the complete field set for a postback against `html`, including a
/// freshly fetched digest.
pub async fn extract_form<F: Fetcher>(
    fetcher: &mut F,
    html: &str,
    site: &SiteConfig,
    legislature: &str,
    postback: Postback,
) -> Result<FormFields, ViewStateError> {
    let mut fields = read_form(html, site, postback)?;
    prepare_postback(&mut fields, site, legislature, postback);

    let digest = request_digest(fetcher, site).await?;
    fields.set(REQUEST_DIGEST, digest);

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;
    use std::fs;

    fn index_html() -> String {
        fs::read_to_string("fixtures/index_page.html").expect("Failed to read fixture")
    }

    #[test]
    fn test_read_form_for_paging_drops_search_controls() {
        let site = SiteConfig::default();
        let fields = read_form(&index_html(), &site, Postback::Page(2)).expect("form");

        assert_eq!(fields.get("__VIEWSTATE"), Some("/wEPDwUKMTY1NDU2MTA1Mg9kFgJmD2QWAg"));
        assert_eq!(fields.get("__EVENTVALIDATION"), Some("/wEdAAX5"));
        assert!(!fields.has("ctl00$PlaceHolderSearchArea$pesquisa"));
        assert!(!fields.has(&site.search_button()));
    }

    #[test]
    fn test_read_form_for_switch_keeps_search_button() {
        let site = SiteConfig::default();
        let fields =
            read_form(&index_html(), &site, Postback::SwitchLegislature).expect("form");

        assert_eq!(fields.get(&site.search_button()), Some("Pesquisar"));
        assert!(!fields.has("ctl00$PlaceHolderSearchArea$pesquisa"));
    }

    #[test]
    fn test_missing_value_defaults_to_empty() {
        let site = SiteConfig::default();
        let fields = read_form(&index_html(), &site, Postback::Page(2)).expect("form");
        assert_eq!(fields.get(SCRIPT_MANAGER), Some(""));
    }

    #[test]
    fn test_read_form_without_form_fails() {
        let site = SiteConfig::default();
        let html = fs::read_to_string("fixtures/error_page.html").expect("Failed to read fixture");
        assert!(matches!(
            read_form(&html, &site, Postback::Page(2)),
            Err(ViewStateError::MissingForm)
        ));
    }

    #[test]
    fn test_prepare_paging_postback() {
        let site = SiteConfig::default();
        let mut fields = read_form(&index_html(), &site, Postback::Page(3)).expect("form");
        prepare_postback(&mut fields, &site, "XII", Postback::Page(3));

        assert_eq!(fields.get(&site.legislature_field()), Some("XII"));
        assert_eq!(fields.get(EVENT_ARGUMENT), Some("Page$3"));
        assert_eq!(fields.get(EVENT_TARGET), Some(site.results_grid().as_str()));
        assert_eq!(
            fields.get(SCRIPT_MANAGER),
            Some(format!("{}|{}", site.update_panel(), site.results_grid()).as_str())
        );
    }

    #[test]
    fn test_prepare_switch_postback() {
        let site = SiteConfig::default();
        let mut fields =
            read_form(&index_html(), &site, Postback::SwitchLegislature).expect("form");
        prepare_postback(&mut fields, &site, "XI", Postback::SwitchLegislature);

        assert_eq!(fields.get(&site.legislature_field()), Some("XI"));
        assert_eq!(fields.get(EVENT_ARGUMENT), Some(""));
        assert_eq!(fields.get(EVENT_TARGET), Some(""));
        assert_eq!(
            fields.get(SCRIPT_MANAGER),
            Some(format!("{}|{}", site.update_panel(), site.search_button()).as_str())
        );
    }

    #[test]
    fn test_parse_digest_from_fixture() {
        let xml =
            fs::read_to_string("fixtures/digest_response.xml").expect("Failed to read fixture");
        assert_eq!(
            parse_digest(&xml).expect("digest"),
            "0x5B6D0A2C9E1F,19 Jul 2017 10:32:11 -0000"
        );
    }

    #[test]
    fn test_parse_digest_missing() {
        assert!(matches!(
            parse_digest("<soap:Envelope></soap:Envelope>"),
            Err(ViewStateError::MissingDigest(_))
        ));
    }

    #[tokio::test]
    async fn test_extract_form_injects_fresh_digest() {
        let site = SiteConfig::default();
        let mut fetcher = MockFetcher::new(&site);

        let fields = extract_form(&mut fetcher, &index_html(), &site, "XIII", Postback::Page(2))
            .await
            .expect("form");

        assert_eq!(fields.get(REQUEST_DIGEST), Some(MockFetcher::DIGEST));
        assert_eq!(fetcher.digest_calls(), 1);
    }
}
