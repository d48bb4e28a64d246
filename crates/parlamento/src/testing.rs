//! Scripted site used by the unit tests: renders index and detail pages for a
//! fixed set of legislatures and records every request it receives.

use chrono::{Days, NaiveDate};

use crate::config::SiteConfig;
use crate::transport::{Fetched, Fetcher, TransportError};
use crate::types::{RawAttendance, RawMeeting};
use crate::viewstate::{EVENT_ARGUMENT, EVENT_TARGET, REQUEST_DIGEST};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    Index,
    Page { legislature: String, page: u32 },
    Switch(String),
    Detail(i64),
    Rejected,
}

#[derive(Debug)]
pub(crate) struct MockFetcher {
    site: SiteConfig,
    /// (code, page count), newest first.
    legislatures: Vec<(String, u32)>,
    meetings_per_page: u32,
    requests: Vec<Request>,
    digest_calls: usize,
}

impl MockFetcher {
    pub(crate) const DIGEST: &'static str = "0xFEED,01 Jan 2020 00:00:00 -0000";

    /// Three legislatures with two pages each.
    pub(crate) fn new(site: &SiteConfig) -> Self {
        Self::with_legislatures(site, &[("XIII", 2), ("XII", 2), ("XI", 2)], 2)
    }

    pub(crate) fn with_legislatures(
        site: &SiteConfig,
        legislatures: &[(&str, u32)],
        meetings_per_page: u32,
    ) -> Self {
        Self {
            site: site.clone(),
            legislatures: legislatures
                .iter()
                .map(|(code, pages)| (code.to_string(), *pages))
                .collect(),
            meetings_per_page,
            requests: Vec::new(),
            digest_calls: 0,
        }
    }

    pub(crate) fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub(crate) fn digest_calls(&self) -> usize {
        self.digest_calls
    }

    /// Every meeting the site holds, in the order the index presents them.
    pub(crate) fn all_meetings(&self) -> Vec<RawMeeting> {
        self.legislatures
            .iter()
            .flat_map(|(code, pages)| (1..=*pages).flat_map(move |p| self.meetings_on(code, p)))
            .collect()
    }

    pub(crate) fn attendance_for(attendance_bid: i64) -> Vec<RawAttendance> {
        vec![
            RawAttendance {
                name: "Ana Catarina Mendes".into(),
                mp_bid: 1301,
                party: "PS".into(),
                status: "Presença".into(),
                reason: String::new(),
            },
            RawAttendance {
                name: "Heloísa Apolónia".into(),
                mp_bid: 6532,
                party: if attendance_bid % 2 == 0 { "PEV" } else { "Ninsc" }.into(),
                status: "Falta Justificada".into(),
                reason: "Doença".into(),
            },
        ]
    }

    fn total_meetings(&self) -> u32 {
        self.legislatures.iter().map(|(_, p)| p).sum::<u32>() * self.meetings_per_page
    }

    fn ordinal_of(&self, legislature: &str, page: u32) -> u32 {
        let mut ordinal = 0;
        for (code, pages) in &self.legislatures {
            if code == legislature {
                return ordinal + (page - 1) * self.meetings_per_page;
            }
            ordinal += pages * self.meetings_per_page;
        }
        ordinal
    }

    fn pages_of(&self, legislature: &str) -> Option<u32> {
        self.legislatures
            .iter()
            .find(|(code, _)| code == legislature)
            .map(|(_, pages)| *pages)
    }

    fn meetings_on(&self, legislature: &str, page: u32) -> Vec<RawMeeting> {
        let first = self.ordinal_of(legislature, page);
        let newest = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
        (first..first + self.meetings_per_page)
            .map(|ordinal| RawMeeting {
                legislature: legislature.to_string(),
                date: newest - Days::new(u64::from(ordinal)),
                attendance_bid: 1000 + i64::from(ordinal),
                number: self.total_meetings() - ordinal,
                meeting_type: "Reunião Plenária".to_string(),
                schedule_url: format!("http://app.parlamento.pt/doc.pdf?ordem={}", ordinal),
            })
            .collect()
    }

    fn index_page(&self, legislature: &str, page: u32) -> String {
        let options: String = self
            .legislatures
            .iter()
            .map(|(code, _)| format!(r#"<option value="{0}">{0}</option>"#, code))
            .collect();

        let rows: String = self
            .meetings_on(legislature, page)
            .iter()
            .map(|m| {
                format!(
                    r#"<div><a href="/DetalheReuniaoPlenaria.aspx?BID={}">{}</a></div>
                    <div><a href="{}">{}</a></div>
                    <div><div>Tipo</div><div>{}</div></div>
                    <div></div>"#,
                    m.attendance_bid, m.date, m.schedule_url, m.number, m.meeting_type
                )
            })
            .collect();

        format!(
            r#"<html><body><form id="aspnetForm">
            <input type="hidden" name="__VIEWSTATE" value="vs-{legislature}-{page}" />
            <input type="hidden" name="{EVENT_TARGET}" value="" />
            <input type="hidden" name="{EVENT_ARGUMENT}" value="" />
            <input type="hidden" name="{REQUEST_DIGEST}" value="stale" />
            <input type="text" id="{search}" name="ctl00$search" value="" />
            <select name="{select}">{options}</select>
            <input type="submit" name="{button}" value="Pesquisar" />
            <div id="ctl00_ctl52_g_62fda7ea_cd69_4efd_ac24_968bfc19cf59_ctl00_pnlResults">
            <div class="row margin_h0 margin-Top-15">{rows}<div class="pager"></div></div>
            </div></form></body></html>"#,
            search = self.site.search_input_id,
            select = self.site.legislature_field(),
            button = self.site.search_button(),
        )
    }

    fn detail_page(attendance_bid: i64) -> String {
        let rows: String = Self::attendance_for(attendance_bid)
            .iter()
            .map(|a| {
                format!(
                    r#"<div><a href="/Biografia.aspx?BID={}">{}</a></div>
                    <div><span>{}</span></div>
                    <div><span>{}</span></div>
                    <div><span>{}</span></div>
                    <div></div>"#,
                    a.mp_bid, a.name, a.party, a.status, a.reason
                )
            })
            .collect();

        format!(
            r#"<html><body>
            <div id="ctl00_ctl52_g_6319d967_bcb6_4ba9_b9fc_c9bb325b19f1_ctl00_pnlDetalhe">
            <div>Reunião</div><div>Cabeçalho</div>{rows}
            </div></body></html>"#
        )
    }

    fn error_page(&self) -> String {
        format!(
            "<html><body><span>{}</span></body></html>",
            self.site.error_marker
        )
    }

    fn postback(&mut self, fields: &[(String, String)]) -> String {
        let field = |name: &str| {
            fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        };

        if field(REQUEST_DIGEST) != Some(Self::DIGEST) {
            self.requests.push(Request::Rejected);
            return self.error_page();
        }

        let legislature = field(&self.site.legislature_field())
            .unwrap_or_default()
            .to_string();
        let Some(pages) = self.pages_of(&legislature) else {
            self.requests.push(Request::Rejected);
            return self.error_page();
        };

        if field(EVENT_TARGET) == Some("") && field(&self.site.search_button()).is_some() {
            self.requests.push(Request::Switch(legislature.clone()));
            return self.index_page(&legislature, 1);
        }

        let page = field(EVENT_ARGUMENT)
            .and_then(|arg| arg.strip_prefix("Page$"))
            .and_then(|n| n.parse::<u32>().ok())
            .unwrap_or(0);
        self.requests.push(Request::Page {
            legislature: legislature.clone(),
            page,
        });

        if page == 0 || page > pages {
            self.error_page()
        } else {
            self.index_page(&legislature, page)
        }
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(
        &mut self,
        url: &str,
        form: Option<&[(String, String)]>,
    ) -> Result<Fetched, TransportError> {
        let body = if let Some(bid) = url.strip_prefix(&self.site.attendance_url) {
            let bid = bid.parse::<i64>().unwrap_or_default();
            self.requests.push(Request::Detail(bid));
            Self::detail_page(bid)
        } else if let Some(fields) = form {
            self.postback(fields)
        } else {
            self.requests.push(Request::Index);
            let newest = self.legislatures[0].0.clone();
            self.index_page(&newest, 1)
        };

        Ok(Fetched {
            url: url.to_string(),
            body,
        })
    }

    async fn call_soap(
        &mut self,
        url: &str,
        _action: &str,
        _envelope: &str,
    ) -> Result<Fetched, TransportError> {
        self.digest_calls += 1;
        Ok(Fetched {
            url: url.to_string(),
            body: format!(
                "<soap:Envelope><soap:Body><GetUpdatedFormDigestResponse>\
                 <GetUpdatedFormDigestResult>{}</GetUpdatedFormDigestResult>\
                 </GetUpdatedFormDigestResponse></soap:Body></soap:Envelope>",
                Self::DIGEST
            ),
        })
    }
}
