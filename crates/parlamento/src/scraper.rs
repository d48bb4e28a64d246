use std::collections::VecDeque;

use futures::Stream;

use crate::config::{ScraperConfig, SiteConfig};
use crate::parser::{DivLayout, PageLayout, ParseError};
use crate::store::StoreError;
use crate::transport::{Fetcher, TransportError};
use crate::types::{RawAttendance, RawMeeting};
use crate::viewstate::{Postback, ViewStateError, extract_form};

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("View-state error: {0}")]
    ViewState(#[from] ViewStateError),
    #[error("Failed to parse {context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: ParseError,
    },
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Unknown legislature '{0}'")]
    UnknownLegislature(String),
    #[error("Index page lists no legislatures")]
    NoLegislatures,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    /// Positioned on a page of `legislature`; `next_page` is the page the
    /// next `advance_page` asks for.
    Browsing { legislature: String, next_page: u32 },
    Exhausted,
}

/// Result of asking for the next page of the current legislature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Page,
    /// The requested page does not exist (or the index is exhausted).
    EndOfLegislature,
}

/// Walks the plenary meetings index: newest legislature first, its pages in
/// order, then each older legislature in turn.
///
/// The site keeps the result set in the server-side session, so every
/// postback is built from the previously returned page and issued through
/// the same [`Fetcher`].
pub struct LegislatureIndex<F, L = DivLayout> {
    fetcher: F,
    layout: L,
    config: ScraperConfig,
    state: IndexState,
    remaining: VecDeque<String>,
    done: Vec<String>,
    html: String,
    pending: VecDeque<RawMeeting>,
    page_read: bool,
}

impl<F: Fetcher, L: PageLayout> LegislatureIndex<F, L> {
    /// Loads the index page and positions the walk on the newest legislature,
    /// or on `legislature` when given.
    pub async fn open(
        mut fetcher: F,
        layout: L,
        config: ScraperConfig,
        legislature: Option<&str>,
    ) -> Result<Self, ScraperError> {
        log::info!("Fetching meetings index from {}...", config.site.index_url);
        let html = fetcher.fetch(&config.site.index_url, None).await?.body;

        let mut remaining: VecDeque<String> = layout.legislatures(&html).into();
        let current = remaining
            .pop_front()
            .ok_or(ScraperError::NoLegislatures)?;
        log::debug!("Legislatures: {} (+{} older)", current, remaining.len());

        let mut index = Self {
            fetcher,
            layout,
            config,
            state: IndexState::Browsing {
                legislature: current,
                next_page: 2,
            },
            remaining,
            done: Vec::new(),
            html,
            pending: VecDeque::new(),
            page_read: false,
        };

        if let Some(target) = legislature {
            index.fast_forward(target).await?;
        }

        Ok(index)
    }

    pub fn state(&self) -> &IndexState {
        &self.state
    }

    /// Legislatures already walked to the end (or skipped over).
    pub fn done(&self) -> &[String] {
        &self.done
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    /// Pulls the next meeting, fetching further pages as needed.
    ///
    /// Returns `Ok(None)` once every legislature has been walked.
    pub async fn next_meeting(&mut self) -> Result<Option<RawMeeting>, ScraperError> {
        loop {
            if let Some(meeting) = self.pending.pop_front() {
                return Ok(Some(meeting));
            }

            let IndexState::Browsing {
                legislature,
                next_page,
            } = &self.state
            else {
                return Ok(None);
            };

            if !self.page_read {
                let meetings = self.layout.meetings(&self.html, legislature).map_err(|source| {
                    ScraperError::Parse {
                        context: format!("legislature {} page {}", legislature, next_page - 1),
                        source,
                    }
                })?;
                self.page_read = true;
                self.pending.extend(meetings);
                continue;
            }

            if self.advance_page().await? == Advance::EndOfLegislature {
                self.end_of_legislature().await?;
            }
        }
    }

    /// The meetings of the whole index as a stream.
    pub fn meetings(&mut self) -> impl Stream<Item = Result<RawMeeting, ScraperError>> + '_ {
        futures::stream::try_unfold(self, |index| async move {
            let next = index.next_meeting().await?;
            Ok::<_, ScraperError>(next.map(|meeting| (meeting, index)))
        })
    }

    /// Requests the next page of the current legislature.
    ///
    /// A response carrying the site's error marker means the page does not
    /// exist; the current page is kept and `EndOfLegislature` is returned.
    pub async fn advance_page(&mut self) -> Result<Advance, ScraperError> {
        let IndexState::Browsing {
            legislature,
            next_page,
        } = &self.state
        else {
            return Ok(Advance::EndOfLegislature);
        };
        let (legislature, page) = (legislature.clone(), *next_page);

        let site = &self.config.site;
        let fields = extract_form(
            &mut self.fetcher,
            &self.html,
            site,
            &legislature,
            Postback::Page(page),
        )
        .await?;
        let response = self
            .fetcher
            .fetch(&site.index_url, Some(fields.as_slice()))
            .await?;

        if response.body.contains(&site.error_marker) {
            log::log!(
                self.config.progress_level(),
                "Legislature {} ends before page {}",
                legislature,
                page
            );
            return Ok(Advance::EndOfLegislature);
        }

        log::log!(
            self.config.progress_level(),
            "Legislature {}, reading page {}",
            legislature,
            page
        );
        self.html = response.body;
        self.page_read = false;
        self.state = IndexState::Browsing {
            legislature,
            next_page: page + 1,
        };
        Ok(Advance::Page)
    }

    /// Moves on to the next older legislature, or to `Exhausted` when none
    /// is left.
    pub async fn end_of_legislature(&mut self) -> Result<(), ScraperError> {
        if let IndexState::Browsing { legislature, .. } =
            std::mem::replace(&mut self.state, IndexState::Exhausted)
        {
            self.done.push(legislature);
        }

        match self.remaining.pop_front() {
            Some(next) => self.switch_legislature(next).await,
            None => {
                log::info!("No legislatures left, index exhausted");
                self.pending.clear();
                Ok(())
            }
        }
    }

    async fn fast_forward(&mut self, target: &str) -> Result<(), ScraperError> {
        let IndexState::Browsing { legislature, .. } = &self.state else {
            return Err(ScraperError::UnknownLegislature(target.to_string()));
        };
        if legislature != target && !self.remaining.iter().any(|l| l == target) {
            return Err(ScraperError::UnknownLegislature(target.to_string()));
        }

        if legislature != target {
            self.done.push(legislature.clone());
            while let Some(newer) = self.remaining.pop_front() {
                if newer == target {
                    break;
                }
                log::debug!("Skipping legislature {}", newer);
                self.done.push(newer);
            }
        }

        self.switch_legislature(target.to_string()).await
    }

    /// Reloads the index and switches its search to `legislature`, landing on
    /// that legislature's first page.
    async fn switch_legislature(&mut self, legislature: String) -> Result<(), ScraperError> {
        let site = &self.config.site;
        let base = self.fetcher.fetch(&site.index_url, None).await?.body;
        let fields = extract_form(
            &mut self.fetcher,
            &base,
            site,
            &legislature,
            Postback::SwitchLegislature,
        )
        .await?;
        let response = self
            .fetcher
            .fetch(&site.index_url, Some(fields.as_slice()))
            .await?;

        log::log!(
            self.config.progress_level(),
            "Switching legislature: {}, read page 1",
            legislature
        );
        self.html = response.body;
        self.page_read = false;
        self.state = IndexState::Browsing {
            legislature,
            next_page: 2,
        };
        Ok(())
    }
}

/// Fetches and parses the attendance list of one meeting.
pub async fn fetch_attendance<F: Fetcher, L: PageLayout>(
    fetcher: &mut F,
    layout: &L,
    site: &SiteConfig,
    attendance_bid: i64,
) -> Result<Vec<RawAttendance>, ScraperError> {
    let url = site.attendance_url_for(attendance_bid);
    let page = fetcher.fetch(&url, None).await?;
    layout
        .attendance(&page.body)
        .map_err(|source| ScraperError::Parse {
            context: format!("attendance page {}", page.url),
            source,
        })
}
