use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};

use crate::types::{RawAttendance, RawMeeting};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Missing required element: {0}")]
    MissingElement(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Failed to parse date: {0}")]
    DateParse(String),
    #[error("Failed to parse number: {0}")]
    NumberParse(String),
}

/// Markup strategy for the meetings index and the meeting detail pages.
///
/// The pagination engine only relies on this interface, so a redesign of the
/// site's markup is absorbed by a new implementation.
pub trait PageLayout {
    /// Legislature codes offered by the index page, newest first.
    fn legislatures(&self, html: &str) -> Vec<String>;

    fn meetings(&self, html: &str, legislature: &str) -> Result<Vec<RawMeeting>, ParseError>;

    fn attendance(&self, html: &str) -> Result<Vec<RawAttendance>, ParseError>;
}

const RESULTS_PANEL: &str = "div#ctl00_ctl52_g_62fda7ea_cd69_4efd_ac24_968bfc19cf59_ctl00_pnlResults";
const RESULTS_GRID: &str = "div.row.margin_h0.margin-Top-15";
const DETAIL_PANEL: &str = "div#ctl00_ctl52_g_6319d967_bcb6_4ba9_b9fc_c9bb325b19f1_ctl00_pnlDetalhe";

const MEETING_CELLS: usize = 4;
const ATTENDANCE_CELLS: usize = 5;
const ATTENDANCE_HEADER_ROWS: usize = 2;

/// The div-based markup served by the current site.
#[derive(Debug, Clone, Copy, Default)]
pub struct DivLayout;

impl PageLayout for DivLayout {
    fn legislatures(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let selector_sel = Selector::parse("select[name$='ddlLegislatura'] option").unwrap();
        let any_option_sel = Selector::parse("option").unwrap();

        let mut options: Vec<ElementRef> = document.select(&selector_sel).collect();
        if options.is_empty() {
            options = document.select(&any_option_sel).collect();
        }

        options
            .into_iter()
            .filter_map(|o| o.value().attr("value"))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn meetings(&self, html: &str, legislature: &str) -> Result<Vec<RawMeeting>, ParseError> {
        let document = Html::parse_document(html);
        let panel_sel = Selector::parse(RESULTS_PANEL).unwrap();
        let grid_sel = Selector::parse(RESULTS_GRID).unwrap();

        let grid = document
            .select(&panel_sel)
            .next()
            .ok_or_else(|| ParseError::MissingElement("results panel".into()))?
            .select(&grid_sel)
            .next()
            .ok_or_else(|| ParseError::MissingElement("results grid".into()))?;

        let mut cells = child_divs(grid);
        // trailing div holds the pager
        cells.pop();

        complete_rows(&cells, MEETING_CELLS, "results grid")?
            .map(|row| parse_meeting_row(row, legislature))
            .collect()
    }

    fn attendance(&self, html: &str) -> Result<Vec<RawAttendance>, ParseError> {
        let document = Html::parse_document(html);
        let panel_sel = Selector::parse(DETAIL_PANEL).unwrap();

        let panel = document
            .select(&panel_sel)
            .next()
            .ok_or_else(|| ParseError::MissingElement("attendance panel".into()))?;

        let cells = child_divs(panel);
        let cells = cells.get(ATTENDANCE_HEADER_ROWS..).unwrap_or_default();

        complete_rows(cells, ATTENDANCE_CELLS, "attendance panel")?
            .map(parse_attendance_row)
            .collect()
    }
}

fn parse_meeting_row(row: &[ElementRef], legislature: &str) -> Result<RawMeeting, ParseError> {
    let link_sel = Selector::parse("a").unwrap();
    let div_sel = Selector::parse("div").unwrap();
    let (date_cell, number_cell, type_cell) = (row[0], row[1], row[2]);

    let date_link = date_cell
        .select(&link_sel)
        .next()
        .ok_or_else(|| ParseError::MissingField("meeting date link".into()))?;
    let date_text = normalize_whitespace(&elem_text(date_link));
    let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d")
        .map_err(|_| ParseError::DateParse(date_text.clone()))?;
    let attendance_bid = date_link
        .value()
        .attr("href")
        .ok_or_else(|| ParseError::MissingField(format!("attendance link for {}", date_text)))
        .and_then(bid_from_href)?;

    let number_link = number_cell.select(&link_sel).next();
    let number_text = normalize_whitespace(&elem_text(number_link.unwrap_or(number_cell)));
    let number = number_text
        .parse::<u32>()
        .map_err(|_| ParseError::NumberParse(format!("meeting number '{}'", number_text)))?;
    let schedule_url = number_link
        .and_then(|a| a.value().attr("href"))
        .unwrap_or_default()
        .to_string();

    let meeting_type = type_cell
        .select(&div_sel)
        .last()
        .map(|e| normalize_whitespace(&elem_text(e)))
        .unwrap_or_else(|| normalize_whitespace(&elem_text(type_cell)));

    Ok(RawMeeting {
        legislature: legislature.to_string(),
        date,
        attendance_bid,
        number,
        meeting_type,
        schedule_url,
    })
}

fn parse_attendance_row(row: &[ElementRef]) -> Result<RawAttendance, ParseError> {
    let link_sel = Selector::parse("a").unwrap();
    let (member_cell, party_cell, status_cell, reason_cell) = (row[0], row[1], row[2], row[3]);

    let member_link = member_cell
        .select(&link_sel)
        .next()
        .ok_or_else(|| ParseError::MissingField("member link".into()))?;
    let name = normalize_whitespace(&elem_text(member_link));
    let mp_bid = member_link
        .value()
        .attr("href")
        .ok_or_else(|| ParseError::MissingField(format!("member link for {}", name)))
        .and_then(bid_from_href)?;

    Ok(RawAttendance {
        name,
        mp_bid,
        party: span_text(party_cell),
        status: span_text(status_cell),
        reason: span_text(reason_cell),
    })
}

/// Extracts the integer following the first `=` of a link such as `...?BID=1234`.
fn bid_from_href(href: &str) -> Result<i64, ParseError> {
    let digits: String = href
        .split('=')
        .nth(1)
        .unwrap_or_default()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse::<i64>()
        .map_err(|_| ParseError::NumberParse(format!("identifier in '{}'", href)))
}

/// Splits `cells` into rows of `width`. A short trailing row means the
/// markup no longer matches and is fatal.
fn complete_rows<'a, 'b>(
    cells: &'a [ElementRef<'b>],
    width: usize,
    region: &str,
) -> Result<std::slice::ChunksExact<'a, ElementRef<'b>>, ParseError> {
    let rows = cells.chunks_exact(width);
    match rows.remainder().len() {
        0 => Ok(rows),
        n => Err(ParseError::MissingElement(format!(
            "incomplete row in {}: {} trailing cell(s)",
            region, n
        ))),
    }
}

fn child_divs(element: ElementRef) -> Vec<ElementRef> {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "div")
        .collect()
}

fn span_text(cell: ElementRef) -> String {
    let span_sel = Selector::parse("span").unwrap();
    let target = cell.select(&span_sel).next().unwrap_or(cell);
    normalize_whitespace(&elem_text(target))
}

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
