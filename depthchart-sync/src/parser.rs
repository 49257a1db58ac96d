//! Team depth chart page parsing.
//!
//! The markup is scraped from a site with no published format, so everything
//! here is heuristic. Missing wrappers, tables or cells are treated as "no
//! data" and produce fewer records, never an error. The contract tests below
//! and the fixtures under `tests/fixtures/` pin down the layout we rely on:
//!
//! ```text
//! div#ctl00_phContent_DepWrapper.dt-NE
//!   table.table-bordered
//!     tbody
//!       tr: td(position) td(no) td(a: player) td(no) td(a: player) ...
//! ```

use crate::discovery::abbrev_from_url;
use crate::types::{PlayerRecord, Position, TeamPageRef};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

const WRAPPER_CLASS_PREFIX: &str = "dt-";

lazy_static! {
    static ref WRAPPER: Selector = Selector::parse("div#ctl00_phContent_DepWrapper").unwrap();
    static ref BORDERED_TABLE: Selector = Selector::parse("table.table-bordered").unwrap();
    static ref TBODY: Selector = Selector::parse("tbody").unwrap();
    static ref ROW: Selector = Selector::parse("tr").unwrap();
    static ref CELL: Selector = Selector::parse("td").unwrap();
    static ref ANCHOR: Selector = Selector::parse("a").unwrap();

    // Trailing status codes: draft/acquisition codes ("MN01", "24/1") and
    // transaction markers ("U/FA", "SF/CLE").
    static ref STATUS_SUFFIX: Regex =
        Regex::new(r"(?i)\s+(?:[A-Z]{2}\d{2}|\d{2}/\d|[A-Z]{1,2}/[A-Za-z]{2,3})$").unwrap();
}

/// One `<tr>` of the depth table before normalization.
///
/// `slots[i]` is the player in depth slot `i + 1`, `None` when the slot is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDepthRow {
    pub position_label: String,
    pub slots: Vec<Option<String>>,
}

impl RawDepthRow {
    fn from_cells(cells: &[ElementRef<'_>]) -> Option<Self> {
        if cells.len() < 2 {
            return None;
        }

        let position_label = element_text(&cells[0]);

        // Cells after the label come in (depth number, player) pairs; a trailing
        // unpaired cell is ignored.
        let slots = cells[1..]
            .chunks_exact(2)
            .map(|pair| {
                pair[1]
                    .select(&ANCHOR)
                    .next()
                    .map(|anchor| element_text(&anchor))
                    .filter(|text| !text.is_empty())
            })
            .collect();

        Some(Self { position_label, slots })
    }
}

pub struct DepthChartParser {
    target_positions: BTreeSet<Position>,
}

impl DepthChartParser {
    pub fn new(target_positions: BTreeSet<Position>) -> Self {
        Self { target_positions }
    }

    /// Parse one team page into records. Never fails; a page without the
    /// expected table yields an empty list.
    pub fn parse_team_page(&self, html: &str, page: &TeamPageRef) -> Vec<PlayerRecord> {
        let document = Html::parse_document(html);
        let team_abbrev = resolve_team_abbrev(&document, page);

        let rows = extract_rows(&document);
        if rows.is_empty() {
            warn!("No depth chart rows found at {}", page.url);
            return Vec::new();
        }

        let records: Vec<PlayerRecord> = rows
            .iter()
            .flat_map(|row| self.records_from_row(row, &team_abbrev))
            .collect();

        info!("Parsed {} records for {} from {} rows", records.len(), team_abbrev, rows.len());
        records
    }

    /// Turn one raw row into records. The tier is the slot index, so empty
    /// slots still push later players down.
    pub fn records_from_row(&self, row: &RawDepthRow, team_abbrev: &str) -> Vec<PlayerRecord> {
        let position = match Position::normalize(&row.position_label) {
            Some(position) if self.target_positions.contains(&position) => position,
            _ => {
                debug!("Skipping row with position {:?}", row.position_label);
                return Vec::new();
            }
        };

        row.slots
            .iter()
            .zip(1u32..)
            .filter_map(|(slot, tier)| {
                let name = clean_player_name(slot.as_deref()?)?;
                Some(PlayerRecord::new(name, team_abbrev, position, tier))
            })
            .collect()
    }
}

impl Default for DepthChartParser {
    fn default() -> Self {
        Self::new(Position::ALL.into_iter().collect())
    }
}

/// Best-effort team code: the `dt-XXX` class on the wrapper div, taken
/// verbatim, falling back to the upper-cased last path segment of the page URL.
pub fn resolve_team_abbrev(document: &Html, page: &TeamPageRef) -> String {
    let from_wrapper = document.select(&WRAPPER).next().and_then(|wrapper| {
        wrapper
            .value()
            .classes()
            .find_map(|class| class.strip_prefix(WRAPPER_CLASS_PREFIX))
            .filter(|code| !code.is_empty())
            .map(str::to_string)
    });

    from_wrapper
        .or_else(|| page.abbrev_hint.clone())
        .or_else(|| abbrev_from_url(&page.url))
        .unwrap_or_default()
}

/// Rows of the bordered depth table, preferring the one inside the wrapper.
pub fn extract_rows(document: &Html) -> Vec<RawDepthRow> {
    let table = document
        .select(&WRAPPER)
        .next()
        .and_then(|wrapper| wrapper.select(&BORDERED_TABLE).next())
        .or_else(|| document.select(&BORDERED_TABLE).next());

    let Some(body) = table.and_then(|table| table.select(&TBODY).next()) else {
        return Vec::new();
    };

    body.select(&ROW)
        .filter_map(|tr| {
            let cells: Vec<ElementRef<'_>> = tr.select(&CELL).collect();
            RawDepthRow::from_cells(&cells)
        })
        .collect()
}

/// Strip a trailing status code and title-case what is left.
pub fn clean_player_name(raw: &str) -> Option<String> {
    let collapsed = collapse_whitespace(raw);
    let stripped = STATUS_SUFFIX.replace(&collapsed, "");
    let name = title_case(stripped.trim());
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Upper-case the first letter of each run of letters, lower-case the rest.
/// "o'DONNELL" -> "O'Donnell", "ja marr chase" -> "Ja Marr Chase".
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

fn element_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
