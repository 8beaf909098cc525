//! HTML statistics tables: cleaning, typed cells and role classification.
//!
//! A release table is a header row followed by body rows. Header cells are
//! kept as text; body cells that look like digit groups become integers.
//! The first header cell decides what the table is about, see
//! [`TableRole::classify`].

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Selector};

lazy_static! {
    static ref DIGIT_GROUPS: Regex = Regex::new(r"^[\d,]+$").expect("DIGIT_GROUPS to compile");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("WHITESPACE to compile");
    static ref ROW: Selector = Selector::parse("tr").expect("tr selector to parse");
    static ref HEADER_CELL: Selector = Selector::parse("th").expect("th selector to parse");
    static ref DATA_CELL: Selector = Selector::parse("td").expect("td selector to parse");
}

/// A cleaned table cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Int(i64),
    Text(String),
}

impl Cell {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Cell::Int(value) => Some(*value),
            Cell::Text(_) => None,
        }
    }

    /// The cell as a label with runs of whitespace collapsed.
    pub fn label(&self) -> String {
        clean_whitespace(&self.to_string())
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Int(value) => write!(f, "{value}"),
            Cell::Text(text) => f.write_str(text),
        }
    }
}

/// Strip the decorations health departments put in table cells.
///
/// Removes zero-width spaces and "(see below)" pointers, drops a leading
/// `*` and everything from the next `*` on (footnote markers).
pub fn clean_text(text: &str) -> String {
    // ---
    let text = text
        .replace('\u{200b}', "")
        .replace("(see", "")
        .replace("below)", "");
    let text = text.strip_prefix('*').unwrap_or(&text);
    text.split('*').next().unwrap_or_default().trim().to_string()
}

/// Turn a cleaned cell into an integer when it is only digit groups.
pub fn parse_datum(text: String) -> Cell {
    // ---
    if DIGIT_GROUPS.is_match(&text) {
        if let Ok(value) = text.replace(',', "").parse() {
            return Cell::Int(value);
        }
    }
    Cell::Text(text)
}

/// Collapse whitespace runs (non-breaking spaces included) to one space.
pub fn clean_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(&text.replace('\u{a0}', " "), " ").to_string()
}

/// Header row plus typed body rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl ParsedTable {
    /// Parse a `<table>` element.
    ///
    /// Within a body row, `th` cells come before `td` cells regardless of
    /// document order, matching how the row label is usually a `th`.
    pub fn parse(table: ElementRef<'_>) -> Self {
        // ---
        let mut rows = table.select(&ROW);
        let Some(header_row) = rows.next() else {
            return ParsedTable::default();
        };

        let headers = header_row
            .select(&HEADER_CELL)
            .map(|th| clean_text(&element_text(th)))
            .collect();

        let rows = rows
            .map(|row| {
                row.select(&HEADER_CELL)
                    .chain(row.select(&DATA_CELL))
                    .map(|cell| parse_datum(clean_text(&element_text(cell))))
                    .collect()
            })
            .collect();

        ParsedTable { headers, rows }
    }

    pub fn first_header(&self) -> Option<&str> {
        self.headers.first().map(String::as_str)
    }

    /// Value in column 1 of the first row whose label satisfies `pred`.
    pub fn value_where(&self, pred: impl Fn(&str) -> bool) -> Option<i64> {
        self.rows
            .iter()
            .find(|row| row.first().is_some_and(|label| pred(&label.label())))
            .and_then(|row| row.get(1))
            .and_then(Cell::as_int)
    }

    /// Some tables put their first data row in the header. Move it into the
    /// body and relabel the header as `Cases | Count`.
    pub fn fold_header_into_body(&mut self) {
        // ---
        let mut first_row: Vec<Cell> = self.headers.drain(..).map(Cell::Text).collect();
        if let Some(last) = first_row.pop() {
            first_row.push(parse_datum(clean_text(&last.to_string())));
        }
        self.rows.insert(0, first_row);
        self.headers = vec!["Cases".to_string(), "Count".to_string()];
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// What a release table reports, decided from its first header cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Overall,
    AgeGroup,
    Source,
    Outcome,
    Ignored,
    Unknown,
}

const OVERALL_HEADERS: [&str; 4] = ["", "Cases", "Updates", "Status"];
const SOURCE_HEADERS: [&str; 3] = [
    "By likely source of infection",
    "Source",
    "Likely source of infection",
];
const IGNORED_PREFIXES: [&str; 6] = ["Since", "Asymptomatic", "From ", "Location", "Suburb", "Route"];

impl TableRole {
    pub fn classify(first_header: &str) -> TableRole {
        // ---
        if OVERALL_HEADERS.contains(&first_header) {
            TableRole::Overall
        } else if first_header.eq_ignore_ascii_case("age group") {
            TableRole::AgeGroup
        } else if SOURCE_HEADERS.contains(&clean_whitespace(first_header).as_str()) {
            TableRole::Source
        } else if first_header == "Outcome" {
            TableRole::Outcome
        } else if IGNORED_PREFIXES.iter().any(|p| first_header.starts_with(p))
            || first_header.to_lowercase().contains("vaccination")
        {
            TableRole::Ignored
        } else {
            TableRole::Unknown
        }
    }
}
