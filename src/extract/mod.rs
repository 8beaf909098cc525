//! Pure extraction helpers shared by the source adapters.
//!
//! Nothing in here performs I/O: every function takes text, markup or PDF
//! bytes and returns typed values, so the adapters can be tested against
//! fixtures.

pub mod dates;
pub mod numbers;
pub mod patterns;
pub mod pdf;
pub mod table;

pub use dates::{parse_date, parse_full_date};
pub use numbers::{parse_num, parse_ordinal, parse_perc};
pub use pdf::{extract_text_boxes, TextBox};
pub use table::{clean_text, parse_datum, Cell, ParsedTable, TableRole};
