//! Cell identity for the dependency graph.
//!
//! A `CellId` names one cell of a spreadsheet. The text form is column
//! letters followed by a 1-based row number (`A1`, `AB12`). Parsing is
//! case-insensitive; the canonical form is uppercase.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Unique identifier for a cell in a spreadsheet.
///
/// Ordering is row-major (row first, then column), which is the order
/// `dump` and cycle reports use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    /// Row index (0-based)
    pub row: usize,
    /// Column index (0-based)
    pub col: usize,
}

/// Error returned when a string is not a valid cell identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cell id '{0}'")]
pub struct CellIdError(pub String);

impl CellId {
    /// Create a new CellId.
    #[inline]
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Parse a cell id such as `a1`, `B12` or `$C$3`.
    ///
    /// `$` markers are accepted and ignored; they only matter inside formulas.
    pub fn parse(text: &str) -> Result<Self, CellIdError> {
        let err = || CellIdError(text.to_string());
        let s = text.trim();
        let mut chars = s.chars().peekable();

        if chars.peek() == Some(&'$') {
            chars.next();
        }

        let mut col: usize = 0;
        let mut letters = 0;
        while let Some(&c) = chars.peek() {
            if !c.is_ascii_alphabetic() {
                break;
            }
            let digit = (c.to_ascii_uppercase() as usize) - ('A' as usize) + 1;
            col = col.checked_mul(26).and_then(|v| v.checked_add(digit)).ok_or_else(err)?;
            letters += 1;
            chars.next();
        }
        if letters == 0 {
            return Err(err());
        }

        if chars.peek() == Some(&'$') {
            chars.next();
        }

        let row_str: String = chars.collect();
        if row_str.is_empty() || !row_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        let row: usize = row_str.parse().map_err(|_| err())?;
        if row == 0 {
            return Err(err());
        }

        Ok(Self { row: row - 1, col: col - 1 })
    }

    /// Offset this id by signed deltas. Returns None if the result would
    /// fall before row 1 or column A.
    pub fn offset(self, d_row: isize, d_col: isize) -> Option<Self> {
        Some(Self {
            row: self.row.checked_add_signed(d_row)?,
            col: self.col.checked_add_signed(d_col)?,
        })
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letters(self.col), self.row + 1)
    }
}

impl FromStr for CellId {
    type Err = CellIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Serialized as text so that maps keyed by CellId become JSON objects.
impl Serialize for CellId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        CellId::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Convert 0-based column index to Excel-style letter(s).
pub(crate) fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}
