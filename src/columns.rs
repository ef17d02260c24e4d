//! Field extraction from the engine's fixed-column description text.
//!
//! The engine renders planets, houses and aspects as human-readable lines
//! whose columns are padded with runs of spaces of varying width. Fields are
//! recovered by collapsing every run of spaces into one delimiter.

use std::fmt;

use log::debug;
use serde::Serialize;
use thiserror::Error;

/// Separator substituted for space runs; never produced by the engine.
const SENTINEL: char = '\u{1f}';
/// Widest column gap the engine pads with.
pub const WIDEST_GAP: usize = 9;
/// Substrings dropped before splitting: the polar-house marker and punctuation.
const NOISE: &[&str] = &[" Pole", "\"", ".", "\r", "\n"];

const ROMAN_HOUSES: [&str; 12] = [
    "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Planet,
    House,
    Aspect,
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Planet => "planet",
            Self::House => "house",
            Self::Aspect => "aspect",
        };
        f.write_str(label)
    }
}

/// The description text does not have the expected column shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{kind} line has {found} fields, expected at least {needed}: {line:?}")]
    TooFewFields {
        kind: LineKind,
        needed: usize,
        found: usize,
        line: String,
    },
    #[error("{kind} line field {index} is not an integer ({value:?}): {line:?}")]
    InvalidNumber {
        kind: LineKind,
        index: usize,
        value: String,
        line: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanetEntry {
    pub name: String,
    pub sign_degrees: i32,
    pub sign_name: String,
    pub sign_minutes: i32,
    pub house_roman: String,
    pub house_number: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HouseEntry {
    pub house_number: usize,
    pub sign_name: String,
    pub sign_degrees: i32,
    pub sign_minutes: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AspectKind {
    Conjunction,
    Opposition,
    Trine,
    Quadrature,
}

impl AspectKind {
    /// Substring match, so compound labels such as "Trine+" still qualify.
    pub fn from_label(label: &str) -> Option<Self> {
        if label.contains("Trine") {
            Some(Self::Trine)
        } else if label.contains("Conjunction") {
            Some(Self::Conjunction)
        } else if label.contains("Opposition") {
            Some(Self::Opposition)
        } else if label.contains("Quadrature") {
            Some(Self::Quadrature)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AspectEntry {
    pub kind: AspectKind,
    pub label: String,
    pub participants: String,
}

/// Collapses space runs of any width into single field breaks and splits.
///
/// Runs are replaced widest first (9 down to 1 spaces), then adjacent
/// delimiters left over from runs wider than the widest gap are merged.
/// Leading or trailing padding yields empty edge fields.
pub fn split_columns(line: &str) -> Vec<String> {
    let mut text = line.to_owned();
    for noise in NOISE {
        text = text.replace(noise, "");
    }

    let delimiter = SENTINEL.to_string();
    for width in (1..=WIDEST_GAP).rev() {
        text = text.replace(&" ".repeat(width), &delimiter);
    }

    let mut collapsed = String::with_capacity(text.len());
    let mut previous_was_delimiter = false;
    for ch in text.chars() {
        let is_delimiter = ch == SENTINEL;
        if !(is_delimiter && previous_was_delimiter) {
            collapsed.push(ch);
        }
        previous_was_delimiter = is_delimiter;
    }

    collapsed.split(SENTINEL).map(str::to_owned).collect()
}

pub fn roman_house_number(roman: &str) -> Option<u8> {
    ROMAN_HOUSES
        .iter()
        .position(|candidate| *candidate == roman)
        .map(|index| index as u8 + 1)
}

fn field<'a>(
    fields: &'a [String],
    index: usize,
    kind: LineKind,
    line: &str,
) -> Result<&'a str, ParseError> {
    fields
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| ParseError::TooFewFields {
            kind,
            needed: index + 1,
            found: fields.len(),
            line: line.to_owned(),
        })
}

fn integer_field(
    fields: &[String],
    index: usize,
    kind: LineKind,
    line: &str,
) -> Result<i32, ParseError> {
    let value = field(fields, index, kind, line)?;
    value.trim().parse::<i32>().map_err(|_| ParseError::InvalidNumber {
        kind,
        index,
        value: value.to_owned(),
        line: line.to_owned(),
    })
}

/// `[planet, degrees, sign, minutes, house]`, read positionally.
pub fn parse_planet_line(line: &str) -> Result<PlanetEntry, ParseError> {
    let kind = LineKind::Planet;
    let fields = split_columns(line);
    debug!("planet fields {:?}", fields);

    let house_roman = field(&fields, 4, kind, line)?.to_owned();
    Ok(PlanetEntry {
        name: field(&fields, 0, kind, line)?.to_owned(),
        sign_degrees: integer_field(&fields, 1, kind, line)?,
        sign_name: field(&fields, 2, kind, line)?.to_owned(),
        sign_minutes: integer_field(&fields, 3, kind, line)?,
        house_number: roman_house_number(&house_roman),
        house_roman,
    })
}

/// Reads `degrees, sign, minutes` from the end of the line; the number of
/// leading label fields depends on how the engine names the house. Trailing
/// padding is ignored.
pub fn parse_house_line(line: &str, house_number: usize) -> Result<HouseEntry, ParseError> {
    let kind = LineKind::House;
    let fields = split_columns(line.trim_end());
    debug!("house {} fields {:?}", house_number, fields);

    if fields.len() < 3 {
        return Err(ParseError::TooFewFields {
            kind,
            needed: 3,
            found: fields.len(),
            line: line.to_owned(),
        });
    }
    let last = fields.len() - 1;
    Ok(HouseEntry {
        house_number,
        sign_name: fields[last - 1].clone(),
        sign_degrees: integer_field(&fields, last - 2, kind, line)?,
        sign_minutes: integer_field(&fields, last, kind, line)?,
    })
}

/// Parses the house table. The first line is a header; blank lines are skipped.
pub fn parse_house_table(table: &str) -> Result<Vec<HouseEntry>, ParseError> {
    table
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| parse_house_line(line, index + 1))
        .collect()
}

/// Aspect lines are split on single spaces. Lines whose label is not one of
/// the four retained aspect types yield `None`.
pub fn parse_aspect_line(line: &str) -> Result<Option<AspectEntry>, ParseError> {
    let tokens = line.split(' ').collect::<Vec<_>>();
    let label = tokens[0];
    let Some(kind) = AspectKind::from_label(label) else {
        debug!("dropping aspect line {:?}", line);
        return Ok(None);
    };

    let participants = tokens.get(1).ok_or_else(|| ParseError::TooFewFields {
        kind: LineKind::Aspect,
        needed: 2,
        found: tokens.len(),
        line: line.to_owned(),
    })?;
    Ok(Some(AspectEntry {
        kind,
        label: label.to_owned(),
        participants: (*participants).to_owned(),
    }))
}

/// Parses every aspect line, keeping only retained types in input order.
pub fn parse_aspect_lines<S: AsRef<str>>(lines: &[S]) -> Result<Vec<AspectEntry>, ParseError> {
    let mut entries = Vec::new();
    for line in lines {
        if let Some(entry) = parse_aspect_line(line.as_ref())? {
            entries.push(entry);
        }
    }
    Ok(entries)
}
