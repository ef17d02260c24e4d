use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

use crate::columns::{
    parse_aspect_lines, parse_house_table, parse_planet_line, AspectEntry, HouseEntry,
    ParseError, PlanetEntry,
};
use crate::engine::ChartDescription;

/// House number written for planets whose house numeral is not recognised.
pub const UNKNOWN_HOUSE: i32 = -1;

/// Subject parameters echoed verbatim from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportParams {
    pub ms: String,
    pub n: String,
    pub a: String,
    pub m: String,
    pub d: String,
    pub h: String,
    pub min: String,
    pub gmt: String,
    pub lat: String,
    pub lon: String,
    pub ciudad: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanetPlacement {
    pub g: i32,
    pub m: i32,
    pub s: String,
    pub h: i32,
    pub rh: String,
}

impl From<&PlanetEntry> for PlanetPlacement {
    fn from(entry: &PlanetEntry) -> Self {
        Self {
            g: entry.sign_degrees,
            m: entry.sign_minutes,
            s: entry.sign_name.to_lowercase(),
            h: entry.house_number.map_or(UNKNOWN_HOUSE, i32::from),
            rh: entry.house_roman.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HouseCusp {
    pub s: String,
    pub g: i32,
    pub m: i32,
}

impl From<&HouseEntry> for HouseCusp {
    fn from(entry: &HouseEntry) -> Self {
        Self {
            s: entry.sign_name.to_lowercase(),
            g: entry.sign_degrees,
            m: entry.sign_minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AspectMember {
    pub t: String,
    pub p: String,
}

impl From<&AspectEntry> for AspectMember {
    fn from(entry: &AspectEntry) -> Self {
        Self {
            t: entry.label.clone(),
            p: entry.participants.clone(),
        }
    }
}

/// JSON object whose members keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMembers<T>(pub Vec<(String, T)>);

impl<T> OrderedMembers<T> {
    pub fn get(&self, key: &str) -> Option<&T> {
        self.0
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Serialize> Serialize for OrderedMembers<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub params: ReportParams,
    pub psc: OrderedMembers<PlanetPlacement>,
    pub asp: OrderedMembers<AspectMember>,
    pub pc: OrderedMembers<HouseCusp>,
    #[serde(rename = "jsonHades")]
    pub json_hades: AuxiliaryFragment,
}

/// Pre-rendered JSON embedded under `jsonHades`.
#[derive(Debug, Clone, Default)]
pub enum AuxiliaryFragment {
    Json(Box<RawValue>),
    /// Written as `""`.
    #[default]
    Empty,
}

impl Serialize for AuxiliaryFragment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Json(raw) => raw.serialize(serializer),
            Self::Empty => serializer.serialize_str(""),
        }
    }
}

/// Builds the report in memory. Any malformed description line fails the
/// whole report.
pub fn assemble_report(
    params: ReportParams,
    description: &ChartDescription,
    auxiliary: AuxiliaryFragment,
) -> Result<Report, ParseError> {
    let mut psc = Vec::with_capacity(description.planets.len());
    for line in &description.planets {
        let entry = parse_planet_line(line)?;
        psc.push((entry.name.to_lowercase(), PlanetPlacement::from(&entry)));
    }

    let pc = parse_house_table(&description.houses)?
        .iter()
        .map(|entry| (format!("h{}", entry.house_number), HouseCusp::from(entry)))
        .collect();

    let asp = parse_aspect_lines(&description.aspects)?
        .iter()
        .enumerate()
        .map(|(index, entry)| (format!("asp{index}"), AspectMember::from(entry)))
        .collect();

    Ok(Report {
        params,
        psc: OrderedMembers(psc),
        asp: OrderedMembers(asp),
        pc: OrderedMembers(pc),
        json_hades: auxiliary,
    })
}

/// Reads the auxiliary JSON fragment verbatim, substituting `""` when the
/// file is unreadable or not JSON.
pub fn read_auxiliary_fragment(path: &Path) -> AuxiliaryFragment {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => {
            warn!(
                "auxiliary fragment {} unreadable ({}); using empty string",
                path.display(),
                error
            );
            return AuxiliaryFragment::Empty;
        }
    };
    match RawValue::from_string(contents.trim().to_owned()) {
        Ok(raw) => AuxiliaryFragment::Json(raw),
        Err(error) => {
            warn!(
                "auxiliary fragment {} is not JSON ({}); using empty string",
                path.display(),
                error
            );
            AuxiliaryFragment::Empty
        }
    }
}

/// Output paths given with Windows separators are normalised to `/`.
pub fn normalize_output_path(raw: &str) -> PathBuf {
    PathBuf::from(raw.replace('\\', "/"))
}

/// Serialises the whole report first so that a failure leaves no file behind.
pub fn write_report(path: &Path, report: &Report) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(report).context("failed to serialize report")?;
    bytes.push(b'\n');
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write report {}", path.display()))?;
    info!("saved report {}", path.display());
    Ok(())
}
