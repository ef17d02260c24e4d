//! Positional-argument batch mode.
//!
//! Two forms are accepted, counted with the program name included:
//! 2 arguments open a stored record, 17 arguments produce a report and a
//! snapshot. Every other count starts an empty session.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::{info, warn};
use thiserror::Error;

use crate::capture::{CaptureSchedule, CaptureTarget};
use crate::chart::{ChartData, GeoPoint};
use crate::engine::DescriptionEngine;
use crate::report::{
    assemble_report, normalize_output_path, read_auxiliary_fragment, write_report, ReportParams,
};
use crate::session::SessionManager;
use crate::store::{key_from_argument, validate_record_name, RecordStore, StoreError};

pub const OPEN_RECORD_ARITY: usize = 2;
pub const REPORT_ARITY: usize = 17;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("argument {position} ({field}) is not a valid number: '{value}'")]
    Number {
        position: usize,
        field: &'static str,
        value: String,
    },
    #[error("capture resolution must look like WIDTHxHEIGHT with positive sizes, got '{0}'")]
    Resolution(String),
    #[error("{year}-{month}-{day} {hour}:{minute} is not a valid date and time")]
    DateTime {
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
    },
    #[error("invalid record name '{0}'")]
    RecordName(String),
    #[error("expected {expected} report arguments, got {found}")]
    Arity { expected: usize, found: usize },
}

/// What the positional arguments ask for.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    OpenRecord { key: String },
    Report(Box<ReportArgs>),
    /// Any other argument count; `arity` includes the program name.
    EmptySession { arity: usize },
}

/// Parses the positional arguments after the program name. All validation
/// happens here, before any file is touched.
pub fn parse_invocation(args: &[String]) -> Result<Invocation, ArgumentError> {
    match args.len() + 1 {
        OPEN_RECORD_ARITY => Ok(Invocation::OpenRecord {
            key: key_from_argument(&args[0]),
        }),
        REPORT_ARITY => Ok(Invocation::Report(Box::new(ReportArgs::parse(args)?))),
        arity => Ok(Invocation::EmptySession { arity }),
    }
}

/// Parses `WxH`. Exactly one `x` separator and two positive sizes.
pub fn parse_resolution(raw: &str) -> Result<(u32, u32), ArgumentError> {
    let malformed = || ArgumentError::Resolution(raw.to_owned());
    let parts = raw.split('x').collect::<Vec<_>>();
    let [width, height] = parts.as_slice() else {
        return Err(malformed());
    };
    let width = width.trim().parse::<u32>().map_err(|_| malformed())?;
    let height = height.trim().parse::<u32>().map_err(|_| malformed())?;
    if width == 0 || height == 0 {
        return Err(malformed());
    }
    Ok((width, height))
}

fn number<T: FromStr>(
    args: &[String],
    index: usize,
    field: &'static str,
) -> Result<T, ArgumentError> {
    let raw = &args[index];
    raw.trim().parse::<T>().map_err(|_| ArgumentError::Number {
        position: index + 1,
        field,
        value: raw.clone(),
    })
}

/// The sixteen positionals of the report form, parsed, plus the raw text
/// echoed into the report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportArgs {
    pub record_name: String,
    pub local_time: NaiveDateTime,
    pub gmt_offset_hours: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub place_label: String,
    pub json_out: PathBuf,
    pub ms_token: String,
    pub quit_seconds: u64,
    pub capture_path: PathBuf,
    pub capture_width: u32,
    pub capture_height: u32,
    pub hades_path: PathBuf,
    raw: Vec<String>,
}

impl ReportArgs {
    pub fn parse(args: &[String]) -> Result<Self, ArgumentError> {
        if args.len() != REPORT_ARITY - 1 {
            return Err(ArgumentError::Arity {
                expected: REPORT_ARITY - 1,
                found: args.len(),
            });
        }

        let record_name = args[0].clone();
        validate_record_name(&record_name)
            .map_err(|_| ArgumentError::RecordName(record_name.clone()))?;

        let year: i32 = number(args, 1, "year")?;
        let month: u32 = number(args, 2, "month")?;
        let day: u32 = number(args, 3, "day")?;
        let hour: u32 = number(args, 4, "hour")?;
        let minute: u32 = number(args, 5, "minute")?;
        let local_time = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .ok_or(ArgumentError::DateTime {
                year,
                month,
                day,
                hour,
                minute,
            })?;

        let (capture_width, capture_height) = parse_resolution(&args[14])?;
        Ok(Self {
            record_name,
            local_time,
            gmt_offset_hours: number(args, 6, "gmt offset")?,
            latitude: number(args, 7, "latitude")?,
            longitude: number(args, 8, "longitude")?,
            place_label: args[9].clone(),
            json_out: normalize_output_path(&args[10]),
            ms_token: args[11].clone(),
            quit_seconds: number(args, 12, "quit seconds")?,
            capture_path: PathBuf::from(&args[13]),
            capture_width,
            capture_height,
            hades_path: PathBuf::from(&args[15]),
            raw: args.to_vec(),
        })
    }

    pub fn place(&self) -> String {
        self.place_label.replace('_', " ")
    }

    pub fn report_params(&self) -> ReportParams {
        let raw = |index: usize| self.raw[index].clone();
        ReportParams {
            ms: self.ms_token.clone(),
            n: self.record_name.clone(),
            a: raw(1),
            m: raw(2),
            d: raw(3),
            h: raw(4),
            min: raw(5),
            gmt: raw(6),
            lat: raw(7),
            lon: raw(8),
            ciudad: self.place(),
        }
    }

    /// Record data for a subject that is not stored yet. UTC is the local
    /// time minus the GMT offset.
    pub fn chart_data(&self) -> ChartData {
        let utc = self.local_time - ChronoDuration::hours(i64::from(self.gmt_offset_hours));
        let mut data = ChartData::empty(self.record_name.clone());
        data.utc_moment = Utc.from_utc_datetime(&utc);
        data.timezone_offset_hours = self.gmt_offset_hours;
        data.location = GeoPoint::new(self.longitude, self.latitude, 0.0);
        data.location_name = format!(
            "{}\nlat: {}\nlon: {}",
            self.place(),
            self.raw[7],
            self.raw[8]
        );
        data
    }

    pub fn capture_schedule(&self, capture_period: Duration) -> CaptureSchedule {
        CaptureSchedule {
            capture_period,
            quit_after: Duration::from_secs(self.quit_seconds),
        }
    }

    pub fn capture_target(&self) -> CaptureTarget {
        CaptureTarget {
            path: self.capture_path.clone(),
            width: self.capture_width,
            height: self.capture_height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub json_path: PathBuf,
    pub record_created: bool,
}

/// Loads or creates the subject, describes it through `engine`, and writes
/// the report. Nothing is written when the description cannot be parsed.
pub fn run_report(
    args: &ReportArgs,
    session: &mut SessionManager,
    store: &RecordStore,
    engine: &mut dyn DescriptionEngine,
) -> Result<ReportOutcome> {
    let record_created = !store.exists(&args.record_name);
    if record_created {
        store
            .write(&args.chart_data())
            .with_context(|| format!("failed to create record '{}'", args.record_name))?;
        info!("created record '{}'", args.record_name);
    }
    session
        .open_record(store, &args.record_name)
        .with_context(|| format!("failed to open record '{}'", args.record_name))?;

    let record = session
        .current_primary()
        .and_then(|handle| session.record(handle))
        .with_context(|| format!("record '{}' is not open", args.record_name))?;
    let description = engine
        .describe(record)
        .with_context(|| format!("calculation engine failed for '{}'", args.record_name))?;

    let auxiliary = read_auxiliary_fragment(&args.hades_path);
    let report = assemble_report(args.report_params(), &description, auxiliary)
        .context("engine description does not have the expected columns")?;
    write_report(&args.json_out, &report)?;

    Ok(ReportOutcome {
        json_path: args.json_out.clone(),
        record_created,
    })
}

/// Opens `key` in the current tab. A missing record is logged and leaves
/// the session as it was.
pub fn open_record(session: &mut SessionManager, store: &RecordStore, key: &str) -> Result<bool> {
    match session.open_record(store, key) {
        Ok(_) => Ok(true),
        Err(StoreError::NotFound(_)) => {
            warn!("record '{}' could not be opened; keeping an empty session", key);
            Ok(false)
        }
        Err(error) => Err(error).with_context(|| format!("failed to open record '{key}'")),
    }
}
