use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::mpsc;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::store::{RecordStore, StoreError};

pub type ZodiacId = i32;
pub type HouseSystemId = i32;
pub type AspectSetId = i32;

pub const DEFAULT_RECORD_NAME: &str = "Untitled";

/// Longitude, latitude and elevation of a chart location.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub elevation: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64, elevation: f64) -> Self {
        Self {
            longitude,
            latitude,
            elevation,
        }
    }

    pub fn is_null(&self) -> bool {
        self.longitude == 0.0 && self.latitude == 0.0 && self.elevation == 0.0
    }
}

/// Bitmask of the logical field groups touched by a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChangeMask(u8);

impl ChangeMask {
    pub const NONE: Self = Self(0);
    pub const NAME: Self = Self(1);
    pub const TIME: Self = Self(1 << 1);
    pub const LOCATION: Self = Self(1 << 2);
    pub const SELECTORS: Self = Self(1 << 3);
    pub const DIRTY_STATE: Self = Self(1 << 4);
    pub const ALL: Self = Self(0b1_1111);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ChangeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ChangeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::NAME, "name"),
            (Self::TIME, "time"),
            (Self::LOCATION, "location"),
            (Self::SELECTORS, "selectors"),
            (Self::DIRTY_STATE, "dirty"),
        ];
        let parts = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

/// One settable field of a chart record.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartField {
    Name(String),
    UtcMoment(DateTime<Utc>),
    TimezoneOffset(i32),
    Location(GeoPoint),
    LocationName(String),
    Zodiac(ZodiacId),
    HouseSystem(HouseSystemId),
    AspectSet(AspectSetId),
}

impl ChartField {
    pub fn group(&self) -> ChangeMask {
        match self {
            Self::Name(_) => ChangeMask::NAME,
            Self::UtcMoment(_) | Self::TimezoneOffset(_) => ChangeMask::TIME,
            Self::Location(_) | Self::LocationName(_) => ChangeMask::LOCATION,
            Self::Zodiac(_) | Self::HouseSystem(_) | Self::AspectSet(_) => ChangeMask::SELECTORS,
        }
    }
}

/// Events delivered to record observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartEvent {
    Changed(ChangeMask),
    DestroyRequested,
    TornDown,
}

/// Receiving end of a record subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeFeed {
    receiver: mpsc::Receiver<ChartEvent>,
}

impl ChangeFeed {
    pub fn try_next(&self) -> Option<ChartEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn drain(&self) -> Vec<ChartEvent> {
        self.receiver.try_iter().collect()
    }

    pub fn changes(&self) -> Vec<ChangeMask> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                ChartEvent::Changed(mask) => Some(mask),
                _ => None,
            })
            .collect()
    }
}

/// Location applied to records that have none yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartDefaults {
    pub location: GeoPoint,
    pub location_name: String,
}

/// The persisted part of a chart record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChartData {
    pub name: String,
    pub utc_moment: DateTime<Utc>,
    pub timezone_offset_hours: i32,
    pub location: GeoPoint,
    #[serde(default)]
    pub location_name: String,
    pub zodiac: ZodiacId,
    pub house_system: HouseSystemId,
    pub aspect_set: AspectSetId,
}

impl ChartData {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            utc_moment: DateTime::<Utc>::default(),
            timezone_offset_hours: 0,
            location: GeoPoint::default(),
            location_name: String::new(),
            zodiac: 0,
            house_system: 0,
            aspect_set: 0,
        }
    }
}

/// A single astrological subject with deferred change notification.
///
/// Every setter marks the record dirty. While `suspend_depth > 0` the
/// touched groups accumulate and are flushed as one notification when the
/// outermost `resume_update` returns the depth to zero.
#[derive(Debug)]
pub struct ChartRecord {
    data: ChartData,
    unsaved: bool,
    suspend_depth: u32,
    pending: ChangeMask,
    revision: u64,
    observers: Vec<mpsc::Sender<ChartEvent>>,
}

impl ChartRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_data(ChartData::empty(name))
    }

    pub fn from_data(data: ChartData) -> Self {
        Self {
            data,
            unsaved: false,
            suspend_depth: 0,
            pending: ChangeMask::NONE,
            revision: 0,
            observers: Vec::new(),
        }
    }

    pub fn open(store: &RecordStore, key: &str) -> Result<Self, StoreError> {
        Ok(Self::from_data(store.read(key)?))
    }

    pub fn data(&self) -> &ChartData {
        &self.data
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn utc_moment(&self) -> DateTime<Utc> {
        self.data.utc_moment
    }

    pub fn timezone_offset_hours(&self) -> i32 {
        self.data.timezone_offset_hours
    }

    pub fn location(&self) -> GeoPoint {
        self.data.location
    }

    pub fn location_name(&self) -> &str {
        &self.data.location_name
    }

    pub fn zodiac(&self) -> ZodiacId {
        self.data.zodiac
    }

    pub fn house_system(&self) -> HouseSystemId {
        self.data.house_system
    }

    pub fn aspect_set(&self) -> AspectSetId {
        self.data.aspect_set
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    pub fn suspend_depth(&self) -> u32 {
        self.suspend_depth
    }

    /// Number of recomputations performed so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn local_time(&self) -> NaiveDateTime {
        let offset = Duration::hours(i64::from(self.data.timezone_offset_hours));
        self.data.utc_moment.naive_utc() + offset
    }

    /// Display label of the location: the stored name, or coordinates when empty.
    pub fn location_label(&self) -> String {
        if self.data.location_name.is_empty() {
            format!(
                "{:.4}N  {:.4}E",
                self.data.location.latitude, self.data.location.longitude
            )
        } else {
            self.data.location_name.clone()
        }
    }

    pub fn subscribe(&mut self) -> ChangeFeed {
        let (sender, receiver) = mpsc::channel();
        self.observers.push(sender);
        ChangeFeed { receiver }
    }

    pub fn set(&mut self, field: ChartField) {
        let mut mask = field.group();
        match field {
            ChartField::Name(name) => self.data.name = name,
            ChartField::UtcMoment(moment) => self.data.utc_moment = moment,
            ChartField::TimezoneOffset(hours) => self.data.timezone_offset_hours = hours,
            ChartField::Location(point) => self.data.location = point,
            ChartField::LocationName(name) => self.data.location_name = name,
            ChartField::Zodiac(id) => self.data.zodiac = id,
            ChartField::HouseSystem(id) => self.data.house_system = id,
            ChartField::AspectSet(id) => self.data.aspect_set = id,
        }
        if !self.unsaved {
            self.unsaved = true;
            mask |= ChangeMask::DIRTY_STATE;
        }
        self.mark_changed(mask);
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.set(ChartField::Name(name.into()));
    }

    pub fn set_utc_moment(&mut self, moment: DateTime<Utc>) {
        self.set(ChartField::UtcMoment(moment));
    }

    pub fn set_timezone_offset(&mut self, hours: i32) {
        self.set(ChartField::TimezoneOffset(hours));
    }

    pub fn set_location(&mut self, point: GeoPoint) {
        self.set(ChartField::Location(point));
    }

    pub fn set_location_name(&mut self, name: impl Into<String>) {
        self.set(ChartField::LocationName(name.into()));
    }

    pub fn set_zodiac(&mut self, id: ZodiacId) {
        self.set(ChartField::Zodiac(id));
    }

    pub fn set_house_system(&mut self, id: HouseSystemId) {
        self.set(ChartField::HouseSystem(id));
    }

    pub fn set_aspect_set(&mut self, id: AspectSetId) {
        self.set(ChartField::AspectSet(id));
    }

    pub fn clear_unsaved_state(&mut self) {
        if self.unsaved {
            self.unsaved = false;
            self.mark_changed(ChangeMask::DIRTY_STATE);
        }
    }

    pub fn suspend_update(&mut self) {
        self.suspend_depth += 1;
    }

    pub fn resume_update(&mut self) {
        if self.suspend_depth == 0 {
            warn!("resume_update on '{}' without matching suspend", self.data.name);
            return;
        }
        self.suspend_depth -= 1;
        if self.suspend_depth == 0 {
            self.flush();
        }
    }

    /// Fills in a timestamp and a location for records that carry none.
    pub fn ensure_defaults(&mut self, now: DateTime<FixedOffset>, defaults: &ChartDefaults) {
        self.suspend_update();
        if self.data.utc_moment == DateTime::<Utc>::default() {
            self.set_utc_moment(now.with_timezone(&Utc));
            self.set_timezone_offset(now.offset().local_minus_utc() / 3600);
        }
        if self.data.location.is_null() {
            self.set_location(defaults.location);
            self.set_location_name(defaults.location_name.clone());
        }
        self.resume_update();
    }

    pub fn ensure_defaults_now(&mut self, defaults: &ChartDefaults) {
        self.ensure_defaults(Local::now().fixed_offset(), defaults);
    }

    pub fn save(&mut self, store: &RecordStore) -> Result<(), StoreError> {
        store.write(&self.data)?;
        self.clear_unsaved_state();
        Ok(())
    }

    /// Replaces every persisted field with the stored record `key`.
    pub fn load(&mut self, store: &RecordStore, key: &str) -> Result<(), StoreError> {
        let data = store.read(key)?;
        self.replace_data(data);
        Ok(())
    }

    pub fn replace_data(&mut self, data: ChartData) {
        self.data = data;
        self.unsaved = false;
        self.mark_changed(ChangeMask::ALL);
    }

    pub(crate) fn emit(&mut self, event: ChartEvent) {
        self.observers.retain(|sender| sender.send(event).is_ok());
    }

    fn mark_changed(&mut self, mask: ChangeMask) {
        self.pending |= mask;
        if self.suspend_depth == 0 {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mask = self.pending;
        self.pending = ChangeMask::NONE;
        self.revision += 1;
        debug!("chart '{}' changed [{}]", self.data.name, mask);
        self.emit(ChartEvent::Changed(mask));
    }
}
