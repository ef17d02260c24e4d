//! Tabs of one or two chart records with a single current tab.
//!
//! Every slot in every tab owns one arena reference to its record. Views
//! can take additional references, so a record removed from the session
//! stays alive until the last view lets go of it.

use log::{debug, info};

use crate::arena::{RecordArena, RecordHandle, Release};
use crate::aspect_sets::AspectSetRegistry;
use crate::chart::{
    AspectSetId, ChartDefaults, ChartRecord, HouseSystemId, ZodiacId, DEFAULT_RECORD_NAME,
};
use crate::store::{RecordStore, StoreError};

/// Engine selectors applied to every record shown by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartSelectors {
    pub zodiac: ZodiacId,
    pub house_system: HouseSystemId,
    pub aspect_set: AspectSetId,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ask before closing a tab whose primary record has unsaved changes.
    pub ask_to_save: bool,
    pub defaults: ChartDefaults,
    pub selectors: ChartSelectors,
    pub aspect_sets: AspectSetRegistry,
}

/// Answer of the caller when a dirty tab is about to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveDecision {
    Save,
    Discard,
    Cancel,
}

/// Primary record plus an optional synastry partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    records: Vec<RecordHandle>,
}

impl Tab {
    fn with_primary(handle: RecordHandle) -> Self {
        Self {
            records: vec![handle],
        }
    }

    pub fn records(&self) -> &[RecordHandle] {
        &self.records
    }

    pub fn primary(&self) -> Option<RecordHandle> {
        self.records.first().copied()
    }

    pub fn second(&self) -> Option<RecordHandle> {
        self.records.get(1).copied()
    }

    pub fn is_synastry(&self) -> bool {
        self.records.len() == 2
    }
}

pub struct SessionManager {
    config: SessionConfig,
    arena: RecordArena,
    tabs: Vec<Tab>,
    current: usize,
    selectors: ChartSelectors,
}

impl SessionManager {
    /// Starts with one fresh tab; the session is never empty.
    pub fn new(config: SessionConfig) -> Self {
        let selectors = config.selectors;
        let mut session = Self {
            config,
            arena: RecordArena::new(),
            tabs: Vec::new(),
            current: 0,
            selectors,
        };
        session.add_new_tab();
        session
    }

    pub fn arena(&self) -> &RecordArena {
        &self.arena
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_tab(&self) -> Option<&Tab> {
        self.tabs.get(self.current)
    }

    pub fn current_primary(&self) -> Option<RecordHandle> {
        self.current_tab().and_then(Tab::primary)
    }

    pub fn selectors(&self) -> ChartSelectors {
        self.selectors
    }

    /// Replaces the session selectors and applies them to the current tab.
    pub fn set_selectors(&mut self, selectors: ChartSelectors) {
        self.selectors = selectors;
        self.activate_current();
    }

    pub fn record(&self, handle: RecordHandle) -> Option<&ChartRecord> {
        self.arena.get(handle)
    }

    /// Mutation goes through the record's own setters.
    pub fn record_mut(&mut self, handle: RecordHandle) -> Option<&mut ChartRecord> {
        self.arena.get_mut(handle)
    }

    pub fn add_new_tab(&mut self) -> usize {
        self.add_tab(ChartRecord::new(DEFAULT_RECORD_NAME))
    }

    pub fn add_tab(&mut self, record: ChartRecord) -> usize {
        let handle = self.arena.insert(record);
        self.push_tab(handle)
    }

    /// Opens an already-held record in a new tab, taking a new reference.
    pub fn add_tab_for(&mut self, handle: RecordHandle) -> Option<usize> {
        if !self.arena.retain(handle) {
            return None;
        }
        Some(self.push_tab(handle))
    }

    fn push_tab(&mut self, handle: RecordHandle) -> usize {
        self.tabs.push(Tab::with_primary(handle));
        let index = self.tabs.len() - 1;
        self.current = index;
        self.activate_current();
        index
    }

    pub fn set_current(&mut self, index: usize) -> bool {
        if index >= self.tabs.len() {
            return false;
        }
        self.current = index;
        self.activate_current();
        true
    }

    /// Moves to the following tab, wrapping around.
    pub fn next_tab(&mut self) {
        if self.tabs.is_empty() {
            return;
        }
        self.current = (self.current + 1) % self.tabs.len();
        self.activate_current();
    }

    /// Exchanges the record lists of two tabs; the current tab follows its records.
    pub fn swap_tabs(&mut self, a: usize, b: usize) -> bool {
        if a >= self.tabs.len() || b >= self.tabs.len() {
            return false;
        }
        self.tabs.swap(a, b);
        if self.current == a {
            self.current = b;
        } else if self.current == b {
            self.current = a;
        }
        true
    }

    /// Swaps primary and partner of the current tab.
    pub fn swap_current_records(&mut self) -> bool {
        let Some(tab) = self.tabs.get_mut(self.current) else {
            return false;
        };
        if !tab.is_synastry() {
            return false;
        }
        tab.records.swap(0, 1);
        self.activate_current();
        true
    }

    /// Index of the tab showing the record named `name`. With `first_only`
    /// only primary records are compared.
    pub fn find_tab(&self, name: &str, first_only: bool) -> Option<usize> {
        self.tabs.iter().position(|tab| {
            let candidates = if first_only {
                &tab.records[..tab.records.len().min(1)]
            } else {
                &tab.records[..]
            };
            candidates
                .iter()
                .filter_map(|handle| self.arena.get(*handle))
                .any(|record| record.name() == name)
        })
    }

    /// Focuses the tab already showing `key`, or loads it into the current
    /// tab's primary record so its observers see the new data. On error the
    /// session is unchanged.
    pub fn open_record(&mut self, store: &RecordStore, key: &str) -> Result<usize, StoreError> {
        if let Some(index) = self.find_tab(key, true) {
            self.set_current(index);
            return Ok(index);
        }

        let Some(primary) = self.current_primary() else {
            let record = ChartRecord::open(store, key)?;
            return Ok(self.add_tab(record));
        };
        if let Some(record) = self.arena.get_mut(primary) {
            record.load(store, key)?;
        }
        info!("opened record '{}'", key);
        self.activate_current();
        Ok(self.current)
    }

    pub fn open_in_new_tab(
        &mut self,
        store: &RecordStore,
        key: &str,
    ) -> Result<usize, StoreError> {
        if let Some(index) = self.find_tab(key, true) {
            self.set_current(index);
            return Ok(index);
        }
        let record = ChartRecord::open(store, key)?;
        info!("opened record '{}' in a new tab", key);
        Ok(self.add_tab(record))
    }

    /// Loads `key` as the synastry partner of the current tab, replacing any
    /// existing partner.
    pub fn open_as_second(&mut self, store: &RecordStore, key: &str) -> Result<(), StoreError> {
        let record = ChartRecord::open(store, key)?;
        let handle = self.arena.insert(record);
        self.place_second(handle);
        Ok(())
    }

    /// Shows an already-held record as the current tab's partner.
    pub fn attach_second(&mut self, handle: RecordHandle) -> bool {
        if !self.arena.retain(handle) {
            return false;
        }
        self.place_second(handle);
        true
    }

    fn place_second(&mut self, handle: RecordHandle) {
        let Some(tab) = self.tabs.get_mut(self.current) else {
            self.push_tab(handle);
            return;
        };
        if let Some(slot) = tab.records.get_mut(1) {
            let previous = std::mem::replace(slot, handle);
            self.arena.release(previous);
        } else {
            tab.records.push(handle);
        }
        self.activate_current();
    }

    pub fn remove_second(&mut self) -> bool {
        let Some(tab) = self.tabs.get_mut(self.current) else {
            return false;
        };
        if !tab.is_synastry() {
            return false;
        }
        if let Some(handle) = tab.records.pop() {
            self.arena.release(handle);
        }
        self.activate_current();
        true
    }

    /// Closes tab `index`. Returns `Ok(false)` when the caller cancels; a
    /// failed save leaves the session unchanged.
    pub fn close_tab<F>(
        &mut self,
        index: usize,
        store: &RecordStore,
        mut decide: F,
    ) -> Result<bool, StoreError>
    where
        F: FnMut(&ChartRecord) -> SaveDecision,
    {
        let Some(primary) = self.tabs.get(index).and_then(Tab::primary) else {
            return Ok(false);
        };

        if self.config.ask_to_save {
            if let Some(record) = self.arena.get_mut(primary) {
                if record.has_unsaved_changes() {
                    match decide(record) {
                        SaveDecision::Cancel => {
                            debug!("close of tab {} cancelled", index);
                            return Ok(false);
                        }
                        SaveDecision::Save => record.save(store)?,
                        SaveDecision::Discard => {}
                    }
                }
            }
        }

        let tab = self.tabs.remove(index);
        for handle in tab.records {
            self.arena.release(handle);
        }
        self.after_tab_removed(index);
        Ok(true)
    }

    /// Shutdown prompt loop. While saving is asked for and the current primary
    /// record has unsaved changes, the current tab is closed through
    /// [`Self::close_tab`]. Stops at the first clean primary; returns
    /// `Ok(false)` when the caller cancels.
    pub fn close_all<F>(&mut self, store: &RecordStore, mut decide: F) -> Result<bool, StoreError>
    where
        F: FnMut(&ChartRecord) -> SaveDecision,
    {
        if !self.config.ask_to_save {
            return Ok(true);
        }
        while self.current_primary_is_dirty() {
            if !self.close_tab(self.current, store, &mut decide)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn current_primary_is_dirty(&self) -> bool {
        self.current_primary()
            .and_then(|handle| self.arena.get(handle))
            .is_some_and(ChartRecord::has_unsaved_changes)
    }

    /// Removes the record from every tab and drops the session's references.
    /// Views holding their own reference keep it alive until they release it.
    pub fn request_destroy(&mut self, handle: RecordHandle) -> bool {
        if !self.arena.request_destroy(handle) {
            return false;
        }

        let mut index = 0;
        while index < self.tabs.len() {
            let tab = &mut self.tabs[index];
            let before = tab.records.len();
            tab.records.retain(|held| *held != handle);
            let removed = before - tab.records.len();
            let emptied = tab.records.is_empty();
            for _ in 0..removed {
                self.arena.release(handle);
            }
            if emptied {
                self.tabs.remove(index);
                self.after_tab_removed(index);
            } else {
                index += 1;
            }
        }
        self.activate_current();
        true
    }

    fn after_tab_removed(&mut self, index: usize) {
        if self.tabs.is_empty() {
            self.current = 0;
            self.add_new_tab();
            return;
        }
        if self.current > index || self.current >= self.tabs.len() {
            self.current = self.current.saturating_sub(1);
        }
        self.activate_current();
    }

    pub fn retain_for_view(&mut self, handle: RecordHandle) -> bool {
        self.arena.retain(handle)
    }

    pub fn release_view(&mut self, handle: RecordHandle) -> Release {
        self.arena.release(handle)
    }

    /// Record names of the tab, `*` marking unsaved ones, joined by `" | "`.
    pub fn tab_title(&self, index: usize) -> Option<String> {
        let tab = self.tabs.get(index)?;
        let names = tab
            .records
            .iter()
            .filter_map(|handle| self.arena.get(*handle))
            .map(|record| {
                if record.has_unsaved_changes() {
                    format!("{}*", record.name())
                } else {
                    record.name().to_owned()
                }
            })
            .collect::<Vec<_>>();
        Some(names.join(" | "))
    }

    /// Applies the session selectors to the current tab's records.
    ///
    /// The aspect set switches to its synastry companion when two records
    /// are shown and back to the single set for one record, provided the
    /// target set is registered.
    pub fn activate_current(&mut self) {
        let Some(tab) = self.tabs.get(self.current) else {
            return;
        };
        let handles = tab.records.clone();

        let registry = &self.config.aspect_sets;
        let switched = match handles.len() {
            2 => registry.synastry_companion(self.selectors.aspect_set),
            1 => registry.to_single(self.selectors.aspect_set),
            _ => None,
        };
        if let Some(aspect_set) = switched {
            if aspect_set != self.selectors.aspect_set {
                debug!(
                    "aspect set {} -> {} for {} record(s)",
                    self.selectors.aspect_set,
                    aspect_set,
                    handles.len()
                );
            }
            self.selectors.aspect_set = aspect_set;
        }

        let selectors = self.selectors;
        for handle in handles {
            let Some(record) = self.arena.get_mut(handle) else {
                continue;
            };
            let was_clean = !record.has_unsaved_changes();
            record.suspend_update();
            record.ensure_defaults_now(&self.config.defaults);
            if record.zodiac() != selectors.zodiac {
                record.set_zodiac(selectors.zodiac);
            }
            if record.house_system() != selectors.house_system {
                record.set_house_system(selectors.house_system);
            }
            if record.aspect_set() != selectors.aspect_set {
                record.set_aspect_set(selectors.aspect_set);
            }
            if was_clean {
                record.clear_unsaved_state();
            }
            record.resume_update();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    use super::{ChartSelectors, SaveDecision, SessionConfig, SessionManager};
    use crate::arena::Release;
    use crate::aspect_sets::AspectSetRegistry;
    use crate::chart::{ChangeMask, ChartData, ChartDefaults, ChartRecord, GeoPoint};
    use crate::store::RecordStore;

    fn config(ask_to_save: bool) -> SessionConfig {
        SessionConfig {
            ask_to_save,
            defaults: ChartDefaults {
                location: GeoPoint::new(37.6184, 55.7512, 0.0),
                location_name: "Moscow, Russia".to_owned(),
            },
            selectors: ChartSelectors {
                zodiac: 0,
                house_system: 0,
                aspect_set: 2,
            },
            aspect_sets: AspectSetRegistry::default(),
        }
    }

    fn stored(store: &RecordStore, name: &str) {
        let mut data = ChartData::empty(name);
        data.location = GeoPoint::new(-69.58, -35.48, 0.0);
        store.write(&data).expect("write record");
    }

    fn never_asked(_: &ChartRecord) -> SaveDecision {
        panic!("no save prompt expected")
    }

    #[test]
    fn new_session_has_one_clean_populated_tab() {
        let session = SessionManager::new(config(false));
        assert_eq!(session.tab_count(), 1);
        let handle = session.current_primary().expect("primary");
        let record = session.record(handle).expect("live");
        assert!(!record.has_unsaved_changes());
        assert_ne!(record.utc_moment(), DateTime::<Utc>::default());
        assert_eq!(record.location_name(), "Moscow, Russia");
        assert_eq!(record.aspect_set(), 2);
    }

    #[test]
    fn closing_sole_tab_leaves_fresh_tab() {
        let dir = tempdir().expect("tempdir should create");
        let store = RecordStore::new(dir.path());
        let mut session = SessionManager::new(config(false));
        let first = session.current_primary().expect("primary");

        assert!(session.close_tab(0, &store, never_asked).expect("close"));
        assert_eq!(session.tab_count(), 1);
        assert_ne!(session.current_primary(), Some(first));
        assert!(session.record(first).is_none());
    }

    #[test]
    fn cancel_leaves_session_unchanged() {
        let dir = tempdir().expect("tempdir should create");
        let store = RecordStore::new(dir.path());
        let mut session = SessionManager::new(config(true));
        session.add_new_tab();
        let handle = session.current_primary().expect("primary");
        session
            .record_mut(handle)
            .expect("live")
            .set_name("edited");

        let closed = session
            .close_tab(1, &store, |_| SaveDecision::Cancel)
            .expect("close");
        assert!(!closed);
        assert_eq!(session.tab_count(), 2);
        assert_eq!(session.current_index(), 1);
        assert!(session.record(handle).is_some());
        assert!(!store.exists("edited"));
    }

    #[test]
    fn save_decision_persists_before_closing() {
        let dir = tempdir().expect("tempdir should create");
        let store = RecordStore::new(dir.path());
        let mut session = SessionManager::new(config(true));
        let handle = session.current_primary().expect("primary");
        session.record_mut(handle).expect("live").set_name("kept");

        assert!(session.close_tab(0, &store, |_| SaveDecision::Save).expect("close"));
        assert!(store.exists("kept"));
    }

    #[test]
    fn close_all_without_save_policy_keeps_tabs() {
        let dir = tempdir().expect("tempdir should create");
        let store = RecordStore::new(dir.path());
        let mut session = SessionManager::new(config(false));
        let first = session.current_primary().expect("primary");
        session.add_new_tab();
        let second = session.current_primary().expect("primary");
        session.record_mut(second).expect("live").set_name("dirty");

        assert!(session.close_all(&store, never_asked).expect("close all"));
        assert_eq!(session.tab_count(), 2);
        assert!(session.record(first).is_some());
        assert!(session.record(second).is_some());
    }

    #[test]
    fn close_all_stops_at_clean_current_tab() {
        let dir = tempdir().expect("tempdir should create");
        let store = RecordStore::new(dir.path());
        let mut session = SessionManager::new(config(true));
        let clean = session.current_primary().expect("primary");
        session.add_new_tab();
        let dirty = session.current_primary().expect("primary");
        session.record_mut(dirty).expect("live").set_name("edited");

        let closed = session
            .close_all(&store, |_| SaveDecision::Discard)
            .expect("close all");
        assert!(closed);
        assert_eq!(session.tab_count(), 1);
        assert!(session.record(dirty).is_none());
        assert_eq!(session.current_primary(), Some(clean));
        assert!(!store.exists("edited"));

        assert!(session.close_all(&store, never_asked).expect("close all"));
        assert_eq!(session.current_primary(), Some(clean));
    }

    #[test]
    fn open_record_loads_into_current_primary() {
        let dir = tempdir().expect("tempdir should create");
        let store = RecordStore::new(dir.path());
        stored(&store, "natal");
        let mut session = SessionManager::new(config(false));
        let handle = session.current_primary().expect("primary");
        let feed = session.record_mut(handle).expect("live").subscribe();

        assert_eq!(session.open_record(&store, "natal").expect("open"), 0);
        assert_eq!(session.current_primary(), Some(handle));
        let record = session.record(handle).expect("live");
        assert_eq!(record.name(), "natal");
        assert!(!record.has_unsaved_changes());
        assert_eq!(feed.changes().first(), Some(&ChangeMask::ALL));
    }

    #[test]
    fn set_selectors_reaches_current_records() {
        let mut session = SessionManager::new(config(false));
        let handle = session.current_primary().expect("primary");
        session.set_selectors(ChartSelectors {
            zodiac: 1,
            house_system: 3,
            aspect_set: 2,
        });
        let record = session.record(handle).expect("live");
        assert_eq!((record.zodiac(), record.house_system()), (1, 3));
        assert!(!record.has_unsaved_changes());
    }

    #[test]
    fn opening_an_open_record_focuses_its_tab() {
        let dir = tempdir().expect("tempdir should create");
        let store = RecordStore::new(dir.path());
        stored(&store, "natal");
        let mut session = SessionManager::new(config(false));

        let index = session.open_in_new_tab(&store, "natal").expect("open");
        session.add_new_tab();
        assert_eq!(session.tab_count(), 3);

        assert_eq!(session.open_record(&store, "natal").expect("refocus"), index);
        assert_eq!(session.tab_count(), 3);
        assert_eq!(session.current_index(), index);
    }

    #[test]
    fn missing_record_leaves_session_unchanged() {
        let dir = tempdir().expect("tempdir should create");
        let store = RecordStore::new(dir.path());
        let mut session = SessionManager::new(config(false));
        let before = session.current_primary();
        assert!(session.open_record(&store, "ghost").is_err());
        assert_eq!(session.current_primary(), before);
        assert_eq!(session.tab_count(), 1);
    }

    #[test]
    fn second_record_switches_aspect_set_and_back() {
        let dir = tempdir().expect("tempdir should create");
        let store = RecordStore::new(dir.path());
        stored(&store, "partner");
        let mut session = SessionManager::new(config(false));

        session.open_as_second(&store, "partner").expect("open partner");
        assert_eq!(session.selectors().aspect_set, 4);
        let tab = session.current_tab().expect("tab");
        for handle in tab.records() {
            assert_eq!(session.record(*handle).expect("live").aspect_set(), 4);
        }
        assert_eq!(session.tab_title(0).as_deref(), Some("Untitled | partner"));

        assert!(session.remove_second());
        assert_eq!(session.selectors().aspect_set, 2);
    }

    #[test]
    fn unregistered_companion_leaves_selection() {
        let mut config = config(false);
        config.selectors.aspect_set = 3;
        let mut session = SessionManager::new(config);
        let primary = session.current_primary().expect("primary");
        let other = session.add_new_tab();
        session.set_current(other);
        assert!(session.attach_second(primary));
        assert_eq!(session.selectors().aspect_set, 3);
    }

    #[test]
    fn swapping_records_keeps_both() {
        let mut session = SessionManager::new(config(false));
        let first = session.current_primary().expect("primary");
        let second_tab = session.add_new_tab();
        let second = session.current_primary().expect("primary");
        session.set_current(0);
        assert!(session.attach_second(second));
        assert!(session.swap_current_records());
        let tab = session.current_tab().expect("tab");
        assert_eq!(tab.records(), &[second, first]);

        assert!(session.swap_tabs(0, second_tab));
        assert_eq!(session.current_index(), second_tab);
    }

    #[test]
    fn destroy_waits_for_every_holder() {
        let mut session = SessionManager::new(config(false));
        let shared = session.current_primary().expect("primary");
        session.add_tab_for(shared).expect("second tab");
        assert!(session.retain_for_view(shared));
        assert_eq!(session.arena().ref_count(shared), 3);

        assert!(session.request_destroy(shared));
        assert_eq!(session.tab_count(), 1);
        assert_ne!(session.current_primary(), Some(shared));
        assert!(session.record(shared).is_some());
        assert_eq!(session.arena().teardowns(), 0);

        assert_eq!(session.release_view(shared), Release::TornDown);
        assert!(session.record(shared).is_none());
        assert_eq!(session.arena().teardowns(), 1);
    }

    #[test]
    fn dirty_marker_shows_in_title() {
        let mut session = SessionManager::new(config(false));
        let handle = session.current_primary().expect("primary");
        session.record_mut(handle).expect("live").set_name("natal");
        assert_eq!(session.tab_title(0).as_deref(), Some("natal*"));
        assert_eq!(session.tab_title(5), None);
    }

    #[test]
    fn next_tab_wraps_around() {
        let mut session = SessionManager::new(config(false));
        session.add_new_tab();
        assert_eq!(session.current_index(), 1);
        session.next_tab();
        assert_eq!(session.current_index(), 0);
        assert!(!session.set_current(2));
    }
}
