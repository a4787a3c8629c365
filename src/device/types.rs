use indexmap::{IndexMap, IndexSet};

use crate::device::constants::DISCONNECTED;

/// Cached attributes of one band. `None` means "unknown / not queried yet".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandState {
    pub connection_state: Option<String>,
    pub connection_reason: Option<String>,
    pub battery: Option<i64>,
    pub stream_quality: Option<i64>,
    pub activation: Option<bool>,
    pub gesture_precision: Option<String>,
}

impl BandState {
    pub fn is_unknown(&self) -> bool {
        self == &BandState::default()
    }

    /// The connection state as seen by readers: unknown bands are DISCONNECTED.
    pub fn connection_state_name(&self) -> &str {
        self.connection_state.as_deref().unwrap_or(DISCONNECTED)
    }
}

/// The active band set and the per-band attribute cache.
///
/// The set is ordered: favorites first, in configuration order, followed by
/// bands discovered at runtime. Attributes are kept separately so that events
/// for bands outside the set are still recorded, the same way the engine
/// reports them.
#[derive(Debug, Clone, Default)]
pub struct BandTable {
    favorites: Vec<String>,
    bands: IndexSet<String>,
    states: IndexMap<String, BandState>,
}

impl BandTable {
    pub fn new(favorites: Vec<String>) -> Self {
        let mut table = BandTable {
            favorites,
            bands: IndexSet::new(),
            states: IndexMap::new(),
        };
        table.reset_to_favorites();
        table
    }

    pub fn is_favorite(&self, band: &str) -> bool {
        self.favorites.iter().any(|favorite| favorite == band)
    }

    pub fn contains(&self, band: &str) -> bool {
        self.bands.contains(band)
    }

    pub fn bands(&self) -> Vec<String> {
        self.bands.iter().cloned().collect()
    }

    pub fn insert(&mut self, band: &str) {
        if !self.bands.contains(band) {
            self.bands.insert(band.to_string());
        }
    }

    /// Rebuilds the set as the favorites followed by `reported`. Attributes are kept.
    pub fn set_bands(&mut self, reported: &[String]) {
        self.bands = self.favorites.iter().chain(reported.iter()).cloned().collect();
    }

    /// Returns a band to the unknown state. Bands that are not favorites
    /// leave the set and are forgotten.
    pub fn reset_band(&mut self, band: &str) {
        if self.is_favorite(band) {
            self.clear_state(band);
        } else {
            self.bands.shift_remove(band);
            self.states.shift_remove(band);
        }
    }

    /// Drops every cached attribute and rebuilds the set from the favorites.
    pub fn reset_to_favorites(&mut self) {
        self.states.clear();
        self.bands = self.favorites.iter().cloned().collect();
    }

    pub fn state(&self, band: &str) -> Option<&BandState> {
        self.states.get(band)
    }

    pub fn state_mut(&mut self, band: &str) -> &mut BandState {
        self.states.entry(band.to_string()).or_default()
    }

    pub fn clear_state(&mut self, band: &str) {
        self.states.insert(band.to_string(), BandState::default());
    }

    /// Cached bands, in set order, followed by any band known only from events.
    pub fn known_bands(&self) -> Vec<String> {
        let mut known = self.bands();
        for band in self.states.keys() {
            if !self.bands.contains(band) {
                known.push(band.clone());
            }
        }
        known
    }

    /// A copy of the attributes of every known band, in `known_bands` order.
    pub fn snapshot(&self) -> IndexMap<String, BandState> {
        self.known_bands()
            .into_iter()
            .map(|band| {
                let state = self.states.get(&band).cloned().unwrap_or_default();
                (band, state)
            })
            .collect()
    }
}
