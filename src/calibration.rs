//! Calibration statistics: per event class accumulators, and the named containers that carry
//! them from one pass over the data to the next.

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use log::trace;
use ndarray::{Array2, ArrayView2};

use crate::QnCorrError;

/// Where a value lands in a calibration store: the event class bin, and a slot within it
/// (a channel, a channel group, or a Qn vector component).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoreKey {
    /// The linear event class bin
    pub bin: usize,
    /// The slot within the bin
    pub slot: usize,
}

impl StoreKey {
    /// Key for `slot` of event class `bin`.
    pub fn new(bin: usize, slot: usize) -> Self {
        Self { bin, slot }
    }
}

/// What a correction step reads back from a store.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BinStats {
    /// The weighted mean of the values filled
    pub content: f64,
    /// The weighted spread (standard deviation) of the values filled
    pub width: f64,
    /// How many values were filled
    pub entries: u64,
}

impl BinStats {
    /// Whether the bin has enough entries to be used for corrections.
    pub fn is_validated(&self, min_entries: u64) -> bool {
        self.entries > 0 && self.entries >= min_entries
    }
}

/// A keyed accumulator of calibration statistics.
pub trait CalibrationStore {
    /// Accumulate `value` with `weight` at `key`. Keys outside the store are ignored.
    fn fill(&mut self, key: StoreKey, value: f64, weight: f64);

    /// The statistics at `key`. Keys outside the store read as empty.
    fn read(&self, key: StoreKey) -> BinStats;
}

/// Weighted mean and spread of values, per event class bin and slot.
#[derive(Clone, Debug, PartialEq)]
pub struct Profile {
    name: String,
    entries: Array2<u64>,
    sum_w: Array2<f64>,
    sum_wx: Array2<f64>,
    sum_wx2: Array2<f64>,
}

impl Profile {
    /// An empty profile with `num_bins` event classes of `num_slots` slots each.
    pub fn new(name: impl Into<String>, num_bins: usize, num_slots: usize) -> Self {
        let shape = (num_bins, num_slots);
        Self {
            name: name.into(),
            entries: Array2::zeros(shape),
            sum_w: Array2::zeros(shape),
            sum_wx: Array2::zeros(shape),
            sum_wx2: Array2::zeros(shape),
        }
    }

    /// Rebuild a profile from its accumulator arrays, if they all have the same shape.
    pub fn from_arrays(
        name: impl Into<String>,
        entries: Array2<u64>,
        sum_w: Array2<f64>,
        sum_wx: Array2<f64>,
        sum_wx2: Array2<f64>,
    ) -> Option<Self> {
        let shape = entries.dim();
        if sum_w.dim() != shape || sum_wx.dim() != shape || sum_wx2.dim() != shape {
            return None;
        }
        Some(Self {
            name: name.into(),
            entries,
            sum_w,
            sum_wx,
            sum_wx2,
        })
    }

    /// The name the profile is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of event class bins.
    pub fn num_bins(&self) -> usize {
        self.entries.dim().0
    }

    /// The number of slots per bin.
    pub fn num_slots(&self) -> usize {
        self.entries.dim().1
    }

    /// The number of values filled, per bin and slot.
    pub fn entries(&self) -> ArrayView2<'_, u64> {
        self.entries.view()
    }

    /// The sum of weights, per bin and slot.
    pub fn sum_w(&self) -> ArrayView2<'_, f64> {
        self.sum_w.view()
    }

    /// The weighted sum of values, per bin and slot.
    pub fn sum_wx(&self) -> ArrayView2<'_, f64> {
        self.sum_wx.view()
    }

    /// The weighted sum of squared values, per bin and slot.
    pub fn sum_wx2(&self) -> ArrayView2<'_, f64> {
        self.sum_wx2.view()
    }

    /// The number of values filled into every bin and slot.
    pub fn total_entries(&self) -> u64 {
        self.entries.sum()
    }

    /// Add the accumulators of `other`, a partial result of the same profile.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::BadArrayShape`] if the profiles have different shapes.
    pub fn merge(&mut self, other: &Profile) -> Result<(), QnCorrError> {
        if self.entries.dim() != other.entries.dim() {
            return Err(QnCorrError::BadArrayShape {
                argument: "other".into(),
                function: "Profile::merge".into(),
                expected: format!("{:?}", self.entries.dim()),
                received: format!("{:?}", other.entries.dim()),
            });
        }
        self.entries += &other.entries;
        self.sum_w += &other.sum_w;
        self.sum_wx += &other.sum_wx;
        self.sum_wx2 += &other.sum_wx2;
        Ok(())
    }

    /// Zero every accumulator.
    pub fn reset(&mut self) {
        self.entries.fill(0);
        self.sum_w.fill(0.0);
        self.sum_wx.fill(0.0);
        self.sum_wx2.fill(0.0);
    }
}

impl CalibrationStore for Profile {
    fn fill(&mut self, key: StoreKey, value: f64, weight: f64) {
        let idx = (key.bin, key.slot);
        if let Some(entries) = self.entries.get_mut(idx) {
            *entries += 1;
            self.sum_w[idx] += weight;
            self.sum_wx[idx] += weight * value;
            self.sum_wx2[idx] += weight * value * value;
        }
    }

    fn read(&self, key: StoreKey) -> BinStats {
        let idx = (key.bin, key.slot);
        let entries = match self.entries.get(idx) {
            Some(&entries) => entries,
            None => return BinStats::default(),
        };
        let sum_w = self.sum_w[idx];
        if sum_w <= 0.0 {
            return BinStats {
                entries,
                ..BinStats::default()
            };
        }
        let content = self.sum_wx[idx] / sum_w;
        let variance = self.sum_wx2[idx] / sum_w - content * content;
        BinStats {
            content,
            width: variance.max(0.0).sqrt(),
            entries,
        }
    }
}

/// A profile shared between the step filling it and the list that persists it.
pub type SharedProfile = Arc<RwLock<Profile>>;

/// Read access to a shared profile. A poisoned lock is recovered, a profile is never left
/// half filled.
pub fn read_profile(profile: &SharedProfile) -> RwLockReadGuard<'_, Profile> {
    profile.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write access to a shared profile, see [`read_profile`].
pub fn write_profile(profile: &SharedProfile) -> RwLockWriteGuard<'_, Profile> {
    profile.write().unwrap_or_else(PoisonError::into_inner)
}

/// A named collection of calibration profiles: the output of one pass, or the input of the next.
///
/// Cloning a list shares its profiles.
#[derive(Clone, Debug, Default)]
pub struct CalibrationList {
    profiles: BTreeMap<String, SharedProfile>,
}

impl CalibrationList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `profile` under its own name, replacing any profile of that name, and return a
    /// handle to it.
    pub fn register(&mut self, profile: Profile) -> SharedProfile {
        trace!(
            "registering profile {} ({}x{})",
            profile.name(),
            profile.num_bins(),
            profile.num_slots()
        );
        let name = profile.name().to_string();
        let shared = Arc::new(RwLock::new(profile));
        self.profiles.insert(name, Arc::clone(&shared));
        shared
    }

    /// A handle to the profile called `name`.
    pub fn get(&self, name: &str) -> Option<SharedProfile> {
        self.profiles.get(name).cloned()
    }

    /// Whether a profile called `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// The number of profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the list holds no profiles.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// The profile names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// The profiles, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SharedProfile)> {
        self.profiles.iter().map(|(name, p)| (name.as_str(), p))
    }

    /// Fold the profiles of `other` into this list. Profiles only present in `other` are copied.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::BadArrayShape`] if a profile present in both has different shapes.
    pub fn merge(&mut self, other: &CalibrationList) -> Result<(), QnCorrError> {
        for (name, profile) in other.iter() {
            let theirs = read_profile(profile);
            match self.profiles.get(name) {
                Some(ours) if Arc::ptr_eq(ours, profile) => {}
                Some(ours) => write_profile(ours).merge(&theirs)?,
                None => {
                    self.profiles.insert(
                        name.to_string(),
                        Arc::new(RwLock::new(theirs.clone())),
                    );
                }
            }
        }
        Ok(())
    }

    /// An independent copy of this list, sharing no profile with it.
    pub fn deep_clone(&self) -> Self {
        Self {
            profiles: self
                .profiles
                .iter()
                .map(|(name, p)| (name.clone(), Arc::new(RwLock::new(read_profile(p).clone()))))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use float_cmp::assert_approx_eq;

    #[test]
    fn test_profile_mean_and_width() {
        let mut profile = Profile::new("p", 2, 3);
        let key = StoreKey::new(1, 2);
        for value in [1.0, 2.0, 3.0, 4.0] {
            profile.fill(key, value, 1.0);
        }
        let stats = profile.read(key);
        assert_eq!(stats.entries, 4);
        assert_approx_eq!(f64, stats.content, 2.5);
        assert_abs_diff_eq!(stats.width, 1.25_f64.sqrt(), epsilon = 1e-12);
        assert!(stats.is_validated(2));
        assert!(!stats.is_validated(5));

        // untouched bin
        let empty = profile.read(StoreKey::new(0, 2));
        assert_eq!(empty, BinStats::default());
        assert!(!empty.is_validated(0));
    }

    #[test]
    fn test_profile_weighted_fill() {
        let mut profile = Profile::new("p", 1, 1);
        let key = StoreKey::new(0, 0);
        profile.fill(key, 1.0, 3.0);
        profile.fill(key, 5.0, 1.0);
        let stats = profile.read(key);
        assert_approx_eq!(f64, stats.content, 2.0);
        assert_eq!(stats.entries, 2);
    }

    #[test]
    fn test_profile_out_of_range_keys() {
        let mut profile = Profile::new("p", 1, 1);
        profile.fill(StoreKey::new(3, 0), 1.0, 1.0);
        profile.fill(StoreKey::new(0, 3), 1.0, 1.0);
        assert_eq!(profile.total_entries(), 0);
        assert_eq!(profile.read(StoreKey::new(3, 3)), BinStats::default());
    }

    #[test]
    fn test_profile_merge() {
        let key = StoreKey::new(0, 1);
        let mut a = Profile::new("p", 1, 2);
        let mut b = Profile::new("p", 1, 2);
        a.fill(key, 1.0, 1.0);
        b.fill(key, 3.0, 1.0);
        a.merge(&b).unwrap();
        assert_eq!(a.read(key).entries, 2);
        assert_approx_eq!(f64, a.read(key).content, 2.0);

        let c = Profile::new("p", 2, 2);
        assert!(matches!(
            a.merge(&c),
            Err(QnCorrError::BadArrayShape { .. })
        ));
    }

    #[test]
    fn test_profile_from_arrays_checks_shapes() {
        assert!(Profile::from_arrays(
            "p",
            Array2::zeros((2, 2)),
            Array2::zeros((2, 2)),
            Array2::zeros((2, 2)),
            Array2::zeros((2, 1)),
        )
        .is_none());
    }

    #[test]
    fn test_list_register_shares_profile() {
        let mut list = CalibrationList::new();
        let handle = list.register(Profile::new("Qn V0A", 1, 2));
        write_profile(&handle).fill(StoreKey::new(0, 0), 1.0, 1.0);
        let read_back = list.get("Qn V0A").unwrap();
        assert_eq!(read_profile(&read_back).total_entries(), 1);
        assert!(list.contains("Qn V0A"));
        assert_eq!(list.names().collect::<Vec<_>>(), vec!["Qn V0A"]);
    }

    #[test]
    fn test_list_merge() {
        let mut ours = CalibrationList::new();
        let mut theirs = CalibrationList::new();
        let a = ours.register(Profile::new("a", 1, 1));
        write_profile(&a).fill(StoreKey::new(0, 0), 1.0, 1.0);
        let b = theirs.register(Profile::new("a", 1, 1));
        write_profile(&b).fill(StoreKey::new(0, 0), 3.0, 1.0);
        theirs.register(Profile::new("b", 1, 1));

        ours.merge(&theirs).unwrap();
        assert_eq!(ours.len(), 2);
        assert_eq!(read_profile(&a).total_entries(), 2);
        // copied, not shared
        let copied = ours.get("b").unwrap();
        assert!(!Arc::ptr_eq(&copied, &theirs.get("b").unwrap()));
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let mut list = CalibrationList::new();
        let handle = list.register(Profile::new("a", 1, 1));
        let copy = list.deep_clone();
        write_profile(&handle).fill(StoreKey::new(0, 0), 1.0, 1.0);
        assert_eq!(read_profile(&copy.get("a").unwrap()).total_entries(), 0);
    }
}
