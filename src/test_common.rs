//! Helpers shared by the unit tests.

use crate::{
    CalibrationStore, ChannelLayout, DetectorSettings, EventClassVariable,
    EventClassVariablesSet, Profile, QnVector, StoreKey,
};

/// One centrality class spanning `[0, 100)`, read from variable 0.
pub fn single_class() -> EventClassVariablesSet {
    EventClassVariablesSet::new(vec![
        EventClassVariable::new(0, "centrality", 1, 0.0, 100.0).unwrap(),
    ])
}

/// Settings binned in [`single_class`].
pub fn single_class_settings(
    name: &str,
    harmonics: Vec<u32>,
    channels: Option<ChannelLayout>,
) -> DetectorSettings {
    DetectorSettings {
        name: name.into(),
        harmonics,
        channels,
        normalization: Default::default(),
        event_classes: single_class(),
    }
}

/// Fill `values` into `key` with unit weights.
pub fn fill_profile(profile: &mut Profile, key: StoreKey, values: &[f64]) {
    for &value in values {
        profile.fill(key, value, 1.0);
    }
}

/// A Qn vector with one harmonic set to `(qx, qy)`.
pub fn qn_vector(harmonic: u32, qx: f64, qy: f64, good: bool) -> QnVector {
    let mut qn = QnVector::with_harmonics(&[harmonic]).unwrap();
    qn.set_qx(harmonic, qx);
    qn.set_qy(harmonic, qy);
    qn.set_good(good);
    qn
}
