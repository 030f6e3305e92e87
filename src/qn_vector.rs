//! Qn vectors: one two dimensional flow vector per active harmonic.

use std::{
    fmt::{self, Display},
    ops::Deref,
};

use crate::{
    constants::{MAX_HARMONIC_NUMBER_SUPPORTED, MINIMUM_SIGNIFICANT_VALUE},
    harmonics::Harmonics,
    HarmonicMask, QnCorrError,
};

const NUM_SLOTS: usize = MAX_HARMONIC_NUMBER_SUPPORTED as usize + 1;

/// How a built Qn vector is normalized before it enters the correction chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QnNormalization {
    /// Leave the sums as they are
    None,
    /// Divide by the square root of the sum of weights
    QoverSquareRootOfM,
    /// Divide by the sum of weights
    #[default]
    QoverM,
    /// Divide each harmonic by its own length
    QoverQlength,
}

impl Display for QnNormalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "none",
                Self::QoverSquareRootOfM => "Q/sqrt(M)",
                Self::QoverM => "Q/M",
                Self::QoverQlength => "Q/|Q|",
            }
        )
    }
}

/// A Qn vector: `(qx, qy)` for every active harmonic, plus a quality flag.
///
/// Components of inactive harmonics are meaningless and must not be read.
#[derive(Clone, Debug, PartialEq)]
pub struct QnVector {
    mask: HarmonicMask,
    qx: [f64; NUM_SLOTS],
    qy: [f64; NUM_SLOTS],
    good: bool,
}

impl QnVector {
    /// A zeroed, bad quality vector over the harmonics in `mask`.
    pub fn new(mask: HarmonicMask) -> Self {
        Self {
            mask,
            qx: [0.0; NUM_SLOTS],
            qy: [0.0; NUM_SLOTS],
            good: false,
        }
    }

    /// A zeroed vector over an explicit list of harmonics.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicOutOfRange`] if a harmonic is 0 or above the maximum.
    pub fn with_harmonics(harmonics: &[u32]) -> Result<Self, QnCorrError> {
        Ok(Self::new(HarmonicMask::from_harmonics(harmonics)?))
    }

    /// A zeroed vector over the harmonics `1..=num_harmonics`.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicOutOfRange`] if `num_harmonics` is above the maximum.
    pub fn with_num_harmonics(num_harmonics: u32) -> Result<Self, QnCorrError> {
        Ok(Self::new(HarmonicMask::contiguous(num_harmonics)?))
    }

    /// The active harmonics.
    pub fn harmonic_mask(&self) -> HarmonicMask {
        self.mask
    }

    /// Activate `harmonic`, zeroing its components. A no-op if it is already active.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicOutOfRange`] if the harmonic is 0 or above the maximum.
    pub fn activate_harmonic(&mut self, harmonic: u32) -> Result<(), QnCorrError> {
        if self.mask.insert(harmonic)? {
            self.qx[harmonic as usize] = 0.0;
            self.qy[harmonic as usize] = 0.0;
        }
        Ok(())
    }

    /// The highest active harmonic.
    pub fn highest_harmonic(&self) -> Option<u32> {
        self.mask.highest()
    }

    /// How many harmonics are active.
    pub fn num_harmonics(&self) -> usize {
        self.mask.len()
    }

    /// The active harmonics, ascending.
    pub fn harmonic_map(&self) -> Vec<u32> {
        self.mask.iter().collect()
    }

    /// The lowest active harmonic.
    pub fn first_harmonic(&self) -> Option<u32> {
        self.mask.first()
    }

    /// The active harmonic following `harmonic`, or `None` after the last one.
    pub fn next_harmonic(&self, harmonic: u32) -> Option<u32> {
        self.mask.next_after(harmonic)
    }

    /// Iterate the active harmonics, ascending.
    pub fn harmonics(&self) -> Harmonics {
        self.mask.iter()
    }

    /// The x component of `harmonic`.
    ///
    /// # Panics
    ///
    /// In debug builds, if `harmonic` is not active.
    pub fn qx(&self, harmonic: u32) -> f64 {
        debug_assert!(self.mask.contains(harmonic), "harmonic {harmonic} is not active");
        self.qx[harmonic as usize]
    }

    /// The y component of `harmonic`.
    ///
    /// # Panics
    ///
    /// In debug builds, if `harmonic` is not active.
    pub fn qy(&self, harmonic: u32) -> f64 {
        debug_assert!(self.mask.contains(harmonic), "harmonic {harmonic} is not active");
        self.qy[harmonic as usize]
    }

    /// Set the x component of `harmonic`.
    ///
    /// # Panics
    ///
    /// In debug builds, if `harmonic` is not active.
    pub fn set_qx(&mut self, harmonic: u32, value: f64) {
        debug_assert!(self.mask.contains(harmonic), "harmonic {harmonic} is not active");
        self.qx[harmonic as usize] = value;
    }

    /// Set the y component of `harmonic`.
    ///
    /// # Panics
    ///
    /// In debug builds, if `harmonic` is not active.
    pub fn set_qy(&mut self, harmonic: u32, value: f64) {
        debug_assert!(self.mask.contains(harmonic), "harmonic {harmonic} is not active");
        self.qy[harmonic as usize] = value;
    }

    /// The length `|Qn|` of `harmonic`.
    pub fn length(&self, harmonic: u32) -> f64 {
        self.qx(harmonic).hypot(self.qy(harmonic))
    }

    /// The event plane angle `atan2(qy, qx) / harmonic`, zero for a vanishing vector.
    pub fn event_plane(&self, harmonic: u32) -> f64 {
        let (x, y) = (self.qx(harmonic), self.qy(harmonic));
        if x.abs() < MINIMUM_SIGNIFICANT_VALUE && y.abs() < MINIMUM_SIGNIFICANT_VALUE {
            0.0
        } else {
            y.atan2(x) / harmonic as f64
        }
    }

    /// Whether the vector can be trusted by downstream steps.
    pub fn is_good_quality(&self) -> bool {
        self.good
    }

    /// Mark the vector as good or bad quality.
    pub fn set_good(&mut self, good: bool) {
        self.good = good;
    }

    /// Copy the components and quality of `other`.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicStructureMismatch`] if the active harmonics differ.
    pub fn set(&mut self, other: &QnVector) -> Result<(), QnCorrError> {
        self.check_structure("QnVector::set", other)?;
        self.qx = other.qx;
        self.qy = other.qy;
        self.good = other.good;
        Ok(())
    }

    /// Scale each active harmonic to unit length. Vanishing harmonics are left unchanged.
    pub fn normalize(&mut self) {
        for harmonic in self.mask {
            let length = self.length(harmonic);
            if length >= MINIMUM_SIGNIFICANT_VALUE {
                self.qx[harmonic as usize] /= length;
                self.qy[harmonic as usize] /= length;
            }
        }
    }

    /// Zero every component and mark the vector bad. The active harmonics are kept.
    pub fn reset(&mut self) {
        self.qx = [0.0; NUM_SLOTS];
        self.qy = [0.0; NUM_SLOTS];
        self.good = false;
    }

    fn check_structure(&self, function: &'static str, other: &QnVector) -> Result<(), QnCorrError> {
        if self.mask != other.mask {
            return Err(QnCorrError::HarmonicStructureMismatch {
                function,
                expected: self.mask.to_string(),
                received: other.mask.to_string(),
            });
        }
        Ok(())
    }

    fn scale(&mut self, factor: f64) {
        for harmonic in self.mask {
            self.qx[harmonic as usize] /= factor;
            self.qy[harmonic as usize] /= factor;
        }
    }
}

impl Display for QnVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "quality: {}", if self.good { "good" } else { "bad" })?;
        for harmonic in self.mask {
            writeln!(
                f,
                "  harmonic {:2}: qx={:+.6e} qy={:+.6e}",
                harmonic,
                self.qx(harmonic),
                self.qy(harmonic)
            )?;
        }
        Ok(())
    }
}

/// A Qn vector under construction from data vectors.
///
/// On top of the components it tracks the sum of weights (multiplicity) and the number of
/// contributions. It can be read like a [`QnVector`], but its components can only change by
/// accumulation and normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct QnVectorBuild {
    qn: QnVector,
    sum_of_weights: f64,
    entries: u64,
}

impl QnVectorBuild {
    /// An empty build vector over the harmonics in `mask`.
    pub fn new(mask: HarmonicMask) -> Self {
        Self {
            qn: QnVector::new(mask),
            sum_of_weights: 0.0,
            entries: 0,
        }
    }

    /// An empty build vector over an explicit list of harmonics.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicOutOfRange`] if a harmonic is 0 or above the maximum.
    pub fn with_harmonics(harmonics: &[u32]) -> Result<Self, QnCorrError> {
        Ok(Self::new(HarmonicMask::from_harmonics(harmonics)?))
    }

    /// The plain view of the components.
    pub fn qn(&self) -> &QnVector {
        &self.qn
    }

    /// The accumulated sum of weights.
    pub fn sum_of_weights(&self) -> f64 {
        self.sum_of_weights
    }

    /// The number of contributions accumulated.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// See [`QnVector::activate_harmonic`].
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicOutOfRange`] if the harmonic is 0 or above the maximum.
    pub fn activate_harmonic(&mut self, harmonic: u32) -> Result<(), QnCorrError> {
        self.qn.activate_harmonic(harmonic)
    }

    /// Mark the vector as good or bad quality.
    pub fn set_good(&mut self, good: bool) {
        self.qn.set_good(good);
    }

    /// Copy everything from `other`.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicStructureMismatch`] if the active harmonics differ.
    pub fn set(&mut self, other: &QnVectorBuild) -> Result<(), QnCorrError> {
        self.qn.set(&other.qn)?;
        self.sum_of_weights = other.sum_of_weights;
        self.entries = other.entries;
        Ok(())
    }

    /// Accumulate the components, sum of weights and entries of `other`.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicStructureMismatch`] if the active harmonics differ.
    pub fn add(&mut self, other: &QnVectorBuild) -> Result<(), QnCorrError> {
        self.qn.check_structure("QnVectorBuild::add", &other.qn)?;
        for harmonic in self.qn.mask {
            self.qn.qx[harmonic as usize] += other.qn.qx[harmonic as usize];
            self.qn.qy[harmonic as usize] += other.qn.qy[harmonic as usize];
        }
        self.sum_of_weights += other.sum_of_weights;
        self.entries += other.entries;
        Ok(())
    }

    /// Accumulate one data vector: `weight * (cos(h phi), sin(h phi))` for every active `h`.
    pub fn add_contribution(&mut self, phi: f64, weight: f64) {
        for harmonic in self.qn.mask {
            let (sin, cos) = (harmonic as f64 * phi).sin_cos();
            self.qn.qx[harmonic as usize] += weight * cos;
            self.qn.qy[harmonic as usize] += weight * sin;
        }
        self.sum_of_weights += weight;
        self.entries += 1;
    }

    /// Divide the components by the sum of weights, if it is significant.
    pub fn normalize_q_over_m(&mut self) {
        if self.sum_of_weights >= MINIMUM_SIGNIFICANT_VALUE {
            self.qn.scale(self.sum_of_weights);
        }
    }

    /// Divide the components by the square root of the sum of weights, if it is significant.
    pub fn normalize_q_over_square_root_of_m(&mut self) {
        if self.sum_of_weights >= MINIMUM_SIGNIFICANT_VALUE {
            self.qn.scale(self.sum_of_weights.sqrt());
        }
    }

    /// Scale every harmonic to unit length.
    pub fn normalize_q_over_q_length(&mut self) {
        self.qn.normalize();
    }

    /// Apply `method`.
    pub fn normalize(&mut self, method: QnNormalization) {
        match method {
            QnNormalization::None => {}
            QnNormalization::QoverSquareRootOfM => self.normalize_q_over_square_root_of_m(),
            QnNormalization::QoverM => self.normalize_q_over_m(),
            QnNormalization::QoverQlength => self.normalize_q_over_q_length(),
        }
    }

    /// Zero everything and mark the vector bad. The active harmonics are kept.
    pub fn reset(&mut self) {
        self.qn.reset();
        self.sum_of_weights = 0.0;
        self.entries = 0;
    }
}

impl Deref for QnVectorBuild {
    type Target = QnVector;

    fn deref(&self) -> &QnVector {
        &self.qn
    }
}

impl Display for QnVectorBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "M={:.6e} entries={}",
            self.sum_of_weights, self.entries
        )?;
        write!(f, "{}", self.qn)
    }
}
