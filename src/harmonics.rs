//! The set of harmonics a Qn vector is built for.

use std::fmt::{self, Display};

use crate::{constants::MAX_HARMONIC_NUMBER_SUPPORTED, QnCorrError};

/// A fixed width set of external harmonic numbers in `1..=MAX_HARMONIC_NUMBER_SUPPORTED`.
///
/// Bit `h` is set iff harmonic `h` is active. Bit zero is never set.
///
/// ```rust
/// use qncorr::HarmonicMask;
///
/// let mask = HarmonicMask::from_harmonics(&[4, 2]).unwrap();
/// assert_eq!(mask.first(), Some(2));
/// assert_eq!(mask.next_after(2), Some(4));
/// assert_eq!(mask.next_after(4), None);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct HarmonicMask(u16);

fn check_harmonic(harmonic: u32) -> Result<(), QnCorrError> {
    if harmonic == 0 || harmonic > MAX_HARMONIC_NUMBER_SUPPORTED {
        return Err(QnCorrError::HarmonicOutOfRange {
            harmonic,
            max: MAX_HARMONIC_NUMBER_SUPPORTED,
        });
    }
    Ok(())
}

impl HarmonicMask {
    /// Build a mask from an explicit list of harmonics, in any order.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicOutOfRange`] if any harmonic is 0 or above the maximum.
    pub fn from_harmonics(harmonics: &[u32]) -> Result<Self, QnCorrError> {
        let mut mask = Self::default();
        for &harmonic in harmonics {
            mask.insert(harmonic)?;
        }
        Ok(mask)
    }

    /// The contiguous mask `1..=num_harmonics`.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicOutOfRange`] if `num_harmonics` exceeds the maximum.
    pub fn contiguous(num_harmonics: u32) -> Result<Self, QnCorrError> {
        let harmonics: Vec<u32> = (1..=num_harmonics).collect();
        Self::from_harmonics(&harmonics)
    }

    /// Activate `harmonic`, returning whether it was newly activated.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicOutOfRange`] if the harmonic is 0 or above the maximum.
    pub fn insert(&mut self, harmonic: u32) -> Result<bool, QnCorrError> {
        check_harmonic(harmonic)?;
        let bit = 1u16 << harmonic;
        let newly = self.0 & bit == 0;
        self.0 |= bit;
        Ok(newly)
    }

    /// Whether `harmonic` is active.
    pub fn contains(self, harmonic: u32) -> bool {
        check_harmonic(harmonic).is_ok() && self.0 & (1u16 << harmonic) != 0
    }

    /// The lowest active harmonic.
    pub fn first(self) -> Option<u32> {
        self.next_after(0)
    }

    /// The lowest active harmonic strictly above `harmonic`.
    pub fn next_after(self, harmonic: u32) -> Option<u32> {
        if harmonic >= MAX_HARMONIC_NUMBER_SUPPORTED {
            return None;
        }
        let remaining = self.0 >> (harmonic + 1);
        if remaining == 0 {
            None
        } else {
            Some(harmonic + 1 + remaining.trailing_zeros())
        }
    }

    /// The highest active harmonic.
    pub fn highest(self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(15 - self.0.leading_zeros())
        }
    }

    /// How many harmonics are active.
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether no harmonic is active.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The rank of `harmonic` among the active harmonics, counting from zero.
    pub fn position(self, harmonic: u32) -> Option<usize> {
        if !self.contains(harmonic) {
            return None;
        }
        let below = self.0 & ((1u16 << harmonic) - 1);
        Some(below.count_ones() as usize)
    }

    /// The raw bits of the mask.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Iterate over the active harmonics in ascending order.
    pub fn iter(self) -> Harmonics {
        Harmonics {
            mask: self,
            next: self.first(),
        }
    }
}

/// Ascending iterator over the active harmonics of a [`HarmonicMask`].
#[derive(Clone, Debug)]
pub struct Harmonics {
    mask: HarmonicMask,
    next: Option<u32>,
}

impl Iterator for Harmonics {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.next?;
        self.next = self.mask.next_after(current);
        Some(current)
    }
}

impl IntoIterator for HarmonicMask {
    type Item = u32;
    type IntoIter = Harmonics;

    fn into_iter(self) -> Harmonics {
        self.iter()
    }
}

impl Display for HarmonicMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.iter().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_mask_iterates_ascending() {
        let mask = HarmonicMask::from_harmonics(&[6, 2, 4]).unwrap();
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![2, 4, 6]);
        assert_eq!(mask.bits(), 0b101_0100);
        assert_eq!(mask.len(), 3);
        assert_eq!(mask.highest(), Some(6));
        assert_eq!(mask.to_string(), "[2, 4, 6]");
    }

    #[test]
    fn test_contiguous_mask() {
        let mask = HarmonicMask::contiguous(3).unwrap();
        assert_eq!(mask.first(), Some(1));
        assert_eq!(mask.next_after(1), Some(2));
        assert_eq!(mask.next_after(2), Some(3));
        assert_eq!(mask.next_after(3), None);
        assert!(!mask.contains(0));
        assert!(!mask.contains(4));
    }

    #[test]
    fn test_highest_supported_harmonic() {
        let mask = HarmonicMask::from_harmonics(&[15]).unwrap();
        assert_eq!(mask.first(), Some(15));
        assert_eq!(mask.next_after(15), None);
        assert_eq!(mask.highest(), Some(15));
    }

    #[test]
    fn test_out_of_range_harmonics_rejected() {
        assert!(matches!(
            HarmonicMask::from_harmonics(&[16]),
            Err(QnCorrError::HarmonicOutOfRange {
                harmonic: 16,
                max: 15
            })
        ));
        assert!(matches!(
            HarmonicMask::from_harmonics(&[0]),
            Err(QnCorrError::HarmonicOutOfRange { harmonic: 0, .. })
        ));
        assert!(HarmonicMask::contiguous(16).is_err());
    }

    #[test]
    fn test_insert_reports_new_harmonics() {
        let mut mask = HarmonicMask::default();
        assert!(mask.is_empty());
        assert!(mask.insert(3).unwrap());
        assert!(!mask.insert(3).unwrap());
        assert_eq!(mask.first(), Some(3));
    }

    #[test]
    fn test_position_ranks_active_harmonics() {
        let mask = HarmonicMask::from_harmonics(&[2, 3, 7]).unwrap();
        assert_eq!(mask.position(2), Some(0));
        assert_eq!(mask.position(3), Some(1));
        assert_eq!(mask.position(7), Some(2));
        assert_eq!(mask.position(4), None);
    }
}
