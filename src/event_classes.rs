//! Event classes: binning of the event level variables that calibration statistics depend on.

use std::fmt::{self, Display};

use crate::QnCorrError;

/// One event level variable (centrality, vertex position, ...) and its binning.
///
/// Bins are uniform and half open, `[min, max)`.
#[derive(Clone, Debug, PartialEq)]
pub struct EventClassVariable {
    /// Index of the variable in the per event variable container
    pub var_id: usize,
    /// Human readable name
    pub name: String,
    /// Number of bins
    pub num_bins: usize,
    /// Lower edge of the first bin
    pub min: f64,
    /// Upper edge of the last bin
    pub max: f64,
}

impl EventClassVariable {
    /// Describe a variable with `num_bins` uniform bins over `[min, max)`.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::InvalidEventClass`] if there are no bins or the range is empty.
    pub fn new(
        var_id: usize,
        name: impl Into<String>,
        num_bins: usize,
        min: f64,
        max: f64,
    ) -> Result<Self, QnCorrError> {
        let name = name.into();
        if num_bins == 0 {
            return Err(QnCorrError::InvalidEventClass {
                name,
                reason: "at least one bin is needed".into(),
            });
        }
        if min.is_nan() || max.is_nan() || min >= max {
            return Err(QnCorrError::InvalidEventClass {
                name,
                reason: format!("min={min} must be below max={max}"),
            });
        }
        Ok(Self {
            var_id,
            name,
            num_bins,
            min,
            max,
        })
    }

    /// The bin holding `value`, if it is inside the range.
    pub fn bin(&self, value: f64) -> Option<usize> {
        if !(self.min..self.max).contains(&value) {
            return None;
        }
        let fraction = (value - self.min) / (self.max - self.min);
        Some(((fraction * self.num_bins as f64) as usize).min(self.num_bins - 1))
    }
}

impl Display for EventClassVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (var {}): {} bins over [{}, {})",
            self.name, self.var_id, self.num_bins, self.min, self.max
        )
    }
}

/// The event level variables a calibration is binned in.
///
/// Bins of the individual variables are combined into one linear bin, the first variable being
/// the slowest. An empty set has exactly one bin.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventClassVariablesSet {
    variables: Vec<EventClassVariable>,
}

impl EventClassVariablesSet {
    /// A set over `variables`.
    pub fn new(variables: Vec<EventClassVariable>) -> Self {
        Self { variables }
    }

    /// Add another variable.
    pub fn push(&mut self, variable: EventClassVariable) {
        self.variables.push(variable);
    }

    /// The total number of event classes.
    pub fn num_bins(&self) -> usize {
        self.variables.iter().map(|v| v.num_bins).product()
    }

    /// The linear event class of an event, if every variable is inside its range.
    pub fn bin(&self, values: &[f64]) -> Option<usize> {
        self.variables.iter().try_fold(0, |acc, variable| {
            let value = *values.get(variable.var_id)?;
            Some(acc * variable.num_bins + variable.bin(value)?)
        })
    }

    /// The variables.
    pub fn iter(&self) -> std::slice::Iter<'_, EventClassVariable> {
        self.variables.iter()
    }

    /// The number of variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether no variable is used.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_bins_are_half_open() {
        let centrality = EventClassVariable::new(0, "centrality", 10, 0.0, 100.0).unwrap();
        assert_eq!(centrality.bin(0.0), Some(0));
        assert_eq!(centrality.bin(9.999), Some(0));
        assert_eq!(centrality.bin(10.0), Some(1));
        assert_eq!(centrality.bin(99.999), Some(9));
        assert_eq!(centrality.bin(100.0), None);
        assert_eq!(centrality.bin(-1.0), None);
        assert_eq!(centrality.bin(f64::NAN), None);
    }

    #[test]
    fn test_invalid_variables() {
        assert!(EventClassVariable::new(0, "a", 0, 0.0, 1.0).is_err());
        assert!(EventClassVariable::new(0, "a", 2, 1.0, 1.0).is_err());
        assert!(EventClassVariable::new(0, "a", 2, 1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_set_linear_bin() {
        let set = EventClassVariablesSet::new(vec![
            EventClassVariable::new(1, "centrality", 4, 0.0, 100.0).unwrap(),
            EventClassVariable::new(0, "vtxz", 2, -10.0, 10.0).unwrap(),
        ]);
        assert_eq!(set.num_bins(), 8);
        // centrality bin 2, vtxz bin 1
        assert_eq!(set.bin(&[5.0, 60.0]), Some(5));
        assert_eq!(set.bin(&[-5.0, 0.0]), Some(0));
        assert_eq!(set.bin(&[15.0, 60.0]), None);
        // missing variable
        assert_eq!(set.bin(&[5.0]), None);
    }

    #[test]
    fn test_empty_set_has_one_bin() {
        let set = EventClassVariablesSet::default();
        assert!(set.is_empty());
        assert_eq!(set.num_bins(), 1);
        assert_eq!(set.bin(&[]), Some(0));
        assert_eq!(set.bin(&[3.0]), Some(0));
    }
}
