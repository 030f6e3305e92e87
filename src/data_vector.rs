//! Data vectors: the per hit or per track contributions to a Qn vector.

/// One contribution to a Qn vector: an azimuthal angle with its weight.
///
/// The raw weight never changes after creation. The equalized weight starts equal to the raw
/// weight, and can only be changed by input data corrections.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DataVector {
    phi: f64,
    weight: f64,
    equalized_weight: f64,
    channel: Option<usize>,
}

impl DataVector {
    /// A track-like contribution, without a channel.
    pub fn new(phi: f64, weight: f64) -> Self {
        Self {
            phi,
            weight,
            equalized_weight: weight,
            channel: None,
        }
    }

    /// A contribution from detector channel `channel`.
    pub fn channelized(channel: usize, phi: f64, weight: f64) -> Self {
        Self {
            channel: Some(channel),
            ..Self::new(phi, weight)
        }
    }

    /// The azimuthal angle in radians.
    pub fn phi(&self) -> f64 {
        self.phi
    }

    /// The raw weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// The weight after input data corrections.
    pub fn equalized_weight(&self) -> f64 {
        self.equalized_weight
    }

    /// The channel id, for channelized detectors.
    pub fn channel(&self) -> Option<usize> {
        self.channel
    }

    pub(crate) fn set_equalized_weight(&mut self, equalized_weight: f64) {
        self.equalized_weight = equalized_weight;
    }
}

/// The data vectors of one detector configuration for the current event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataVectorBank {
    vectors: Vec<DataVector>,
}

impl DataVectorBank {
    /// An empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a data vector.
    pub fn push(&mut self, vector: DataVector) {
        self.vectors.push(vector);
    }

    /// The number of data vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether there are no data vectors.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Iterate the data vectors.
    pub fn iter(&self) -> std::slice::Iter<'_, DataVector> {
        self.vectors.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, DataVector> {
        self.vectors.iter_mut()
    }

    /// The data vectors as a slice.
    pub fn as_slice(&self) -> &[DataVector] {
        &self.vectors
    }

    /// Drop every data vector, keeping the allocation for the next event.
    pub fn clear(&mut self) {
        self.vectors.clear();
    }
}

impl<'a> IntoIterator for &'a DataVectorBank {
    type Item = &'a DataVector;
    type IntoIter = std::slice::Iter<'a, DataVector>;

    fn into_iter(self) -> Self::IntoIter {
        self.vectors.iter()
    }
}
