//! Input and output file formats: event CSV files, Qn vector CSV files, and the binary
//! calibration file carried from one pass to the next.

pub mod calibration;
pub mod error;
pub mod events;

pub use calibration::{read_calibration_file, write_calibration_file};
pub use error::IOError;
pub use events::{read_events, DataRecord, EventRecord, QnWriter};
