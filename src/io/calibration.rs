//! IO for the calibration file, the statistics of one pass carried over to the next.
//!
//! All values are little endian.
//!
//! | field | type |
//! |---|---|
//! | magic | 7 bytes, ASCII `QNCALIB` |
//! | format version | u32 |
//! | number of profiles | u32 |
//!
//! then for each profile
//!
//! | field | type |
//! |---|---|
//! | name length | u32 |
//! | name | utf8 bytes |
//! | bins, slots | u64, u64 |
//! | entries | `bins * slots` u64, row major |
//! | sum of weights | `bins * slots` f64 |
//! | sum of weighted values | `bins * slots` f64 |
//! | sum of weighted squares | `bins * slots` f64 |

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, trace};
use ndarray::Array2;

use super::error::IOError;
use crate::{calibration::read_profile, CalibrationList, Profile};

/// The first bytes of every calibration file.
pub const CALIBRATION_MAGIC: &[u8; 7] = b"QNCALIB";
/// The format version written by [`write_calibration_file`].
pub const CALIBRATION_FORMAT_VERSION: u32 = 1;
/// The longest profile name a calibration file may hold, in bytes.
pub const MAX_NAME_LEN: usize = 4096;
/// The most `bins * slots` values a profile of a calibration file may hold.
pub const MAX_PROFILE_VALUES: u64 = 1 << 28;
const READ_CHUNK_LEN: usize = 1 << 16;

/// Write every profile of `list` to `path`.
///
/// # Errors
///
/// Can throw [`IOError::StdIO`] if the file can't be written.
pub fn write_calibration_file<T: AsRef<Path>>(
    path: T,
    list: &CalibrationList,
) -> Result<(), IOError> {
    trace!("start write_calibration_file");
    let mut writer = BufWriter::new(File::create(&path)?);
    write_calibration(&mut writer, list)?;
    writer.flush()?;
    debug!(
        "wrote {} profiles to {}",
        list.len(),
        path.as_ref().display()
    );
    trace!("end write_calibration_file");
    Ok(())
}

/// Write every profile of `list` to `writer`.
///
/// # Errors
///
/// Can throw [`IOError::StdIO`] if the writer fails.
pub fn write_calibration<W: Write>(writer: &mut W, list: &CalibrationList) -> Result<(), IOError> {
    writer.write_all(CALIBRATION_MAGIC)?;
    writer.write_u32::<LittleEndian>(CALIBRATION_FORMAT_VERSION)?;
    writer.write_u32::<LittleEndian>(list.len() as u32)?;
    for (name, profile) in list.iter() {
        let profile = read_profile(profile);
        writer.write_u32::<LittleEndian>(name.len() as u32)?;
        writer.write_all(name.as_bytes())?;
        writer.write_u64::<LittleEndian>(profile.num_bins() as u64)?;
        writer.write_u64::<LittleEndian>(profile.num_slots() as u64)?;
        for &entries in profile.entries().iter() {
            writer.write_u64::<LittleEndian>(entries)?;
        }
        for array in [profile.sum_w(), profile.sum_wx(), profile.sum_wx2()] {
            for &value in array.iter() {
                writer.write_f64::<LittleEndian>(value)?;
            }
        }
    }
    Ok(())
}

/// Read a calibration file written by [`write_calibration_file`].
///
/// # Errors
///
/// - [`IOError::BadMagic`] or [`IOError::UnsupportedVersion`] if this is not a calibration file
///     this version can read.
/// - [`IOError::CalibrationInconsistent`] if the sizes in the file don't add up.
/// - [`IOError::StdIO`] if the file is truncated or can't be read.
pub fn read_calibration_file<T: AsRef<Path>>(path: T) -> Result<CalibrationList, IOError> {
    trace!("start read_calibration_file");
    let file = path.as_ref().display().to_string();
    let mut reader = BufReader::new(File::open(&path)?);
    let list = read_calibration(&mut reader, &file)?;
    debug!("read {} profiles from {}", list.len(), file);
    trace!("end read_calibration_file");
    Ok(list)
}

/// Read a calibration list from `reader`. `file` is only used in error messages.
///
/// # Errors
///
/// See [`read_calibration_file`].
pub fn read_calibration<R: Read>(reader: &mut R, file: &str) -> Result<CalibrationList, IOError> {
    let mut magic = [0_u8; 7];
    reader.read_exact(&mut magic)?;
    if &magic != CALIBRATION_MAGIC {
        return Err(IOError::BadMagic {
            file: file.to_string(),
            found: magic.to_vec(),
        });
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != CALIBRATION_FORMAT_VERSION {
        return Err(IOError::UnsupportedVersion {
            file: file.to_string(),
            version,
        });
    }
    let num_profiles = reader.read_u32::<LittleEndian>()?;
    let mut list = CalibrationList::new();
    for _ in 0..num_profiles {
        let profile = read_profile_record(reader, file)?;
        if list.contains(profile.name()) {
            return Err(IOError::CalibrationInconsistent {
                file: file.to_string(),
                expected: "unique profile names".into(),
                found: format!("{} twice", profile.name()),
            });
        }
        list.register(profile);
    }
    Ok(list)
}

fn read_profile_record<R: Read>(reader: &mut R, file: &str) -> Result<Profile, IOError> {
    let name_len = reader.read_u32::<LittleEndian>()? as usize;
    if name_len > MAX_NAME_LEN {
        return Err(IOError::CalibrationInconsistent {
            file: file.to_string(),
            expected: format!("a profile name of at most {} bytes", MAX_NAME_LEN),
            found: format!("{} bytes", name_len),
        });
    }
    let mut name = vec![0_u8; name_len];
    reader.read_exact(&mut name)?;
    let name = String::from_utf8(name)?;

    let num_bins = reader.read_u64::<LittleEndian>()?;
    let num_slots = reader.read_u64::<LittleEndian>()?;
    let len = match num_bins.checked_mul(num_slots) {
        Some(len) if len <= MAX_PROFILE_VALUES => len as usize,
        _ => {
            return Err(IOError::CalibrationInconsistent {
                file: file.to_string(),
                expected: format!("{} to hold at most {} values", name, MAX_PROFILE_VALUES),
                found: format!("{} bins of {} slots", num_bins, num_slots),
            })
        }
    };
    let shape = (num_bins as usize, num_slots as usize);

    let entries = read_chunked(reader, len, |reader, buf: &mut [u64]| {
        reader.read_u64_into::<LittleEndian>(buf)
    })?;
    let entries = to_array(file, &name, shape, entries)?;
    let sum_w = read_f64_array(reader, file, &name, shape)?;
    let sum_wx = read_f64_array(reader, file, &name, shape)?;
    let sum_wx2 = read_f64_array(reader, file, &name, shape)?;

    Profile::from_arrays(name.clone(), entries, sum_w, sum_wx, sum_wx2).ok_or_else(|| {
        IOError::CalibrationInconsistent {
            file: file.to_string(),
            expected: format!("{} arrays of one shape", name),
            found: "mismatched arrays".into(),
        }
    })
}

/// Read `len` values, at most [`READ_CHUNK_LEN`] at a time.
fn read_chunked<R, T, F>(reader: &mut R, len: usize, mut read_into: F) -> Result<Vec<T>, IOError>
where
    R: Read,
    T: Copy + Default,
    F: FnMut(&mut R, &mut [T]) -> std::io::Result<()>,
{
    let mut values = Vec::with_capacity(len.min(READ_CHUNK_LEN));
    let mut chunk = vec![T::default(); len.min(READ_CHUNK_LEN)];
    while values.len() < len {
        let chunk_len = (len - values.len()).min(READ_CHUNK_LEN);
        read_into(reader, &mut chunk[..chunk_len])?;
        values.extend_from_slice(&chunk[..chunk_len]);
    }
    Ok(values)
}

fn read_f64_array<R: Read>(
    reader: &mut R,
    file: &str,
    name: &str,
    shape: (usize, usize),
) -> Result<Array2<f64>, IOError> {
    let values = read_chunked(reader, shape.0 * shape.1, |reader, buf: &mut [f64]| {
        reader.read_f64_into::<LittleEndian>(buf)
    })?;
    to_array(file, name, shape, values)
}

fn to_array<A>(
    file: &str,
    name: &str,
    shape: (usize, usize),
    values: Vec<A>,
) -> Result<Array2<A>, IOError> {
    Array2::from_shape_vec(shape, values).map_err(|e| IOError::CalibrationInconsistent {
        file: file.to_string(),
        expected: format!("{} arrays of shape {:?}", name, shape),
        found: e.to_string(),
    })
}
