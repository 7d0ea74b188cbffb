//! Read-only access to the named arrays of a Galaxia model.
//!
//! The exporter only ever needs "give me the array stored under this key".
//! Keys look like paths (`/px`, `/Center`). Two backends are provided: an
//! in-memory map, used by tests and by callers that have already loaded their
//! data, and a FITS binary table.

use ndarray::Array1;
use std::{collections::HashMap, path::Path};
use tracing::debug;

use crate::{
    errors::{Error, Result},
    fitsfile::FitsFile,
};

pub trait ArrayStore {
    /// Fetch the whole array stored under `key`.
    fn read(&mut self, key: &str) -> Result<Array1<f64>>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    arrays: HashMap<String, Array1<f64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, key: S, values: Array1<f64>) -> &mut Self {
        self.arrays.insert(key.into(), values);
        self
    }
}

impl ArrayStore for MemoryStore {
    fn read(&mut self, key: &str) -> Result<Array1<f64>> {
        self.arrays
            .get(key)
            .cloned()
            .ok_or_else(|| Error::format(format!("no array stored under `{key}`")))
    }
}

/// Model arrays kept as the columns of the first FITS binary table extension.
///
/// The key `/name` reads column `name`. Short fixed-length arrays such as
/// `/Center` may instead live in the table header as numbered keywords
/// `CENTER1`, `CENTER2`, ....
#[derive(Debug)]
pub struct FitsTableStore {
    fits: FitsFile,
}

impl FitsTableStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut fits = FitsFile::open(path.as_ref())?;
        fits.move_to_hdu(1)?;
        debug!("opened model table `{}`", path.as_ref().display());
        Ok(FitsTableStore { fits })
    }

    fn read_header_vector(&mut self, name: &str) -> Result<Array1<f64>> {
        let stem = name.to_uppercase();
        let mut values = Vec::new();

        loop {
            let key = format!("{}{}", stem, values.len() + 1);

            // FITS keywords are at most 8 characters long.
            if key.len() > 8 {
                break;
            }

            match self.fits.get_f64_header(&key)? {
                Some(v) => values.push(v),
                None => break,
            }
        }

        if values.is_empty() {
            return Err(Error::format(format!(
                "model table has neither a column `{name}` nor header keywords `{stem}1`..."
            )));
        }

        Ok(Array1::from(values))
    }
}

impl ArrayStore for FitsTableStore {
    fn read(&mut self, key: &str) -> Result<Array1<f64>> {
        let name = key.trim_start_matches('/');

        match self.fits.column_number(name)? {
            Some(colnum) => self.fits.read_f64_column(colnum),
            None => self.read_header_vector(name),
        }
    }
}
