//! A thin, safe-ish layer over the parts of CFITSIO that we need: binary
//! tables of doubles in both directions, header keywords, and a 2-D integer
//! image for density maps.

use fitsio_sys::fitsfile;
use libc::{c_char, c_int, c_long, c_longlong, c_void};
use ndarray::{Array1, Array2};
use std::{ffi::CString, path::Path};

use crate::errors::{Error, Result};

/// The CFITSIO constants that we use. These are fixed by the library's ABI.
mod cfitsio {
    use libc::c_int;

    pub const READONLY: c_int = 0;
    pub const KEY_NO_EXIST: c_int = 202;
    pub const COL_NOT_FOUND: c_int = 219;
    pub const BINARY_TBL: c_int = 2;
    pub const LONG_IMG: c_int = 32;
    pub const TLOGICAL: c_int = 14;
    pub const TSTRING: c_int = 16;
    pub const TINT: c_int = 31;
    pub const TDOUBLE: c_int = 82;
    pub const CASEINSEN: c_int = 0;
}

#[derive(Debug)]
pub struct FitsFile {
    handle: *mut fitsfile,
}

/// Turn a CFITSIO status code into an error, fetching the library's message
/// for it.
fn fits_error(status: c_int) -> Error {
    let mut buf = [0 as c_char; 31];
    unsafe { fitsio_sys::ffgerr(status, buf.as_mut_ptr()) };

    let message = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    Error::Fits {
        code: status,
        message,
    }
}

macro_rules! try_cfitsio {
    ($status:expr) => {{
        let s = $status;

        if s != 0 {
            return Err(fits_error(s));
        }
    }};
}

fn c_path<P: AsRef<Path>>(path: P) -> Result<CString> {
    let text = path
        .as_ref()
        .to_str()
        .ok_or_else(|| Error::Config(format!("non-UTF8 path {}", path.as_ref().display())))?;
    CString::new(text).map_err(|e| Error::Config(e.to_string()))
}

fn c_str(s: &str) -> Result<CString> {
    CString::new(s).map_err(|e| Error::Config(e.to_string()))
}

/// One column of a binary table that we're about to create.
#[derive(Clone, Debug)]
pub struct ColumnSpec {
    pub name: String,
    pub unit: String,
}

impl ColumnSpec {
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, unit: S2) -> Self {
        ColumnSpec {
            name: name.into(),
            unit: unit.into(),
        }
    }
}

impl FitsFile {
    /// Open an existing FITS file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut handle: *mut fitsfile = std::ptr::null_mut();
        let c_url = c_path(path)?;
        let mut status = 0;

        try_cfitsio!(unsafe {
            fitsio_sys::ffopen(&mut handle, c_url.as_ptr(), cfitsio::READONLY, &mut status)
        });

        Ok(FitsFile { handle })
    }

    /// Create a new FITS file, replacing any existing file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut handle: *mut fitsfile = std::ptr::null_mut();

        // The leading `!` tells CFITSIO to clobber.
        let text = path
            .as_ref()
            .to_str()
            .ok_or_else(|| Error::Config(format!("non-UTF8 path {}", path.as_ref().display())))?;
        let c_url = c_str(&format!("!{text}"))?;
        let mut status = 0;

        try_cfitsio!(unsafe { fitsio_sys::ffinit(&mut handle, c_url.as_ptr(), &mut status) });

        Ok(FitsFile { handle })
    }

    /// Move to the specified HDU. Unlike the underlying library, the HDU
    /// numbers here are zero-based.
    pub fn move_to_hdu(&mut self, hdunum: u16) -> Result<()> {
        let mut status = 0;

        try_cfitsio!(unsafe {
            fitsio_sys::ffmahd(
                self.handle,
                hdunum as c_int + 1,
                std::ptr::null_mut(),
                &mut status,
            )
        });

        Ok(())
    }

    /// Append a binary table extension with the given double-precision
    /// columns and number of rows, and make it the current HDU. If the file is
    /// empty, CFITSIO puts a dummy primary array in front of it.
    pub fn create_f64_table(&mut self, extname: &str, columns: &[ColumnSpec], nrows: usize) -> Result<()> {
        let names = columns
            .iter()
            .map(|c| c_str(&c.name))
            .collect::<Result<Vec<_>>>()?;
        let units = columns
            .iter()
            .map(|c| c_str(&c.unit))
            .collect::<Result<Vec<_>>>()?;
        let form = c_str("1D")?;
        let extname = c_str(extname)?;

        let mut ttype: Vec<*mut c_char> = names.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        let mut tunit: Vec<*mut c_char> = units.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        let mut tform: Vec<*mut c_char> = vec![form.as_ptr() as *mut c_char; columns.len()];
        let mut status = 0;

        try_cfitsio!(unsafe {
            fitsio_sys::ffcrtb(
                self.handle,
                cfitsio::BINARY_TBL,
                nrows as c_longlong,
                columns.len() as c_int,
                ttype.as_mut_ptr(),
                tform.as_mut_ptr(),
                tunit.as_mut_ptr(),
                extname.as_ptr(),
                &mut status,
            )
        });

        Ok(())
    }

    /// Write a whole column of the current table. Column numbers are
    /// zero-based.
    pub fn write_f64_column(&mut self, colnum: usize, values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        // CFITSIO's signature isn't const-correct; it doesn't modify the data.
        let mut buf = values.to_vec();
        let mut status = 0;

        try_cfitsio!(unsafe {
            fitsio_sys::ffpcld(
                self.handle,
                colnum as c_int + 1,
                1, // first row
                1, // first element
                buf.len() as c_longlong,
                buf.as_mut_ptr(),
                &mut status,
            )
        });

        Ok(())
    }

    /// Number of rows in the current table.
    pub fn num_rows(&mut self) -> Result<usize> {
        let mut nrows: c_longlong = 0;
        let mut status = 0;

        try_cfitsio!(unsafe { fitsio_sys::ffgnrwll(self.handle, &mut nrows, &mut status) });

        Ok(nrows as usize)
    }

    /// Find a column of the current table by (case-insensitive) name. The
    /// result is zero-based.
    pub fn column_number(&mut self, name: &str) -> Result<Option<usize>> {
        let templt = c_str(name)?;
        let mut colnum: c_int = 0;
        let mut status = 0;

        unsafe {
            fitsio_sys::ffgcno(
                self.handle,
                cfitsio::CASEINSEN,
                templt.as_ptr() as *mut c_char,
                &mut colnum,
                &mut status,
            );
        }

        match status {
            0 => Ok(Some(colnum as usize - 1)),
            cfitsio::COL_NOT_FOUND => {
                self.clear_errors();
                Ok(None)
            }
            s => Err(fits_error(s)),
        }
    }

    /// Read a whole column of the current table as doubles. Column numbers
    /// are zero-based.
    pub fn read_f64_column(&mut self, colnum: usize) -> Result<Array1<f64>> {
        let nrows = self.num_rows()?;
        let mut arr = Array1::<f64>::zeros(nrows);

        if nrows == 0 {
            return Ok(arr);
        }

        let mut status = 0;

        try_cfitsio!(unsafe {
            fitsio_sys::ffgcvd(
                self.handle,
                colnum as c_int + 1,
                1, // first row
                1, // first element
                nrows as c_longlong,
                f64::NAN, // value to use for nulls
                arr.as_mut_ptr(),
                std::ptr::null_mut(),
                &mut status,
            )
        });

        Ok(arr)
    }

    /// Read a double-valued header keyword of the current HDU, if present.
    pub fn get_f64_header(&mut self, key: &str) -> Result<Option<f64>> {
        let key = c_str(key)?;
        let mut value: f64 = 0.;
        let mut status = 0;

        unsafe {
            fitsio_sys::ffgky(
                self.handle,
                cfitsio::TDOUBLE,
                key.as_ptr(),
                &mut value as *mut f64 as *mut c_void,
                std::ptr::null_mut(),
                &mut status,
            );
        }

        match status {
            0 => Ok(Some(value)),
            cfitsio::KEY_NO_EXIST => {
                self.clear_errors();
                Ok(None)
            }
            s => Err(fits_error(s)),
        }
    }

    /// Set a string-valued header keyword in the current HDU.
    pub fn set_string_header<S1: AsRef<str>, S2: AsRef<str>>(
        &mut self,
        key: S1,
        value: S2,
    ) -> Result<()> {
        let key = c_str(key.as_ref())?;
        let value = c_str(value.as_ref())?;
        let mut status = 0;

        try_cfitsio!(unsafe {
            fitsio_sys::ffuky(
                self.handle,
                cfitsio::TSTRING,
                key.as_ptr(),
                value.as_ptr() as *mut c_void,
                std::ptr::null(),
                &mut status,
            )
        });

        Ok(())
    }

    /// Set a f64-valued header keyword in the current HDU.
    pub fn set_f64_header<S: AsRef<str>>(&mut self, key: S, value: f64) -> Result<()> {
        let key = c_str(key.as_ref())?;
        let mut value = value;
        let mut status = 0;

        try_cfitsio!(unsafe {
            fitsio_sys::ffuky(
                self.handle,
                cfitsio::TDOUBLE,
                key.as_ptr(),
                &mut value as *mut f64 as *mut c_void,
                std::ptr::null(),
                &mut status,
            )
        });

        Ok(())
    }

    /// Set an integer-valued header keyword in the current HDU.
    pub fn set_i64_header<S: AsRef<str>>(&mut self, key: S, value: i64) -> Result<()> {
        self.set_int_keyword(key, cfitsio::TINT, value as c_int)
    }

    /// Set a logical header keyword in the current HDU.
    pub fn set_bool_header<S: AsRef<str>>(&mut self, key: S, value: bool) -> Result<()> {
        self.set_int_keyword(key, cfitsio::TLOGICAL, value as c_int)
    }

    fn set_int_keyword<S: AsRef<str>>(&mut self, key: S, datatype: c_int, value: c_int) -> Result<()> {
        let key = c_str(key.as_ref())?;
        let mut value = value;
        let mut status = 0;

        try_cfitsio!(unsafe {
            fitsio_sys::ffuky(
                self.handle,
                datatype,
                key.as_ptr(),
                &mut value as *mut c_int as *mut c_void,
                std::ptr::null(),
                &mut status,
            )
        });

        Ok(())
    }

    /// Create a 2-D 32-bit integer image HDU sized to `data` and write it.
    /// `data` is indexed `(y, x)`, C order, which is what FITS wants on disk.
    pub fn write_i32_image(&mut self, data: &Array2<i32>) -> Result<()> {
        let (height, width) = data.dim();
        let mut naxes = [width as c_long, height as c_long];
        let mut status = 0;

        try_cfitsio!(unsafe {
            fitsio_sys::ffcrim(
                self.handle,
                cfitsio::LONG_IMG,
                2,
                naxes.as_mut_ptr(),
                &mut status,
            )
        });

        if data.is_empty() {
            return Ok(());
        }

        let mut buf: Vec<i32> = data.iter().copied().collect();
        let mut firstpix = [1 as c_longlong, 1]; // 1-based pixel indexing

        try_cfitsio!(unsafe {
            fitsio_sys::ffppxll(
                self.handle,
                cfitsio::TINT,
                firstpix.as_mut_ptr(),
                buf.len() as c_longlong,
                buf.as_mut_ptr() as *mut c_void,
                &mut status,
            )
        });

        Ok(())
    }

    /// Read the 2-D 32-bit integer image in the current HDU, indexed `(y, x)`.
    pub fn read_i32_image(&mut self) -> Result<Array2<i32>> {
        let mut naxis: c_int = 0;
        let mut status = 0;

        try_cfitsio!(unsafe { fitsio_sys::ffgidm(self.handle, &mut naxis, &mut status) });

        if naxis != 2 {
            return Err(Error::format(format!("expected a 2-D image, got {naxis} axes")));
        }

        let mut naxes = [0 as c_longlong; 2];

        try_cfitsio!(unsafe {
            fitsio_sys::ffgiszll(self.handle, 2, naxes.as_mut_ptr(), &mut status)
        });

        let (width, height) = (naxes[0] as usize, naxes[1] as usize);
        let mut arr = Array2::<i32>::zeros((height, width));

        if arr.is_empty() {
            return Ok(arr);
        }

        let mut firstpix = [1 as c_longlong, 1];

        try_cfitsio!(unsafe {
            fitsio_sys::ffgpxvll(
                self.handle,
                cfitsio::TINT,
                firstpix.as_mut_ptr(),
                arr.len() as c_longlong,
                std::ptr::null_mut(),
                arr.as_mut_ptr() as *mut c_void,
                std::ptr::null_mut(),
                &mut status,
            )
        });

        Ok(arr)
    }

    /// Flush and close the file, reporting any error that doing so turns up.
    /// Dropping a `FitsFile` also closes it, but swallows errors.
    pub fn close(mut self) -> Result<()> {
        let mut status = 0;
        let handle = std::mem::replace(&mut self.handle, std::ptr::null_mut());

        try_cfitsio!(unsafe { fitsio_sys::ffclos(handle, &mut status) });

        Ok(())
    }

    fn clear_errors(&mut self) {
        unsafe { fitsio_sys::ffcmsg() };
    }
}

impl Drop for FitsFile {
    fn drop(&mut self) {
        let mut status = 0;

        if !self.handle.is_null() {
            unsafe {
                fitsio_sys::ffclos(self.handle, &mut status);
            }
            self.handle = std::ptr::null_mut();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.fits");

        let mut f = FitsFile::create(&path).unwrap();
        f.create_f64_table(
            "STARS",
            &[ColumnSpec::new("px", "(kpc)"), ColumnSpec::new("vy", "(km/s)")],
            3,
        )
        .unwrap();
        f.write_f64_column(0, &[1., 2., 3.]).unwrap();
        f.write_f64_column(1, &[-4., 5.5, 6.]).unwrap();
        f.set_f64_header("CENTER1", 8.0).unwrap();
        f.close().unwrap();

        let mut f = FitsFile::open(&path).unwrap();
        f.move_to_hdu(1).unwrap();
        assert_eq!(f.num_rows().unwrap(), 3);
        assert_eq!(f.column_number("VY").unwrap(), Some(1));
        assert_eq!(f.column_number("nope").unwrap(), None);
        assert_eq!(f.read_f64_column(1).unwrap(), array![-4., 5.5, 6.]);
        assert_eq!(f.get_f64_header("CENTER1").unwrap(), Some(8.0));
        assert_eq!(f.get_f64_header("CENTER9").unwrap(), None);
    }

    #[test]
    fn image_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i.fits");
        let img = array![[1, 2, 3], [4, 5, 6]];

        let mut f = FitsFile::create(&path).unwrap();
        f.write_i32_image(&img).unwrap();
        f.set_i64_header("NSTARS", 21).unwrap();
        f.close().unwrap();

        let mut f = FitsFile::open(&path).unwrap();
        assert_eq!(f.read_i32_image().unwrap(), img);
        assert_eq!(f.get_f64_header("NSTARS").unwrap(), Some(21.));
    }

    #[test]
    fn create_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("o.fits");
        std::fs::write(&path, b"not a fits file").unwrap();

        let mut f = FitsFile::create(&path).unwrap();
        f.write_i32_image(&array![[7]]).unwrap();
        f.close().unwrap();

        let mut f = FitsFile::open(&path).unwrap();
        assert_eq!(f.read_i32_image().unwrap(), array![[7]]);
    }
}
