//! Binary catalogs in the simulator's record format.
//!
//! The UB Gaia error code is Fortran, and it exchanges catalogs as
//! *sequential unformatted* files. Every record on disk looks like:
//!
//! ```text
//! [u32 byte count][payload ...][u32 byte count]
//! ```
//!
//! with both markers and the payload in little-endian order. A catalog is one
//! record holding the star count as a 4-byte integer, followed by that many
//! records of `f64` values, one per star. The simulator's own output can also
//! come split in two files: a one-record count file and a data file holding
//! only the star records.
//!
//! We are strict about all of this. A catalog whose declared count disagrees
//! with what's on disk is useless (every column has to stay index-aligned),
//! so any mismatch is a [`Error::Format`].

use ndarray::{Array2, ArrayView2};
use std::{
    fs::File,
    io::{self, prelude::*, BufReader, BufWriter},
    path::{Path, PathBuf},
};
use tempfile::{Builder, NamedTempFile};
use tracing::debug;

use crate::{
    errors::{Error, Result},
    schema::Schema,
};

const MARKER_BYTES: usize = 4;

/// Size of the count record on disk.
const COUNT_RECORD_BYTES: u64 = 4 + 2 * MARKER_BYTES as u64;

/// Most star records we preallocate for, whatever count the file declares.
const PREALLOC_RECORDS: usize = 1 << 16;

/// Writes Fortran sequential-unformatted records.
pub struct RecordWriter<W: Write> {
    inner: W,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        RecordWriter { inner }
    }

    pub fn write_record(&mut self, payload: &[u8]) -> Result<()> {
        let n = u32::try_from(payload.len())
            .map_err(|_| Error::format(format!("record of {} bytes is too long", payload.len())))?;
        let marker = n.to_le_bytes();
        self.inner.write_all(&marker)?;
        self.inner.write_all(payload)?;
        self.inner.write_all(&marker)?;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_record(&value.to_le_bytes())
    }

    pub fn write_f64s<'a, I: IntoIterator<Item = &'a f64>>(&mut self, values: I) -> Result<()> {
        let mut buf = Vec::new();

        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }

        self.write_record(&buf)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads Fortran sequential-unformatted records.
pub struct RecordReader<R: Read> {
    inner: R,
    n_read: usize,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        RecordReader { inner, n_read: 0 }
    }

    /// Read the next record, which must be exactly `expected` bytes long.
    /// Returns `None` on a clean end of file.
    pub fn read_record(&mut self, expected: usize) -> Result<Option<Vec<u8>>> {
        let mut head = [0u8; MARKER_BYTES];

        match read_fully(&mut self.inner, &mut head)? {
            0 => return Ok(None),
            MARKER_BYTES => {}
            n => {
                return Err(Error::format(format!(
                    "record #{} truncated: only {} bytes of its length marker present",
                    self.n_read, n
                )))
            }
        }

        let len = u32::from_le_bytes(head) as usize;

        if len != expected {
            return Err(Error::format(format!(
                "record #{} holds {} bytes; expected {}",
                self.n_read, len, expected
            )));
        }

        let mut payload = vec![0; len];
        let mut tail = [0u8; MARKER_BYTES];

        if read_fully(&mut self.inner, &mut payload)? != len
            || read_fully(&mut self.inner, &mut tail)? != MARKER_BYTES
        {
            return Err(Error::format(format!("record #{} truncated", self.n_read)));
        }

        if tail != head {
            return Err(Error::format(format!(
                "record #{} has mismatched length markers ({} vs {})",
                self.n_read,
                len,
                u32::from_le_bytes(tail)
            )));
        }

        self.n_read += 1;
        Ok(Some(payload))
    }

    /// Read a record holding a single 4-byte integer.
    pub fn read_i32(&mut self) -> Result<Option<i32>> {
        Ok(self.read_record(4)?.map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
    }

    /// Read a record of exactly `nfields` doubles, appending them to `dest`.
    pub fn read_f64s_into(&mut self, nfields: usize, dest: &mut Vec<f64>) -> Result<bool> {
        let payload = match self.read_record(nfields * std::mem::size_of::<f64>())? {
            Some(p) => p,
            None => return Ok(false),
        };

        dest.extend(payload.chunks_exact(8).map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_le_bytes(b)
        }));

        Ok(true)
    }
}

/// Like `read_exact`, but reports how many bytes were obtained instead of
/// failing on EOF. We need this to tell a clean end-of-file from a truncated
/// record.
fn read_fully<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;

    while n < buf.len() {
        match src.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(n)
}

/// A file written in full under a temporary name next to its destination,
/// waiting to be renamed into place. Dropping it removes the temporary.
struct Staged {
    tmp: NamedTempFile,
    path: PathBuf,
}

impl Staged {
    fn write<P, F>(path: P, body: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut BufWriter<&mut File>) -> Result<()>,
    {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut builder = Builder::new();

        // Same mode as `File::create`: 0666 less the umask. The default for
        // temporary files is 0600, which the rename would keep.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o666));
        }

        let mut tmp = builder.tempfile_in(dir)?;

        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            body(&mut w)?;
            w.flush()?;
        }

        tmp.as_file().sync_all()?;

        Ok(Staged {
            tmp,
            path: path.to_owned(),
        })
    }

    fn commit(self) -> Result<()> {
        self.tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Write `path` through a temporary file in the same directory, so that a
/// failure part-way through never leaves a half-written catalog behind.
pub(crate) fn write_atomically<P, F>(path: P, body: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<()>,
{
    Staged::write(path, body)?.commit()
}

fn check_width(schema: &Schema, rows: &ArrayView2<f64>) -> Result<()> {
    if rows.ncols() != schema.len() {
        return Err(Error::format(format!(
            "{} records need {} fields, got {}",
            schema.name,
            schema.len(),
            rows.ncols()
        )));
    }

    Ok(())
}

fn star_count(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| Error::format(format!("{n} stars do not fit in the count record")))
}

fn write_rows<W: Write>(w: &mut RecordWriter<W>, rows: &ArrayView2<f64>) -> Result<()> {
    for row in rows.rows() {
        w.write_f64s(row.iter())?;
    }

    Ok(())
}

/// Write a catalog: the count record followed by one record per row.
pub fn write_catalog<P: AsRef<Path>>(path: P, schema: &Schema, rows: ArrayView2<f64>) -> Result<()> {
    check_width(schema, &rows)?;
    let n = star_count(rows.nrows())?;

    write_atomically(&path, |f| {
        let mut w = RecordWriter::new(f);
        w.write_i32(n)?;
        write_rows(&mut w, &rows)
    })?;

    debug!(
        "wrote {} {} records to `{}`",
        n,
        schema.name,
        path.as_ref().display()
    );
    Ok(())
}

/// Write a catalog in the split layout: the count in one file, the star
/// records in another. Neither file is replaced unless both were written.
pub fn write_split_catalog<P1: AsRef<Path>, P2: AsRef<Path>>(
    count_path: P1,
    data_path: P2,
    schema: &Schema,
    rows: ArrayView2<f64>,
) -> Result<()> {
    check_width(schema, &rows)?;
    let n = star_count(rows.nrows())?;

    let data = Staged::write(data_path, |f| write_rows(&mut RecordWriter::new(f), &rows))?;
    let count = Staged::write(count_path, |f| RecordWriter::new(f).write_i32(n))?;
    data.commit()?;
    count.commit()
}

fn read_count_record<R: Read>(r: &mut RecordReader<R>) -> Result<usize> {
    let n = r
        .read_i32()?
        .ok_or_else(|| Error::format("catalog is empty: no star-count record"))?;

    usize::try_from(n).map_err(|_| Error::format(format!("negative star count {n}")))
}

/// Check that `available` bytes can hold `n` star records at all, before
/// reading any of them.
fn check_room(available: u64, schema: &Schema, n: usize) -> Result<()> {
    let per_record = (schema.len() * std::mem::size_of::<f64>() + 2 * MARKER_BYTES) as u64;

    match (n as u64).checked_mul(per_record) {
        Some(needed) if needed <= available => Ok(()),
        _ => Err(Error::format(format!(
            "declared {n} {} records but only {available} bytes hold them",
            schema.name
        ))),
    }
}

/// Read exactly `n` star records and insist that nothing follows them.
fn read_rows<R: Read>(r: &mut RecordReader<R>, schema: &Schema, n: usize) -> Result<Array2<f64>> {
    let nf = schema.len();
    let mut values = Vec::with_capacity(n.min(PREALLOC_RECORDS) * nf);

    for i in 0..n {
        if !r.read_f64s_into(nf, &mut values)? {
            return Err(Error::format(format!(
                "declared {n} {} records but the file ends after {i}",
                schema.name
            )));
        }
    }

    let mut probe = [0u8; 1];

    if read_fully(&mut r.inner, &mut probe)? != 0 {
        return Err(Error::format(format!(
            "declared {n} {} records but more data follows them",
            schema.name
        )));
    }

    Array2::from_shape_vec((n, nf), values).map_err(|e| Error::format(e.to_string()))
}

/// Read a catalog with a leading count record.
pub fn read_catalog<P: AsRef<Path>>(path: P, schema: &Schema) -> Result<Array2<f64>> {
    let file = File::open(path.as_ref())?;
    let size = file.metadata()?.len();
    let mut r = RecordReader::new(BufReader::new(file));
    let n = read_count_record(&mut r)?;
    check_room(size.saturating_sub(COUNT_RECORD_BYTES), schema, n)?;
    let rows = read_rows(&mut r, schema, n)?;
    debug!(
        "read {} {} records from `{}`",
        n,
        schema.name,
        path.as_ref().display()
    );
    Ok(rows)
}

/// Read the star count from a one-record count file.
pub fn read_count<P: AsRef<Path>>(path: P) -> Result<usize> {
    let mut r = RecordReader::new(BufReader::new(File::open(path.as_ref())?));
    let n = read_count_record(&mut r)?;

    if r.read_record(4)?.is_some() {
        return Err(Error::format(format!(
            "count file `{}` holds more than one record",
            path.as_ref().display()
        )));
    }

    Ok(n)
}

/// Read a catalog in the split layout.
pub fn read_split_catalog<P1: AsRef<Path>, P2: AsRef<Path>>(
    count_path: P1,
    data_path: P2,
    schema: &Schema,
) -> Result<Array2<f64>> {
    let n = read_count(count_path)?;
    let file = File::open(data_path.as_ref())?;
    check_room(file.metadata()?.len(), schema, n)?;
    let mut r = RecordReader::new(BufReader::new(file));
    read_rows(&mut r, schema, n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EXPORT_BINARY, GAIA_ERRORS};
    use ndarray::Array2;

    fn sample(n: usize, nf: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, nf), |(i, j)| {
            (i as f64 + 1.0) * 1.0e3 + j as f64 / 7.0 - 0.1234567890123
        })
    }

    #[test]
    fn record_framing_bytes() {
        let mut w = RecordWriter::new(Vec::new());
        w.write_i32(3).unwrap();
        w.write_f64s(&[1.5]).unwrap();
        let bytes = w.into_inner();

        assert_eq!(&bytes[0..4], &4u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &3i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &4u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &8u32.to_le_bytes());
        assert_eq!(&bytes[16..24], &1.5f64.to_le_bytes());
        assert_eq!(&bytes[24..28], &8u32.to_le_bytes());
        assert_eq!(bytes.len(), 28);
    }

    #[test]
    fn catalog_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ubgaiaein.bin");
        let rows = sample(7, EXPORT_BINARY.len());

        write_catalog(&path, &EXPORT_BINARY, rows.view()).unwrap();
        let back = read_catalog(&path, &EXPORT_BINARY).unwrap();

        assert_eq!(back.dim(), (7, 12));
        assert_eq!(back, rows);

        // 1 count record + 7 star records, each framed by two markers
        let size = std::fs::metadata(&path).unwrap().len();
        assert_eq!(size, (4 + 8) + 7 * (96 + 8));
    }

    #[test]
    fn split_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let count = dir.path().join("gaiaei-out.bin");
        let data = dir.path().join("gaiaed-out.bin");
        let rows = sample(4, GAIA_ERRORS.len());

        write_split_catalog(&count, &data, &GAIA_ERRORS, rows.view()).unwrap();
        assert_eq!(read_count(&count).unwrap(), 4);
        assert_eq!(read_split_catalog(&count, &data, &GAIA_ERRORS).unwrap(), rows);
    }

    #[test]
    fn empty_catalog_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let rows = Array2::<f64>::zeros((0, 12));

        write_catalog(&path, &EXPORT_BINARY, rows.view()).unwrap();
        assert_eq!(read_catalog(&path, &EXPORT_BINARY).unwrap().nrows(), 0);
    }

    #[test]
    fn short_catalog_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        let rows = sample(4, 12);

        {
            let mut f = File::create(&path).unwrap();
            let mut w = RecordWriter::new(&mut f);
            w.write_i32(5).unwrap();
            for row in rows.rows() {
                w.write_f64s(row.iter()).unwrap();
            }
        }

        let err = read_catalog(&path, &EXPORT_BINARY).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");
    }

    #[test]
    fn extra_records_are_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.bin");
        let rows = sample(3, 12);

        {
            let mut f = File::create(&path).unwrap();
            let mut w = RecordWriter::new(&mut f);
            w.write_i32(2).unwrap();
            for row in rows.rows() {
                w.write_f64s(row.iter()).unwrap();
            }
        }

        let err = read_catalog(&path, &EXPORT_BINARY).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");
    }

    #[test]
    fn wrong_arity_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arity.bin");

        write_catalog(&path, &EXPORT_BINARY, sample(2, 12).view()).unwrap();
        let err = read_catalog(&path, &GAIA_ERRORS).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");

        let err = write_catalog(&path, &GAIA_ERRORS, sample(2, 12).view()).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");
    }

    #[test]
    fn truncated_record_is_format_error() {
        let mut w = RecordWriter::new(Vec::new());
        w.write_i32(1).unwrap();
        w.write_f64s(sample(1, 12).row(0).iter()).unwrap();
        let mut bytes = w.into_inner();
        bytes.truncate(bytes.len() - 10);

        let mut r = RecordReader::new(&bytes[..]);
        assert_eq!(read_count_record(&mut r).unwrap(), 1);
        let err = read_rows(&mut r, &EXPORT_BINARY, 1).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");
    }

    #[test]
    fn mismatched_markers_are_format_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());

        let mut r = RecordReader::new(&bytes[..]);
        assert!(matches!(r.read_i32(), Err(Error::Format(_))));
    }

    #[test]
    fn negative_count_is_format_error() {
        let mut w = RecordWriter::new(Vec::new());
        w.write_i32(-2).unwrap();
        let bytes = w.into_inner();

        let mut r = RecordReader::new(&bytes[..]);
        assert!(matches!(read_count_record(&mut r), Err(Error::Format(_))));
    }

    #[test]
    fn huge_declared_count_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.bin");
        let count = dir.path().join("gaiaei-out.bin");
        let data = dir.path().join("gaiaed-out.bin");
        let rec = sample(1, GAIA_ERRORS.len());

        let mut w = RecordWriter::new(Vec::new());
        w.write_i32(i32::MAX).unwrap();
        w.write_f64s(rec.row(0).iter()).unwrap();
        std::fs::write(&path, w.into_inner()).unwrap();

        let err = read_catalog(&path, &GAIA_ERRORS).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");

        let mut w = RecordWriter::new(Vec::new());
        w.write_i32(i32::MAX).unwrap();
        std::fs::write(&count, w.into_inner()).unwrap();

        let mut w = RecordWriter::new(Vec::new());
        w.write_f64s(rec.row(0).iter()).unwrap();
        std::fs::write(&data, w.into_inner()).unwrap();

        let err = read_split_catalog(&count, &data, &GAIA_ERRORS).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");
    }

    #[test]
    fn room_check_is_exact() {
        let per = (12 * 8 + 8) as u64;
        assert!(check_room(3 * per, &EXPORT_BINARY, 3).is_ok());
        assert!(check_room(3 * per - 1, &EXPORT_BINARY, 3).is_err());
        assert!(check_room(0, &EXPORT_BINARY, 0).is_ok());
        assert!(check_room(u64::MAX, &EXPORT_BINARY, usize::MAX).is_err());
    }

    #[test]
    fn failed_split_write_replaces_neither_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("gaiaed-out.bin");
        let count = dir.path().join("missing").join("gaiaei-out.bin");

        let err = write_split_catalog(&count, &data, &GAIA_ERRORS, sample(2, GAIA_ERRORS.len()).view());
        assert!(err.is_err());
        assert!(!data.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn catalogs_get_ordinary_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ubgaiaein.bin");
        let plain = dir.path().join("plain");
        std::fs::write(&plain, b"x").unwrap();
        write_catalog(&path, &EXPORT_BINARY, sample(1, 12).view()).unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&path), mode(&plain));
    }

    #[test]
    fn failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.bin");

        let result = write_atomically(&path, |w| {
            w.write_all(b"partial")?;
            Err(Error::format("simulated failure"))
        });

        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
