//! 2-D density maps: counts of points on a regular grid, saved as FITS
//! images.

use ndarray::{Array2, ArrayView1};
use std::path::Path;

use crate::{
    errors::{Error, Result},
    fitsfile::FitsFile,
};

/// The binning of one map axis. Cell `i` covers
/// `[min + i * step, min + (i + 1) * step)`, except that the last cell also
/// takes `max`. For a logarithmic axis, these are log10 values.
#[derive(Clone, Debug, PartialEq)]
pub struct GridAxis {
    pub label: String,
    pub min: f64,
    pub step: f64,
    pub n: usize,
    pub log: bool,
}

impl GridAxis {
    /// An axis spanning the finite values of `values`.
    fn spanning<S: Into<String>>(label: S, values: &[f64], n: usize, log: bool) -> Self {
        let (lo, hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });

        let span = if hi > lo { hi - lo } else { 1. };

        GridAxis {
            label: label.into(),
            min: if lo.is_finite() { lo } else { 0. },
            step: span / n as f64,
            n,
            log,
        }
    }

    fn cell(&self, v: f64) -> usize {
        let i = ((v - self.min) / self.step).floor();

        if i <= 0. {
            0
        } else {
            (i as usize).min(self.n - 1)
        }
    }

    /// Value at the center of the first cell.
    pub fn first_center(&self) -> f64 {
        self.min + 0.5 * self.step
    }
}

#[derive(Clone, Debug)]
pub struct DensityMap {
    /// Counts indexed `(y, x)`.
    pub counts: Array2<i32>,
    pub x: GridAxis,
    pub y: GridAxis,

    /// Points that landed on the map.
    pub n_points: usize,

    /// Points left out because a coordinate was not finite (or, on a log
    /// axis, not positive).
    pub n_skipped: usize,
}

impl DensityMap {
    /// Bin paired coordinates on an `nx` by `ny` grid that just covers them.
    pub fn build<S1: Into<String>, S2: Into<String>>(
        x: (S1, ArrayView1<f64>),
        y: (S2, ArrayView1<f64>),
        nx: usize,
        ny: usize,
        log_y: bool,
    ) -> Result<Self> {
        if nx == 0 || ny == 0 {
            return Err(Error::Config(format!("map size {nx}x{ny} is empty")));
        }

        if x.1.len() != y.1.len() {
            return Err(Error::format(format!(
                "{} x values but {} y values",
                x.1.len(),
                y.1.len()
            )));
        }

        let mut xs = Vec::with_capacity(x.1.len());
        let mut ys = Vec::with_capacity(y.1.len());

        for (xv, yv) in x.1.iter().zip(y.1.iter()) {
            let yv = if log_y { yv.log10() } else { *yv };

            if xv.is_finite() && yv.is_finite() {
                xs.push(*xv);
                ys.push(yv);
            }
        }

        let n_skipped = x.1.len() - xs.len();

        if xs.is_empty() {
            return Err(Error::SelectionEmpty(
                "no finite points to put on the map".to_owned(),
            ));
        }

        let xa = GridAxis::spanning(x.0, &xs, nx, false);
        let ya = GridAxis::spanning(y.0, &ys, ny, log_y);
        let mut counts = Array2::<i32>::zeros((ny, nx));

        for (xv, yv) in xs.iter().zip(&ys) {
            counts[[ya.cell(*yv), xa.cell(*xv)]] += 1;
        }

        Ok(DensityMap {
            counts,
            x: xa,
            y: ya,
            n_points: xs.len(),
            n_skipped,
        })
    }

    pub fn max_count(&self) -> i32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    /// Write the map as the primary image of a new FITS file, with a linear
    /// world coordinate system describing the axes.
    pub fn write_fits<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut fits = FitsFile::create(path)?;
        fits.write_i32_image(&self.counts)?;

        for (i, axis) in [&self.x, &self.y].iter().enumerate() {
            let n = i + 1;
            let ctype = if axis.log {
                format!("log10({})", axis.label)
            } else {
                axis.label.clone()
            };

            fits.set_string_header(format!("CTYPE{n}"), ctype)?;
            fits.set_f64_header(format!("CRPIX{n}"), 1.)?;
            fits.set_f64_header(format!("CRVAL{n}"), axis.first_center())?;
            fits.set_f64_header(format!("CDELT{n}"), axis.step)?;
        }

        fits.set_string_header("BUNIT", "count")?;
        fits.set_bool_header("YLOG", self.y.log)?;
        fits.set_i64_header("NSTARS", self.n_points as i64)?;
        fits.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn counts_land_in_the_right_cells() {
        let x = array![0.0, 1.0, 2.0, 4.0, 4.0];
        let y = array![10.0, 10.0, 20.0, 30.0, 30.0];
        let m = DensityMap::build(("x", x.view()), ("y", y.view()), 4, 2, false).unwrap();

        assert_eq!(m.n_points, 5);
        assert_eq!(m.counts.dim(), (2, 4));
        assert_eq!(m.counts, array![[1, 1, 0, 0], [0, 0, 1, 2]]);
        assert_eq!(m.max_count(), 2);
        assert_eq!(m.counts.iter().sum::<i32>(), 5);
    }

    #[test]
    fn log_axis_skips_non_positive() {
        let x = array![1.0, 2.0, 3.0, 4.0];
        let y = array![0.01, 0.0, 10.0, f64::NAN];
        let m = DensityMap::build(("d", x.view()), ("e", y.view()), 2, 3, true).unwrap();

        assert_eq!(m.n_points, 2);
        assert_eq!(m.n_skipped, 2);
        assert_abs_diff_eq!(m.y.min, -2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.y.step, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_and_empty_inputs() {
        let one = array![5.0];
        let m = DensityMap::build(("x", one.view()), ("y", one.view()), 3, 3, false).unwrap();
        assert_eq!(m.counts[[0, 0]], 1);

        let none = ndarray::Array1::<f64>::zeros(0);
        assert!(matches!(
            DensityMap::build(("x", none.view()), ("y", none.view()), 3, 3, false),
            Err(Error::SelectionEmpty(_))
        ));
        assert!(matches!(
            DensityMap::build(("x", one.view()), ("y", one.view()), 0, 3, false),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn fits_image_has_axis_keywords() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.fits");
        let x = array![0.0, 1.0, 2.0];
        let y = array![1.0, 10.0, 100.0];
        let m = DensityMap::build(("dist", x.view()), ("dist_err", y.view()), 2, 2, true).unwrap();
        m.write_fits(&path).unwrap();

        let mut f = FitsFile::open(&path).unwrap();
        assert_eq!(f.read_i32_image().unwrap(), m.counts);
        assert_eq!(f.get_f64_header("NSTARS").unwrap(), Some(3.));
        assert_eq!(f.get_f64_header("CDELT1").unwrap(), Some(1.));
        assert_abs_diff_eq!(f.get_f64_header("CRVAL2").unwrap().unwrap(), 0.5, epsilon = 1e-12);
    }
}
