//! The simulator's output catalog and the kinematics derived from it.

use ndarray::{Array2, ArrayView1, ArrayView2};
use std::path::Path;
use tracing::{info, warn};

use crate::{
    astrometry::{
        distance_error, distance_from_parallax, spherical_to_cartesian, tangential_velocity,
        tangential_velocity_error, velocity_to_cartesian, PMV_CONST,
    },
    errors::{Error, Result},
    fortran,
    schema::{gaia, GAIA_ERRORS},
    selection::Table,
};

/// 45-field records as written by the UB Gaia error code.
#[derive(Clone, Debug)]
pub struct GaiaCatalog {
    rows: Array2<f64>,
}

impl GaiaCatalog {
    pub fn from_rows(rows: Array2<f64>) -> Result<Self> {
        if rows.ncols() != GAIA_ERRORS.len() {
            return Err(Error::format(format!(
                "{} records need {} fields, got {}",
                GAIA_ERRORS.name,
                GAIA_ERRORS.len(),
                rows.ncols()
            )));
        }

        Ok(GaiaCatalog { rows })
    }

    /// Read a catalog. With `count_input`, `input` holds only the star
    /// records and the count comes from the separate file.
    pub fn read<P: AsRef<Path>>(input: P, count_input: Option<P>) -> Result<Self> {
        let rows = match count_input {
            Some(c) => fortran::read_split_catalog(c, &input, &GAIA_ERRORS)?,
            None => fortran::read_catalog(&input, &GAIA_ERRORS)?,
        };

        info!(
            "input number of stars = {} (`{}`)",
            rows.nrows(),
            input.as_ref().display()
        );
        Ok(GaiaCatalog { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.nrows() == 0
    }

    pub fn rows(&self) -> ArrayView2<f64> {
        self.rows.view()
    }

    pub fn field(&self, index: usize) -> ArrayView1<f64> {
        self.rows.column(index)
    }
}

/// Column names of the derived-kinematics table.
pub mod kin {
    /// Index of the source record in the catalog.
    pub const ROW: &str = "row";
    pub const DIST: &str = "dist";
    pub const X: &str = "x";
    pub const Y: &str = "y";
    pub const Z: &str = "z";
    pub const VX: &str = "vx";
    pub const VY: &str = "vy";
    pub const VZ: &str = "vz";
    pub const VALPHA: &str = "valpha";
    pub const VDELTA: &str = "vdelta";
    pub const VRAD: &str = "vrad";
    pub const DIST_ERR: &str = "dist_err";
    pub const VALPHA_ERR: &str = "valpha_err";
    pub const VDELTA_ERR: &str = "vdelta_err";
    /// δ tangential-velocity error including the parallax term
    pub const VP_ERR: &str = "vp_err";
    pub const VRAD_ERR: &str = "vrad_err";

    pub const ALL: &[&str] = &[
        ROW, DIST, X, Y, Z, VX, VY, VZ, VALPHA, VDELTA, VRAD, DIST_ERR, VALPHA_ERR, VDELTA_ERR,
        VP_ERR, VRAD_ERR,
    ];
}

#[derive(Clone, Debug)]
pub struct Kinematics {
    /// One row per usable record, columns as in [`kin::ALL`].
    pub table: Table,

    /// Records dropped because their true parallax was not positive.
    pub rejected: usize,
}

/// Heliocentric equatorial position (kpc) and velocity (km/s) of every star,
/// with the propagated 1σ errors, from the true astrometry and its errors.
///
/// Records whose true parallax is zero, negative or NaN have no distance.
/// They are left out and counted.
pub fn derive_kinematics(cat: &GaiaCatalog) -> Result<Kinematics> {
    let ncols = kin::ALL.len();
    let mut values = Vec::with_capacity(cat.len() * ncols);
    let mut rejected = 0;

    for (i, r) in cat.rows().rows().into_iter().enumerate() {
        let (alpha, delta) = (r[gaia::RA_TRUE], r[gaia::DEC_TRUE]);
        let (plx, mua, mud, vrad) = (
            r[gaia::PLX_TRUE],
            r[gaia::PMRA_TRUE],
            r[gaia::PMDEC_TRUE],
            r[gaia::HRV_TRUE],
        );
        let (e_plx, e_mua, e_mud, e_vrad) = (
            r[gaia::E_PLX],
            r[gaia::E_PMRA],
            r[gaia::E_PMDEC],
            r[gaia::E_HRV],
        );

        let dist = match distance_from_parallax(plx) {
            Ok(d) => d,
            Err(e) => {
                if rejected == 0 {
                    warn!("dropping record #{}: {}", i, e);
                }
                rejected += 1;
                continue;
            }
        };

        let p = spherical_to_cartesian(alpha, delta, dist);
        let valpha = tangential_velocity(mua, plx);
        let vdelta = tangential_velocity(mud, plx);
        let v = velocity_to_cartesian(alpha, delta, vrad, valpha, vdelta);

        values.extend_from_slice(&[
            i as f64,
            dist,
            p[0],
            p[1],
            p[2],
            v[0],
            v[1],
            v[2],
            valpha,
            vdelta,
            vrad,
            distance_error(plx, e_plx),
            (PMV_CONST * e_mua / plx).abs(),
            (PMV_CONST * e_mud / plx).abs(),
            tangential_velocity_error(mud, plx, e_mud, e_plx),
            e_vrad,
        ]);
    }

    if rejected > 0 {
        warn!(
            "{} of {} records have non-positive parallax and were dropped",
            rejected,
            cat.len()
        );
    }

    let nrows = values.len() / ncols;
    let data =
        Array2::from_shape_vec((nrows, ncols), values).map_err(|e| Error::format(e.to_string()))?;
    let names = kin::ALL.iter().map(|s| (*s).to_owned()).collect();

    Ok(Kinematics {
        table: Table::new(names, data)?,
        rejected,
    })
}
