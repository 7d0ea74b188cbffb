//! Convert the simulator's binary output to a FITS table.
//!
//! Every documented field becomes a named, unit-tagged column, with angles
//! converted from radians to degrees. Optionally, Galactic positions and
//! proper motions are re-derived for the true and the observed astrometry.

use anyhow::Result;
use ndarray::Array1;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{
    astrometry::{equatorial_to_galactic_motion, D2R},
    fitsfile::{ColumnSpec, FitsFile},
    gaiae::GaiaCatalog,
    schema::{gaia, FieldKind, GAIA_ERRORS},
};

#[derive(Clone, Debug, Deserialize)]
pub struct Request {
    pub input: PathBuf,

    #[serde(default)]
    pub count_input: Option<PathBuf>,

    pub output: PathBuf,

    #[serde(default)]
    pub galactic: bool,
}

pub const TABLE_EXTNAME: &str = "GAIA_ERRORS";

/// The astrometry that gets Galactic counterparts: column suffix and the
/// indices of RA, Dec, pmRA, pmDec.
const GALACTIC_SETS: &[(&str, [usize; 4])] = &[
    (
        "true",
        [gaia::RA_TRUE, gaia::DEC_TRUE, gaia::PMRA_TRUE, gaia::PMDEC_TRUE],
    ),
    (
        "obs",
        [gaia::RA_OBS, gaia::DEC_OBS, gaia::PMRA_OBS, gaia::PMDEC_OBS],
    ),
];

struct Column {
    spec: ColumnSpec,
    values: Array1<f64>,
}

/// The tabulated columns of the catalog: everything but the reserved slots,
/// angles in degrees.
fn catalog_columns(cat: &GaiaCatalog) -> Vec<Column> {
    GAIA_ERRORS
        .fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.kind != FieldKind::Reserved)
        .map(|(i, f)| {
            let raw = cat.field(i);
            let values = match f.kind {
                FieldKind::Angle => raw.mapv(|x| x / D2R),
                _ => raw.to_owned(),
            };

            Column {
                spec: ColumnSpec::new(f.name, f.unit),
                values,
            }
        })
        .collect()
}

/// Galactic l, b, μ_l*, μ_b for one set of equatorial astrometry. Records
/// without a usable direction get NaNs; their number is returned too.
fn galactic_columns(cat: &GaiaCatalog, suffix: &str, idx: [usize; 4]) -> (Vec<Column>, usize) {
    let n = cat.len();
    let mut l = Array1::from_elem(n, f64::NAN);
    let mut b = Array1::from_elem(n, f64::NAN);
    let mut pml = Array1::from_elem(n, f64::NAN);
    let mut pmb = Array1::from_elem(n, f64::NAN);
    let mut nbad = 0;

    for (i, r) in cat.rows().rows().into_iter().enumerate() {
        match equatorial_to_galactic_motion(
            r[idx[0]] / D2R,
            r[idx[1]] / D2R,
            r[idx[2]],
            r[idx[3]],
        ) {
            Ok(g) => {
                l[i] = g.l_deg;
                b[i] = g.b_deg;
                pml[i] = g.pm_l;
                pmb[i] = g.pm_b;
            }
            Err(_) => nbad += 1,
        }
    }

    let col = |name: &str, unit: &str, values: Array1<f64>| Column {
        spec: ColumnSpec::new(format!("{name}_{suffix}"), unit),
        values,
    };

    (
        vec![
            col("GLON", "(degree)", l),
            col("GLAT", "(degree)", b),
            col("pmGLON", "(mas/yr)", pml),
            col("pmGLAT", "(mas/yr)", pmb),
        ],
        nbad,
    )
}

fn write_columns<P: AsRef<Path>>(path: P, columns: &[Column], nrows: usize) -> Result<()> {
    let specs: Vec<ColumnSpec> = columns.iter().map(|c| c.spec.clone()).collect();

    let mut fits = FitsFile::create(path.as_ref())?;
    fits.create_f64_table(TABLE_EXTNAME, &specs, nrows)?;

    for (i, c) in columns.iter().enumerate() {
        fits.write_f64_column(i, &c.values.to_vec())?;
    }

    fits.close()?;
    Ok(())
}

/// Write the table for an in-memory catalog.
pub fn write_catalog_table<P: AsRef<Path>>(cat: &GaiaCatalog, path: P, galactic: bool) -> Result<Value> {
    let mut columns = catalog_columns(cat);
    let mut n_no_direction = 0;

    if galactic {
        for (suffix, idx) in GALACTIC_SETS {
            let (cols, nbad) = galactic_columns(cat, suffix, *idx);
            columns.extend(cols);
            n_no_direction += nbad;
        }

        if n_no_direction > 0 {
            warn!(
                "{} Galactic coordinate sets could not be derived and are NaN",
                n_no_direction
            );
        }
    }

    write_columns(&path, &columns, cat.len())?;
    info!(
        "wrote {} stars, {} columns to `{}`",
        cat.len(),
        columns.len(),
        path.as_ref().display()
    );

    Ok(json!({
        "command": "tofits",
        "n_stars": cat.len(),
        "n_columns": columns.len(),
        "n_no_direction": n_no_direction,
        "output": path.as_ref(),
    }))
}

pub fn handle_tofits(request: &Request) -> Result<Value> {
    let cat = GaiaCatalog::read(&request.input, request.count_input.as_ref())?;
    write_catalog_table(&cat, &request.output, request.galactic)
}
