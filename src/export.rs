//! The exporter: Galaxia model → input catalogs for the UB Gaia error code.
//!
//! Stars brighter than the magnitude limit are moved from the Galactic to the
//! equatorial frame, their positions and velocities are re-expressed as (α,
//! δ, distance, μ_α*, μ_δ, v_rad), and the results are written as any
//! combination of the simulator's ASCII input, its binary input, and a FITS
//! table that also carries the remaining stellar parameters.

use anyhow::Result;
use flate2::{write::GzEncoder, Compression};
use ndarray::Array2;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::{
    astrometry::{cartesian_to_spherical, galactic_to_equatorial, proper_motion, Vec3},
    errors::Error,
    fitsfile::{ColumnSpec, FitsFile},
    fortran::{self, write_atomically},
    galaxia::{self, phot, GalaxiaModel},
    schema::{export as col, Schema, EXPORT_ASCII, EXPORT_BINARY},
    selection::Table,
    store::{ArrayStore, FitsTableStore},
};

#[derive(Clone, Debug, Deserialize)]
pub struct Request {
    /// FITS binary table holding the model arrays.
    pub input: PathBuf,

    #[serde(default = "default_vmag_limit")]
    pub vmag_limit: f64,

    #[serde(default)]
    pub ascii_output: Option<PathBuf>,

    #[serde(default)]
    pub binary_output: Option<PathBuf>,

    #[serde(default)]
    pub table_output: Option<PathBuf>,

    #[serde(default)]
    pub add_center_position: bool,

    #[serde(default = "default_true")]
    pub add_center_velocity: bool,
}

fn default_vmag_limit() -> f64 {
    20.0
}

fn default_true() -> bool {
    true
}

pub const TABLE_EXTNAME: &str = "GALAXIA_EQ";

/// Extra columns carried alongside the export layout, for the FITS table.
mod extra {
    pub const AGE: &str = "age";
    pub const ALFE: &str = "alfe";
    pub const MV: &str = "Mv";
    pub const SMASS: &str = "smass";
    pub const MBOL: &str = "Mbol";

    pub const ALL: &[&str] = &[AGE, ALFE, MV, SMASS, MBOL];
}

/// The FITS table layout: output column name, unit, and the name of the
/// source column in the transformed table.
const TABLE_COLUMNS: &[(&str, &str, &str)] = &[
    ("alpha", "(degree)", "alpha"),
    ("delta", "(degree)", "delta"),
    ("distance", "(pc)", "distance"),
    ("mualpha", "(mas/yr)", "mualpha"),
    ("mudelta", "(mas/yr)", "mudelta"),
    ("vrad", "(km/s)", "vrad"),
    ("age", "(Gyr)", extra::AGE),
    ("feh", "(dex)", "[Fe/H]"),
    ("alfe", "(dex)", extra::ALFE),
    ("Av", "(mag)", "Av"),
    ("VIcole", "(mag)", "V-I"),
    ("Mv", "(mag)", extra::MV),
    ("Vape", "(mag)", "V"),
    ("smass", "(Msun)", extra::SMASS),
    ("Teff", "(K)", "Teff"),
    ("logg", "(dex)", "logg"),
    ("Mbol", "(mag)", extra::MBOL),
];

/// The result of moving the selected stars to the equatorial frame.
#[derive(Clone, Debug)]
pub struct Transformed {
    /// The 15 export columns, named as in [`EXPORT_ASCII`], followed by the
    /// extra carried parameters.
    pub stars: Table,

    /// How many selected stars had no usable direction and were dropped.
    pub rejected: usize,
}

/// Move every star of the model to the equatorial frame.
///
/// A star whose position has no direction (it sits at the origin, or its
/// coordinates are not finite) is dropped and counted; the others are
/// unaffected.
pub fn transform(model: &GalaxiaModel, add_position: bool, add_velocity: bool) -> Result<Transformed> {
    let t = model.stars();
    let center = model.center();
    let c = |name: &str| t.column(name);

    let (px, py, pz) = (c("px")?, c("py")?, c("pz")?);
    let (vx, vy, vz) = (c("vx")?, c("vy")?, c("vz")?);
    let (glon, glat) = (c("glon")?, c("glat")?);
    let (teff, logg, feh) = (c("Teff")?, c("Grav")?, c("FeH")?);
    let (av, color, vmag) = (c(phot::AV)?, c(phot::V_I)?, c(phot::V_APP)?);
    let (age, alfe, mv, smass, lum) = (c("Age")?, c("Alpha")?, c("ubv_v")?, c("Smass")?, c("lum")?);

    let ncols = EXPORT_ASCII.len() + extra::ALL.len();
    let mut values = Vec::with_capacity(t.nrows() * ncols);
    let mut rejected = 0;

    for i in 0..t.nrows() {
        let mut p_gal: Vec3 = [px[i], py[i], pz[i]];
        let mut v_gal: Vec3 = [vx[i], vy[i], vz[i]];

        if add_position {
            for k in 0..3 {
                p_gal[k] += center.position[k];
            }
        }

        if add_velocity {
            for k in 0..3 {
                v_gal[k] += center.velocity[k];
            }
        }

        let p_eq = galactic_to_equatorial(&p_gal);
        let v_eq = galactic_to_equatorial(&v_gal);

        let sph = match cartesian_to_spherical(&p_eq) {
            Ok(s) => s,
            Err(e) if e.is_domain() => {
                warn!("dropping model star #{}: {}", i, e);
                rejected += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let vc = sph.decompose_velocity(&v_eq);

        let mut row = [0.; 15];
        row[col::ALPHA] = sph.lon_deg;
        row[col::DELTA] = sph.lat_deg;
        row[col::DISTANCE] = sph.r * 1000.;
        row[col::MU_ALPHA] = proper_motion(vc.lon, sph.r);
        row[col::MU_DELTA] = proper_motion(vc.lat, sph.r);
        row[col::VRAD] = vc.radial;
        row[col::TEFF] = galaxia::teff_kelvin(teff[i]);
        row[col::LOGG] = logg[i];
        row[col::FEH] = feh[i];
        row[col::AV] = av[i];
        row[col::COLOR_VI] = color[i];
        row[col::VMAG] = vmag[i];
        row[col::IMAG] = vmag[i] - color[i];
        row[col::GLAT] = glat[i];
        row[col::GLON] = glon[i];
        values.extend_from_slice(&row);

        values.extend_from_slice(&[
            galaxia::age_gyr(age[i]),
            alfe[i],
            mv[i],
            smass[i],
            galaxia::bolometric_magnitude(lum[i]),
        ]);
    }

    if rejected > 0 {
        warn!("{} stars had no direction and were dropped", rejected);
    }

    let nrows = values.len() / ncols;
    let data = Array2::from_shape_vec((nrows, ncols), values).map_err(|e| Error::format(e.to_string()))?;

    let names = EXPORT_ASCII
        .fields
        .iter()
        .map(|f| f.name)
        .chain(extra::ALL.iter().copied())
        .map(str::to_owned)
        .collect();

    Ok(Transformed {
        stars: Table::new(names, data)?,
        rejected,
    })
}

/// The columns of `stars` in the order of `schema`, as a dense array.
fn schema_rows(stars: &Table, schema: &Schema) -> Result<Array2<f64>> {
    let idx = schema
        .fields
        .iter()
        .map(|f| stars.column_index(f.name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(stars.data().select(ndarray::Axis(1), &idx))
}

/// Format a value like C's `%12.5e`: five decimals and a signed, at least
/// two-digit exponent, right-aligned in 12 characters.
pub fn format_exp(x: f64) -> String {
    let text = if x.is_nan() {
        "nan".to_owned()
    } else if x.is_infinite() {
        let t = if x > 0. { "inf" } else { "-inf" };
        t.to_owned()
    } else {
        let s = format!("{:.5e}", x);

        match s.split_once('e') {
            Some((mantissa, exp)) => {
                let exp: i32 = exp.parse().unwrap_or(0);
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            None => s,
        }
    };

    format!("{:>12}", text)
}

fn write_ascii_rows<W: Write>(dest: &mut W, rows: &Array2<f64>) -> std::io::Result<()> {
    for row in rows.rows() {
        for x in row.iter() {
            write!(dest, " {}", format_exp(*x))?;
        }

        writeln!(dest)?;
    }

    Ok(())
}

/// Write the 15-column ASCII catalog, gzipped if the file name ends in
/// `.gz`.
pub fn write_ascii<P: AsRef<Path>>(path: P, stars: &Table) -> Result<()> {
    let path = path.as_ref();
    let rows = schema_rows(stars, &EXPORT_ASCII)?;
    let gzip = path.extension().map_or(false, |e| e == "gz");

    write_atomically(path, |f| {
        if gzip {
            let mut gz = GzEncoder::new(f, Compression::default());
            write_ascii_rows(&mut gz, &rows)?;
            gz.finish()?;
        } else {
            write_ascii_rows(f, &rows)?;
        }

        Ok(())
    })?;

    info!("wrote {} stars to ASCII catalog `{}`", rows.nrows(), path.display());
    Ok(())
}

/// Write the 12-field binary catalog.
pub fn write_binary<P: AsRef<Path>>(path: P, stars: &Table) -> Result<()> {
    let rows = schema_rows(stars, &EXPORT_BINARY)?;
    fortran::write_catalog(&path, &EXPORT_BINARY, rows.view())?;
    info!(
        "wrote {} stars to binary catalog `{}`",
        rows.nrows(),
        path.as_ref().display()
    );
    Ok(())
}

/// Write the FITS table of equatorial quantities and stellar parameters.
pub fn write_table<P: AsRef<Path>>(path: P, stars: &Table, vmag_limit: f64) -> Result<()> {
    let specs: Vec<ColumnSpec> = TABLE_COLUMNS
        .iter()
        .map(|(name, unit, _)| ColumnSpec::new(*name, *unit))
        .collect();

    let mut fits = FitsFile::create(path.as_ref())?;
    fits.create_f64_table(TABLE_EXTNAME, &specs, stars.nrows())?;

    for (i, (_, _, source)) in TABLE_COLUMNS.iter().enumerate() {
        let values = stars.column(source)?.to_vec();
        fits.write_f64_column(i, &values)?;
    }

    fits.set_f64_header("VMAGLIM", vmag_limit)?;
    fits.close()?;

    info!(
        "wrote {} stars to FITS table `{}`",
        stars.nrows(),
        path.as_ref().display()
    );
    Ok(())
}

/// Run the exporter on an already-opened model store.
pub fn run_export<S: ArrayStore + ?Sized>(store: &mut S, request: &Request) -> Result<Value> {
    if request.ascii_output.is_none()
        && request.binary_output.is_none()
        && request.table_output.is_none()
    {
        warn!("no outputs requested; only computing the selection");
    }

    let model = GalaxiaModel::read(store)?;
    let selected = model.select(&galaxia::magnitude_limit(request.vmag_limit))?;
    info!("Ns(V < {}) = {}", request.vmag_limit, selected.len());

    if let Err(e) = selected.stars().require_rows("the magnitude cut") {
        warn!("{}", e);
    }

    let eq = transform(
        &selected,
        request.add_center_position,
        request.add_center_velocity,
    )?;

    if let Some(p) = &request.ascii_output {
        write_ascii(p, &eq.stars)?;
    }

    if let Some(p) = &request.binary_output {
        write_binary(p, &eq.stars)?;
    }

    if let Some(p) = &request.table_output {
        write_table(p, &eq.stars, request.vmag_limit)?;
    }

    Ok(json!({
        "command": "export",
        "n_model": model.len(),
        "n_selected": selected.len(),
        "n_rejected": eq.rejected,
        "n_written": eq.stars.nrows(),
        "ascii_output": request.ascii_output,
        "binary_output": request.binary_output,
        "table_output": request.table_output,
    }))
}

pub fn handle_export(request: &Request) -> Result<Value> {
    let mut store = FitsTableStore::open(&request.input)?;
    run_export(&mut store, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        astrometry::{unit_vector, EQ_TO_GAL, PMV_CONST},
        galaxia::tests::three_star_store,
        store::MemoryStore,
    };
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn request() -> Request {
        serde_json::from_str(r#"{"input": "unused.fits"}"#).unwrap()
    }

    #[test]
    fn request_defaults() {
        let r = request();
        assert_eq!(r.vmag_limit, 20.0);
        assert!(!r.add_center_position);
        assert!(r.add_center_velocity);
        assert!(r.ascii_output.is_none());
    }

    #[test]
    fn format_matches_c_printf() {
        assert_eq!(format_exp(123.456789), " 1.23457e+02");
        assert_eq!(format_exp(-0.00012345678), "-1.23457e-04");
        assert_eq!(format_exp(0.0), " 0.00000e+00");
        // three-digit exponents fill the whole width, as in C
        assert_eq!(format_exp(6.02e123), "6.02000e+123");
        assert_eq!(format_exp(-6.02e-123), "-6.02000e-123");
        assert_eq!(format_exp(f64::NAN), "         nan");
    }

    /// A star placed along a known equatorial direction, moving purely
    /// radially and along +δ.
    fn one_star_store(ra: f64, dec: f64, r: f64, v_r: f64, v_dec: f64) -> MemoryStore {
        let p_eq = unit_vector(ra, dec);
        let p_gal = crate::astrometry::rotate(&EQ_TO_GAL, &p_eq);
        let north = crate::astrometry::velocity_to_cartesian(
            ra * crate::astrometry::D2R,
            dec * crate::astrometry::D2R,
            v_r,
            0.,
            v_dec,
        );
        let v_gal = crate::astrometry::rotate(&EQ_TO_GAL, &north);

        let mut s = three_star_store();
        let one = |x: f64| array![x];
        s.insert("/px", one(p_gal[0] * r))
            .insert("/py", one(p_gal[1] * r))
            .insert("/pz", one(p_gal[2] * r))
            .insert("/vx", one(v_gal[0]))
            .insert("/vy", one(v_gal[1]))
            .insert("/vz", one(v_gal[2]));

        for key in galaxia::STAR_KEYS {
            if !["/px", "/py", "/pz", "/vx", "/vy", "/vz"].contains(key) {
                let first = s.read(key).unwrap()[0];
                s.insert(*key, one(first));
            }
        }

        s
    }

    #[test]
    fn equatorial_kinematics() {
        let s = one_star_store(150.0, 30.0, 2.0, 25.0, PMV_CONST * 2.0);
        let model = GalaxiaModel::read(&mut s.clone()).unwrap();
        let eq = transform(&model, false, false).unwrap();
        let row = eq.stars.data().row(0).to_owned();

        assert_abs_diff_eq!(row[col::ALPHA], 150.0, epsilon = 1e-8);
        assert_abs_diff_eq!(row[col::DELTA], 30.0, epsilon = 1e-8);
        assert_abs_diff_eq!(row[col::DISTANCE], 2000.0, epsilon = 1e-8);
        assert_abs_diff_eq!(row[col::VRAD], 25.0, epsilon = 1e-8);
        assert_abs_diff_eq!(row[col::MU_ALPHA], 0.0, epsilon = 1e-8);
        // 2 * 4.74047 km/s at 2 kpc is 1 mas/yr
        assert_abs_diff_eq!(row[col::MU_DELTA], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(row[col::IMAG], row[col::VMAG] - row[col::COLOR_VI]);
    }

    #[test]
    fn center_velocity_is_added_only_on_request() {
        let s = one_star_store(10.0, -5.0, 1.0, 0.0, 0.0);
        let model = GalaxiaModel::read(&mut s.clone()).unwrap();

        let without = transform(&model, false, false).unwrap();
        let with = transform(&model, false, true).unwrap();
        let v0 = without.stars.column("vrad").unwrap()[0];
        let v1 = with.stars.column("vrad").unwrap()[0];

        assert_abs_diff_eq!(v0, 0.0, epsilon = 1e-9);
        assert!((v1 - v0).abs() > 1.0);
    }

    #[test]
    fn star_at_origin_is_dropped_and_counted() {
        let mut s = three_star_store();
        s.insert("/px", array![0.0, 0.0, 0.0])
            .insert("/py", array![0.0, 1.0, 0.0])
            .insert("/pz", array![0.0, 0.0, 1.0]);

        let model = GalaxiaModel::read(&mut s).unwrap();
        let eq = transform(&model, false, false).unwrap();
        assert_eq!(eq.rejected, 1);
        assert_eq!(eq.stars.nrows(), 2);
        assert_eq!(eq.stars.column("[Fe/H]").unwrap(), array![-0.5, 0.2]);
    }

    #[test]
    fn export_writes_all_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = request();
        r.ascii_output = Some(dir.path().join("ubgaiae-in.asc"));
        r.binary_output = Some(dir.path().join("ubgaiaein.bin"));
        r.table_output = Some(dir.path().join("galaxy1eq.fits"));

        let summary = run_export(&mut three_star_store(), &r).unwrap();
        assert_eq!(summary["n_model"], 3);
        assert_eq!(summary["n_selected"], 2);
        assert_eq!(summary["n_written"], 2);

        let text = std::fs::read_to_string(r.ascii_output.as_ref().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 15 * 13);
        assert_eq!(lines[0].split_whitespace().count(), 15);

        let bin = fortran::read_catalog(r.binary_output.as_ref().unwrap(), &EXPORT_BINARY).unwrap();
        assert_eq!(bin.dim(), (2, 12));
        assert_abs_diff_eq!(bin[[0, col::VMAG]], 18.0, epsilon = 1e-12);
        assert_abs_diff_eq!(bin[[1, col::VMAG]], 19.5, epsilon = 1e-12);

        let mut f = FitsFile::open(r.table_output.as_ref().unwrap()).unwrap();
        f.move_to_hdu(1).unwrap();
        assert_eq!(f.num_rows().unwrap(), 2);
        let age_col = f.column_number("age").unwrap().unwrap();
        let ages = f.read_f64_column(age_col).unwrap();
        assert_abs_diff_eq!(ages[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ages[1], 10f64.powf(0.5), epsilon = 1e-12);
    }

    #[test]
    fn gzip_ascii_output() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let mut r = request();
        r.ascii_output = Some(dir.path().join("ubgaiae-in.asc.gz"));
        run_export(&mut three_star_store(), &r).unwrap();

        let mut text = String::new();
        GzDecoder::new(std::fs::File::open(r.ascii_output.as_ref().unwrap()).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn empty_selection_still_writes_catalogs() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = request();
        r.vmag_limit = 5.0;
        r.binary_output = Some(dir.path().join("empty.bin"));

        let summary = run_export(&mut three_star_store(), &r).unwrap();
        assert_eq!(summary["n_written"], 0);

        let bin = fortran::read_catalog(r.binary_output.as_ref().unwrap(), &EXPORT_BINARY).unwrap();
        assert_eq!(bin.nrows(), 0);
    }
}
