//! The Galaxia mock-catalog model: per-star arrays plus the frame center.
//!
//! Galaxia writes positions and velocities relative to the Sun, in a
//! right-handed Galactic Cartesian frame (kpc and km/s), alongside stellar
//! parameters and absolute magnitudes. `/Center` gives the adopted solar
//! position and velocity.

use ndarray::{Array1, ArrayView1, Zip};
use tracing::info;

use crate::{
    astrometry::Vec3,
    errors::{Error, Result},
    selection::{Predicate, Range, Table},
    store::ArrayStore,
};

/// The per-star arrays that the exporter reads, by store key.
pub const STAR_KEYS: &[&str] = &[
    "/px",
    "/py",
    "/pz",
    "/vx",
    "/vy",
    "/vz",
    "/glon",
    "/glat",
    "/Age",
    "/FeH",
    "/Alpha",
    "/Smass",
    "/rad",
    "/Teff",
    "/Grav",
    "/lum",
    "/ubv_v",
    "/ubv_i",
    "/exbv_schlegel",
];

pub const CENTER_KEY: &str = "/Center";

/// A_V / E(B-V)
pub const AV_PER_EBV: f64 = 3.315;

/// A_I / E(B-V)
pub const AI_PER_EBV: f64 = 1.940;

pub const MBOL_SUN: f64 = 4.75;

/// Names of the derived photometry columns.
pub mod phot {
    pub const AV: &str = "Av";
    pub const AI: &str = "Ai";
    pub const V_APP: &str = "Vape";
    pub const I_APP: &str = "Iape";
    pub const V_I: &str = "VIcole";
}

/// Offset of the simulation frame relative to the adopted solar position
/// and velocity. It is only ever added.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FrameCenter {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl FrameCenter {
    pub fn from_array(a: ArrayView1<f64>) -> Result<Self> {
        if a.len() != 6 {
            return Err(Error::format(format!(
                "frame center needs 6 elements, got {}",
                a.len()
            )));
        }

        Ok(FrameCenter {
            position: [a[0], a[1], a[2]],
            velocity: [a[3], a[4], a[5]],
        })
    }
}

#[derive(Clone, Debug)]
pub struct GalaxiaModel {
    /// One column per store key, named without the leading slash, plus the
    /// derived photometry.
    stars: Table,
    center: FrameCenter,
}

impl GalaxiaModel {
    /// Read everything the exporter needs from a store. All per-star arrays
    /// must have the same length.
    pub fn read<S: ArrayStore + ?Sized>(store: &mut S) -> Result<Self> {
        let mut columns = Vec::with_capacity(STAR_KEYS.len());

        for key in STAR_KEYS {
            columns.push((key.trim_start_matches('/'), store.read(key)?));
        }

        let stars = Table::from_columns(columns)?;
        let center = FrameCenter::from_array(store.read(CENTER_KEY)?.view())?;

        info!(
            "solar position assumed by the model: {:?}; velocity: {:?}",
            center.position, center.velocity
        );
        info!("read {} model stars", stars.nrows());

        Self::new(stars, center)
    }

    /// Wrap a table of model columns, deriving the photometry.
    pub fn new(mut stars: Table, center: FrameCenter) -> Result<Self> {
        for (name, values) in derive_photometry(&stars)? {
            stars.push_column(name, values)?;
        }

        Ok(GalaxiaModel { stars, center })
    }

    pub fn stars(&self) -> &Table {
        &self.stars
    }

    pub fn center(&self) -> &FrameCenter {
        &self.center
    }

    pub fn len(&self) -> usize {
        self.stars.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.nrows() == 0
    }

    pub fn select(&self, predicate: &Predicate) -> Result<GalaxiaModel> {
        Ok(GalaxiaModel {
            stars: self.stars.select(predicate)?,
            center: self.center,
        })
    }
}

/// Stars brighter (in extincted apparent V) than `limit`.
pub fn magnitude_limit(limit: f64) -> Predicate {
    Predicate::default().and(Range::below(phot::V_APP, limit))
}

/// Apparent, extincted V and I magnitudes from absolute magnitudes, the
/// heliocentric distance in kpc, and the Schlegel reddening.
fn derive_photometry(stars: &Table) -> Result<Vec<(&'static str, Array1<f64>)>> {
    let rad = stars.column("rad")?;
    let ebv = stars.column("exbv_schlegel")?;

    let dm = rad.mapv(|r| 5. * (r * 100.).log10());
    let av = ebv.mapv(|e| e * AV_PER_EBV);
    let ai = ebv.mapv(|e| e * AI_PER_EBV);

    let v_app = Zip::from(&stars.column("ubv_v")?)
        .and(&dm)
        .and(&av)
        .map_collect(|m, d, a| m + d + a);
    let i_app = Zip::from(&stars.column("ubv_i")?)
        .and(&dm)
        .and(&ai)
        .map_collect(|m, d, a| m + d + a);
    let color = &v_app - &i_app;

    Ok(vec![
        (phot::AV, av),
        (phot::AI, ai),
        (phot::V_APP, v_app),
        (phot::I_APP, i_app),
        (phot::V_I, color),
    ])
}

/// Effective temperature in K from Galaxia's log10 value.
pub fn teff_kelvin(log_teff: f64) -> f64 {
    10f64.powf(log_teff)
}

/// Age in Gyr from Galaxia's log10(age / yr).
pub fn age_gyr(log_age: f64) -> f64 {
    10f64.powf(log_age - 9.)
}

/// Bolometric magnitude from log10(L / L_sun).
pub fn bolometric_magnitude(log_lum: f64) -> f64 {
    -2.5 * log_lum + MBOL_SUN
}
