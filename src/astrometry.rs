//! Frame rotations, spherical coordinates and error propagation.
//!
//! Everything here is a pure function of its arguments. Positions are in kpc
//! and velocities in km/s unless a name says otherwise; parallaxes are in mas
//! and proper motions in mas/yr, so that `distance (kpc) = 1 / parallax (mas)`.

use once_cell::sync::Lazy;

use crate::errors::{Error, Result};

/// Degree-to-radian conversion factor
pub const D2R: f64 = 0.017453292519943295;

/// km/s per (AU/yr): v_t = PMV_CONST * mu * d, with mu in arcsec/yr and d in
/// pc, or equivalently mu in mas/yr and d in kpc.
pub const PMV_CONST: f64 = 4.74047;

pub type Vec3 = [f64; 3];
pub type Matrix3 = [[f64; 3]; 3];

// Galactic (l, b) in degrees of the equatorial axes.
const EQ_X_AXIS_GAL: (f64, f64) = (96.33723825, -60.18853909); // RA, Dec = 0, 0
const EQ_Z_AXIS_GAL: (f64, f64) = (122.93193212, 27.12835496); // north celestial pole

/// Rotation taking Galactic Cartesian vectors to equatorial Cartesian ones.
/// Its rows are the equatorial axes expressed in Galactic coordinates.
pub static GAL_TO_EQ: Lazy<Matrix3> = Lazy::new(|| rotation_from_axes(EQ_X_AXIS_GAL, EQ_Z_AXIS_GAL));

/// The inverse rotation: equatorial to Galactic.
pub static EQ_TO_GAL: Lazy<Matrix3> = Lazy::new(|| transpose(&GAL_TO_EQ));

/// Unit vector for a (longitude, latitude) pair in degrees.
pub fn unit_vector(lon_deg: f64, lat_deg: f64) -> Vec3 {
    let (lon, lat) = (lon_deg * D2R, lat_deg * D2R);
    [lon.cos() * lat.cos(), lon.sin() * lat.cos(), lat.sin()]
}

/// Build a rotation matrix whose rows are the unit vectors of the target
/// frame's axes, given the target x and z axes as (longitude, latitude) in
/// the source frame.
///
/// Published axis directions are rounded, so they are only orthogonal to a
/// part in 10^6. The x axis is taken as given; z is made exactly
/// perpendicular to it, and y completes the right-handed triad.
pub fn rotation_from_axes(x: (f64, f64), z: (f64, f64)) -> Matrix3 {
    let x = unit_vector(x.0, x.1);
    let z = unit_vector(z.0, z.1);

    let along = dot(&z, &x);
    let z = normalize(&[z[0] - along * x[0], z[1] - along * x[1], z[2] - along * x[2]]);
    let y = cross(&z, &x);

    [x, y, z]
}

pub fn transpose(m: &Matrix3) -> Matrix3 {
    let mut t = [[0.; 3]; 3];

    for (i, row) in m.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            t[j][i] = *v;
        }
    }

    t
}

pub fn rotate(m: &Matrix3, v: &Vec3) -> Vec3 {
    [dot(&m[0], v), dot(&m[1], v), dot(&m[2], v)]
}

pub fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn norm(v: &Vec3) -> f64 {
    dot(v, v).sqrt()
}

pub fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: &Vec3) -> Vec3 {
    let n = norm(v);
    [v[0] / n, v[1] / n, v[2] / n]
}

pub fn galactic_to_equatorial(v: &Vec3) -> Vec3 {
    rotate(&GAL_TO_EQ, v)
}

pub fn equatorial_to_galactic(v: &Vec3) -> Vec3 {
    rotate(&EQ_TO_GAL, v)
}

/// A Cartesian position re-expressed in spherical terms. We keep the full and
/// projected radii around because the velocity decomposition needs exactly
/// the same values.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SphericalPosition {
    /// Longitude (RA, or l) in degrees, in [0, 360).
    pub lon_deg: f64,

    /// Latitude (Dec, or b) in degrees, in [-90, 90].
    pub lat_deg: f64,

    /// Full radius.
    pub r: f64,

    /// Radius projected onto the x-y plane.
    pub r_xy: f64,

    cos_lon: f64,
    sin_lon: f64,
    sin_lat: f64,
}

impl SphericalPosition {
    /// True if the position lies on the z axis, where the longitude is
    /// undefined. We report longitude 0 there.
    pub fn on_pole(&self) -> bool {
        self.r_xy == 0.
    }

    /// Split a Cartesian velocity into its radial component and its
    /// components along the local east (longitude) and north (latitude) unit
    /// vectors.
    pub fn decompose_velocity(&self, v: &Vec3) -> VelocityComponents {
        let (cl, sl) = (self.cos_lon, self.sin_lon);
        let (cb, sb) = (self.r_xy / self.r, self.sin_lat);

        // velocity along the projected radius, in the x-y plane
        let v_rxy = v[0] * cl + v[1] * sl;

        VelocityComponents {
            radial: v_rxy * cb + v[2] * sb,
            lon: -v[0] * sl + v[1] * cl,
            lat: -v_rxy * sb + v[2] * cb,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VelocityComponents {
    pub radial: f64,
    pub lon: f64,
    pub lat: f64,
}

/// Convert a Cartesian position to spherical coordinates.
///
/// The longitude comes from `arccos(x / r_xy)`, mirrored to `360 - lon` when
/// `y < 0`; the latitude from `arcsin(z / r)`. A position on the z axis gets
/// longitude 0. A position at the origin has no direction at all and is a
/// domain error.
pub fn cartesian_to_spherical(p: &Vec3) -> Result<SphericalPosition> {
    let r_xy = (p[0] * p[0] + p[1] * p[1]).sqrt();
    let r = (r_xy * r_xy + p[2] * p[2]).sqrt();

    if !(r > 0.) || !r.is_finite() {
        return Err(Error::domain(format!(
            "position ({}, {}, {}) has no direction",
            p[0], p[1], p[2]
        )));
    }

    let (cos_lon, sin_lon) = if r_xy > 0. {
        (p[0] / r_xy, p[1] / r_xy)
    } else {
        (1., 0.)
    };

    let mut lon_deg = cos_lon.clamp(-1., 1.).acos() / D2R;

    if p[1] < 0. {
        lon_deg = 360. - lon_deg;
    }

    if lon_deg >= 360. {
        lon_deg = 0.;
    }

    let sin_lat = p[2] / r;
    let lat_deg = sin_lat.clamp(-1., 1.).asin() / D2R;

    Ok(SphericalPosition {
        lon_deg,
        lat_deg,
        r,
        r_xy,
        cos_lon,
        sin_lon,
        sin_lat,
    })
}

/// Cartesian position from longitude and latitude in radians and a radius.
pub fn spherical_to_cartesian(lon_rad: f64, lat_rad: f64, r: f64) -> Vec3 {
    let r_xy = r * lat_rad.cos();
    [r_xy * lon_rad.cos(), r_xy * lon_rad.sin(), r * lat_rad.sin()]
}

/// Cartesian velocity from radial and tangential components at a given
/// direction (angles in radians). This is the inverse of
/// [`SphericalPosition::decompose_velocity`].
pub fn velocity_to_cartesian(
    lon_rad: f64,
    lat_rad: f64,
    v_radial: f64,
    v_lon: f64,
    v_lat: f64,
) -> Vec3 {
    let (sl, cl) = lon_rad.sin_cos();
    let (sb, cb) = lat_rad.sin_cos();
    let v_xy = v_radial * cb - v_lat * sb;

    [
        v_xy * cl - v_lon * sl,
        v_xy * sl + v_lon * cl,
        v_radial * sb + v_lat * cb,
    ]
}

/// Proper motion (mas/yr) of a tangential velocity (km/s) seen at a distance
/// in kpc.
pub fn proper_motion(v_tan: f64, dist_kpc: f64) -> f64 {
    v_tan / (PMV_CONST * dist_kpc)
}

/// Tangential velocity (km/s) of a proper motion (mas/yr) at a parallax
/// (mas).
pub fn tangential_velocity(mu: f64, plx: f64) -> f64 {
    PMV_CONST * mu / plx
}

/// Distance in kpc from a parallax in mas. Non-positive (or NaN) parallaxes
/// have no meaningful distance and are a domain error.
pub fn distance_from_parallax(plx: f64) -> Result<f64> {
    if !(plx > 0.) {
        return Err(Error::domain(format!("non-positive parallax {plx} mas")));
    }

    Ok(1. / plx)
}

/// 1-sigma error of `d = 1/plx`: `sigma_d = sigma_plx / plx^2`.
pub fn distance_error(plx: f64, sigma_plx: f64) -> f64 {
    sigma_plx.abs() / (plx * plx)
}

/// 1-sigma error of `v = k mu / plx` with independent errors on mu and plx:
///
/// `sigma_v^2 = (k/plx)^2 sigma_mu^2 + (k mu / plx^2)^2 sigma_plx^2`
pub fn tangential_velocity_error(mu: f64, plx: f64, sigma_mu: f64, sigma_plx: f64) -> f64 {
    let a = PMV_CONST / plx * sigma_mu;
    let b = PMV_CONST * mu / (plx * plx) * sigma_plx;
    (a * a + b * b).sqrt()
}

/// Galactic position and proper motion re-derived from equatorial ones.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GalacticMotion {
    pub l_deg: f64,
    pub b_deg: f64,
    /// mu_l * cos(b), mas/yr
    pub pm_l: f64,
    pub pm_b: f64,
}

/// Rotate an equatorial direction (degrees) and proper motion (mas/yr) into
/// the Galactic frame. Proper motions are linear in the tangential velocity,
/// so we can work at unit distance.
pub fn equatorial_to_galactic_motion(
    ra_deg: f64,
    dec_deg: f64,
    pm_ra: f64,
    pm_dec: f64,
) -> Result<GalacticMotion> {
    let p_eq = unit_vector(ra_deg, dec_deg);
    let v_eq = velocity_to_cartesian(ra_deg * D2R, dec_deg * D2R, 0., pm_ra, pm_dec);

    let p_gal = equatorial_to_galactic(&p_eq);
    let v_gal = equatorial_to_galactic(&v_eq);

    let sph = cartesian_to_spherical(&p_gal)?;
    let vc = sph.decompose_velocity(&v_gal);

    Ok(GalacticMotion {
        l_deg: sph.lon_deg,
        b_deg: sph.lat_deg,
        pm_l: vc.lon,
        pm_b: vc.lat,
    })
}
