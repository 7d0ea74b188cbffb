//! Named layouts of the fixed-width catalogs exchanged with the UB Gaia
//! error simulator.
//!
//! The simulator's Fortran code reads and writes plain positional records, so
//! the order of the fields below *is* the contract. Code elsewhere in this
//! crate addresses fields through these tables and the index constants in
//! [`gaia`], never through bare numbers.

/// How a field is stored and whether it makes it into tabular output.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldKind {
    /// An ordinary value, written as-is.
    Plain,

    /// An angle that the simulator writes in radians. Tabular output converts
    /// it to degrees.
    Angle,

    /// A slot that the simulator fills but does not document. It is read and
    /// kept so that the records stay aligned, but it is not tabulated.
    Reserved,
}

#[derive(Copy, Clone, Debug)]
pub struct Field {
    pub name: &'static str,
    pub unit: &'static str,
    pub kind: FieldKind,
}

const fn f(name: &'static str, unit: &'static str) -> Field {
    Field {
        name,
        unit,
        kind: FieldKind::Plain,
    }
}

const fn angle(name: &'static str) -> Field {
    Field {
        name,
        unit: "(degree)",
        kind: FieldKind::Angle,
    }
}

const fn reserved(name: &'static str) -> Field {
    Field {
        name,
        unit: "",
        kind: FieldKind::Reserved,
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [Field],
}

impl Schema {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Size in bytes of one star record of this layout.
    pub fn record_bytes(&self) -> usize {
        self.fields.len() * std::mem::size_of::<f64>()
    }
}

/// The exporter's row layout. The ASCII catalog writes all 15 columns; the
/// binary catalog writes the leading 12.
const EXPORT_FIELDS: &[Field] = &[
    f("alpha", "(degree)"),
    f("delta", "(degree)"),
    f("distance", "(pc)"),
    f("mualpha", "(mas/yr)"),
    f("mudelta", "(mas/yr)"),
    f("vrad", "(km/s)"),
    f("Teff", "(K)"),
    f("logg", "(dex)"),
    f("[Fe/H]", "(dex)"),
    f("Av", "(mag)"),
    f("V-I", "(mag)"),
    f("V", "(mag)"),
    // V - (V-I): the simulator reads this slot as the I magnitude
    f("I", "(mag)"),
    f("glat", "(degree)"),
    f("glon", "(degree)"),
];

pub const EXPORT_ASCII: Schema = Schema {
    name: "ubgaiae-ascii",
    fields: EXPORT_FIELDS,
};

pub const EXPORT_BINARY: Schema = Schema {
    name: "ubgaiae-binary",
    fields: EXPORT_FIELDS.split_at(12).0,
};

/// Column indices of the exporter layout.
pub mod export {
    pub const ALPHA: usize = 0;
    pub const DELTA: usize = 1;
    pub const DISTANCE: usize = 2;
    pub const MU_ALPHA: usize = 3;
    pub const MU_DELTA: usize = 4;
    pub const VRAD: usize = 5;
    pub const TEFF: usize = 6;
    pub const LOGG: usize = 7;
    pub const FEH: usize = 8;
    pub const AV: usize = 9;
    pub const COLOR_VI: usize = 10;
    pub const VMAG: usize = 11;
    pub const IMAG: usize = 12;
    pub const GLAT: usize = 13;
    pub const GLON: usize = 14;
}

const GAIA_ERROR_FIELDS: &[Field] = &[
    angle("RA_true"),
    angle("DEC_true"),
    f("Plx_true", "(mas)"),
    f("pmRA_true", "(mas/yr)"),
    f("pmDEC_true", "(mas/yr)"),
    f("HRV_true", "(km/s)"),
    // observed
    angle("RA_obs"),
    angle("DEC_obs"),
    f("Plx_obs", "(mas)"),
    f("pmRA_obs", "(mas/yr)"),
    f("pmDEC_obs", "(mas/yr)"),
    f("HRV_obs", "(km/s)"),
    // 1-sigma errors
    angle("e_RA"),
    angle("e_DEC"),
    f("e_Plx", "(mas)"),
    f("e_pmRA", "(mas/yr)"),
    f("e_pmDEC", "(mas/yr)"),
    f("e_HRV", "(km/s)"),
    // photometry
    f("G_true", "(mag)"),
    reserved("reserved_19"),
    f("G_BP_true", "(mag)"),
    f("G_RP_true", "(mag)"),
    f("G_obs", "(mag)"),
    reserved("reserved_23"),
    f("G_BP_obs", "(mag)"),
    f("G_RP_obs", "(mag)"),
    f("e_G", "(mag)"),
    reserved("reserved_27"),
    f("e_G_BP", "(mag)"),
    f("e_G_RP", "(mag)"),
    // stellar parameters
    f("Teff_true", "(K)"),
    f("logg_true", "(dex)"),
    f("[Fe/H]_true", "(dex)"),
    f("Av_true", "(mag)"),
    f("Teff_obs", "(K)"),
    f("logg_obs", "(dex)"),
    f("[Fe/H]_obs", "(dex)"),
    f("Av_obs", "(mag)"),
    f("e_Teff", "(K)"),
    f("e_logg", "(dex)"),
    f("e_[Fe/H]", "(dex)"),
    f("e_Av", "(mag)"),
    f("V", "(mag)"),
    f("V-I", "(mag)"),
    f("G_RVS", "(mag)"),
];

pub const GAIA_ERRORS: Schema = Schema {
    name: "gaia-errors",
    fields: GAIA_ERROR_FIELDS,
};

/// Column indices of the 45-field simulator output.
pub mod gaia {
    pub const RA_TRUE: usize = 0;
    pub const DEC_TRUE: usize = 1;
    pub const PLX_TRUE: usize = 2;
    pub const PMRA_TRUE: usize = 3;
    pub const PMDEC_TRUE: usize = 4;
    pub const HRV_TRUE: usize = 5;
    pub const RA_OBS: usize = 6;
    pub const DEC_OBS: usize = 7;
    pub const PLX_OBS: usize = 8;
    pub const PMRA_OBS: usize = 9;
    pub const PMDEC_OBS: usize = 10;
    pub const HRV_OBS: usize = 11;
    pub const E_RA: usize = 12;
    pub const E_DEC: usize = 13;
    pub const E_PLX: usize = 14;
    pub const E_PMRA: usize = 15;
    pub const E_PMDEC: usize = 16;
    pub const E_HRV: usize = 17;
    pub const G_TRUE: usize = 18;
    pub const V: usize = 42;
    pub const V_I: usize = 43;
    pub const G_RVS: usize = 44;
}
