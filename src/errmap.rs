//! Error-versus-distance maps from the simulator's output.
//!
//! Each product bins the heliocentric distance of the stars against one
//! propagated error: of the distance itself, of the δ tangential velocity, or
//! of the radial velocity.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{
    density::DensityMap,
    errors::Error,
    gaiae::{derive_kinematics, kin, GaiaCatalog},
    selection::{Predicate, Range},
};

#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    DistanceError,
    ProperMotionError,
    RadialVelocityError,
}

impl Product {
    /// The kinematics column plotted against distance.
    pub fn y_column(self) -> &'static str {
        match self {
            Product::DistanceError => kin::DIST_ERR,
            Product::ProperMotionError => kin::VP_ERR,
            Product::RadialVelocityError => kin::VRAD_ERR,
        }
    }

    pub fn log_y(self) -> bool {
        matches!(self, Product::DistanceError)
    }

    pub fn default_selection(self) -> Predicate {
        let base = Predicate::default();

        match self {
            Product::DistanceError => base
                .and(Range::between(kin::DIST, 0., 15.))
                .and(Range::between(kin::DIST_ERR, 0.001, 15.)),
            Product::ProperMotionError => base
                .and(Range::below(kin::DIST, 15.))
                .and(Range::below(kin::VP_ERR, 20.)),
            Product::RadialVelocityError => base
                .and(Range::below(kin::DIST, 15.))
                .and(Range::below(kin::VRAD_ERR, 20.)),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Request {
    pub input: PathBuf,

    #[serde(default)]
    pub count_input: Option<PathBuf>,

    pub product: Product,

    pub output: PathBuf,

    /// Replaces the product's default selection.
    #[serde(default)]
    pub selection: Option<Predicate>,

    #[serde(default = "default_size")]
    pub nx: usize,

    #[serde(default = "default_size")]
    pub ny: usize,
}

fn default_size() -> usize {
    80
}

/// Build and save one error map for an in-memory catalog.
pub fn run_errmap(cat: &GaiaCatalog, request: &Request) -> Result<Value> {
    let kinematics = derive_kinematics(cat)?;
    let predicate = request
        .selection
        .clone()
        .unwrap_or_else(|| request.product.default_selection());

    let selected = kinematics.table.select(&predicate)?;
    let y_col = request.product.y_column();
    info!("{} of {} stars selected for the {} map", selected.nrows(), cat.len(), y_col);

    let mut summary = json!({
        "command": "errmap",
        "n_stars": cat.len(),
        "n_rejected": kinematics.rejected,
        "n_selected": selected.nrows(),
        "output": request.output,
        "written": false,
    });

    let map = match selected.require_rows("the error-map selection").and_then(|_| {
        DensityMap::build(
            (kin::DIST, selected.column(kin::DIST)?),
            (y_col, selected.column(y_col)?),
            request.nx,
            request.ny,
            request.product.log_y(),
        )
    }) {
        Ok(m) => m,
        Err(Error::SelectionEmpty(msg)) => {
            warn!("not writing `{}`: {}", request.output.display(), msg);
            return Ok(summary);
        }
        Err(e) => return Err(e.into()),
    };

    write_map(&map, &request.output)?;
    summary["written"] = json!(true);
    summary["n_mapped"] = json!(map.n_points);
    summary["max_count"] = json!(map.max_count());
    Ok(summary)
}

fn write_map(map: &DensityMap, path: &Path) -> Result<()> {
    map.write_fits(path)?;
    info!(
        "wrote {}x{} map of {} stars to `{}`",
        map.x.n,
        map.y.n,
        map.n_points,
        path.display()
    );
    Ok(())
}

pub fn handle_errmap(request: &Request) -> Result<Value> {
    let cat = GaiaCatalog::read(&request.input, request.count_input.as_ref())?;
    run_errmap(&cat, request)
}
