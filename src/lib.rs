//! Galaxia ⇄ UB Gaia error simulator conversions
//!
//! This library crate bridges the Galaxia mock-catalog generator and the UB
//! Gaia error code. The exporter turns a Galaxia model into the equatorial
//! catalogs that the error code reads; the importer side reads what the error
//! code writes back and turns it into FITS tables and error-versus-distance
//! maps.
//!
//! The same code is compiled into two executables:
//! `ubgaia-oneshot`, which runs one command given on the command line, and
//! `ubgaia-batch`, which runs a file of them in order. Either way, a command
//! is a name plus a JSON request, and the result is a JSON summary.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

pub mod astrometry;
pub mod density;
pub mod errmap;
pub mod errors;
pub mod export;
pub mod fitsfile;
pub mod fortran;
pub mod gaiae;
pub mod galaxia;
pub mod schema;
pub mod selection;
pub mod store;
pub mod tofits;

pub use errors::Error;

/// The commands that [`dispatch`] knows about.
pub const COMMANDS: &[&str] = &["export", "tofits", "errmap"];

/// Set up logging to stderr. The level comes from `RUST_LOG`, defaulting to
/// `info`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false) // don't print the module name
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn parse_request<T: DeserializeOwned>(command: &str, payload: Option<Value>) -> Result<T> {
    let payload = payload.ok_or_else(|| anyhow!("command `{}` needs a JSON request", command))?;
    serde_json::from_value(payload).with_context(|| format!("invalid request for `{}`", command))
}

/// Run one command on its JSON request.
pub fn dispatch(command: &str, payload: Option<Value>) -> Result<Value> {
    match command {
        "export" => export::handle_export(&parse_request(command, payload)?),
        "tofits" => tofits::handle_tofits(&parse_request(command, payload)?),
        "errmap" => errmap::handle_errmap(&parse_request(command, payload)?),
        _ => Err(anyhow!(
            "unhandled command `{}` (expected one of: {})",
            command,
            COMMANDS.join(", ")
        )),
    }
}
