//! Run one conversion command, based on arguments given on the command line.
//!
//! Usage: `ubgaia-oneshot <command> <json-request>`. The JSON summary of the
//! run goes to standard output; logs go to standard error.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::env;

fn main() -> Result<()> {
    let mut args = env::args();
    args.next(); // skip argv[0]

    let command = args.next().ok_or_else(|| {
        anyhow!(
            "first argument should be the command to run ({})",
            galaxia_ubgaia::COMMANDS.join(", ")
        )
    })?;

    let json_text = args
        .next()
        .ok_or_else(|| anyhow!("second argument should be JSON request text"))?;
    let payload: Value = serde_json::from_str(&json_text)?;

    galaxia_ubgaia::init_logging();
    let result = galaxia_ubgaia::dispatch(&command, Some(payload))?;

    serde_json::to_writer(std::io::stdout().lock(), &result)?;
    println!();
    Ok(())
}
