//! Run a file of conversion commands in order.
//!
//! Usage: `ubgaia-batch <jobs.json>`, where the file holds a JSON array of
//! `{"command": ..., "request": {...}}` objects. Processing stops at the first
//! failing job. The summaries of the jobs that ran are printed as a JSON
//! array on standard output.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::{env, fs::File, io::BufReader};
use tracing::info;

#[derive(Deserialize)]
struct Job {
    command: String,
    request: Value,
}

fn main() -> Result<()> {
    let mut args = env::args();
    args.next(); // skip argv[0]

    let path = args
        .next()
        .ok_or_else(|| anyhow!("argument should be the path to a JSON jobs file"))?;

    let jobs: Vec<Job> = serde_json::from_reader(BufReader::new(
        File::open(&path).with_context(|| format!("failed to open `{}`", path))?,
    ))
    .with_context(|| format!("failed to parse jobs file `{}`", path))?;

    galaxia_ubgaia::init_logging();
    let mut results = Vec::with_capacity(jobs.len());

    for (i, job) in jobs.into_iter().enumerate() {
        info!("job #{}: {}", i, job.command);
        let result = galaxia_ubgaia::dispatch(&job.command, Some(job.request))
            .with_context(|| format!("job #{} (`{}`) failed", i, job.command))?;
        results.push(result);
    }

    serde_json::to_writer(std::io::stdout().lock(), &results)?;
    println!();
    Ok(())
}
