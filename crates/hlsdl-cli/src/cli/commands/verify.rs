//! `hlsdl verify <output> [--level]` – opt-in post-merge integrity check.

use anyhow::{anyhow, Result};
use std::path::Path;

use hlsdl_core::config::EngineConfig;
use hlsdl_core::merge::probe_muxer;
use hlsdl_core::verify::{verify_output as verify, IntegrityLevel};

pub async fn run_verify(cfg: &EngineConfig, output: &str, level: &str) -> Result<()> {
    let level: IntegrityLevel = level.parse().map_err(|e: String| anyhow!(e))?;
    let muxer = probe_muxer(cfg.advanced.ffmpeg_path.as_deref().unwrap_or(""));

    let report = verify(Path::new(output), level, None, muxer.as_deref())?;
    println!(
        "{output}: {:?} ok, {} bytes{}",
        report.level,
        report.bytes,
        report
            .checksum
            .as_ref()
            .map(|c| format!(", sha256 {c}"))
            .unwrap_or_default()
    );
    Ok(())
}
