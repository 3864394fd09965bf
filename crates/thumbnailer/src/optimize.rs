//! External optimizer post-processing
//!
//! Runs a configured command (for example `optipng {filename}`) over each
//! created thumbnail and stores the result. Failures are logged and the
//! unoptimized thumbnail is kept.

use crate::files::ThumbnailFile;
use crate::service::ThumbnailService;
use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::io::Write;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Optimize `thumbnail` in place with the command configured for its image type.
pub fn optimize_thumbnail(thumbnail: &ThumbnailFile, commands: &BTreeMap<String, String>) {
    if let Err(err) = try_optimize(thumbnail, commands) {
        error!(name = %thumbnail.name, error = %format!("{:#}", err), "thumbnail optimization failed");
    }
}

fn try_optimize(thumbnail: &ThumbnailFile, commands: &BTreeMap<String, String>) -> anyhow::Result<()> {
    let content = match &thumbnail.content {
        Some(content) => content.clone(),
        None => thumbnail
            .storage
            .open(&thumbnail.name)
            .with_context(|| format!("Failed to read thumbnail: {}", thumbnail.name))?,
    };
    let Ok(format) = image::guess_format(&content) else {
        debug!(name = %thumbnail.name, "unknown image type, not optimizing");
        return Ok(());
    };
    let Some(command) = format
        .extensions_str()
        .iter()
        .find_map(|ext| commands.get(*ext))
        .filter(|command| !command.trim().is_empty())
    else {
        return Ok(());
    };

    let extension = format.extensions_str().first().copied().unwrap_or("img");
    let mut temp_file = tempfile::Builder::new()
        .suffix(&format!(".{}", extension))
        .tempfile()
        .context("Failed to create temp file")?;
    temp_file.write_all(&content)?;
    temp_file.flush()?;

    let filename = temp_file.path().to_string_lossy().into_owned();
    let mut parts = command
        .split_whitespace()
        .map(|part| part.replace("{filename}", &filename));
    let Some(program) = parts.next() else {
        return Ok(());
    };
    let output = Command::new(&program)
        .args(parts)
        .output()
        .with_context(|| format!("Failed to run {}", program))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let printed = [output.stdout.as_slice(), output.stderr.as_slice()].concat();
    if printed.is_empty() {
        info!(command = %command, "optimizer returned nothing");
    } else {
        warn!(command = %command, output = %String::from_utf8_lossy(&printed).trim(), "optimizer output");
    }

    let optimized = std::fs::read(temp_file.path())
        .with_context(|| format!("Failed to read optimized file: {}", filename))?;
    thumbnail.storage.delete(&thumbnail.name)?;
    thumbnail.storage.save(&thumbnail.name, &optimized)?;
    debug!(
        name = %thumbnail.name,
        before = content.len(),
        after = optimized.len(),
        "thumbnail optimized"
    );
    Ok(())
}

/// Optimize every created thumbnail using the configured commands.
pub fn connect_optimizer(service: &Arc<ThumbnailService>) {
    let commands = service.config().optimize_commands.clone();
    if commands.is_empty() {
        return;
    }
    service
        .signals()
        .on_thumbnail_created(move |thumbnail| optimize_thumbnail(thumbnail, &commands));
}
