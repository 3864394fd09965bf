use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thumbnail_db::MetadataDb;
use thumbnailer::{
    connect_optimizer, CleanupOptions, FileSystemStorage, OptionMap, OptionValue, Storage,
    ThumbnailCollectionCleaner, ThumbnailConfig, ThumbnailFile, ThumbnailService,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "thumbnailer")]
#[command(about = "Generate, inspect and clean up cached thumbnails")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Metadata database (default: ~/.thumbnailer/metadata.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get or generate a thumbnail for one source file
    Generate {
        /// Directory that source and thumbnail names are relative to
        #[arg(long)]
        media_root: PathBuf,

        /// Source name relative to the media root
        #[arg(long)]
        source: String,

        /// Target size, e.g. 100x100 (0 leaves a side unconstrained)
        #[arg(long)]
        size: String,

        /// Crop mode: true, smart, scale or a focal offset like "-10,20"
        #[arg(long)]
        crop: Option<String>,

        /// Encoder quality (defaults to the configured quality)
        #[arg(long)]
        quality: Option<i64>,

        /// Extra option as key=value, repeatable
        #[arg(short, long = "option")]
        options: Vec<String>,

        /// Also produce the high-resolution sibling
        #[arg(long)]
        high_resolution: bool,
    },

    /// List the aliases visible from a target
    Aliases {
        /// Alias target, e.g. app.Model.field
        #[arg(long)]
        target: Option<String>,
    },

    /// Delete thumbnails whose source files are gone
    Cleanup {
        /// Directory that source and thumbnail names are relative to
        #[arg(long)]
        media_root: PathBuf,

        /// Report what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,

        /// Only check sources modified in the last N days
        #[arg(long, default_value = "0")]
        last_n_days: u32,

        /// Only check sources whose name starts with this prefix
        #[arg(long)]
        path: Option<String>,

        /// Also delete files in the thumbnail directory that no source claims
        #[arg(long)]
        delete_orphans: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => ThumbnailConfig::from_json_file(path)?,
        None => ThumbnailConfig::default(),
    };

    match cli.command {
        Commands::Aliases { target } => list_aliases(config, target.as_deref()),
        Commands::Generate {
            media_root,
            source,
            size,
            crop,
            quality,
            options,
            high_resolution,
        } => {
            let service = open_service(config, cli.database)?;
            let mut values = parse_options(&options)?;
            let (width, height) = parse_size(&size)?;
            values.insert("size".to_string(), (width, height).into());
            if let Some(crop) = crop {
                values.insert("crop".to_string(), parse_value(&crop));
            }
            if let Some(quality) = quality {
                values.insert("quality".to_string(), quality.into());
            }
            if high_resolution {
                values.insert("HIGH_RESOLUTION".to_string(), true.into());
            }
            generate(&service, &media_root, &source, values)
        }
        Commands::Cleanup {
            media_root,
            dry_run,
            last_n_days,
            path,
            delete_orphans,
        } => {
            let service = open_service(config, cli.database)?;
            let storage: Arc<dyn Storage> = Arc::new(FileSystemStorage::new(media_root));
            let cleaner = ThumbnailCollectionCleaner::new(service, storage.clone(), storage);
            let stats = cleaner.clean_up(&CleanupOptions {
                dry_run,
                last_n_days,
                path,
                delete_orphans,
            })?;
            println!("{}", stats);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn open_service(config: ThumbnailConfig, database: Option<PathBuf>) -> Result<Arc<ThumbnailService>> {
    let database = match database {
        Some(path) => path,
        None => dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .join(".thumbnailer")
            .join("metadata.db"),
    };
    if let Some(parent) = database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    debug!(database = %database.display(), "opening metadata database");
    let db = MetadataDb::open_at(&database)
        .with_context(|| format!("Failed to open metadata database: {}", database.display()))?;

    let service = ThumbnailService::builder(config).metadata_db(db).build()?;
    connect_optimizer(&service);
    Ok(service)
}

fn generate(service: &Arc<ThumbnailService>, media_root: &Path, source: &str, values: OptionMap) -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(FileSystemStorage::new(media_root));
    if !storage.exists(source) {
        bail!("Source not found: {}", media_root.join(source).display());
    }
    let thumbnailer = service.thumbnailer(source, storage);
    let options = thumbnailer.options(values);

    let thumbnail = thumbnailer
        .get_thumbnail(&options, true, Some(true))
        .with_context(|| format!("Failed to generate thumbnail for {}", source))?
        .ok_or_else(|| anyhow!("No thumbnail produced for {}", source))?;
    print_thumbnail(thumbnail)
}

fn print_thumbnail(mut thumbnail: ThumbnailFile) -> Result<()> {
    let (width, height) = thumbnail.dimensions()?;
    let location = thumbnail
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| thumbnail.name.clone());
    println!("🖼️  {} ({}x{})", location, width, height);
    if let Some(high_resolution) = thumbnail.high_resolution.take() {
        print_thumbnail(*high_resolution)?;
    }
    Ok(())
}

fn list_aliases(config: ThumbnailConfig, target: Option<&str>) -> Result<()> {
    let aliases = thumbnailer::Aliases::from_config(&config.aliases);
    let resolved = aliases.all(target, true);
    if resolved.is_empty() {
        println!("No aliases configured");
        return Ok(());
    }
    for (alias, options) in resolved {
        let options = serde_json::to_string(&options).context("Failed to serialize alias options")?;
        println!("{:<20} {}", alias, options);
    }
    Ok(())
}

/// `WxH`, either side may be 0.
fn parse_size(size: &str) -> Result<(i64, i64)> {
    let (width, height) = size
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("Size must look like WIDTHxHEIGHT: {}", size))?;
    let width = width.trim().parse().with_context(|| format!("Invalid width: {}", width))?;
    let height = height.trim().parse().with_context(|| format!("Invalid height: {}", height))?;
    Ok((width, height))
}

fn parse_options(options: &[String]) -> Result<OptionMap> {
    let mut values = OptionMap::new();
    for option in options {
        let (key, value) = option
            .split_once('=')
            .ok_or_else(|| anyhow!("Options must be key=value: {}", option))?;
        values.insert(key.trim().to_string(), parse_value(value.trim()));
    }
    Ok(values)
}

fn parse_value(value: &str) -> OptionValue {
    match value {
        "true" => OptionValue::Bool(true),
        "false" => OptionValue::Bool(false),
        _ => value
            .parse::<i64>()
            .map(OptionValue::Int)
            .or_else(|_| value.parse::<f64>().map(OptionValue::Float))
            .unwrap_or_else(|_| OptionValue::Str(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100x80").unwrap(), (100, 80));
        assert_eq!(parse_size("0X50").unwrap(), (0, 50));
        assert!(parse_size("100").is_err());
        assert!(parse_size("ax1").is_err());
    }

    #[test]
    fn test_parse_options() {
        let values = parse_options(&[
            "bw=true".to_string(),
            "sharpen=2".to_string(),
            "crop=smart".to_string(),
            "zoom=12.5".to_string(),
        ])
        .unwrap();
        assert_eq!(values["zoom"], OptionValue::Float(12.5));
        assert_eq!(values["bw"], OptionValue::Bool(true));
        assert_eq!(values["sharpen"], OptionValue::Int(2));
        assert_eq!(values["crop"], OptionValue::Str("smart".to_string()));
        assert!(parse_options(&["novalue".to_string()]).is_err());
    }
}
