use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use exiv::config::Config;
use exiv::{Image, MetadataFormat, MetadataProvider};

#[derive(Parser, Debug)]
#[command(
    name = "exiv-cli",
    version,
    about = "Read and edit EXIF, IPTC and XMP metadata in JPEG, WebP and TIFF images"
)]
struct Cli {
    /// Image file to read
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Set a value from text: FORMAT KEY VALUE (FORMAT is exif or iptc)
    #[arg(long, num_args = 3, value_names = ["FORMAT", "KEY", "VALUE"], action = clap::ArgAction::Append)]
    set: Vec<String>,

    /// Set an unsigned short value: FORMAT KEY VALUE
    #[arg(long = "set-short", num_args = 3, value_names = ["FORMAT", "KEY", "VALUE"], action = clap::ArgAction::Append)]
    set_short: Vec<String>,

    /// Remove every entry with a key: FORMAT KEY
    #[arg(long, num_args = 2, value_names = ["FORMAT", "KEY"], action = clap::ArgAction::Append)]
    strip: Vec<String>,

    /// Print the value of a key (e.g. Exif.Image.Make)
    #[arg(long, value_name = "KEY")]
    get: Vec<String>,

    /// Display all metadata
    #[arg(long)]
    show: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Write the result here instead of modifying the input
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Preview changes without writing to files
    #[arg(long)]
    dry_run: bool,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;

    // Set up logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.filter().to_string()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    let Some(path) = cli.path.as_deref() else {
        anyhow::bail!("No input file specified. Use --help for usage.");
    };

    if cli.dry_run {
        config.output.dry_run = true;
    }
    if cli.json {
        config.output.json = true;
    }

    let image = Image::open(path)?;
    image
        .read_metadata()
        .with_context(|| format!("Failed to read metadata from {}", path.display()))?;
    log::debug!("{image:?}");

    let edits = apply_edits(&image, &cli)?;

    if config.output.json {
        println!("{}", serde_json::to_string_pretty(&json_report(&image, path, &cli.get)?)?);
    } else {
        for key in &cli.get {
            match lookup(&image, key)? {
                Some(value) => println!("{key} = {value}"),
                None => println!("{key} (not found)"),
            }
        }
        if cli.show {
            print_metadata(&image, path);
        }
    }

    if edits == 0 {
        return Ok(());
    }

    let target = cli.output.as_deref().unwrap_or(path);
    if config.output.dry_run {
        log::info!(
            "DRY RUN: {edits} change(s), {} would be written to {}",
            image.get_bytes().len(),
            target.display()
        );
        return Ok(());
    }

    if cli.output.is_none() && config.output.backup_originals {
        backup_file(path)?;
    }
    std::fs::write(target, image.get_bytes())
        .with_context(|| format!("Failed to write {}", target.display()))?;
    log::info!("Wrote {edits} change(s) to {}", target.display());

    Ok(())
}

/// Apply `--set`, `--set-short` and `--strip` in that order.
fn apply_edits(image: &Image, cli: &Cli) -> Result<usize> {
    let mut edits = 0;

    for args in cli.set.chunks_exact(3) {
        let (format, key, value) = (&args[0], &args[1], &args[2]);
        image
            .set_metadata_string(&format.to_ascii_lowercase(), key, value)
            .with_context(|| format!("Failed to set {key}"))?;
        log::info!("  Set {key} = {value}");
        edits += 1;
    }

    for args in cli.set_short.chunks_exact(3) {
        let (format, key, value) = (&args[0], &args[1], &args[2]);
        image
            .set_metadata_short(&format.to_ascii_lowercase(), key, value)
            .with_context(|| format!("Failed to set {key}"))?;
        log::info!("  Set {key} = {value}");
        edits += 1;
    }

    for args in cli.strip.chunks_exact(2) {
        let format: MetadataFormat = args[0].parse()?;
        image
            .strip_key(format, &args[1])
            .with_context(|| format!("Failed to strip {}", args[1]))?;
        log::info!("  Stripped {}", args[1]);
        edits += 1;
    }

    Ok(edits)
}

/// Look a key up in the store its family prefix names.
fn lookup(image: &Image, key: &str) -> Result<Option<String>> {
    let family = key.split('.').next().unwrap_or_default();
    let store: Box<dyn MetadataProvider> = match family.parse::<MetadataFormat>()? {
        MetadataFormat::Exif => Box::new(image.exif_data()),
        MetadataFormat::Iptc => Box::new(image.iptc_data()),
        MetadataFormat::Xmp => Box::new(image.xmp_data()),
    };
    match store.get_string(key) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_key_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn json_report(image: &Image, path: &Path, keys: &[String]) -> Result<serde_json::Value> {
    let mut values = BTreeMap::new();
    for key in keys {
        values.insert(key.clone(), lookup(image, key)?);
    }

    Ok(serde_json::json!({
        "path": path.display().to_string(),
        "format": image.format(),
        "mime_type": image.format().mime_type(),
        "width": image.pixel_width(),
        "height": image.pixel_height(),
        "icc_profile": image.icc_profile().map(|icc| icc.len()),
        "exif": image.exif_data().all_tags(),
        "iptc": image.iptc_data().all_tags(),
        "xmp": image.xmp_data().all_tags(),
        "get": values,
    }))
}

/// Create a backup of the original file before modification.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));
    if !backup_path.exists() {
        std::fs::copy(path, &backup_path).context("Failed to create backup")?;
        log::debug!("Backup created: {}", backup_path.display());
    }
    Ok(backup_path)
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

/// Print every entry of every family, one section per family.
fn print_metadata(image: &Image, path: &Path) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!(
        "{DIM}{} {}x{}{RESET}",
        image.format().mime_type(),
        image.pixel_width(),
        image.pixel_height()
    );
    println!("{DIM}{}{RESET}", "═".repeat(72));

    let sections = [
        ("Exif", image.exif_data().all_tags()),
        ("IPTC", image.iptc_data().all_tags()),
        ("XMP", image.xmp_data().all_tags()),
    ];

    let mut has_any = false;
    for (title, tags) in &sections {
        if tags.is_empty() {
            continue;
        }
        has_any = true;
        println!("  {BOLD}{title}{RESET}");
        println!("  {DIM}{}{RESET}", "─".repeat(70));
        for (key, value) in tags {
            print_row(short_key(key), value);
        }
        println!();
    }

    if !has_any {
        println!("  {DIM}(no metadata found){RESET}");
        println!();
    }
}

/// Drop the family prefix: `Exif.Image.Make` -> `Image.Make`.
fn short_key(key: &str) -> &str {
    key.split_once('.').map_or(key, |(_, rest)| rest)
}

/// Print a single row in the metadata display table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
