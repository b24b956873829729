use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dialoguer::Select;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use imgcull::config::Config;
use imgcull::cull::{CullOptions, Culler};
use imgcull::engine::similarity::{Assessment, HashDistances, ThresholdAdvice, color_score};
use imgcull::engine::{
    AutoConfirm, ConfirmPair, Confirmation, Engine, EngineOutput, HashKind, ImageId, ProposedPair,
    compare,
};
use imgcull::extract::{Catalog, Extraction, FeatureExtractor};
use imgcull::history::{HistoryLog, RestoreSelection};
use imgcull::review::{format_bytes, review_discarded};
use imgcull::scan::{ScanOptions, discover_images};

#[derive(Parser, Debug)]
#[command(name = "imgcull", version, about = "Find and cull duplicate images")]
struct Cli {
    /// Config file (default: `<dir>/.imgcull.toml`, then the user config dir)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Duplicate workflows
    Duplicates {
        #[command(subcommand)]
        command: Dups,
    },

    /// Work with cull history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Subcommand, Debug)]
enum Dups {
    /// Find and list duplicates without touching any file
    Scan {
        /// Directory to scan
        #[arg(value_name = "DIR", default_value = ".")]
        path: PathBuf,
        /// Maximum perceptual-hash distance for a match
        #[arg(short, long)]
        threshold: Option<u32>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move duplicates into the discarded folder and rename keepers
    Cull {
        /// Directory to cull
        #[arg(value_name = "DIR", default_value = ".")]
        path: PathBuf,
        #[arg(short, long)]
        threshold: Option<u32>,
        /// Only show what would be moved
        #[arg(long)]
        dry_run: bool,
        /// Confirm each scaled duplicate before it is discarded
        #[arg(short, long)]
        interactive: bool,
        /// Directory to move duplicates into (default: `<dir>/discarded`)
        #[arg(long, value_name = "DIR")]
        target_dir: Option<PathBuf>,
    },

    /// Explain how two images compare
    Compare {
        first: PathBuf,
        second: PathBuf,
        #[arg(short, long)]
        threshold: Option<u32>,
    },

    /// Summarise the discarded folder by resolution
    Review {
        #[arg(value_name = "DIR", default_value = ".")]
        path: PathBuf,
        #[arg(long, value_name = "DIR")]
        target_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List all cull history records
    List {
        /// Directory containing the photos
        #[arg(value_name = "DIR", default_value = ".")]
        path: PathBuf,
    },

    /// Move culled files back and undo keeper renames
    Restore {
        /// Directory containing the photos
        #[arg(value_name = "DIR", default_value = ".")]
        path: PathBuf,
        /// Restore a specific record index (default: the latest)
        #[arg(long, conflicts_with = "all")]
        record: Option<usize>,
        /// Restore all records
        #[arg(long, conflicts_with = "record")]
        all: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config_file = cli.config.as_deref();

    match cli.command {
        Commands::Duplicates { command } => match command {
            Dups::Scan {
                path,
                threshold,
                json,
            } => {
                let config = load_config(config_file, &path, threshold)?;
                let extraction = extract_directory(&path, &config, None)?;
                let output = Engine::new(config.match_params()).run(&extraction.features);

                if json {
                    print_json(&extraction, &output)?;
                } else {
                    print_scan(&extraction, &output);
                }
            }

            Dups::Cull {
                path,
                threshold,
                dry_run,
                interactive,
                target_dir,
            } => {
                let config = load_config(config_file, &path, threshold)?;
                let discarded_dir = target_dir.unwrap_or_else(|| config.discarded_path(&path));
                println!("▶ Culling duplicates in: {}", path.display());

                let extraction = extract_directory(&path, &config, Some(&discarded_dir))?;
                let engine = Engine::new(config.match_params());
                let output = if interactive {
                    let mut prompt = PromptConfirm {
                        catalog: &extraction.catalog,
                    };
                    engine.run_with(&extraction.features, &mut prompt)
                } else {
                    engine.run_with(&extraction.features, &mut AutoConfirm)
                };

                print_ambiguous(&extraction.catalog, &output);
                if !output.has_duplicates() {
                    println!("No duplicates found.");
                    return Ok(());
                }
                cull(&path, &config, &extraction.catalog, &output, discarded_dir, dry_run)?;
            }

            Dups::Compare {
                first,
                second,
                threshold,
            } => {
                let dir = first.parent().unwrap_or_else(|| Path::new("."));
                let config = load_config(config_file, dir, threshold)?;
                compare_files(&first, &second, &config)?;
            }

            Dups::Review { path, target_dir } => {
                let config = load_config(config_file, &path, None)?;
                let discarded_dir = target_dir.unwrap_or_else(|| config.discarded_path(&path));
                let review = review_discarded(&discarded_dir, &config.extensions)?;

                if review.total_images == 0 {
                    println!("No images in {}", discarded_dir.display());
                }
                for group in &review.groups {
                    println!(
                        "\n📐 {}x{} ({} image(s))",
                        group.width,
                        group.height,
                        group.files.len()
                    );
                    for file in &group.files {
                        println!("   ▶ {} ({})", file.name, format_bytes(file.byte_size));
                    }
                }
                for (file, err) in &review.unreadable {
                    eprintln!("⚠️  Could not read {}: {}", file.display(), err);
                }
                println!(
                    "\n📦 {} image(s), {} in {}",
                    review.total_images,
                    format_bytes(review.total_bytes),
                    discarded_dir.display()
                );
            }
        },

        Commands::History { command } => match command {
            HistoryCmd::List { path } => {
                let config = load_config(config_file, &path, None)?;
                let log = HistoryLog::new(config.history_path(&path));
                let records = log.load()?;

                println!("🗂️  Cull History:");
                for (i, rec) in records.iter().enumerate() {
                    let culled: Vec<String> =
                        rec.culled.iter().map(|m| m.from.display().to_string()).collect();
                    println!(
                        "[{}] {}\n     kept: {}\n     culled: {:?}\n     action: {} ({:?})\n",
                        i,
                        rec.timestamp,
                        rec.retained.display(),
                        culled,
                        rec.action,
                        rec.kind
                    );
                }
            }

            HistoryCmd::Restore { path, record, all } => {
                let config = load_config(config_file, &path, None)?;
                let log = HistoryLog::new(config.history_path(&path));
                let selection = match (all, record) {
                    (true, _) => RestoreSelection::All,
                    (false, Some(index)) => RestoreSelection::Index(index),
                    (false, None) => RestoreSelection::Latest,
                };

                let summary = log
                    .restore(selection)
                    .with_context(|| format!("Failed to restore from {}", log.path().display()))?;
                for moved in &summary.restored {
                    println!("🔄 Restored {} → {}", moved.from.display(), moved.to.display());
                }
                for (file, why) in &summary.skipped {
                    eprintln!("⚠️ Skipping {}: {}", file.display(), why);
                }
                println!("🧹 Updated history, removed {} record(s)", summary.records);
            }
        },
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn load_config(explicit: Option<&Path>, dir: &Path, threshold: Option<u32>) -> Result<Config> {
    let mut config = Config::load(explicit, dir)?;
    if let Some(threshold) = threshold {
        config.threshold = threshold;
    }
    Ok(config)
}

/// Find image files under `dir`, with a spinner while walking.
fn scan_directory(dir: &Path, config: &Config, exclude: Option<&Path>) -> Result<Vec<PathBuf>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for images…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let options = ScanOptions {
        extensions: config.extensions.clone(),
        recursive: config.recursive,
        exclude_dir: Some(
            exclude
                .map(Path::to_path_buf)
                .unwrap_or_else(|| config.discarded_path(dir)),
        ),
    };
    let images = discover_images(dir, &options)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;
    spinner.finish_with_message(format!("Found {} image(s)", images.len()));
    Ok(images)
}

fn extract_directory(dir: &Path, config: &Config, exclude: Option<&Path>) -> Result<Extraction> {
    let images = scan_directory(dir, config, exclude)?;

    let bar = ProgressBar::new(images.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    bar.set_message("hashing");

    let extractor = FeatureExtractor::new();
    let extraction = benchmark("hashing all images", || {
        extractor.extract_all(&images, |_| bar.inc(1))
    });
    bar.finish_and_clear();

    if !extraction.failures.is_empty() {
        eprintln!(
            "⚠️  Skipped {} file(s) that could not be read",
            extraction.failures.len()
        );
    }
    Ok(extraction)
}

fn cull(
    dir: &Path,
    config: &Config,
    catalog: &Catalog,
    output: &EngineOutput,
    discarded_dir: PathBuf,
    dry_run: bool,
) -> Result<()> {
    let mut culler = Culler::new(
        catalog,
        CullOptions {
            discarded_dir: discarded_dir.clone(),
            dry_run,
        },
    );

    let log = HistoryLog::new(config.history_path(dir));
    let history = (!dry_run).then_some(&log);
    let run = culler
        .apply_all(&output.decisions, history, |i, applied| {
            println!("\n✨ {} ({}):", i + 1, output.decisions[i].reason());
            println!("   🏆 Keeping → {}", applied.keeper_after.display());
            if applied.dry_run {
                println!(
                    "   📦 [dry-run] MOVE {} → {}",
                    applied.discarded.from.display(),
                    applied.discarded.to.display()
                );
            } else {
                println!(
                    "   📦 Moved {} → {}",
                    applied.discarded.from.display(),
                    applied.discarded.to.display()
                );
            }
        })
        .with_context(|| format!("Failed to record history in {}", log.path().display()))?;

    print_report(output);
    for (i, err) in &run.failed {
        eprintln!("⚠️  Could not apply {}: {}", i + 1, err);
    }
    if dry_run {
        println!("\n⚠️  Dry-run only; no files were changed.");
    } else if !run.applied.is_empty() {
        println!(
            "\n✅ Moved {} file(s) to {}; recorded cull history in {}",
            run.applied.len(),
            discarded_dir.display(),
            log.path().display()
        );
    }

    if !run.failed.is_empty() {
        anyhow::bail!("{} decision(s) could not be applied", run.failed.len());
    }
    Ok(())
}

fn compare_files(first: &Path, second: &Path, config: &Config) -> Result<()> {
    let extractor = FeatureExtractor::new();
    let a = extractor
        .extract_one(ImageId(0), first)
        .with_context(|| format!("Failed to read {}", first.display()))?;
    let b = extractor
        .extract_one(ImageId(1), second)
        .with_context(|| format!("Failed to read {}", second.display()))?;

    for (path, img) in [(first, &a), (second, &b)] {
        println!("🖼️  {}", path.display());
        println!(
            "   {}x{} ({} px), aspect {}, colour {:?}",
            img.width,
            img.height,
            img.pixel_count(),
            img.aspect_ratio()
                .map(|r| format!("{r:.3}"))
                .unwrap_or_else(|| "n/a".to_string()),
            img.average_color.0
        );
    }

    let distances = HashDistances::between(&a.hashes, &b.hashes);
    println!("\n📏 Hash distances (max 64):");
    for kind in HashKind::ALL {
        println!("   {}: {}", kind, distances.get(kind));
    }
    println!(
        "   colour similarity: {:.3}",
        color_score(&a.average_color, &b.average_color)
    );

    let params = config.match_params();
    let result = compare(&a, &b, &params);
    println!(
        "\n{} {} (confidence {:.3}, threshold {})",
        if result.is_match() { "✅" } else { "❌" },
        result.reason(),
        result.confidence,
        params.threshold
    );

    let aspect_diff = match (a.aspect_ratio(), b.aspect_ratio()) {
        (Some(x), Some(y)) => (x - y).abs(),
        _ => f64::INFINITY,
    };
    println!("💡 {}", Assessment::classify(&distances, aspect_diff));

    let advice = ThresholdAdvice::from_distance(distances.perceptual);
    println!(
        "   thresholds: strict {}, balanced {}, aggressive {}",
        advice.strict, advice.balanced, advice.aggressive
    );
    Ok(())
}

fn print_scan(extraction: &Extraction, output: &EngineOutput) {
    let catalog = &extraction.catalog;
    if !output.has_duplicates() {
        println!("No duplicates found.");
    } else {
        println!("Found {} duplicate group(s):", output.groups.len());
        for (i, group) in output.groups.iter().enumerate() {
            println!(" Group {} ({:?}):", i + 1, group.kind);
            for &id in &group.members {
                let marker = if id == group.keeper { "🏆" } else { "▶" };
                println!("   {} {}", marker, describe(catalog, id));
            }
        }
    }
    print_ambiguous(catalog, output);
    print_report(output);
}

fn print_ambiguous(catalog: &Catalog, output: &EngineOutput) {
    for pair in &output.ambiguous {
        println!(
            "⚠️  Same resolution, left alone: {} ~ {} (confidence {:.3})",
            describe(catalog, pair.first),
            describe(catalog, pair.second),
            pair.confidence
        );
    }
}

fn print_report(output: &EngineOutput) {
    let r = &output.report;
    println!(
        "\n📊 {} image(s), {} exact group(s), {} comparison(s), {} similar pair(s), {} to discard",
        r.scanned, r.exact_groups, r.comparisons, r.similar_pairs, r.discarded
    );
    if r.excluded > 0 {
        println!("   {} image(s) excluded (invalid dimensions)", r.excluded);
    }
    if r.declined > 0 {
        println!("   {} proposal(s) declined", r.declined);
    }
    if r.aborted {
        println!("   ⏹ stopped early");
    }
}

#[derive(Serialize)]
struct ScanJson<'a> {
    images: &'a Catalog,
    failures: Vec<String>,
    #[serde(flatten)]
    output: &'a EngineOutput,
}

fn print_json(extraction: &Extraction, output: &EngineOutput) -> Result<()> {
    let json = ScanJson {
        images: &extraction.catalog,
        failures: extraction
            .failures
            .iter()
            .map(|(path, err)| format!("{}: {}", path.display(), err))
            .collect(),
        output,
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn describe(catalog: &Catalog, id: ImageId) -> String {
    match catalog.get(id) {
        Some(entry) => format!(
            "{} ({}x{})",
            entry.path.display(),
            entry.width,
            entry.height
        ),
        None => id.to_string(),
    }
}

/// Asks on the terminal before each scaled-duplicate discard.
struct PromptConfirm<'a> {
    catalog: &'a Catalog,
}

impl ConfirmPair for PromptConfirm<'_> {
    fn confirm(&mut self, pair: &ProposedPair<'_>) -> Confirmation {
        println!("\n🔍 {}", pair.similarity.reason());
        println!("   🏆 Keep    {}", describe(self.catalog, pair.keep.id));
        println!("   📦 Discard {}", describe(self.catalog, pair.discard.id));
        println!("   confidence {:.3}", pair.similarity.confidence);

        let items = [
            "Yes, discard the smaller image",
            "No, keep both",
            "Skip this one and accept all remaining",
            "Quit",
        ];
        let choice = Select::new()
            .with_prompt("Discard?")
            .items(&items)
            .default(0)
            .interact();
        match choice {
            Ok(0) => Confirmation::Accept,
            Ok(1) => Confirmation::Decline,
            Ok(2) => Confirmation::AcceptRemaining,
            Ok(_) => Confirmation::Abort,
            Err(e) => {
                log::warn!("Prompt failed, stopping: {}", e);
                Confirmation::Abort
            }
        }
    }
}

/// Run `f()`, log how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
