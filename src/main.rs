use anyhow::Result;
use bootsbom::{
    cache::Cache,
    checker::default_checker,
    config::Config,
    init::all_init_systems,
    logging::init_tracing,
    manager::all_managers,
    model::{ScanGraph, Severity},
    output::{format_result_to_string, print_result, OutputFormat},
    pipeline::{enrich, ScanOptions, ScanPipeline},
};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const CRITICAL_VULN: u8 = 2;
    pub const HIGH_VULN: u8 = 3;
    pub const MEDIUM_VULN: u8 = 4;
    pub const LOW_VULN: u8 = 5;
    pub const ERROR: u8 = 1;
}

#[derive(Parser)]
#[command(name = "bootsbom")]
#[command(
    author,
    version,
    about = "Inventory packages and boot services on a filesystem image and link them into an SBOM"
)]
struct Cli {
    /// Log at debug level (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a filesystem root
    Scan {
        /// Root of the mounted image, container export or live system
        #[arg(short, long, default_value = "/")]
        root: PathBuf,

        /// Output format (table, json, cyclonedx)
        #[arg(short, long)]
        format: Option<String>,

        /// Write output to file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip vulnerability checking
        #[arg(long)]
        no_vuln_check: bool,

        /// Only report services started at boot
        #[arg(long)]
        startup_only: bool,

        /// A `systemd-analyze plot` SVG captured on the scanned system
        #[arg(long)]
        boot_plot: Option<PathBuf>,

        /// Exit with error if vulnerabilities at or above this severity are found
        #[arg(long, value_enum)]
        fail_on: Option<FailLevel>,

        /// Run scan stages without worker threads
        #[arg(long)]
        no_parallel: bool,

        /// Clear cache before scanning
        #[arg(long)]
        clear_cache: bool,
    },

    /// Show which package managers and init systems are detected
    ListBackends {
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
    },

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Clear the cache
    ClearCache,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl FailLevel {
    fn threshold(self) -> Severity {
        match self {
            FailLevel::Critical => Severity::Critical,
            FailLevel::High => Severity::High,
            FailLevel::Medium => Severity::Medium,
            FailLevel::Low => Severity::Low,
        }
    }
}

struct ScanArgs {
    root: PathBuf,
    format: OutputFormat,
    output: Option<PathBuf>,
    skip_vuln_check: bool,
    startup_only: bool,
    boot_plot: Option<PathBuf>,
    fail_on: Option<FailLevel>,
    parallel: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

async fn run() -> Result<u8> {
    let cli = Cli::parse();
    let config = Config::load()?;

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    init_tracing(level, &config.log_format)?;

    match cli.command {
        Commands::Scan {
            root,
            format,
            output,
            no_vuln_check,
            startup_only,
            boot_plot,
            fail_on,
            no_parallel,
            clear_cache,
        } => {
            if clear_cache {
                Cache::with_ttl_hours(config.cache_ttl_hours).clear()?;
            }

            let format_str = format.unwrap_or_else(|| config.default_format.clone());
            let args = ScanArgs {
                root,
                format: OutputFormat::from_str(&format_str).map_err(|e| anyhow::anyhow!(e))?,
                output,
                skip_vuln_check: no_vuln_check || config.skip_vuln_check,
                startup_only: startup_only || config.startup_only,
                boot_plot,
                fail_on,
                parallel: !no_parallel && config.parallel,
            };
            run_scan(args, &config).await
        }
        Commands::ListBackends { root } => {
            list_backends(&root);
            Ok(exit_codes::SUCCESS)
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::ClearCache => {
            let cache = Cache::new();
            let removed = cache.clear()?;
            println!("Cache cleared: {} entries removed from {}", removed, cache.dir().display());
            Ok(exit_codes::SUCCESS)
        }
    }
}

async fn run_scan(args: ScanArgs, config: &Config) -> Result<u8> {
    let is_interactive = args.format == OutputFormat::Table && args.output.is_none();

    let options = ScanOptions {
        root: args.root,
        startup_only: args.startup_only,
        parallel: args.parallel,
        boot_plot: args.boot_plot,
    };
    let pipeline = ScanPipeline::new(options)?;

    let progress = spinner(is_interactive, "Scanning packages and services...");
    let aggregator = pipeline.collect().await?;
    if let Some(pb) = progress {
        pb.finish_with_message(format!(
            "Found {} packages and {} services",
            aggregator.package_count(),
            aggregator.service_count()
        ));
    }

    if !args.skip_vuln_check && aggregator.package_count() > 0 {
        let progress = spinner(is_interactive, "Checking for vulnerabilities...");
        let checker = default_checker(config);
        let attached = enrich(&aggregator, &checker, &config.ignore).await;
        if let Some(pb) = progress {
            pb.finish_with_message(format!("Found {} vulnerabilities", attached));
        }
    }

    let graph = pipeline.finish(aggregator);

    if let Some(path) = &args.output {
        let rendered = format_result_to_string(&graph, args.format)?;
        std::fs::write(path, rendered)?;
        if args.format == OutputFormat::Table {
            println!("Results written to: {}", path.display());
        }
    } else {
        print_result(&graph, args.format)?;
    }

    Ok(determine_exit_code(&graph, args.fail_on))
}

fn spinner(enabled: bool, message: &'static str) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message);
    Some(pb)
}

/// Determine the exit code based on vulnerabilities found and --fail-on setting
fn determine_exit_code(graph: &ScanGraph, fail_on: Option<FailLevel>) -> u8 {
    let Some(fail_on) = fail_on else {
        return exit_codes::SUCCESS;
    };

    match graph.worst_severity() {
        Some(worst) if worst >= fail_on.threshold() => match worst {
            Severity::Critical => exit_codes::CRITICAL_VULN,
            Severity::High => exit_codes::HIGH_VULN,
            Severity::Medium => exit_codes::MEDIUM_VULN,
            Severity::Low => exit_codes::LOW_VULN,
            Severity::Unknown => exit_codes::SUCCESS,
        },
        _ => exit_codes::SUCCESS,
    }
}

fn list_backends(root: &std::path::Path) {
    println!("Backends for {}:", root.display());
    println!();

    println!("Package managers:");
    for backend in all_managers() {
        let detected = if backend.detect(root) { "yes" } else { "no" };
        println!("  {:<10} {:<12} [detected: {}]", backend.name(), backend.kind().display_name(), detected);
    }

    println!();
    println!("Init systems:");
    for backend in all_init_systems() {
        let detected = if backend.detect(root) { "yes" } else { "no" };
        println!("  {:<10} [detected: {}]", backend.name(), detected);
    }
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'bootsbom config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
