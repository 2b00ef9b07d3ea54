//! CLI entry point for `eml2pdf`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use eml2pdf::batch::{self, BatchReport, OutputFormat};
use eml2pdf::config::{Config, EngineChoice};
use eml2pdf::pipeline::Pipeline;

#[derive(Parser)]
#[command(
    name = "eml2pdf",
    version,
    about = "Convert email messages and their attachments into A4 PDF documents",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// .eml file or directory searched recursively for .eml files
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Output .pdf file (single input) or output directory
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Files to produce for each message
    #[arg(short, long, value_enum, default_value_t = Format::Pdf)]
    format: Format,

    /// Messages converted in parallel (default: from config, 0 = all cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Body layout engine (default: from config)
    #[arg(long, value_enum)]
    engine: Option<Engine>,

    /// Exit with status 2 when an attachment was replaced by a placeholder
    #[arg(long)]
    fail_on_placeholder: bool,

    /// Download http(s) images referenced by HTML bodies and embed them
    #[arg(long)]
    fetch_remote_images: bool,

    /// Print the batch report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Configuration file
    #[arg(long, value_name = "FILE", env = "EML2PDF_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Pdf,
    #[value(name = "pdf+tiff")]
    PdfTiff,
}

#[derive(Clone, Copy, ValueEnum)]
enum Engine {
    Auto,
    Builtin,
    Weasyprint,
}

fn main() {
    let code = match real_main() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn real_main() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completions { shell }) => return cmd_completions(shell).map(|()| 0),
        Some(Commands::Manpage) => return cmd_manpage().map(|()| 0),
        None => {}
    }

    let Some(input) = cli.input.as_deref() else {
        Cli::command().print_help()?;
        return Ok(1);
    };

    let loaded = eml2pdf::config::load_config(cli.config.as_deref())?;
    let mut config = loaded.config.clone();
    if let Some(engine) = cli.engine {
        config.render.engine = match engine {
            Engine::Auto => EngineChoice::Auto,
            Engine::Builtin => EngineChoice::Builtin,
            Engine::Weasyprint => EngineChoice::Weasyprint,
        };
    }
    if let Some(jobs) = cli.jobs {
        config.general.jobs = jobs;
    }
    config.policy.fail_on_placeholder |= cli.fail_on_placeholder;
    config.render.fetch_remote_images |= cli.fetch_remote_images;

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);
    loaded.log();

    let format = match cli.format {
        Format::Pdf => OutputFormat::Pdf,
        Format::PdfTiff => OutputFormat::PdfTiff,
    };
    cmd_convert(input, cli.output.as_deref(), format, &config, cli.json)
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = eml2pdf::config::log_file_path(config);
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_default();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_name = log_path.file_name().unwrap_or_default();
        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "eml2pdf", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Convert one file or a directory tree and report the outcome.
fn cmd_convert(
    input: &Path,
    output: Option<&Path>,
    format: OutputFormat,
    config: &Config,
    json: bool,
) -> anyhow::Result<i32> {
    let jobs = batch::plan(input, output, format)?;
    if jobs.is_empty() {
        anyhow::bail!("No .eml files found in {}", input.display());
    }

    let pipeline = Pipeline::new(config);
    let start = Instant::now();

    let pb = if jobs.len() > 1 && !json {
        let pb = ProgressBar::new(jobs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Converting [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let report = batch::run(
        &pipeline,
        &jobs,
        config.general.jobs,
        Some(&|done, _total| pb.set_position(done as u64)),
    )?;
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, start.elapsed());
    }
    Ok(report.exit_code(config.policy.fail_on_placeholder))
}

fn print_report(report: &BatchReport, elapsed: std::time::Duration) {
    use humansize::{format_size, BINARY};

    println!();
    for file in &report.files {
        match (&file.summary, &file.error) {
            (Some(summary), _) => {
                println!(
                    "  OK    {} → {} ({} pages, {})",
                    file.input.display(),
                    file.pdf.display(),
                    summary.page_count,
                    format_size(file.bytes, BINARY)
                );
                for att in summary.attachments.iter().filter(|a| a.error.is_some()) {
                    println!(
                        "        placeholder for {}: {}",
                        att.filename,
                        att.error.as_deref().unwrap_or_default()
                    );
                }
            }
            (None, error) => {
                println!(
                    "  FAIL  {}: {}",
                    file.input.display(),
                    error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    let total_bytes: u64 = report.files.iter().map(|f| f.bytes).sum();
    println!();
    println!("  {:<20} {}", "Converted", report.succeeded());
    println!("  {:<20} {}", "Failed", report.failed());
    println!("  {:<20} {}", "Placeholders", report.placeholders());
    println!("  {:<20} {}", "Output size", format_size(total_bytes, BINARY));
    println!("  {:<20} {:.1}s", "Time", elapsed.as_secs_f64());
    println!();
}
