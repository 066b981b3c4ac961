//! sing-geoip-gen: CLI tool for generating sing-box GeoIP databases and rule-sets.

use clap::{Args, Parser, Subcommand};
use sing_geoip::config::{
    ReleaseConfig, DEFAULT_FILTERED_LABEL, DEFAULT_FILTERED_OUTPUT, DEFAULT_OUTPUT,
    DEFAULT_RULE_SET_DIR,
};
use sing_geoip::fetch::{Downloader, DEFAULT_SOURCE_URL};
use sing_geoip::release::{release, set_action_output};
use sing_geoip::{Error, ReleaseSummary};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sing-geoip-gen")]
#[command(version)]
#[command(about = "Generate sing-box GeoIP databases and rule-sets from ipinfo data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the ipinfo country database and build every output
    Release {
        /// ipinfo access token
        #[arg(long, env = "IPINFO_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Download URL; `{token}` is replaced with the token
        #[arg(long, default_value = DEFAULT_SOURCE_URL)]
        url: String,

        /// Use a local database instead of downloading
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Build every output from a local database
    Build {
        /// Input MMDB file
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct OutputArgs {
    /// Full database path
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Filtered database path
    #[arg(long, default_value = DEFAULT_FILTERED_OUTPUT)]
    filtered_output: PathBuf,

    /// Labels kept in the filtered database
    #[arg(long = "filtered-label", default_value = DEFAULT_FILTERED_LABEL)]
    filtered_labels: Vec<String>,

    /// Rule-set output directory (removed and recreated)
    #[arg(short, long, default_value = DEFAULT_RULE_SET_DIR)]
    rule_set_dir: PathBuf,

    /// Extend an existing filtered database instead of replacing it
    #[arg(long)]
    append: bool,

    /// Also write JSON source rule-sets
    #[arg(long)]
    json: bool,

    /// Skip the .sha256sum files
    #[arg(long)]
    no_checksums: bool,
}

impl From<OutputArgs> for ReleaseConfig {
    fn from(args: OutputArgs) -> Self {
        ReleaseConfig {
            output: args.output,
            filtered_output: args.filtered_output,
            filtered_labels: args.filtered_labels,
            rule_set_dir: args.rule_set_dir,
            append: args.append,
            json: args.json,
            checksums: !args.no_checksums,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Release {
            token,
            url,
            input,
            output,
        } => {
            let image = match input {
                Some(path) => read_input(&path).unwrap_or_else(|e| fail("read", e)),
                None => download(token, url).unwrap_or_else(|e| fail("download", e)),
            };
            let summary = release(&output.into(), image).unwrap_or_else(|e| fail("release", e));
            report(&summary);
            set_action_output("tag", "ipinfo");
        }
        Commands::Build { input, output } => {
            let image = read_input(&input).unwrap_or_else(|e| fail("read", e));
            let summary = release(&output.into(), image).unwrap_or_else(|e| fail("build", e));
            report(&summary);
        }
    }
}

fn download(token: Option<String>, url: String) -> Result<Vec<u8>, Error> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Config("missing ipinfo token (--token or IPINFO_TOKEN)".to_string()))?;
    Downloader::new(token)?.with_url_template(url).download()
}

fn read_input(path: &Path) -> Result<Vec<u8>, Error> {
    log::info!("Reading {}", path.display());
    Ok(fs::read(path)?)
}

fn report(summary: &ReleaseSummary) {
    for path in &summary.databases {
        log::info!("Database: {}", path.display());
    }
    log::info!(
        "{} labels, {} networks, {} rule-sets",
        summary.labels,
        summary.networks,
        summary.rule_sets.len()
    );
}

fn fail(stage: &str, e: Error) -> ! {
    log::error!("{} failed: {}", stage, e);
    std::process::exit(1);
}
