//! Factor Import CLI
//!
//! Loads the yearly mileage, vehicle and region/postcode factor files into
//! PostgreSQL. Connection parameters come from flags or the environment:
//!   DB_HOST, DB_PORT, DB_USER, DB_PASSWORD, DB_NAME

use anyhow::Context;
use clap::Parser;
use factor_import::store::{DbConfig, PgStore};
use factor_import::{ImportSources, Importer, LogObserver, PostcodeColumns, RunReport};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "factor-import",
    version,
    about = "Import region, vehicle and yearly mileage pricing factors from CSV"
)]
struct Args {
    /// Directory containing the four CSV input files
    #[arg(long, value_name = "DIR", default_value = factor_import::pipeline::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Postcode file (default: <DATA_DIR>/postcodes.csv)
    #[arg(long, value_name = "PATH")]
    postcodes: Option<PathBuf>,

    /// Region factor file (default: <DATA_DIR>/region_factor_mapping.csv)
    #[arg(long, value_name = "PATH")]
    region_factors: Option<PathBuf>,

    /// Vehicle factor file (default: <DATA_DIR>/vehicle_factor_mapping.csv)
    #[arg(long, value_name = "PATH")]
    vehicle_factors: Option<PathBuf>,

    /// Yearly mileage factor file (default: <DATA_DIR>/yearly_mileage_factor_mapping.csv)
    #[arg(long, value_name = "PATH")]
    yearly_mileage_factors: Option<PathBuf>,

    /// 0-based column of the region label in the postcode file
    #[arg(long, default_value_t = 2)]
    region_column: usize,

    /// 0-based column of the postcode field in the postcode file
    #[arg(long, default_value_t = 6)]
    postcode_column: usize,

    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    db_port: u16,

    #[arg(long, env = "DB_USER")]
    db_user: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "", hide_env_values = true)]
    db_password: String,

    #[arg(long, env = "DB_NAME")]
    db_name: String,

    /// Create missing tables before importing
    #[arg(long)]
    create_schema: bool,

    /// Run the whole import, then roll back instead of committing
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn sources(&self) -> ImportSources {
        let defaults = ImportSources::in_dir(&self.data_dir);
        ImportSources {
            region_factors: self.region_factors.clone().unwrap_or(defaults.region_factors),
            postcodes: self.postcodes.clone().unwrap_or(defaults.postcodes),
            vehicle_factors: self.vehicle_factors.clone().unwrap_or(defaults.vehicle_factors),
            yearly_mileage_factors: self
                .yearly_mileage_factors
                .clone()
                .unwrap_or(defaults.yearly_mileage_factors),
            postcode_columns: PostcodeColumns {
                region: self.region_column,
                postcode: self.postcode_column,
            },
        }
    }

    fn db_config(&self) -> DbConfig {
        DbConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            database: self.db_name.clone(),
        }
    }
}

fn run(args: &Args) -> anyhow::Result<RunReport> {
    let mut store = PgStore::connect(&args.db_config()).context("Failed to connect to DB")?;

    if args.create_schema {
        store.ensure_schema().context("Failed to create tables")?;
    }

    let importer = Importer::new(args.sources(), &LogObserver).dry_run(args.dry_run);
    let report = importer
        .run(&mut store)
        .context("Failed to finish the import transaction")?;
    Ok(report)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let report = match run(&args) {
        Ok(report) => report,
        Err(err) => {
            log::error!("{:#}", err);
            return ExitCode::FAILURE;
        }
    };

    for outcome in report.failed_categories() {
        log::warn!(
            "{} not imported: {}",
            outcome.category,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(err) => log::error!("Failed to render report: {}", err),
        }
    }

    ExitCode::SUCCESS
}
