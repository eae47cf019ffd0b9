use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use churn_warehouse::{
    build_warehouse, load_config_from, load_published, load_records, load_warehouse, open_database,
    publish_csv, publish_to_sqlite, verify_published, AgeGroup, ChurnAxis, IncomeBanding, IncomeField,
    SnapshotFilter, SnapshotTime, WarehouseConfig, WarehouseError, WarehouseSnapshot, CONFIG_FILE_NAME,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Build the bank-churn star-schema warehouse from a customer CSV.
#[derive(Parser)]
#[command(name = "churn-warehouse", version, about, long_about = None)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, default_value = CONFIG_FILE_NAME, global = true, env = "CHURN_WAREHOUSE_CONFIG")]
    config: PathBuf,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full build and publish the five tables.
    Build {
        #[command(flatten)]
        build: BuildArgs,

        /// Output directory for the CSV tables.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// SQLite database to publish into.
        #[arg(long)]
        database: Option<PathBuf>,

        /// Skip the SQLite publish even if a database is configured.
        #[arg(long)]
        no_sqlite: bool,
    },

    /// Run a full build and report every violation without publishing.
    Check {
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Compare the published CSV files against their manifest.
    Verify {
        /// Directory holding a published snapshot.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print KPIs and churn breakdowns of a published warehouse.
    Summary {
        /// Read from this SQLite database.
        #[arg(long)]
        database: Option<PathBuf>,

        /// Read from this CSV directory instead of a database.
        #[arg(short, long, conflicts_with = "database")]
        output: Option<PathBuf>,

        #[arg(long)]
        country: Option<String>,

        /// Age group label, e.g. "26-35".
        #[arg(long)]
        age_group: Option<AgeGroup>,

        #[arg(long)]
        gender: Option<String>,

        /// Breakdown axes to print (default: all).
        #[arg(long = "by", value_delimiter = ',')]
        axes: Vec<ChurnAxis>,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Customer CSV to load.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Snapshot month as YYYY-MM.
    #[arg(long, conflicts_with = "snapshot_now")]
    snapshot: Option<String>,

    /// Stamp the build with the current month.
    #[arg(long)]
    snapshot_now: bool,

    /// Record field used for income buckets.
    #[arg(long, value_parser = parse_income_field)]
    income_field: Option<IncomeField>,

    /// Use build-relative tertiles instead of fixed income thresholds.
    #[arg(long)]
    tertiles: bool,
}

fn parse_income_field(s: &str) -> std::result::Result<IncomeField, String> {
    match s {
        "estimated_salary" | "EstimatedSalary" => Ok(IncomeField::EstimatedSalary),
        "balance" | "Balance" => Ok(IncomeField::Balance),
        other => Err(format!("unknown income field: {other}")),
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "churn_warehouse=info",
        1 => "churn_warehouse=debug",
        _ => "churn_warehouse=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = load_config_from(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Command::Build {
            build,
            output,
            database,
            no_sqlite,
        } => run_build(config, &build, output, database, no_sqlite),
        Command::Check { build } => run_check(config, &build),
        Command::Verify { output } => run_verify(&output.unwrap_or(config.paths.output_dir)),
        Command::Summary {
            database,
            output,
            country,
            age_group,
            gender,
            axes,
        } => {
            let filter = SnapshotFilter {
                country,
                age_group,
                gender,
            };
            run_summary(&config, database, output, &filter, &axes)
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Apply build flags over the file config and resolve the snapshot month.
fn resolve_build(mut config: WarehouseConfig, args: &BuildArgs) -> Result<(WarehouseConfig, SnapshotTime)> {
    if let Some(input) = &args.input {
        config.paths.input = input.clone();
    }
    if let Some(field) = args.income_field {
        config.income.field = field;
    }
    if args.tertiles {
        config.income.banding = IncomeBanding::Tertiles;
    }

    let snapshot = if args.snapshot_now {
        SnapshotTime::now()
    } else if let Some(text) = &args.snapshot {
        SnapshotTime::parse(text)?
    } else {
        SnapshotTime::from(config.snapshot)
    };
    config.snapshot.year = snapshot.year;
    config.snapshot.month = snapshot.month;

    config.validate()?;
    Ok((config, snapshot))
}

fn run_build(
    config: WarehouseConfig,
    args: &BuildArgs,
    output: Option<PathBuf>,
    database: Option<PathBuf>,
    no_sqlite: bool,
) -> Result<()> {
    let (mut config, snapshot) = resolve_build(config, args)?;
    if let Some(output) = output {
        config.paths.output_dir = output;
    }
    if database.is_some() {
        config.paths.database = database;
    }

    println!("🏛️  Churn Warehouse Build - snapshot {snapshot}");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading customers...");
    let records = load_records(&config.paths.input)
        .with_context(|| format!("Failed to load {}", config.paths.input.display()))?;
    println!("✓ Loaded {} records", records.len());

    println!("\n🔧 Building star schema...");
    let warehouse = build_warehouse(&records, &config, snapshot).context("Build failed, nothing was published")?;
    println!("✓ dim_customer: {} rows", warehouse.dim_customer().len());
    println!("✓ dim_geo:      {} rows", warehouse.dim_geo().len());
    println!("✓ dim_time:     {} rows", warehouse.dim_time().len());
    println!("✓ dim_segment:  {} rows", warehouse.dim_segment().len());
    println!("✓ {}: {} rows", churn_warehouse::validation::FACT_TABLE, warehouse.facts().len());

    // Open the database first so a bad target fails before the CSV snapshot is replaced.
    let sqlite = match config.paths.database.as_deref() {
        Some(path) if !no_sqlite => {
            let conn = open_database(path).with_context(|| format!("Failed to open {}", path.display()))?;
            Some((path, conn))
        }
        _ => None,
    };

    println!("\n💾 Publishing CSV tables...");
    let manifest = publish_csv(&warehouse, &config.paths.output_dir)?;
    println!(
        "✓ Wrote {} tables + manifest to {}",
        manifest.tables.len(),
        config.paths.output_dir.display()
    );

    if let Some((path, mut conn)) = sqlite {
        println!("\n🗄️  Publishing to SQLite...");
        let record = publish_to_sqlite(&mut conn, &warehouse)?;
        println!("✓ {} facts published to {} (run {})", record.facts, path.display(), record.run_id);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Build complete");
    Ok(())
}

fn run_check(config: WarehouseConfig, args: &BuildArgs) -> Result<()> {
    let (config, snapshot) = resolve_build(config, args)?;

    println!("🔍 Checking {} (snapshot {snapshot})", config.paths.input.display());
    let records = load_records(&config.paths.input)
        .with_context(|| format!("Failed to load {}", config.paths.input.display()))?;

    match build_warehouse(&records, &config, snapshot) {
        Ok(warehouse) => {
            println!("✅ {} records pass every check", warehouse.facts().len());
            Ok(())
        }
        Err(WarehouseError::SchemaViolation(report)) => {
            println!("❌ {} violation(s):", report.len());
            print!("{report}");
            bail!("schema validation failed")
        }
        Err(e) => Err(e.into()),
    }
}

fn run_verify(dir: &Path) -> Result<()> {
    let mismatched = verify_published(dir).with_context(|| format!("Failed to verify {}", dir.display()))?;
    if mismatched.is_empty() {
        println!("✅ {} matches its manifest", dir.display());
        Ok(())
    } else {
        for table in &mismatched {
            println!("❌ {table} differs from manifest");
        }
        bail!("{} table(s) differ from the manifest", mismatched.len())
    }
}

fn run_summary(
    config: &WarehouseConfig,
    database: Option<PathBuf>,
    output: Option<PathBuf>,
    filter: &SnapshotFilter,
    axes: &[ChurnAxis],
) -> Result<()> {
    let warehouse = match (database.or_else(|| config.paths.database.clone()), output) {
        (_, Some(dir)) => load_published(&dir).with_context(|| format!("Failed to load {}", dir.display()))?,
        (Some(path), None) => {
            let conn = open_database(&path).with_context(|| format!("Failed to open {}", path.display()))?;
            load_warehouse(&conn)?
        }
        (None, None) => load_published(&config.paths.output_dir)
            .with_context(|| format!("Failed to load {}", config.paths.output_dir.display()))?,
    };
    let snapshot = WarehouseSnapshot::from(warehouse);

    let kpis = snapshot.kpis(filter);
    println!("📊 Churn summary - snapshot {}", snapshot.snapshot_time());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Customers:        {}", kpis.customers);
    println!("Churned:          {}", kpis.churned);
    println!("Churn rate:       {:.1}%", kpis.churn_rate);
    println!("Avg balance:      {:.2}", kpis.avg_balance);
    println!("Avg credit score: {:.0}", kpis.avg_credit_score);
    println!("Active members:   {:.1}%", kpis.active_share);

    let axes = if axes.is_empty() { &ChurnAxis::ALL[..] } else { axes };
    for axis in axes {
        println!("\nChurn by {axis}:");
        for stat in snapshot.churn_by(*axis, filter) {
            println!(
                "  {:<10} {:>6} customers  {:>5} churned  {:>5.1}%",
                stat.label, stat.customers, stat.churned, stat.churn_rate
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "RowNumber,CustomerId,Surname,CreditScore,Geography,Gender,Age,Tenure,Balance,NumOfProducts,HasCrCard,IsActiveMember,EstimatedSalary,Exited\n\
                       1,15634602,Hargrave,619,France,Female,42,2,0,1,1,1,101348.88,1\n\
                       2,15647311,Hill,608,Spain,Female,41,1,83807.86,1,0,1,112542.58,0\n";

    fn build_args(input: PathBuf) -> BuildArgs {
        BuildArgs {
            input: Some(input),
            snapshot: Some("2019-12".to_string()),
            snapshot_now: false,
            income_field: None,
            tertiles: false,
        }
    }

    #[test]
    fn test_unusable_database_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("customers.csv");
        std::fs::write(&input, CSV).unwrap();

        // A regular file where the database directory should be.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let output = dir.path().join("processed");

        let result = run_build(
            WarehouseConfig::default(),
            &build_args(input),
            Some(output.clone()),
            Some(blocker.join("warehouse.db")),
            false,
        );

        assert!(result.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_build_publishes_csv_and_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("customers.csv");
        std::fs::write(&input, CSV).unwrap();
        let output = dir.path().join("processed");
        let database = dir.path().join("warehouse.db");

        run_build(
            WarehouseConfig::default(),
            &build_args(input),
            Some(output.clone()),
            Some(database.clone()),
            false,
        )
        .unwrap();

        assert!(verify_published(&output).unwrap().is_empty());
        let conn = open_database(&database).unwrap();
        assert_eq!(load_warehouse(&conn).unwrap().facts().len(), 2);
    }
}
