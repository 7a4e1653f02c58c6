use std::path::PathBuf;

use clap::{Parser, Subcommand};

use retaildw::{
    AggMethod, FactQuery, GroupRef, HydrateOptions, HydrateReport, InputFormat, PeriodKey,
    PeriodLevel, RetailDW, SourceType,
};

#[derive(Parser)]
#[command(name = "retaildw", about = "Retail and marketing data warehouse CLI")]
struct Cli {
    /// Database path (default: ~/.retaildw/retaildw.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl retaildw::HydrateProgress for StderrProgress {
    fn on_extracted(&self, source: &str, rows: usize) {
        eprintln!("Extracted {rows} rows from {source}");
    }

    fn on_metric_start(&self, metric_id: i64, index: usize, total: usize) {
        eprintln!("[{}/{}] Aggregating metric {}...", index + 1, total, metric_id);
    }

    fn on_metric_complete(&self, report: &retaildw::MetricReport) {
        match &report.error {
            Some(err) => eprintln!("  Failed: {err}"),
            None => eprintln!("  Done: {:?}", report.status),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load reference data (metrics, sites, camps) from JSON files
    Load {
        #[command(subcommand)]
        target: LoadTarget,
    },
    /// Extract a source file, insert its rows and recompute rollups
    Hydrate {
        /// Source file path
        file: PathBuf,
        /// Input format: json or csv (default: from the file extension)
        #[arg(long)]
        format: Option<String>,
        /// Required file-name pattern, e.g. RetailData*
        #[arg(long)]
        source: Option<String>,
        /// Archive directory (default: the datalake_dir config value)
        #[arg(long)]
        datalake: Option<PathBuf>,
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recompute rollups for one metric
    Rollup {
        #[command(subcommand)]
        target: RollupTarget,
    },
    /// Query fact rows
    Query {
        /// Metric id (repeatable)
        #[arg(long = "metric")]
        metrics: Vec<i64>,
        /// Metric category: retail, marketing, survey, other or * (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Group: site id, camp name, MAIN STORE, MARINE MART or all (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,
        /// Period level 1-4 (repeatable)
        #[arg(long = "level")]
        levels: Vec<i64>,
        /// Exact period start date
        #[arg(long)]
        date: Option<String>,
        /// Dates on or after
        #[arg(long)]
        from: Option<String>,
        /// Dates on or before
        #[arg(long)]
        to: Option<String>,
        /// Period selector (2024, 2024-Q2, 2024-03, 2024-03-15)
        #[arg(long)]
        period: Option<String>,
        /// Maximum results
        #[arg(long)]
        limit: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Output as CSV
        #[arg(long)]
        csv: bool,
        /// Output as the nested category/metric/group report
        #[arg(long)]
        nested: bool,
        /// Count only (no output rows)
        #[arg(long)]
        count: bool,
    },
    /// List configured metrics
    Metrics {
        /// Restrict to a category (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show warehouse status
    Status,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum LoadTarget {
    /// Load metric definitions
    Metrics { file: PathBuf },
    /// Load the site directory
    Sites { file: PathBuf },
    /// Load camp locations
    Camps { file: PathBuf },
    /// Load metrics.json, camps.json and sites.json from a directory
    All { dir: PathBuf },
}

#[derive(Subcommand)]
enum RollupTarget {
    /// Recompute monthly/quarterly/yearly rows from the base level
    Time {
        metric_id: i64,
        /// Aggregation method override (sum, mean, median, min, max, count, first, last)
        #[arg(long)]
        method: Option<String>,
    },
    /// Recompute camp, store-format and "all" rows from site rows
    Groups {
        metric_id: i64,
        #[arg(long)]
        method: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => retaildw::Database::open_at(path).await?,
        None => retaildw::Database::open().await?,
    };
    let dw = RetailDW::new(db);

    match cli.command {
        Commands::Load { target } => handle_load(&dw, target).await?,
        Commands::Hydrate {
            file,
            format,
            source,
            datalake,
            json,
        } => {
            let format = format.as_deref().map(str::parse::<InputFormat>).transpose()?;
            let options = HydrateOptions {
                source: source.as_deref().map(str::parse::<SourceType>).transpose()?,
                datalake_dir: datalake,
            };
            let report = dw.hydrate(&file, format, options, &StderrProgress).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_hydrate_report(&report);
            }
            if report.failed_metrics() > 0 {
                anyhow::bail!("{} metric(s) failed", report.failed_metrics());
            }
        }
        Commands::Rollup { target } => handle_rollup(&dw, target).await?,
        Commands::Query {
            metrics,
            categories,
            groups,
            levels,
            date,
            from,
            to,
            period,
            limit,
            json,
            csv,
            nested,
            count,
        } => {
            let mut builder = FactQuery::new();
            let mut metric_ids = metrics;
            if !categories.is_empty() {
                metric_ids.extend(dw.metric_ids_for_categories(&categories).await?);
                if metric_ids.is_empty() {
                    println!("No metrics in the requested categories.");
                    return Ok(());
                }
            }
            builder = builder.metrics(metric_ids);
            for g in &groups {
                builder = builder.group(&GroupRef::decode(g)?);
            }
            let levels = levels
                .into_iter()
                .map(PeriodLevel::try_from_i64)
                .collect::<retaildw::Result<Vec<_>>>()?;
            builder = builder.levels(levels);
            if let Some(p) = period {
                builder = builder.period(PeriodKey::parse(&p)?);
            }
            if let Some(d) = date {
                builder = builder.date(&d)?;
            }
            builder = builder.date_range(from.as_deref(), to.as_deref())?;
            if let Some(n) = limit {
                builder = builder.limit(n);
            }

            if count {
                let n = builder.count(dw.db()).await?;
                println!("{n}");
            } else if json {
                let output = builder.to_json(dw.db()).await?;
                println!("{output}");
            } else if csv {
                let output = builder.to_csv(dw.db()).await?;
                print!("{output}");
            } else if nested {
                let report = dw.nested_report(builder).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let rows = builder.facts(dw.db()).await?;
                if rows.is_empty() {
                    println!("No facts found.");
                } else {
                    for row in &rows {
                        let value = row
                            .value
                            .map_or_else(|| "null".to_string(), |v| v.to_string());
                        println!(
                            "metric {} | {} | level {} | {} | {value}",
                            row.metric_id, row.group_name, row.period_level, row.date
                        );
                    }
                    println!("\n{} facts", rows.len());
                }
            }
        }
        Commands::Metrics { categories, json } => {
            let wanted = dw.metric_ids_for_categories(&categories).await?;
            let metrics: Vec<retaildw::Metric> = dw
                .list_metrics()
                .await?
                .into_iter()
                .filter(|m| wanted.contains(&m.id))
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else if metrics.is_empty() {
                println!("No metrics configured.");
            } else {
                for m in &metrics {
                    let rollups: Vec<&str> = m.rollups.iter().map(|l| l.name()).collect();
                    let method = m.agg_method.map_or_else(|| "-".to_string(), |a| a.to_string());
                    println!(
                        "{:>5}  {} [{}] base={} rollups={} method={method}",
                        m.id,
                        m.name,
                        m.categories.primary(),
                        m.base.name(),
                        if rollups.is_empty() { "-".to_string() } else { rollups.join(",") },
                    );
                }
            }
        }
        Commands::Status => print_status(&dw).await?,
        Commands::Config { action } => handle_config(&dw, action).await?,
    }

    Ok(())
}

async fn handle_load(dw: &RetailDW, target: LoadTarget) -> anyhow::Result<()> {
    let reports = match target {
        LoadTarget::Metrics { file } => vec![("metrics".to_string(), dw.load_metrics(&file).await?)],
        LoadTarget::Sites { file } => vec![("sites".to_string(), dw.load_sites(&file).await?)],
        LoadTarget::Camps { file } => vec![("camps".to_string(), dw.load_camps(&file).await?)],
        LoadTarget::All { dir } => dw.load_directory(&dir).await?,
    };
    if reports.is_empty() {
        println!("Nothing loaded.");
    }
    for (name, report) in reports {
        println!("{name}: {} loaded, {} skipped", report.loaded, report.skipped);
    }
    Ok(())
}

async fn handle_rollup(dw: &RetailDW, target: RollupTarget) -> anyhow::Result<()> {
    let report = match target {
        RollupTarget::Time { metric_id, method } => {
            dw.rollup_time(metric_id, parse_method(method.as_deref())?).await?
        }
        RollupTarget::Groups { metric_id, method } => {
            dw.rollup_groups(metric_id, parse_method(method.as_deref())?).await?
        }
    };
    println!("Metric {}", report.metric_id);
    println!("  Purged:  {}", report.purged);
    println!("  Written: {}", report.written);
    if report.unmapped_camp_sites > 0 || report.unmapped_format_sites > 0 {
        println!(
            "  Sites without camp: {}, without store format: {}",
            report.unmapped_camp_sites, report.unmapped_format_sites
        );
    }
    Ok(())
}

fn parse_method(method: Option<&str>) -> anyhow::Result<Option<AggMethod>> {
    Ok(method.map(str::parse::<AggMethod>).transpose()?)
}

async fn print_status(dw: &RetailDW) -> anyhow::Result<()> {
    let status = dw.status().await?;
    println!("Warehouse Status");
    println!("  Metrics: {}", status.metrics);
    println!("  Sites:   {}", status.sites);
    println!("  Camps:   {}", status.camps);
    println!("  Facts:   {}", status.facts);
    for (metric_id, level, rows) in &status.facts_by_level {
        let name = PeriodLevel::from_i64(*level).map_or("?", |l| l.name());
        println!("    metric {metric_id:>5} {name:<9} {rows}");
    }
    Ok(())
}

async fn handle_config(dw: &RetailDW, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match dw.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            dw.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = dw.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

fn print_hydrate_report(report: &HydrateReport) {
    println!("Hydrate: {}", report.source);
    if let Some(st) = report.source_type {
        println!("  Source:   {st}");
    }
    println!("  Adapter:  {}", report.adapter);
    println!("  Rows:     {} extracted, {} inserted", report.rows_extracted, report.rows_inserted);
    if let Some(ref dest) = report.archived_to {
        println!("  Archived: {}", dest.display());
    }
    for m in &report.metrics {
        let time = m.time.as_ref().map_or(0, |t| t.written);
        let groups = m
            .groups
            .as_ref()
            .map_or_else(|| "-".to_string(), |g| g.written.to_string());
        println!(
            "  metric {:>5}: {:?} (time rows {time}, group rows {groups})",
            m.metric_id, m.status
        );
        if let Some(ref err) = m.error {
            println!("    Error: {err}");
        }
    }
}
