use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use sortie_attendance::classify::EngineConfig;
use sortie_attendance::coordinator::{FetchOutcome, ReportCoordinator};
use sortie_attendance::db::PgStore;
use sortie_attendance::models::ReportFilters;
use sortie_attendance::report::{self, ReportPayload};
use sortie_attendance::store::{AttendanceStore, SnapshotStore};

const MAX_SNIVEL_WINDOW_MINUTES: i64 = 7 * 24 * 60;

#[derive(Parser)]
#[command(name = "sortie-attendance")]
#[command(about = "Attendance classification and reporting for squadron training cycles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Source {
    /// Postgres connection string for the squadron database
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
    /// Read data from a JSON snapshot instead of Postgres; wins over
    /// --database-url and DATABASE_URL when both are given
    #[arg(long)]
    snapshot: Option<PathBuf>,
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

enum StoreChoice<'a> {
    Snapshot(&'a Path),
    Postgres(&'a str),
}

impl Source {
    fn choice(&self) -> anyhow::Result<StoreChoice<'_>> {
        if let Some(path) = &self.snapshot {
            if self.database_url.is_some() {
                info!("Using --snapshot; ignoring the configured database URL");
            }
            return Ok(StoreChoice::Snapshot(path));
        }
        self.database_url
            .as_deref()
            .map(StoreChoice::Postgres)
            .context("DATABASE_URL must be set, or pass --snapshot")
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the attendance report for a cycle
    Report {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        cycle: Uuid,
        #[arg(long)]
        squadron: Vec<Uuid>,
        #[arg(long)]
        qualification: Vec<Uuid>,
        #[arg(long)]
        pilot: Vec<Uuid>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
        /// Minutes before event start that count as a last-minute snivel (up to one week)
        #[arg(long, default_value_t = 120, value_parser = clap::value_parser!(i64).range(0..=MAX_SNIVEL_WINDOW_MINUTES))]
        snivel_window_minutes: i64,
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Explain one pilot's classification for one event
    Classify {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        cycle: Uuid,
        #[arg(long)]
        event: Uuid,
        #[arg(long)]
        pilot: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sortie_attendance=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Report {
            source,
            cycle,
            squadron,
            qualification,
            pilot,
            format,
            snivel_window_minutes,
            out,
        } => {
            let filters = ReportFilters {
                squadron_ids: squadron.into_iter().collect(),
                qualification_ids: qualification.into_iter().collect(),
                pilot_ids: pilot.into_iter().collect(),
            };
            let config = EngineConfig {
                snivel_window: chrono::Duration::minutes(snivel_window_minutes),
            };
            let payload = with_store(&source, cycle, filters, config).await?;

            let rendered = match format {
                OutputFormat::Csv => report::export_csv(&payload.chart_data)?,
                OutputFormat::Json => serde_json::to_string_pretty(&*payload)?,
                OutputFormat::Markdown => report::build_markdown(&payload),
            };
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
        Commands::Classify {
            source,
            cycle,
            event,
            pilot,
        } => {
            let filters = ReportFilters {
                pilot_ids: [pilot].into(),
                ..ReportFilters::default()
            };
            let payload = with_store(&source, cycle, filters, EngineConfig::default()).await?;
            let record = payload
                .attendance
                .iter()
                .filter(|attendance| attendance.event_id == event)
                .flat_map(|attendance| attendance.pilots.iter())
                .find(|record| record.pilot_id == pilot);

            let Some(record) = record else {
                println!("Pilot {pilot} was not on the active roster for event {event}.");
                return Ok(());
            };
            println!(
                "{} ({}): {}",
                record.callsign,
                record.board_number,
                record.classification.label()
            );
            if record.history.is_empty() {
                println!("  no responses recorded");
            }
            for row in &record.history {
                println!(
                    "  {} rsvp={} roll_call={} via {}",
                    row.recorded_at,
                    row.rsvp.map_or("-".to_string(), |v| format!("{v:?}")),
                    row.roll_call.map_or("-".to_string(), |v| format!("{v:?}")),
                    row.discord_event_id
                );
            }
        }
    }

    Ok(())
}

async fn with_store(
    source: &Source,
    cycle_id: Uuid,
    filters: ReportFilters,
    config: EngineConfig,
) -> anyhow::Result<Arc<ReportPayload>> {
    match source.choice()? {
        StoreChoice::Snapshot(path) => {
            let store = SnapshotStore::from_path(path)?;
            fetch(store, cycle_id, filters, config).await
        }
        StoreChoice::Postgres(database_url) => {
            let store = PgStore::connect(database_url, source.max_connections).await?;
            fetch(store, cycle_id, filters, config).await
        }
    }
}

async fn fetch<S: AttendanceStore + 'static>(
    store: S,
    cycle_id: Uuid,
    filters: ReportFilters,
    config: EngineConfig,
) -> anyhow::Result<Arc<ReportPayload>> {
    let coordinator = ReportCoordinator::new(Arc::new(store), config);
    match coordinator.fetch_report(cycle_id, filters).await? {
        FetchOutcome::Committed(payload) => Ok(payload),
        FetchOutcome::Superseded => bail!("report request for cycle {cycle_id} was superseded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        let cycle = Uuid::new_v4().to_string();
        let mut argv = vec!["sortie-attendance", "report", "--cycle", cycle.as_str()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv)
    }

    fn report_parts(cli: Cli) -> (Source, i64) {
        match cli.command {
            Commands::Report {
                source,
                snivel_window_minutes,
                ..
            } => (source, snivel_window_minutes),
            Commands::Classify { .. } => panic!("expected report command"),
        }
    }

    #[test]
    fn snapshot_wins_over_database_url() {
        let cli = parse(&["--snapshot", "data.json", "--database-url", "postgres://localhost/ops"]).unwrap();
        let (source, _) = report_parts(cli);
        assert!(matches!(source.choice().unwrap(), StoreChoice::Snapshot(path) if path == Path::new("data.json")));
    }

    #[test]
    fn database_url_used_without_snapshot() {
        let cli = parse(&["--database-url", "postgres://localhost/ops"]).unwrap();
        let (source, _) = report_parts(cli);
        assert!(matches!(source.choice().unwrap(), StoreChoice::Postgres("postgres://localhost/ops")));
    }

    #[test]
    fn snivel_window_must_be_between_zero_and_one_week() {
        let (_, minutes) = report_parts(parse(&[]).unwrap());
        assert_eq!(minutes, 120);
        let (_, minutes) = report_parts(parse(&["--snivel-window-minutes", "10080"]).unwrap());
        assert_eq!(minutes, MAX_SNIVEL_WINDOW_MINUTES);

        assert!(parse(&["--snivel-window-minutes=-5"]).is_err());
        assert!(parse(&["--snivel-window-minutes", "10081"]).is_err());
        assert!(parse(&["--snivel-window-minutes", "9223372036854775807"]).is_err());
    }
}
