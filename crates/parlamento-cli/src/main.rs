use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use futures::stream::{StreamExt, TryStreamExt};
use log::LevelFilter;
use parlamento::export::export_to_file;
use parlamento::ingest::{self, RunMode};
use parlamento::parser::DivLayout;
use parlamento::scraper::{LegislatureIndex, fetch_attendance};
use parlamento::store::SqliteStore;
use parlamento::types::RawMeeting;
use parlamento::utils::MeetingStats;
use parlamento::{ScraperConfig, Session};

const DEFAULT_DB: &str = "parlamento.sqlite3";

#[derive(Parser)]
#[command(name = "parlamento")]
#[command(about = "A parlamento.pt plenary attendance scraper", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[arg(
        short = 'v',
        long,
        global = true,
        help = "Report progress for every page and meeting"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List plenary meetings without storing anything
    List {
        #[arg(
            long,
            help = "Maximum number of meetings to list",
            value_parser = clap::value_parser!(u16).range(1..)
        )]
        limit: Option<u16>,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,

        #[arg(long, help = "Start at this legislature (e.g. XIII)")]
        legislature: Option<String>,
    },
    /// Fetch the attendance list of a single meeting
    Attendance {
        #[arg(help = "Attendance detail identifier (BID) of the meeting")]
        bid: i64,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Read every meeting and its attendance into the database
    Read {
        #[arg(long, default_value = DEFAULT_DB, help = "SQLite database file")]
        db: PathBuf,

        #[arg(long, help = "Start at this legislature (e.g. XIII)")]
        legislature: Option<String>,
    },
    /// Read only the meetings newer than the most recent stored one
    Update {
        #[arg(long, default_value = DEFAULT_DB, help = "SQLite database file")]
        db: PathBuf,
    },
    /// Write every stored attendance record to a CSV file
    Export {
        #[arg(help = "Destination CSV file")]
        file: PathBuf,

        #[arg(long, default_value = DEFAULT_DB, help = "SQLite database file")]
        db: PathBuf,
    },
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

fn new_session(config: &ScraperConfig) -> Session {
    Session::new(config).unwrap_or_else(|e| {
        log::error!("Error creating HTTP session: {}", e);
        process::exit(1);
    })
}

fn open_store(db: &Path) -> SqliteStore {
    SqliteStore::open(db).unwrap_or_else(|e| {
        log::error!("Error opening database {}: {}", db.display(), e);
        process::exit(1);
    })
}

async fn open_index(
    config: &ScraperConfig,
    legislature: Option<&str>,
) -> LegislatureIndex<Session> {
    LegislatureIndex::open(new_session(config), DivLayout, config.clone(), legislature)
        .await
        .unwrap_or_else(|e| {
            log::error!("Error opening meetings index: {}", e);
            process::exit(1);
        })
}

async fn scrape(config: &ScraperConfig, db: &Path, legislature: Option<&str>, mode: RunMode) {
    let mut store = open_store(db);
    let mut index = open_index(config, legislature).await;
    let mut details = new_session(config);

    match ingest::run(&mut index, &mut details, &mut store, mode).await {
        Ok(stats) => print!("{}", stats),
        Err(e) => {
            log::error!("Scrape failed: {}", e);
            process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    let config = ScraperConfig {
        verbose: cli.verbose,
        ..Default::default()
    };

    match cli.command {
        Commands::List {
            limit,
            format,
            legislature,
        } => {
            let mut index = open_index(&config, legislature.as_deref()).await;
            let limit = limit.map_or(usize::MAX, usize::from);

            let meetings: Vec<RawMeeting> = index
                .meetings()
                .take(limit)
                .try_collect()
                .await
                .unwrap_or_else(|e| {
                    log::error!("Error listing meetings: {}", e);
                    process::exit(1);
                });

            match format {
                OutputFormat::Json => serialize_json(&meetings),
                OutputFormat::Text => {
                    if meetings.is_empty() {
                        println!("No meetings to display.");
                    } else {
                        for (i, meeting) in meetings.iter().enumerate() {
                            println!("{:>4}. {}", i + 1, meeting);
                        }
                        print!("{}", MeetingStats::from_meetings(&meetings));
                    }
                }
            }
        }

        Commands::Attendance { bid, format } => {
            let mut session = new_session(&config);
            let rows = fetch_attendance(&mut session, &DivLayout, &config.site, bid)
                .await
                .unwrap_or_else(|e| {
                    log::error!("Error fetching attendance for {}: {}", bid, e);
                    process::exit(1);
                });

            match format {
                OutputFormat::Json => serialize_json(&rows),
                OutputFormat::Text => {
                    for row in &rows {
                        println!("{}", row);
                    }
                }
            }
        }

        Commands::Read { db, legislature } => {
            scrape(&config, &db, legislature.as_deref(), RunMode::FullRead).await;
        }

        Commands::Update { db } => {
            scrape(&config, &db, None, RunMode::Update).await;
        }

        Commands::Export { file, db } => {
            let mut store = open_store(&db);
            if let Err(e) = export_to_file(&mut store, &file) {
                log::error!("Error exporting to {}: {}", file.display(), e);
                process::exit(1);
            }
        }
    }
}
