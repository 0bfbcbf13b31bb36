use anyhow::Result;
use chrono::NaiveDate;
use std::path::PathBuf;

use photodate::config::Config;
use photodate::logging;
use photodate::service::PhotoService;

enum Command {
    Scan,
    List { page: usize },
    Search { query: String },
    Correct { base_name: String, date: NaiveDate },
    Ignore { base_name: String },
    Groups,
    Process,
    Reconcile,
    Status { json: bool },
}

struct CliArgs {
    command: Command,
    config_path: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut positional: Vec<String> = Vec::new();
    let mut page = 1usize;
    let mut json = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("photodate {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--page" | "-p" => {
                if i + 1 < args.len() {
                    page = args[i + 1].parse().unwrap_or(1);
                    i += 1;
                }
            }
            "--json" => {
                json = true;
            }
            other => {
                positional.push(other.to_string());
            }
        }
        i += 1;
    }

    let command = match positional.first().map(|s| s.as_str()) {
        Some("scan") => Command::Scan,
        Some("list") => Command::List { page },
        Some("search") => match positional.get(1) {
            Some(query) => Command::Search {
                query: query.clone(),
            },
            None => usage_error("search requires a query"),
        },
        Some("correct") => match (positional.get(1), positional.get(2)) {
            (Some(base_name), Some(date)) => match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
                Ok(date) => Command::Correct {
                    base_name: base_name.clone(),
                    date,
                },
                Err(_) => usage_error("correct expects a date formatted YYYY-MM-DD"),
            },
            _ => usage_error("correct requires a set name and a date"),
        },
        Some("ignore") => match positional.get(1) {
            Some(base_name) => Command::Ignore {
                base_name: base_name.clone(),
            },
            None => usage_error("ignore requires a set name"),
        },
        Some("groups") => Command::Groups,
        Some("process") => Command::Process,
        Some("reconcile") => Command::Reconcile,
        Some("status") | None => Command::Status { json },
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    };

    CliArgs {
        command,
        config_path,
    }
}

fn usage_error(message: &str) -> ! {
    eprintln!("Error: {}", message);
    print_help();
    std::process::exit(1);
}

fn print_help() {
    println!(
        r#"photodate - scanned-photo ingestion, date correction and grouping

USAGE:
    photodate [OPTIONS] <COMMAND>

COMMANDS:
    scan                      Walk the unprocessed tree and update the catalog
    list                      List unprocessed photo sets (use --page N)
    search <QUERY>            Find unprocessed sets by name
    correct <SET> <DATE>      Apply DATE (YYYY-MM-DD) to every file of SET
    ignore <SET>              Mark every file of SET as ignored
    groups                    Show current similarity groups
    process                   Scan, extract features and regroup
    reconcile                 Drop catalog records whose file is gone
    status                    Show catalog counters (default command)

OPTIONS:
    --config, -c PATH   Path to config file
    --page, -p N        Page of the listing (default: 1)
    --json              Emit status as JSON
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PHOTODATE_LOG       Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/photodate/config.toml

See also: photodate-daemon --help"#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    let _ = logging::init(None);

    let config = match args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let interval_secs = config.scheduler.interval_secs;
    let service = PhotoService::new(config)?;

    match args.command {
        Command::Scan => {
            let result = service.scan()?;
            println!(
                "{} files found, {} new, {} thumbnails",
                result.total_found, result.inserted, result.thumbnails
            );
        }
        Command::List { page } => {
            let listing = service.unprocessed_sets(page)?;
            println!(
                "Page {}/{} ({} sets total)",
                listing.page, listing.total_pages, listing.total_sets
            );
            for set in &listing.sets {
                print_set(set);
            }
        }
        Command::Search { query } => {
            let sets = service.search(&query)?;
            println!("{} matching sets", sets.len());
            for set in &sets {
                print_set(set);
            }
        }
        Command::Correct { base_name, date } => {
            let report = service.correct_date(&base_name, date)?;
            for outcome in &report.outcomes {
                match &outcome.result {
                    Ok(new_path) => println!("  ok   {} -> {}", outcome.original_path, new_path),
                    Err(e) => println!("  FAIL {} ({})", outcome.original_path, e),
                }
            }
            if report.success() {
                println!("Set {} corrected to {}", report.base_name, date);
            } else {
                eprintln!("Set {} partially corrected, see failures above", report.base_name);
                std::process::exit(1);
            }
        }
        Command::Ignore { base_name } => {
            let marked = service.ignore_set(&base_name)?;
            println!("Ignored {} files of set {}", marked, base_name);
        }
        Command::Groups => {
            let groups = service.groups()?;
            println!("{} similarity groups", groups.len());
            for group in &groups {
                println!(
                    "  {} (score {:.2}, {} members)",
                    group.name.as_deref().unwrap_or("unnamed"),
                    group.similarity_score.unwrap_or(0.0),
                    group.members.len()
                );
                for member in &group.members {
                    println!("    {}", member.path);
                }
            }
        }
        Command::Process => {
            let summary = service.run_processing()?;
            println!(
                "{} new photos, {} embeddings extracted, {} groups",
                summary.scan.inserted, summary.embeddings, summary.groups
            );
        }
        Command::Reconcile => {
            let removed = service.reconcile()?;
            println!("Removed {} records for missing files", removed);
        }
        Command::Status { json } => {
            let status = service.status()?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "unprocessed": status.unprocessed,
                        "processed": status.processed,
                        "ignored": status.ignored,
                        "groups": status.groups,
                        "schedule_interval_secs": interval_secs,
                    })
                );
            } else {
                println!("Unprocessed: {}", status.unprocessed);
                println!("Processed:   {}", status.processed);
                println!("Ignored:     {}", status.ignored);
                println!("Groups:      {}", status.groups);
                if interval_secs == 0 {
                    println!("Schedule:    disabled");
                } else {
                    println!("Schedule:    every {}s", interval_secs);
                }
            }
        }
    }

    Ok(())
}

fn print_set(set: &photodate::db::PhotoSet) {
    let date = set.default_date.as_deref().unwrap_or("?");
    println!(
        "  {} [{}] front={} back={} variants={}",
        set.base_name,
        date,
        set.front.is_some(),
        set.back.is_some(),
        set.variants.len()
    );
}
