mod aggregate;
mod chart;
mod config;
mod error;
mod fetch;
mod forecast;
mod gcp;
mod normalize;
mod parser;
mod pipeline;
mod release;
mod warehouse;

use std::io::Read;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::pipeline::RunOptions;
use crate::release::ReleaseRecord;

#[derive(Parser)]
#[command(name = "relnotes", about = "Release-note timeline and forecast pipeline")]
struct Cli {
    /// Configuration file (default: ./relnotes.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape all products, replace the warehouse table, publish the timeline chart
    Timeline {
        /// Trigger event JSON (`-` reads stdin)
        #[arg(long)]
        event: Option<String>,
        /// Also write the chart to this path
        #[arg(long)]
        out: Option<PathBuf>,
        /// Skip the object-storage upload (implies --no-signal)
        #[arg(long)]
        no_upload: bool,
        /// Do not signal the forecast pipeline
        #[arg(long)]
        no_signal: bool,
    },
    /// Retrain the forecast model and publish the forecast chart
    Forecast {
        /// Trigger event JSON (`-` reads stdin)
        #[arg(long)]
        event: Option<String>,
        /// Also write the chart to this path
        #[arg(long)]
        out: Option<PathBuf>,
        /// Skip the object-storage upload
        #[arg(long)]
        no_upload: bool,
    },
    /// Scrape one product's page and print its release notes
    Extract {
        /// Product id (e.g. bq, bqml)
        product: String,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Show the published table
    Show {
        /// Filter by product id
        #[arg(short, long)]
        product: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Timeline {
            event,
            out,
            no_upload,
            no_signal,
        } => {
            let event = read_event(event)?;
            let opts = RunOptions {
                upload: !no_upload,
                signal: !no_signal,
                out,
            };
            let summary = pipeline::run_timeline(&settings, &opts, event.as_deref()).await?;
            summary.print();
            Ok(())
        }
        Commands::Forecast {
            event,
            out,
            no_upload,
        } => {
            let event = read_event(event)?;
            let opts = RunOptions {
                upload: !no_upload,
                signal: false,
                out,
            };
            let summary = pipeline::run_forecast(&settings, &opts, event.as_deref()).await?;
            summary.print();
            Ok(())
        }
        Commands::Extract { product, limit } => {
            let Some(p) = settings.product(&product) else {
                bail!(
                    "unknown product '{}' (configured: {})",
                    product,
                    settings
                        .products
                        .iter()
                        .map(|p| p.id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            };
            let fetcher = fetch::Fetcher::new(&settings.fetch)?;
            let records = parser::extract(&fetcher, &p.id, &p.url).await?;
            print_records(&records, limit);
            Ok(())
        }
        Commands::Show { product, limit } => {
            let gcp = match settings.warehouse.backend {
                config::Backend::Bigquery => Some(
                    gcp::GcpClient::connect(&settings.gcp)
                        .await
                        .context("Failed to open GCP session")?,
                ),
                config::Backend::Sqlite => None,
            };
            let wh = warehouse::Warehouse::open(&settings, gcp.as_ref())?;
            let dataset = wh
                .load()
                .await
                .with_context(|| format!("Failed to read {}", wh.describe()))?;
            let rows: Vec<ReleaseRecord> = match product.as_deref() {
                Some(id) => aggregate::filter_product(&dataset, id).cloned().collect(),
                None => dataset,
            };
            if rows.is_empty() {
                println!("No release notes found. Run 'timeline' first.");
                return Ok(());
            }
            print_records(&rows, limit);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn read_event(arg: Option<String>) -> anyhow::Result<Option<String>> {
    match arg.as_deref() {
        Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read trigger event from stdin")?;
            Ok(Some(buf))
        }
        _ => Ok(arg),
    }
}

fn print_records(records: &[ReleaseRecord], limit: usize) {
    println!(
        "{:>3} | {:<10} | {:<12} | {:<6} | {:<60}",
        "#", "Date", "Type", "Prod", "Description"
    );
    println!("{}", "-".repeat(104));

    for (i, r) in records.iter().take(limit).enumerate() {
        println!(
            "{:>3} | {:<10} | {:<12} | {:<6} | {:<60}",
            i + 1,
            r.date.to_string(),
            r.release_kind,
            truncate(&r.product, 6),
            truncate(&r.description, 60)
        );
    }

    if records.len() > limit {
        println!("\n{} of {} release notes shown", limit, records.len());
    } else {
        println!("\n{} release notes", records.len());
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("BigQuery", 20), "BigQuery");
        assert_eq!(truncate("Données résumées", 7), "Données...");
    }

    #[test]
    fn durations_format_by_magnitude() {
        use std::time::Duration;
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Cli::parse_from(["relnotes", "timeline", "--no-upload", "--out", "t.html"]);
        match cli.command {
            Commands::Timeline {
                no_upload,
                no_signal,
                out,
                ..
            } => {
                assert!(no_upload);
                assert!(!no_signal);
                assert_eq!(out, Some(PathBuf::from("t.html")));
            }
            _ => panic!("expected timeline"),
        }
        let cli = Cli::parse_from(["relnotes", "show", "-p", "bqml", "--config", "x.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn event_argument_passes_through() {
        assert_eq!(read_event(None).unwrap(), None);
        assert_eq!(
            read_event(Some("{}".into())).unwrap().as_deref(),
            Some("{}")
        );
    }
}
