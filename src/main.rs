mod bag;
mod core;
mod decoder;
mod shared;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bag::Connection;
use crate::core::{BaseExtractor, ExtractionJob, ImageExtractor, JobOverrides, NamingScheme};
use crate::utils::time_utils;

#[derive(Parser)]
#[command(author, version, about = "Extract image frames from robot sensor bags", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every connection: topic, message type and record count
    Info {
        #[arg(short, long)]
        bag: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List the topics recorded in a bag
    Topics {
        #[arg(short, long)]
        bag: PathBuf,
    },
    /// Print a one-line summary of every record
    Messages {
        #[arg(short, long)]
        bag: PathBuf,
        #[arg(short, long = "topic", help = "Topic to include (repeatable); all topics when omitted")]
        topics: Vec<String>,
        #[arg(short, long, default_value_t = num_cpus::get())]
        cores: usize,
    },
    /// Print the log timestamp of every record
    Timestamps {
        #[arg(short, long)]
        bag: PathBuf,
        #[arg(short, long = "topic", help = "Topic to include (repeatable); all topics when omitted")]
        topics: Vec<String>,
        #[arg(short, long, default_value_t = 1)]
        cores: usize,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Decode image topics and write one PNG per record
    Extract {
        #[arg(short, long, help = "JSON job file; flags below override its values")]
        job: Option<PathBuf>,
        #[arg(short, long)]
        bag: Option<PathBuf>,
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        #[arg(short, long = "topic", help = "Image topic to extract (repeatable)")]
        topics: Vec<String>,
        #[arg(short, long, help = "Writer threads [default: logical CPUs]")]
        cores: Option<usize>,
        #[arg(short, long, default_value_t = false, help = "Keep frames already on disk (resume)")]
        skip_existing: bool,
        #[arg(short, long, value_enum)]
        naming: Option<NamingScheme>,
        #[arg(long, default_value_t = false)]
        no_progress: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Serialize)]
struct TimestampRow {
    topic: String,
    timestamp: u64,
}

fn selection(topics: &[String]) -> Box<dyn Fn(&Connection) -> bool + Send + Sync> {
    if topics.is_empty() {
        Box::new(|_: &Connection| true)
    } else {
        Box::new(BaseExtractor::topics_filter(topics))
    }
}

fn main() -> Result<()> {
    crate::utils::logger::init();

    let cli = Cli::parse();
    let result = run(cli);
    if let Err(e) = &result {
        crate::utils::logger::error(&format!("{:#}", e));
    }
    result
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Info { bag, json } => {
            let extractor = BaseExtractor::new(bag, 1);
            if json {
                println!("{}", serde_json::to_string_pretty(&extractor.get_connections()?)?);
            } else {
                extractor.print_info()?;
            }
        }
        Commands::Topics { bag } => {
            BaseExtractor::new(bag, 1).print_topics()?;
        }
        Commands::Messages { bag, topics, cores } => {
            BaseExtractor::new(bag, cores).print_messages(selection(&topics))?;
        }
        Commands::Timestamps {
            bag,
            topics,
            cores,
            json,
        } => {
            let timestamps = BaseExtractor::new(bag, cores).get_timestamps(selection(&topics))?;
            if json {
                let rows: Vec<TimestampRow> = timestamps
                    .into_iter()
                    .map(|(topic, timestamp)| TimestampRow { topic, timestamp })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for (topic, timestamp) in timestamps {
                    println!("{}\t{}\t{}", topic, timestamp, time_utils::format_ns(timestamp));
                }
            }
        }
        Commands::Extract {
            job,
            bag,
            output_dir,
            topics,
            cores,
            skip_existing,
            naming,
            no_progress,
            json,
        } => {
            let job = ExtractionJob::resolve(
                job.as_deref(),
                JobOverrides {
                    bag,
                    output_dir,
                    topics,
                    cores,
                    skip_existing,
                    naming,
                },
            )?;

            let cancel = Arc::new(AtomicBool::new(false));
            let c = cancel.clone();
            ctrlc::set_handler(move || {
                c.store(true, Ordering::SeqCst);
            })?;

            let mut extractor = ImageExtractor::from_job(&job)?.cancel_flag(cancel);
            if no_progress {
                extractor = extractor.show_progress(false);
            }
            let summary = extractor.extract(&job.topics)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Extracted {} frame(s) into {}", summary.written, summary.output_dir.display());
                for (topic, count) in &summary.per_topic {
                    println!("  {}: {}", topic, count);
                }
                if summary.skipped > 0 {
                    println!("Skipped {} frame(s) already on disk", summary.skipped);
                }
                println!("Finished in {:.2}s", summary.elapsed_secs);
            }
        }
    }

    Ok(())
}
