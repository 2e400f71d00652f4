use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use esindexer_core::config::Config;
use esindexer_core::path_filter::PathFilter;
use esindexer_core::{daemon, query, EngineAdapter};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "esindexer")]
#[command(about = "Reconciling indexer engine for Spotlight-style search over Samba shares")]
struct Cli {
	/// Path to the TOML configuration file.
	#[arg(short, long, global = true, default_value = "esindexer.toml")]
	config: PathBuf,

	/// Enable debug logging.
	#[arg(short = 'v', long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Prepare the index, fetch known ids, reconcile once, exit.
	Index,
	/// Run the daemon loop: alternate live-change watching and reconciles.
	Daemon,
	/// Refresh the index and delete every document from it.
	Clear,
	/// Run a query and print matching hits.
	Search(SearchArgs),
	/// Set search/fetch slowlog thresholds to 0 (log everything).
	EnableSlowlog,
	/// Restore search/fetch slowlog thresholds to -1 (disabled).
	DisableSlowlog,
}

#[derive(Args)]
struct SearchArgs {
	/// Scope the search to documents under this path.
	#[arg(long)]
	path: String,
	/// Search by term, matching filename or content.
	#[arg(long, conflicts_with = "filename")]
	term: Option<String>,
	/// Search by filename only.
	#[arg(long)]
	filename: Option<String>,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	let log_level = if cli.verbose { "debug" } else { "info" };
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("esindexer_core={log_level},esindexer={log_level}")));
	tracing_subscriber::fmt().with_env_filter(env_filter).init();

	if let Err(err) = run(cli).await {
		error!(error = %err, "fatal error");
		std::process::exit(1);
	}
}

async fn run(cli: Cli) -> Result<()> {
	let config = Config::load(&cli.config).context("loading configuration")?;
	let filter = PathFilter::new(&config).context("compiling path filter")?;
	let adapter = EngineAdapter::new(&config.elasticsearch).context("building search engine client")?;

	match cli.command {
		Command::Index => {
			daemon::index_once(&adapter, &config, &filter).await?;
		}
		Command::Daemon => {
			daemon::run(adapter, config, filter).await?;
		}
		Command::Clear => {
			adapter.refresh(&config.elasticsearch.index).await?;
			let ids = adapter
				.scroll_all_ids(&config.elasticsearch.index, config.elasticsearch.bulk_size)
				.collect_all()
				.await?;
			let ids: Vec<String> = ids.into_iter().collect();
			for chunk in ids.chunks(config.elasticsearch.bulk_size) {
				adapter
					.delete_by_query_ids(&config.elasticsearch.index, chunk)
					.await?;
			}
			info!(count = ids.len(), "cleared index");
		}
		Command::Search(args) => {
			let query = match (&args.term, &args.filename) {
				(Some(term), None) => query::term_search(term, &args.path),
				(None, Some(filename)) => query::filename_search(filename, &args.path),
				_ => query::scope_only(&args.path),
			};

			let response = adapter
				.search(&config.elasticsearch.index, &query, 0, query::DEFAULT_SIZE)
				.await?;

			for hit in response.hits.hits {
				println!("{}\t{}", hit.id, hit.source);
			}
		}
		Command::EnableSlowlog => {
			adapter
				.put_slowlog_thresholds(&config.elasticsearch.index, &serde_json::json!("0ms"))
				.await?;
			info!("slowlog enabled");
		}
		Command::DisableSlowlog => {
			adapter
				.put_slowlog_thresholds(&config.elasticsearch.index, &serde_json::json!("-1"))
				.await?;
			info!("slowlog disabled");
		}
	}

	Ok(())
}
