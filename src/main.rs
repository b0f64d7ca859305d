use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustyreader::{
    api, config,
    index::IndexMode,
    logging,
    processing::{
        AskRequest, CancellationFlag, LoadRequest, ReaderApi, ReaderService, SummarizeRequest,
        SummarizeStrategy, TemplatePreset,
    },
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "rusty-reader",
    about = "Summarize long documents and answer questions about them"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve,
    /// Load, chunk and index a document.
    Load {
        path: PathBuf,
        #[command(flatten)]
        index: IndexArgs,
    },
    /// Summarize a document and persist the result.
    Summarize {
        path: PathBuf,
        #[arg(long, default_value = "map_reduce")]
        strategy: SummarizeStrategy,
        /// Use the proposal-review refine templates.
        #[arg(long)]
        proposal_review: bool,
        #[command(flatten)]
        index: IndexArgs,
    },
    /// Answer a question about a document.
    Ask {
        path: PathBuf,
        question: String,
        /// Number of chunks to retrieve.
        #[arg(short, long)]
        k: Option<usize>,
        #[command(flatten)]
        index: IndexArgs,
    },
    /// Print the last persisted summary.
    ShowSummary,
}

#[derive(clap::Args)]
struct IndexArgs {
    /// Collection to index into.
    #[arg(long)]
    collection: Option<String>,
    /// Reuse the collection when it already exists instead of rebuilding it.
    #[arg(long)]
    reuse: bool,
}

impl IndexArgs {
    fn into_request(self, path: PathBuf) -> LoadRequest {
        LoadRequest {
            path,
            collection: self.collection,
            mode: if self.reuse {
                IndexMode::Reuse
            } else {
                IndexMode::Rebuild
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();
    let config = config::load_config().context("Invalid configuration")?;
    let service = Arc::new(ReaderService::from_config(&config)?);

    match cli.command {
        Command::Serve => {
            let app = api::create_router(service);
            let (listener, port) = bind_listener(config.server_port)
                .await
                .context("Failed to bind listener")?;
            tracing::info!("Listening on http://0.0.0.0:{}", port);
            axum::serve(listener, app).await?;
        }
        Command::Load { path, index } => {
            let outcome = service.load_document(index.into_request(path)).await?;
            print_json(&outcome)?;
        }
        Command::Summarize {
            path,
            strategy,
            proposal_review,
            index,
        } => {
            let cancel = CancellationFlag::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received; stopping after in-flight calls");
                    on_interrupt.cancel();
                }
            });
            let request = SummarizeRequest {
                strategy,
                preset: if proposal_review {
                    TemplatePreset::ProposalReview
                } else {
                    TemplatePreset::Default
                },
                ..SummarizeRequest::default()
            };
            let result = service
                .summarize_document(index.into_request(path), request, cancel)
                .await?;
            print_json(&result)?;
        }
        Command::Ask {
            path,
            question,
            k,
            index,
        } => {
            let request = AskRequest {
                question,
                k,
                ..AskRequest::default()
            };
            let answer = service
                .ask_document(index.into_request(path), request)
                .await?;
            print_json(&answer)?;
        }
        Command::ShowSummary => {
            print_json(&service.load_summary().await?)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn bind_listener(port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
