use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::{Path, RawBody, State};
use axum::routing::get;
use axum::{Router, Server};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use hyper::{Body, HeaderMap, Method, StatusCode};
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arti_store::blob::manager::{BlobStoreConfigurationStore, BlobStoreManager};
use arti_store::config::ServerConfig;
use arti_store::repository::registry::RepositoryRegistry;
use arti_store::repository::{Request, Response};
use arti_store::storage::metadata_store::MetadataStore;
use arti_store::storage::reconcile::reconcile_checksums;
use arti_store::util::payload::Payload;

#[derive(Parser)]
#[command(name = "arti-store", version, about = "Maven artifact repository server")]
struct Cli {
    #[arg(long, short, default_value = "arti-store.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve all configured repositories over HTTP (the default)
    Serve,
    /// Recompute stored checksums and sizes from blob content
    Reconcile {
        /// Only this repository; all repositories with storage if omitted
        #[arg(long)]
        repository: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let blob_stores = Arc::new(BlobStoreManager::new(
        config.blobs_dir(),
        BlobStoreConfigurationStore::file(config.blob_store_config_file()),
    ));
    blob_stores.start().await?;
    for (name, _) in blob_stores.browse().await? {
        info!("blob store {} is available", name);
    }

    let metadata = Arc::new(MetadataStore::open(config.metadata_file()).await?);
    let registry = Arc::new(RepositoryRegistry::build(&config.repositories, metadata, blob_stores.clone()).await?);

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, registry).await,
        Command::Reconcile { repository } => reconcile(&registry, repository.as_deref()).await,
    };

    blob_stores.stop().await?;
    result
}

async fn serve(config: &ServerConfig, registry: Arc<RepositoryRegistry>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/repository/:repository/*path", get(handle).put(handle).delete(handle))
        .layer(ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests))
        )
        .with_state(registry);

    info!("serving on {}", config.bind_addr);
    Server::bind(&config.bind_addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {}", e);
            }
            info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn reconcile(registry: &RepositoryRegistry, only: Option<&str>) -> anyhow::Result<()> {
    let repositories = match only {
        Some(name) => vec![registry.get(name).ok_or_else(|| anyhow!("no repository named {}", name))?],
        None => registry.repositories(),
    };

    for repository in repositories {
        let storage = match repository.storage() {
            Some(storage) => storage,
            None => continue,
        };
        let report = reconcile_checksums(storage).await?;
        info!("{}: checked {} assets, fixed {}", repository.name(), report.checked, report.fixed);
    }
    Ok(())
}

async fn handle(
    State(registry): State<Arc<RepositoryRegistry>>,
    Path((repository, path)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    RawBody(body): RawBody<Body>,
) -> hyper::Response<Body> {
    let payload = if method == Method::PUT {
        let content_type = headers.get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());
        let size = headers.get(CONTENT_LENGTH)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse().ok());
        let data = Box::pin(body.map(|chunk| chunk.map_err(anyhow::Error::from)));
        Some(Payload {
            size,
            ..Payload::new(data, content_type)
        })
    }
    else {
        None
    };

    let request = Request {
        method,
        path: path.trim_start_matches('/').to_string(),
        payload,
    };
    match registry.dispatch(&repository, request).await {
        Some(response) => to_http(response),
        None => plain(StatusCode::NOT_FOUND, Some(format!("no repository named {}", repository))),
    }
}

fn to_http(response: Response) -> hyper::Response<Body> {
    let payload = match response.payload {
        Some(payload) => payload,
        None => return plain(response.status, response.message),
    };

    let mut builder = hyper::Response::builder().status(response.status);
    if let Some(content_type) = &payload.content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    if let Some(size) = payload.size {
        builder = builder.header(CONTENT_LENGTH, size);
    }
    if let Some(sha1) = &payload.sha1 {
        builder = builder
            .header(ETAG, format!("\"{{SHA1{{{}}}}}\"", sha1))
            .header("X-Checksum-Sha1", sha1);
    }
    if let Some(md5) = &payload.md5 {
        builder = builder.header("X-Checksum-Md5", md5);
    }

    match builder.body(Body::wrap_stream(payload.data)) {
        Ok(response) => response,
        Err(e) => {
            error!("invalid response: {}", e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, None)
        }
    }
}

fn plain(status: StatusCode, message: Option<String>) -> hyper::Response<Body> {
    let mut response = hyper::Response::new(message.map(Body::from).unwrap_or_else(Body::empty));
    *response.status_mut() = status;
    response
}
