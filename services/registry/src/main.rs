//! Command line entry point for the registry simulator

use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use eyre::WrapErr as _;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use registry_sim::config::{LogFormat, ServerConfig};
use registry_sim::{
    Database, DocumentStore, FileDocument, Generator, RegistryBuilder, RegistryStore, Template,
    validate,
};

#[derive(Debug, Parser)]
#[command(version, about = "A synthetic OCI container registry")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve a registry document over HTTP
    Serve {
        /// TOML configuration file
        #[arg(long)]
        config: Option<Utf8PathBuf>,
        /// Registry document to serve and update
        #[arg(long)]
        database: Option<Utf8PathBuf>,
        /// Address to listen on
        #[arg(long)]
        listen: Option<std::net::SocketAddr>,
        /// Delay added to every request, in milliseconds
        #[arg(long)]
        throttle_ms: Option<u64>,
        /// Seed for pushed content
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Generate a registry document from a JSON template
    Generate {
        /// Template file
        #[arg(long)]
        template: Utf8PathBuf,
        /// Where to write the document
        #[arg(long)]
        output: Utf8PathBuf,
        /// Seed for generated content
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Check a registry document for consistency
    Validate {
        /// Registry document
        document: Utf8PathBuf,
        /// Also recompute every manifest and blob digest
        #[arg(long)]
        verify_digests: bool,
    },
}

fn init_tracing(format: LogFormat) -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().with_ansi(false).json()).try_init(),
    }
    .wrap_err("initializing tracing")
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            database,
            listen,
            throttle_ms,
            seed,
        } => {
            let mut settings = match config {
                Some(path) => ServerConfig::load(&path).await?,
                None => ServerConfig::default(),
            };
            settings.database = database.unwrap_or(settings.database);
            settings.listen = listen.unwrap_or(settings.listen);
            settings.throttle_ms = throttle_ms.or(settings.throttle_ms);
            settings.seed = seed.or(settings.seed);
            settings.log_format = cli.log_format.unwrap_or(settings.log_format);

            init_tracing(settings.log_format)?;
            serve(settings).await
        }
        Command::Generate {
            template,
            output,
            seed,
        } => {
            init_tracing(cli.log_format.unwrap_or_default())?;
            generate(template, output, seed).await
        }
        Command::Validate {
            document,
            verify_digests,
        } => {
            init_tracing(cli.log_format.unwrap_or_default())?;
            check(document, verify_digests).await
        }
    }
}

async fn serve(settings: ServerConfig) -> eyre::Result<ExitCode> {
    tracing::info!(database = %settings.database, "loading registry");
    let document = Arc::new(FileDocument::new(settings.database.clone()));
    let store = match RegistryStore::open(document).await {
        Ok(store) => store,
        Err(err) => {
            eprintln!("{err}");
            tracing::error!("failed to load {}", settings.database);
            return Ok(ExitCode::FAILURE);
        }
    };

    if let Some(seed) = settings.seed {
        store.reseed(seed).await;
    }

    let mut builder = RegistryBuilder::new(store);
    if let Some(delay) = settings.throttle() {
        builder = builder.throttle(delay);
    }
    let app = builder.build();

    let listener = tokio::net::TcpListener::bind(settings.listen)
        .await
        .wrap_err_with(|| format!("binding {}", settings.listen))?;

    tracing::info!("registry listening on http://{}", settings.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("serving registry")?;

    tracing::info!("registry stopped");
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "listening for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "listening for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, stopping gracefully");
}

async fn generate(
    template: Utf8PathBuf,
    output: Utf8PathBuf,
    seed: Option<u64>,
) -> eyre::Result<ExitCode> {
    let raw = tokio::fs::read(&template)
        .await
        .wrap_err_with(|| format!("reading {template}"))?;
    let template: Template =
        serde_json::from_slice(&raw).wrap_err_with(|| format!("parsing {template}"))?;

    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let database: Database = match Generator::new(rng).generate(&template) {
        Ok(database) => database,
        Err(err) => {
            eprintln!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let document = database.to_document()?;
    FileDocument::new(output.clone()).save(&document).await?;

    tracing::info!(
        output = %output,
        repositories = database.repositories.len(),
        manifests = database.manifests.len(),
        "wrote registry document"
    );
    Ok(ExitCode::SUCCESS)
}

async fn check(path: Utf8PathBuf, verify_digests: bool) -> eyre::Result<ExitCode> {
    let raw = tokio::fs::read(&path)
        .await
        .wrap_err_with(|| format!("reading {path}"))?;

    let database = match validate::validate_document(&raw) {
        Ok(database) => database,
        Err(err) => {
            println!("{path}: invalid\n{err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    if verify_digests {
        let mismatches = validate::verify_digests(&database);
        if !mismatches.is_empty() {
            println!("{path}: invalid\n{}", validate::ValidationError::new(mismatches));
            return Ok(ExitCode::FAILURE);
        }
    }

    println!(
        "{path}: ok ({} repositories, {} manifests, {} blobs)",
        database.repositories.len(),
        database.manifests.len(),
        database.blobs.len()
    );
    Ok(ExitCode::SUCCESS)
}
