//! Application hosting.
//!
//! ```rust,ignore
//! let runtime = TrellisRuntime::builder()
//!     .config_file("trellis.toml")
//!     .source(Directory::new().file("ping.channel", ping()))
//!     .build_or_exit();
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trellis_framework::{DocumentationSink, FsSource, ModuleSource, Registries, RouterBuilder};

use crate::config::{ConfigLoader, TrellisConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// A configured application: settings plus built registries.
pub struct TrellisRuntime {
    config: TrellisConfig,
    registries: Arc<Registries>,
    shutdown: CancellationToken,
}

impl TrellisRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Builds the registries from `source` under an already loaded config.
    ///
    /// Initializes logging from `config.logging` if nothing else has.
    pub fn from_config(
        config: TrellisConfig,
        source: &dyn ModuleSource,
        docs: Option<Arc<dyn DocumentationSink>>,
    ) -> RuntimeResult<Self> {
        validate_config(&config)?;
        logging::init_from_config(&config.logging);

        let mut builder = RouterBuilder::new(config.routing.clone());
        if let Some(sink) = docs {
            builder = builder.docs(sink);
        }
        let registries = Arc::new(builder.build(source)?);

        info!(
            addr = %config.server.addr,
            log_level = %config.logging.level,
            "Runtime initialized"
        );
        Ok(Self {
            config,
            registries,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    /// Cancelling this token stops a running server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serves on the configured address until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        info!("Trellis is now running. Press Ctrl+C to stop.");
        self.run_until(wait_for_shutdown()).await
    }

    /// Serves on the configured address until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = &self.config.server.addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RuntimeError::Bind {
                addr: addr.clone(),
                source,
            })?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` completes.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown.clone();
        let trigger = tokio::spawn(async move {
            tokio::select! {
                () = shutdown => token.cancel(),
                () = token.cancelled() => {}
            }
        });

        let result = trellis_transport::serve(
            listener,
            Arc::clone(&self.registries),
            self.config.server.serve_options(),
            self.shutdown.clone(),
        )
        .await;
        trigger.abort();

        info!("Runtime stopped");
        Ok(result?)
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Where a [`RuntimeBuilder`] gets its module tree from.
enum PendingSource {
    Ready(Box<dyn ModuleSource>),
    /// Rooted at `routing.root` once the config is loaded.
    Links(FsSource),
}

/// Loads configuration and builds a [`TrellisRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    source: Option<PendingSource>,
    docs: Option<Arc<dyn DocumentationSink>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            source: None,
            docs: None,
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: TrellisConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// The module tree to build registries from.
    pub fn source(mut self, source: impl ModuleSource + 'static) -> Self {
        self.source = Some(PendingSource::Ready(Box::new(source)));
        self
    }

    /// A link table for the directory named by `routing.root`.
    ///
    /// Any root already set on `links` is replaced by the configured one.
    pub fn links(mut self, links: FsSource) -> Self {
        self.source = Some(PendingSource::Links(links));
        self
    }

    pub fn docs(mut self, sink: Arc<dyn DocumentationSink>) -> Self {
        self.docs = Some(sink);
        self
    }

    pub fn build(self) -> RuntimeResult<TrellisRuntime> {
        let source = self.source.ok_or(RuntimeError::MissingSource)?;
        let config = self.config_loader.load()?;
        let source: Box<dyn ModuleSource> = match source {
            PendingSource::Ready(source) => source,
            PendingSource::Links(links) => Box::new(links.rooted_at(&config.routing.root)),
        };
        TrellisRuntime::from_config(config, source.as_ref(), self.docs)
    }

    /// Like [`build`](Self::build), but logs the failure and exits with
    /// status 1.
    pub fn build_or_exit(self) -> TrellisRuntime {
        match self.build() {
            Ok(runtime) => runtime,
            Err(e) => {
                logging::LoggingBuilder::new().init();
                error!(error = %e, "Failed to start");
                std::process::exit(1);
            }
        }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
