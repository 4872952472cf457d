//! Runs a bot task from configuration to shutdown.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mirai_runtime::{Bot, Flow, MiraiRuntime};
//!
//! let runtime = MiraiRuntime::new()?;
//! runtime
//!     .run(|bot: Bot| async move {
//!         bot.monitor_events(|event| async move { Ok(Flow::Continue) }).await
//!     })
//!     .await?;
//! ```
//!
//! [`run`](MiraiRuntime::run) authorizes the session, runs the task, asks
//! running streams to stop on Ctrl+C (or SIGTERM) and releases the session
//! once the task is done.

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use mirai_core::{BoxError, EventCallback, SharedTransport};
use mirai_transport::MiraiClient;
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::bot::Bot;
use crate::config::{ConfigLoader, MiraiConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// How long the task may keep running after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns the configuration of one bot process.
#[derive(Debug, Clone)]
pub struct MiraiRuntime {
    config: MiraiConfig,
}

impl MiraiRuntime {
    /// Loads the configuration from the default locations and sets up logging.
    pub fn new() -> RuntimeResult<Self> {
        Self::from_loader(ConfigLoader::new())
    }

    pub fn from_loader(loader: ConfigLoader) -> RuntimeResult<Self> {
        Ok(Self::from_config(loader.load()?))
    }

    /// Uses `config` as is and sets up logging from it.
    pub fn from_config(config: MiraiConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            host = %config.connection.host,
            port = config.connection.port,
            log_level = %config.logging.level,
            "Runtime initialized from configuration"
        );

        Self { config }
    }

    pub fn config(&self) -> &MiraiConfig {
        &self.config
    }

    /// Builds the HTTP/WebSocket client and authorizes a session on it.
    pub async fn connect(&self) -> RuntimeResult<Bot> {
        let transport = MiraiClient::new(self.config.connection.clone())?.shared();
        self.start_session(transport).await
    }

    /// Authorizes a session on `transport` with the configured credentials
    /// and applies the configured session options.
    pub async fn start_session(&self, transport: SharedTransport) -> RuntimeResult<Bot> {
        let settings = &self.config.session;
        let bot = Bot::new(transport);
        bot.authorize(&settings.auth_key, settings.bot_id).await?;

        if let Some(session_config) = settings.session_config() {
            debug!(?session_config, "Applying session configuration");
            bot.set_session_config(&session_config).await?;
        }
        Ok(bot)
    }

    /// Runs the event stream with the configured reconnect policy.
    pub async fn monitor_events<C: EventCallback>(&self, bot: &Bot, callback: C) -> RuntimeResult<()> {
        let stream = &self.config.stream;
        if stream.auto_reconnect {
            bot.monitor_events_with_retry(callback, &stream.retry).await
        } else {
            bot.monitor_events(callback).await
        }
    }

    /// Connects, runs `task` until it finishes or a shutdown signal arrives,
    /// then releases the session.
    pub async fn run<F, Fut, E>(&self, task: F) -> RuntimeResult<()>
    where
        F: FnOnce(Bot) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<BoxError>,
    {
        let bot = self.connect().await?;
        self.run_until(bot, task, wait_for_shutdown()).await
    }

    /// Like [`run`](Self::run) on an existing session, with a custom
    /// shutdown future.
    pub async fn run_until<F, Fut, E, S>(&self, bot: Bot, task: F, shutdown: S) -> RuntimeResult<()>
    where
        F: FnOnce(Bot) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<BoxError>,
        S: Future<Output = ()>,
    {
        let task = task(bot.clone()).fuse();
        let shutdown = shutdown.fuse();
        futures::pin_mut!(task, shutdown);

        let outcome = tokio::select! {
            result = &mut task => Some(result),
            () = &mut shutdown => None,
        };

        let outcome = match outcome {
            Some(result) => result,
            None => {
                info!("Shutdown requested, stopping event streams");
                bot.request_stop();
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(grace_ms = SHUTDOWN_GRACE.as_millis() as u64, "Bot task did not finish in time");
                        Ok(())
                    }
                }
            }
        };

        if bot.is_authorized()
            && let Err(e) = bot.release().await
        {
            error!(error = %e, "Failed to release session");
        }

        outcome.map_err(RuntimeError::task)
    }
}

/// Loads the configuration, then [`run`](MiraiRuntime::run)s `task`.
pub async fn launch<F, Fut, E>(config: MiraiConfig, task: F) -> RuntimeResult<()>
where
    F: FnOnce(Bot) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<BoxError>,
{
    MiraiRuntime::from_config(config).run(task).await
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to register SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            () = ctrl_c => info!("Received Ctrl+C, shutting down"),
            () = terminate => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Received Ctrl+C, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::MockTransport;
    use mirai_core::{Event, Flow};
    use serde_json::json;

    fn runtime() -> MiraiRuntime {
        let mut config = MiraiConfig::default();
        config.session.auth_key = "auth-key".into();
        config.session.bot_id = 10.into();
        MiraiRuntime::from_config(config)
    }

    fn transport() -> std::sync::Arc<MockTransport> {
        let transport = MockTransport::new();
        transport.respond("/auth", json!({ "code": 0, "session": "session-key" }));
        transport
    }

    #[tokio::test]
    async fn start_session_applies_session_config() {
        let mut config = runtime().config().clone();
        config.session.cache_size = Some(1024);
        let runtime = MiraiRuntime::from_config(config);
        let transport = transport();

        let bot = runtime.start_session(transport.clone()).await.unwrap();

        assert_eq!(bot.bot_id(), Some(10.into()));
        assert_eq!(transport.paths(), vec!["/auth", "/verify", "/config"]);
        assert_eq!(transport.last_body("/config")["cacheSize"], 1024);
    }

    #[tokio::test]
    async fn run_releases_after_task() {
        let runtime = runtime();
        let transport = transport();
        let bot = runtime.start_session(transport.clone()).await.unwrap();

        runtime
            .run_until(
                bot,
                |bot: Bot| async move {
                    assert!(bot.is_authorized());
                    Ok::<_, RuntimeError>(())
                },
                std::future::pending(),
            )
            .await
            .unwrap();

        assert_eq!(transport.paths().last().map(String::as_str), Some("/release"));
    }

    #[tokio::test]
    async fn task_error_is_reported_and_session_released() {
        let runtime = runtime();
        let transport = transport();
        let bot = runtime.start_session(transport.clone()).await.unwrap();

        let result = runtime
            .run_until(
                bot,
                |_bot: Bot| async { Err::<(), _>("boom") },
                std::future::pending(),
            )
            .await;

        assert!(matches!(result, Err(RuntimeError::Task(_))));
        assert!(transport.paths().iter().any(|p| p == "/release"));
    }

    #[tokio::test]
    async fn shutdown_stops_monitoring() {
        let runtime = runtime();
        let transport = transport();
        let _feed = transport.push_stream();
        let bot = runtime.start_session(transport.clone()).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = rx.await;
        };

        let run = runtime.run_until(
            bot,
            |bot: Bot| async move {
                bot.monitor_events(|_event: Event| async { Ok(Flow::Continue) })
                    .await
            },
            shutdown,
        );
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("finished before shutdown"),
            () = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        let _ = tx.send(());
        run.await.unwrap();

        assert!(transport.paths().iter().any(|p| p == "/release"));
    }
}
