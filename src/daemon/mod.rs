//! Daemon Core - runs the dispatch components until shutdown
//!
//! The daemon is the long-running process that:
//! - Drains status transitions to the record store
//! - Ticks the dispatcher
//! - Polls the launch service for ended calls
//! - Pulls new leads on an interval
//! - Optionally reads completion notifications from stdin

pub mod context;
pub mod notifications;

pub use context::{DaemonContext, HttpDaemonContext};
pub use notifications::{feed_notifications, parse_notification};

use std::future::Future;
use std::time::Duration;

use tokio::io::AsyncBufRead;
use tokio::sync::watch;

use crate::error::{DialerError, Result};
use crate::launcher::CallLauncher;
use crate::store::LeadStore;

/// How long pending status transitions get to reach the store on shutdown
pub const SYNC_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

impl<S: LeadStore + 'static, C: CallLauncher + 'static> DaemonContext<S, C> {
    /// Run until Ctrl-C
    pub async fn run(self, stdin_notifications: bool) -> Result<()> {
        let notifications = stdin_notifications.then(|| tokio::io::BufReader::new(tokio::io::stdin()));
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
            }
        };
        self.run_until(notifications, shutdown).await
    }

    /// Run until `shutdown` resolves, then stop every loop and drain status sync
    pub async fn run_until<R, F>(mut self, notifications: Option<R>, shutdown: F) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        F: Future<Output = ()>,
    {
        let worker = self
            .sync_worker
            .take()
            .ok_or_else(|| DialerError::Shutdown("status sync worker already started".to_string()))?;
        let worker = tokio::spawn(worker.run());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loops = vec![
            tokio::spawn(self.dispatcher.clone().run(shutdown_rx.clone())),
            tokio::spawn(self.reconciler.clone().run(shutdown_rx.clone())),
            tokio::spawn(self.intake.clone().run(shutdown_rx)),
        ];
        let feed = notifications.map(|reader| tokio::spawn(feed_notifications(reader, self.reconciler.clone())));

        log::info!("Daemon running");
        shutdown.await;
        log::info!("Shutdown requested");

        let _ = shutdown_tx.send(true);
        for handle in loops {
            handle
                .await
                .map_err(|e| DialerError::Shutdown(format!("background loop panicked: {}", e)))?;
        }
        if let Some(feed) = feed {
            feed.abort();
        }

        let snapshot = self.dispatcher.snapshot();
        log::info!(
            "Stopping with {} queued, {} busy slots; {} launched, {} completed",
            snapshot.queued,
            snapshot.busy_slots,
            snapshot.stats.launched,
            snapshot.stats.completed
        );

        // Worker exits once every StatusSync handle is gone
        drop(self);
        match tokio::time::timeout(SYNC_DRAIN_TIMEOUT, worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(DialerError::Shutdown(format!("status sync worker panicked: {}", e))),
            Err(_) => log::warn!("Status sync did not drain within {:?}", SYNC_DRAIN_TIMEOUT),
        }

        log::info!("Daemon stopped");
        Ok(())
    }
}
