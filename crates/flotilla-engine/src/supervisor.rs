// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background task supervision and signal handling.
//!
//! Every engine loop runs under one [`TaskGroup`]. Cancelling the group's
//! token asks each loop to finish its current pass; [`TaskGroup::shutdown`]
//! then waits for them up to a deadline and aborts whatever is left.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Turns SIGINT or SIGTERM into a cancelled token.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => info!("received SIGINT, stopping dispatch"),
                _ = sigterm.recv() => info!("received SIGTERM, stopping dispatch"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, stopping dispatch");
        }

        trigger.cancel();
    });

    token
}

/// Named background tasks sharing one cancellation token.
pub struct TaskGroup {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskGroup {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: Vec::new(),
        }
    }

    /// The token tasks in this group should watch.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "spawning background task");
        self.tasks.push((name, tokio::spawn(task)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Resolves once the group's token is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Cancel every task and wait up to `timeout` for them to return.
    ///
    /// Returns the names of tasks that had to be aborted.
    pub async fn shutdown(self, timeout: Duration) -> Vec<&'static str> {
        self.cancel.cancel();
        let deadline = Instant::now() + timeout;
        info!(count = self.tasks.len(), "stopping background tasks");

        let results = join_all(self.tasks.into_iter().map(|(name, mut handle)| async move {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    warn!(task = name, error = %e, "background task ended abnormally");
                    None
                }
                Err(_) => {
                    handle.abort();
                    warn!(task = name, "background task did not stop in time, aborted");
                    Some(name)
                }
            }
        }))
        .await;

        results.into_iter().flatten().collect()
    }
}
