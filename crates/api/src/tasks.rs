//! Background maintenance tasks.
//!
//! Three periodic loops share the reconciler state with the HTTP handlers:
//! the order sweep, the webhook retry pass and the failed-email retry pass.
//! Each one races its interval against the shutdown channel so `main` can
//! join them cleanly on ctrl-c.

use std::sync::Arc;

use rasi_reconciler::{compensation, orders, queue, ReconcilerService};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

pub fn spawn_all(
    service: Arc<ReconcilerService>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_order_sweep(service.clone(), shutdown.clone()),
        spawn_queue_retry(service.clone(), shutdown.clone()),
        spawn_email_retry(service, shutdown),
    ]
}

fn spawn_order_sweep(
    service: Arc<ReconcilerService>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(orders::SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = service.reconciler.orders.sweep_expired().await;
                    if swept > 0 {
                        tracing::info!(swept, "order sweep pass finished");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::debug!("order sweep task stopping");
                    break;
                }
            }
        }
    })
}

fn spawn_queue_retry(
    service: Arc<ReconcilerService>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(queue::RETRY_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    service.reconciler.process_retry_queue().await;
                }
                _ = shutdown.changed() => {
                    tracing::debug!("webhook retry task stopping");
                    break;
                }
            }
        }
    })
}

fn spawn_email_retry(
    service: Arc<ReconcilerService>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(compensation::EMAIL_RETRY_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let notifier = service.reconciler.notifier().clone();
                    let outcome = service
                        .reconciler
                        .ledger
                        .retry_failed_emails(&notifier)
                        .await;
                    if outcome.attempted > 0 {
                        tracing::info!(
                            attempted = outcome.attempted,
                            delivered = outcome.delivered,
                            abandoned = outcome.abandoned,
                            "email retry pass finished"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    tracing::debug!("email retry task stopping");
                    break;
                }
            }
        }
    })
}
