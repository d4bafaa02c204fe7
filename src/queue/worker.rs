use std::sync::Arc;

use tokio::sync::watch;

use super::Inner;
use crate::models::QueueItem;

/// The single consumer of pending items.
pub(super) async fn run(
    inner: Arc<Inner>,
    mut stop: watch::Receiver<bool>,
    cancel: watch::Receiver<bool>,
) {
    tracing::info!("Queue worker started");
    // A restart after a stop begins a fresh batch.
    inner.end_batch().await;

    loop {
        if *stop.borrow() {
            break;
        }

        let Some(item) = inner.claim_next(&stop).await else {
            if *stop.borrow() {
                break;
            }
            inner.end_batch().await;
            tracing::debug!("Queue idle");
            tokio::select! {
                _ = inner.wake.notified() => {}
                res = stop.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
            continue;
        };

        run_item(&inner, item, cancel.clone()).await;
    }

    tracing::info!("Queue worker stopped");
}

async fn run_item(inner: &Arc<Inner>, item: QueueItem, cancel: watch::Receiver<bool>) {
    tracing::info!(
        "Running item {} (profile {}, app {})",
        item.id,
        item.profile_id,
        item.app_id
    );

    let Some(profile) = inner.profiles.get_profile(item.profile_id).await else {
        let error = format!("profile {} no longer exists", item.profile_id);
        tracing::warn!("Item {} failed: {error}", item.id);
        inner.finish(item.id, Err(error)).await;
        return;
    };

    // Run on its own task so a panicking executor fails the job, not the loop.
    let executor = inner.executor.clone();
    let job_profile = profile.clone();
    let app_id = item.app_id.clone();
    let outcome = tokio::spawn(async move { executor.execute(&job_profile, &app_id, cancel).await })
        .await
        .unwrap_or_else(|e| Err(crate::supervisor::ExecError::Io(format!("executor crashed: {e}"))));

    match outcome {
        Ok(success) => {
            tracing::info!("Item {} completed: {}", item.id, success.detail);
            inner.finish(item.id, Ok(())).await;
            if item.is_main_app {
                inner.expand_dependencies(&item, &profile).await;
            }
        }
        Err(e) => {
            tracing::warn!("Item {} failed: {e}", item.id);
            inner.finish(item.id, Err(e.to_string())).await;
        }
    }
}
