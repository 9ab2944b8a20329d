//! Queue consumer: claims jobs, runs conversions and tip refreshes, and
//! applies the retry policy. Runs as its own process next to the webserver.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use tracing::{debug, error, info};

use crate::application::application::Application;
use crate::lsif::{importer, ImportError};
use crate::storage::StorageLayout;
use crate::xrepo::git::GitHost;
use crate::xrepo::store::CrossRepoIndex;

use super::jobs::{Job, JobPayload};

/// Convert one upload into a registered dump. On success the upload file is
/// unlinked; on failure the temp artifact is removed and the upload kept
/// for inspection. Returns the new dump id.
pub async fn run_convert(
    storage: &StorageLayout,
    xrepo: &CrossRepoIndex,
    repository: &str,
    commit: &str,
    root: &str,
    filename: &Path,
    server_version: &str,
) -> Result<i64> {
    let temp = storage.new_temp_db_path();

    let conversion = async {
        let output = importer::import_file(filename, &temp, server_version).await?;

        let uploaded_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let (dump, replaced) = xrepo
            .add_packages_and_references(
                repository,
                commit,
                root,
                &uploaded_at,
                &output.packages,
                &output.references,
            )
            .await?;

        // the uploaded commit is part of the graph even without a
        // repository host to ask for its parents
        xrepo
            .update_commits(repository, &[(commit.to_owned(), String::new())])
            .await?;

        tokio::fs::rename(&temp, storage.dump_path(dump.id))
            .await
            .context("moving dump into place")?;

        if let Some(old_id) = replaced {
            let _ = tokio::fs::remove_file(storage.dump_path(old_id)).await;
        }

        Ok::<i64, anyhow::Error>(dump.id)
    }
    .await;

    match conversion {
        Ok(dump_id) => {
            let _ = tokio::fs::remove_file(filename).await;
            info!(repository, commit, root, dump_id, "conversion succeeded");
            Ok(dump_id)
        }
        Err(err) => {
            let _ = tokio::fs::remove_file(&temp).await;
            Err(err)
        }
    }
}

/// Refresh `visible_at_tip` for every repository with dumps.
pub async fn run_update_tips(xrepo: &CrossRepoIndex, git: &dyn GitHost) -> Result<()> {
    for repository in xrepo.repositories_with_dumps().await? {
        let Some(tip) = git.tip(&repository).await? else {
            debug!(repository, "repository host knows no tip");
            continue;
        };
        xrepo.discover_and_update_commit(&repository, &tip, git).await?;
        xrepo.update_tip_visibility(&repository, &tip).await?;
    }
    Ok(())
}

pub struct Worker {
    app: Application,
}

impl Worker {
    pub fn new(app: Application) -> Self {
        Worker { app }
    }

    pub async fn run(self) -> Result<()> {
        // jobs orphaned by a dead worker become runnable again
        self.app
            .jobs
            .requeue_stale(self.app.config.job_timeout() * 2)
            .await?;

        info!("worker started");
        loop {
            match self.app.jobs.queued_count().await {
                Ok(count) => self.app.metrics.queue_depth.set(count),
                Err(err) => error!(?err, "failed to sample queue depth"),
            }

            match self.app.jobs.claim().await {
                Ok(Some(job)) => self.execute(job).await,
                Ok(None) => tokio::time::sleep(self.idle_interval()).await,
                Err(err) => {
                    error!(?err, "failed to claim a job");
                    tokio::time::sleep(self.idle_interval()).await;
                }
            }
        }
    }

    // add jitter so several workers don't hammer the queue in lockstep
    fn idle_interval(&self) -> Duration {
        let base = self.app.config.job_poll_interval();
        let jitter = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64 / 2);
        base + Duration::from_millis(jitter)
    }

    #[cfg(test)]
    pub(crate) async fn execute_for_tests(&self, job: Job) {
        self.execute(job).await
    }

    async fn execute(&self, job: Job) {
        let kind = job.payload.kind();
        debug!(job_id = job.id, kind, attempt = job.attempts, "executing job");

        let timer = self
            .app
            .metrics
            .job_duration_seconds
            .with_label_values(&[kind])
            .start_timer();
        let outcome = tokio::time::timeout(self.app.config.job_timeout(), self.handle(&job)).await;
        timer.observe_duration();

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "job exceeded its {}s timeout",
                self.app.config.job_timeout_secs
            )),
        };

        match result {
            Ok(()) => {
                if let Err(err) = self.app.jobs.complete(job.id).await {
                    error!(?err, job_id = job.id, "failed to mark job completed");
                }
            }
            Err(err) => {
                self.app.metrics.job_errors.with_label_values(&[kind]).inc();
                let terminal = err
                    .downcast_ref::<ImportError>()
                    .map(ImportError::is_invalid_payload)
                    .unwrap_or(false);
                if let Err(fail_err) = self
                    .app
                    .jobs
                    .fail(&job, &format!("{:#}", err), terminal)
                    .await
                {
                    error!(?fail_err, job_id = job.id, "failed to record job failure");
                }
            }
        }
    }

    async fn handle(&self, job: &Job) -> Result<()> {
        match &job.payload {
            JobPayload::Convert {
                repository,
                commit,
                root,
                filename,
            } => {
                run_convert(
                    &self.app.storage,
                    &self.app.xrepo,
                    repository,
                    commit,
                    root,
                    filename,
                    env!("CARGO_PKG_VERSION"),
                )
                .await
                .map(|_| ())
            }
            JobPayload::UpdateTips => {
                run_update_tips(&self.app.xrepo, self.app.git.as_ref()).await
            }
        }
    }
}

/// Enqueue the update-tips singleton on a fixed period; the queue drops the
/// enqueue when an instance is already pending.
pub async fn schedule_update_tips(app: Application) {
    let mut interval = tokio::time::interval(app.config.heads_interval());
    loop {
        interval.tick().await;
        match app
            .jobs
            .enqueue_singleton(&JobPayload::UpdateTips, app.config.job_max_attempts)
            .await
        {
            Ok(Some(id)) => debug!(job_id = id, "scheduled update-tips"),
            Ok(None) => debug!("update-tips already pending"),
            Err(err) => error!(?err, "failed to schedule update-tips"),
        }
    }
}
