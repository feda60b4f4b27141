// Copyright 2022 Zinc Labs Inc. and Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Eviction of metrics whose push job stopped pushing.

use std::{sync::Arc, time::Duration};

use rustc_hash::FxHashSet;
use time::OffsetDateTime;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::store::AggregationStore;

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub metrics: usize,
    pub families: usize,
    pub jobs: usize,
}

impl SweepStats {
    pub fn is_empty(&self) -> bool {
        self.metrics == 0 && self.families == 0 && self.jobs == 0
    }
}

impl AggregationStore {
    /// Removes every metric labelled with a job whose last push is older
    /// than `now - ttl`, then the families left empty and the stale jobs.
    /// Metrics without the job label, or with an untracked job, stay.
    /// Does nothing unless a TTL is configured.
    pub fn sweep(&self, now: OffsetDateTime) -> SweepStats {
        let mut stats = SweepStats::default();
        let Some(ttl) = self.options.metric_ttl else {
            return stats;
        };
        let cutoff = now - ttl;

        let mut families = self.families.write();
        let stale = self
            .push_jobs
            .lock()
            .iter()
            .filter(|(_, last)| **last < cutoff)
            .map(|(job, _)| job.clone())
            .collect::<FxHashSet<_>>();
        if stale.is_empty() {
            return stats;
        }

        let job_label = self.options.job_label.as_str();
        families.retain(|_, stored| {
            let mut stored = stored.write();
            let before = stored.family.metrics.len();
            stored
                .family
                .metrics
                .retain(|m| m.labels.get(job_label).map_or(true, |job| !stale.contains(job)));
            stats.metrics += before - stored.family.metrics.len();
            if stored.family.metrics.is_empty() {
                stats.families += 1;
                return false;
            }
            true
        });

        // a job that pushed again since the scan above is kept
        let mut jobs = self.push_jobs.lock();
        let before = jobs.len();
        jobs.retain(|job, last| !(stale.contains(job) && *last < cutoff));
        stats.jobs = before - jobs.len();
        stats
    }
}

/// Runs [`AggregationStore::sweep`] every `period` until the task is
/// aborted. `on_sweep` sees the stats of every run.
pub fn spawn<F>(store: Arc<AggregationStore>, period: Duration, on_sweep: F) -> JoinHandle<()>
where
    F: Fn(&SweepStats) + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let stats = store.sweep(OffsetDateTime::now_utc());
            if stats.is_empty() {
                tracing::debug!("sweep found no stale metrics");
            } else {
                tracing::info!(
                    metrics = stats.metrics,
                    families = stats.families,
                    jobs = stats.jobs,
                    "evicted stale metrics"
                );
            }
            on_sweep(&stats);
        }
    })
}
