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

use std::{collections::hash_map::Entry, io::Write, sync::Arc, time::Duration};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use time::OffsetDateTime;

use crate::{
    aggregations::{gauge_rule_from_help, AggregationPolicy, GaugeRule, UntypedRule},
    error::{Error, Result},
    exposition::{self, Format},
    labels::{
        canonicalize, validate_no_duplicates, validate_reserved_labels, IgnoredLabels, Label,
    },
    merge::merge_family,
    value::MetricFamily,
};

pub const DEFAULT_JOB_LABEL: &str = "job";

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub ignored_labels: IgnoredLabels,
    /// Enables eviction of metrics whose push job went quiet for this long.
    pub metric_ttl: Option<Duration>,
    /// Gauge rule for families whose help carries no directive.
    pub gauge_rule: GaugeRule,
    pub untyped_rule: UntypedRule,
    /// Name of the injected label that identifies the push job.
    pub job_label: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ignored_labels: IgnoredLabels::default(),
            metric_ttl: None,
            gauge_rule: GaugeRule::default(),
            untyped_rule: UntypedRule::default(),
            job_label: DEFAULT_JOB_LABEL.to_owned(),
        }
    }
}

impl Options {
    pub fn with_ignored_labels(mut self, ignored_labels: IgnoredLabels) -> Self {
        self.ignored_labels = ignored_labels;
        self
    }

    /// A zero TTL disables eviction.
    pub fn with_metric_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.metric_ttl = ttl.filter(|ttl| !ttl.is_zero());
        self
    }

    pub fn with_gauge_rule(mut self, rule: GaugeRule) -> Self {
        self.gauge_rule = rule;
        self
    }

    pub fn with_untyped_rule(mut self, rule: UntypedRule) -> Self {
        self.untyped_rule = rule;
        self
    }

    pub fn with_job_label(mut self, job_label: impl Into<String>) -> Self {
        self.job_label = job_label.into();
        self
    }
}

#[derive(Debug)]
pub(crate) struct StoredFamily {
    pub(crate) family: MetricFamily,
    policy: AggregationPolicy,
}

impl StoredFamily {
    /// Replaces the stored metrics with the merge result; on error nothing
    /// changes.
    fn merge(&mut self, incoming: &MetricFamily) -> Result<()> {
        let merged = merge_family(&self.family, incoming, &self.policy)?;
        self.family.metrics = merged.metrics;
        Ok(())
    }
}

/// The merged state of every family pushed so far.
///
/// Lock order is always family map, then a single family, then the push-job
/// table.
#[derive(Debug, Default)]
pub struct AggregationStore {
    pub(crate) options: Options,
    pub(crate) families: RwLock<FxHashMap<String, Arc<RwLock<StoredFamily>>>>,
    pub(crate) push_jobs: Mutex<FxHashMap<String, OffsetDateTime>>,
}

impl AggregationStore {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            families: RwLock::default(),
            push_jobs: Mutex::default(),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Parses `payload` and merges every family in it, with `injected`
    /// labels added to each metric. A parse error rejects the whole payload.
    pub fn ingest(&self, payload: &[u8], format: Format, injected: &[Label]) -> Result<usize> {
        let families = exposition::parse(payload, format)?;
        self.ingest_families(families, injected)
    }

    /// Merges already parsed families. Each family commits or fails on its
    /// own; returns the number of committed families, or `Rejected` with the
    /// errors of the families that failed.
    pub fn ingest_families(&self, families: Vec<MetricFamily>, injected: &[Label]) -> Result<usize> {
        if let Some(job) = injected
            .iter()
            .rev()
            .find(|l| l.name == self.options.job_label)
        {
            self.push_jobs
                .lock()
                .insert(job.value.clone(), OffsetDateTime::now_utc());
        }

        let mut committed = 0;
        let mut errors = Vec::new();
        for family in families {
            let name = family.name.clone();
            match self.ingest_family(family, injected) {
                Ok(()) => committed += 1,
                Err(err) => {
                    tracing::warn!(family = %name, error = %err, "rejected metric family");
                    errors.push(err);
                }
            }
        }
        if errors.is_empty() {
            Ok(committed)
        } else {
            Err(Error::Rejected(errors))
        }
    }

    fn ingest_family(&self, mut family: MetricFamily, injected: &[Label]) -> Result<()> {
        for metric in &mut family.metrics {
            metric.labels = canonicalize(&metric.labels, injected, &self.options.ignored_labels);
        }
        validate_reserved_labels(&family)?;
        validate_no_duplicates(&family)?;
        if family.metrics.is_empty() {
            return Ok(());
        }
        family.sort_metrics();

        {
            let families = self.families.read();
            if let Some(stored) = families.get(&family.name) {
                return stored.write().merge(&family);
            }
        }

        let mut families = self.families.write();
        match families.entry(family.name.clone()) {
            Entry::Occupied(e) => e.get().write().merge(&family),
            Entry::Vacant(e) => {
                let policy = AggregationPolicy {
                    gauge: gauge_rule_from_help(family.help.as_deref(), self.options.gauge_rule),
                    untyped: self.options.untyped_rule,
                };
                tracing::debug!(family = %family.name, "new metric family");
                e.insert(Arc::new(RwLock::new(StoredFamily { family, policy })));
                Ok(())
            }
        }
    }

    /// Encodes every family in name order. The first encoder failure stops
    /// the stream and is returned.
    pub fn render<W: Write>(&self, w: &mut W, format: Format) -> Result<()> {
        let mut snapshot = self
            .families
            .read()
            .iter()
            .map(|(name, stored)| (name.clone(), Arc::clone(stored)))
            .collect::<Vec<_>>();
        snapshot.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        for (name, stored) in snapshot {
            let stored = stored.read();
            if stored.family.metrics.is_empty() {
                continue;
            }
            if let Err(source) = exposition::encode(w, format, &stored.family) {
                tracing::error!(family = %name, error = %source, "failed to encode metric family");
                return Err(Error::Encode {
                    family: name,
                    source,
                });
            }
        }
        Ok(())
    }

    pub fn render_to_vec(&self, format: Format) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.render(&mut buf, format)?;
        Ok(buf)
    }

    /// A copy of one stored family.
    pub fn family(&self, name: &str) -> Option<MetricFamily> {
        let families = self.families.read();
        let stored = families.get(name)?;
        let family = stored.read().family.clone();
        Some(family)
    }

    /// Number of families.
    pub fn len(&self) -> usize {
        self.families.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metric count per family, sorted by name.
    pub fn family_sizes(&self) -> Vec<(String, usize)> {
        let families = self.families.read();
        let mut sizes = families
            .iter()
            .map(|(name, stored)| (name.clone(), stored.read().family.metrics.len()))
            .collect::<Vec<_>>();
        sizes.sort_unstable();
        sizes
    }

    /// Last push time of each tracked job.
    pub fn push_jobs(&self) -> FxHashMap<String, OffsetDateTime> {
        self.push_jobs.lock().clone()
    }
}
