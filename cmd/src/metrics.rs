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

//! The gateway's own metrics, served on the lifecycle listener.

use promagg::AggregationStore;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

pub const METRICS_NAMESPACE: &str = "prom_agg_gateway";

pub const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FamilyLabels {
    pub family: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PushLabels {
    pub push_job: String,
}

pub struct Metrics {
    registry: Registry,

    pub total_families: Gauge,
    pub metrics_by_family: Family<FamilyLabels, Gauge>,
    /// Accepted pushes per job; pushes without a job count under "".
    pub metric_pushes: Family<PushLabels, Counter>,
    pub sweep_evicted_metrics: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(METRICS_NAMESPACE);

        let total_families = Gauge::default();
        registry.register(
            "total_families",
            "Total number of metric families",
            total_families.clone(),
        );

        let metrics_by_family = Family::<FamilyLabels, Gauge>::default();
        registry.register(
            "metrics_by_family",
            "Metric count by family",
            metrics_by_family.clone(),
        );

        let metric_pushes = Family::<PushLabels, Counter>::default();
        registry.register(
            "metric_pushes",
            "Total number of metric push requests, per job",
            metric_pushes.clone(),
        );

        let sweep_evicted_metrics = Counter::default();
        registry.register(
            "sweep_evicted_metrics",
            "Metrics evicted because their push job went stale",
            sweep_evicted_metrics.clone(),
        );

        Self {
            registry,
            total_families,
            metrics_by_family,
            metric_pushes,
            sweep_evicted_metrics,
        }
    }

    pub fn record_push(&self, job: &str) {
        self.metric_pushes
            .get_or_create(&PushLabels {
                push_job: job.to_owned(),
            })
            .inc();
    }

    /// Refreshes the family gauges from the store.
    pub fn observe_store(&self, store: &AggregationStore) {
        let sizes = store.family_sizes();
        self.total_families.set(sizes.len() as i64);
        self.metrics_by_family.clear();
        for (family, count) in sizes {
            self.metrics_by_family
                .get_or_create(&FamilyLabels { family })
                .set(count as i64);
        }
    }

    /// Encodes the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}
