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

use std::fmt;

use strum::{AsRefStr, EnumString};

use crate::labels::Labels;

pub const FIELD_NAME: &str = "__name__";
pub const FIELD_BUCKET: &str = "le";
pub const FIELD_QUANTILE: &str = "quantile";

pub const SUFFIX_BUCKET: &str = "_bucket";
pub const SUFFIX_SUM: &str = "_sum";
pub const SUFFIX_COUNT: &str = "_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_ref().to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    pub sample_count: u64,
    pub sample_sum: f64,
    /// Strictly increasing by `upper_bound`, last bound is `+Inf`.
    pub buckets: Vec<Bucket>,
}

impl Histogram {
    /// Sorts the buckets and makes sure the `+Inf` bucket is present.
    pub(crate) fn normalize(&mut self) {
        self.buckets
            .sort_by(|a, b| a.upper_bound.total_cmp(&b.upper_bound));
        self.buckets.dedup_by(|b, a| a.upper_bound == b.upper_bound);
        let has_inf = self
            .buckets
            .last()
            .map_or(false, |b| b.upper_bound == f64::INFINITY);
        if !has_inf {
            self.buckets.push(Bucket {
                upper_bound: f64::INFINITY,
                cumulative_count: self.sample_count,
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub sample_count: u64,
    pub sample_sum: f64,
    pub quantiles: Vec<Quantile>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    Untyped(f64),
    Histogram(Histogram),
    Summary(Summary),
}

impl MetricValue {
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Counter(_) => MetricType::Counter,
            MetricValue::Gauge(_) => MetricType::Gauge,
            MetricValue::Untyped(_) => MetricType::Untyped,
            MetricValue::Histogram(_) => MetricType::Histogram,
            MetricValue::Summary(_) => MetricType::Summary,
        }
    }
}

/// One label-identified series of a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub labels: Labels,
    pub value: MetricValue,
    /// Number of samples combined into this metric. Never rendered.
    pub(crate) observations: u64,
}

impl Metric {
    pub fn new(labels: Labels, value: MetricValue) -> Self {
        Self {
            labels,
            value,
            observations: 1,
        }
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub metric_type: MetricType,
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            name: name.into(),
            help: None,
            metric_type,
            metrics: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Sorts metrics by their label sets, the order the merge relies on.
    pub(crate) fn sort_metrics(&mut self) {
        self.metrics.sort_by(|a, b| a.labels.cmp(&b.labels));
    }
}
