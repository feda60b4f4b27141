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

//! Merges metric families pushed by many short-lived producers into one
//! scrapeable view.

pub mod aggregations;
mod error;
pub mod exposition;
pub mod labels;
pub mod merge;
mod store;
pub mod sweep;
pub mod value;

pub use {
    aggregations::{AggregationPolicy, GaugeRule, UntypedRule},
    error::{Error, Result},
    exposition::Format,
    labels::{IgnoredLabels, Label, Labels},
    store::{AggregationStore, Options, DEFAULT_JOB_LABEL},
    sweep::SweepStats,
    value::{Metric, MetricFamily, MetricType, MetricValue},
};
