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

use itertools::{EitherOrBoth, Itertools};

use crate::{
    aggregations::{self, AggregationPolicy},
    error::{Error, Result},
    value::MetricFamily,
};

/// Union-merges `incoming` into `existing` by label set.
///
/// Both metric lists must be sorted by their labels; the result is too.
/// Series present on one side only are kept unchanged, series present on
/// both are combined (summaries are dropped). `existing` is only read, so a
/// failed merge leaves it as it was.
pub fn merge_family(
    existing: &MetricFamily,
    incoming: &MetricFamily,
    policy: &AggregationPolicy,
) -> Result<MetricFamily> {
    if existing.metric_type != incoming.metric_type {
        return Err(Error::TypeMismatch {
            family: existing.name.clone(),
            existing: existing.metric_type,
            incoming: incoming.metric_type,
        });
    }

    let metrics = existing
        .metrics
        .iter()
        .merge_join_by(incoming.metrics.iter(), |a, b| a.labels.cmp(&b.labels))
        .filter_map(|pair| match pair {
            EitherOrBoth::Left(m) | EitherOrBoth::Right(m) => Some(m.clone()),
            EitherOrBoth::Both(a, b) => aggregations::combine(policy, a, b),
        })
        .collect();

    Ok(MetricFamily {
        name: existing.name.clone(),
        help: existing.help.clone(),
        metric_type: existing.metric_type,
        metrics,
    })
}
