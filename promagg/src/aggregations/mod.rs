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

//! Per-type rules for combining two samples of the same series.

use crate::value::{Metric, MetricValue};

mod counter;
mod gauge;
mod histogram;
mod untyped;

pub(crate) use counter::counter;
pub use gauge::{gauge_rule_from_help, GaugeRule};
pub(crate) use histogram::histogram;
pub use untyped::UntypedRule;

/// Rules the combinators apply to one family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationPolicy {
    pub gauge: GaugeRule,
    pub untyped: UntypedRule,
}

/// Running mean of two already-averaged values weighted by the number of
/// observations behind each.
pub(crate) fn weighted_avg(a: f64, n_a: u64, b: f64, n_b: u64) -> f64 {
    let n = n_a.saturating_add(n_b);
    if n == 0 {
        return b;
    }
    (a * n_a as f64 + b * n_b as f64) / n as f64
}

/// Combines two metrics of the same type and series; the labels of `a` are
/// kept. Returns `None` when the pair cannot be merged (summaries, or a
/// type disagreement), in which case the series is dropped.
pub fn combine(policy: &AggregationPolicy, a: &Metric, b: &Metric) -> Option<Metric> {
    let observations = a.observations.saturating_add(b.observations);
    let value = match (&a.value, &b.value) {
        (MetricValue::Counter(x), MetricValue::Counter(y)) => {
            MetricValue::Counter(counter(*x, *y))
        }
        (MetricValue::Gauge(x), MetricValue::Gauge(y)) => {
            MetricValue::Gauge(policy.gauge.apply(*x, a.observations, *y, b.observations))
        }
        (MetricValue::Untyped(x), MetricValue::Untyped(y)) => {
            MetricValue::Untyped(policy.untyped.apply(*x, a.observations, *y, b.observations))
        }
        (MetricValue::Histogram(x), MetricValue::Histogram(y)) => {
            MetricValue::Histogram(histogram(x, y))
        }
        // no way of merging summaries without the raw samples
        (MetricValue::Summary(_), MetricValue::Summary(_)) => return None,
        _ => return None,
    };
    Some(Metric {
        labels: a.labels.clone(),
        value,
        observations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{labels::Labels, value::Summary};

    fn metric(value: MetricValue) -> Metric {
        Metric::new(Labels::new([("a", "a")]), value)
    }

    #[test]
    fn test_combine_counter() {
        let policy = AggregationPolicy::default();
        let a = metric(MetricValue::Counter(31.0));
        let b = metric(MetricValue::Counter(29.0));
        let c = metric(MetricValue::Counter(0.5));

        let ab = combine(&policy, &a, &b).unwrap();
        assert_eq!(ab.value, MetricValue::Counter(60.0));
        assert_eq!(ab.observations(), 2);
        assert_eq!(ab.labels, a.labels);

        // commutative and associative
        let ba = combine(&policy, &b, &a).unwrap();
        assert_eq!(ab.value, ba.value);
        let ab_c = combine(&policy, &ab, &c).unwrap();
        let bc = combine(&policy, &b, &c).unwrap();
        let a_bc = combine(&policy, &a, &bc).unwrap();
        assert_eq!(ab_c.value, a_bc.value);
        assert_eq!(ab_c.observations(), 3);
    }

    #[test]
    fn test_combine_gauge_default_sums() {
        let policy = AggregationPolicy::default();
        let merged = combine(
            &policy,
            &metric(MetricValue::Gauge(42.0)),
            &metric(MetricValue::Gauge(57.0)),
        )
        .unwrap();
        assert_eq!(merged.value, MetricValue::Gauge(99.0));
    }

    #[test]
    fn test_combine_summary_drops() {
        let policy = AggregationPolicy::default();
        let s = metric(MetricValue::Summary(Summary::default()));
        assert!(combine(&policy, &s, &s).is_none());
    }

    #[test]
    fn test_combine_type_disagreement() {
        let policy = AggregationPolicy::default();
        let a = metric(MetricValue::Counter(1.0));
        let b = metric(MetricValue::Gauge(1.0));
        assert!(combine(&policy, &a, &b).is_none());
    }

    #[test]
    fn test_weighted_avg() {
        assert_eq!(weighted_avg(10.0, 1, 20.0, 1), 15.0);
        // (a*(n-1) + b) / n with n = 3
        assert_eq!(weighted_avg(15.0, 2, 30.0, 1), 20.0);
        assert_eq!(weighted_avg(1.0, 0, 2.0, 0), 2.0);
    }
}
