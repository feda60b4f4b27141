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

use crate::value::{Bucket, Histogram};

pub(crate) fn histogram(a: &Histogram, b: &Histogram) -> Histogram {
    Histogram {
        sample_count: a.sample_count.saturating_add(b.sample_count),
        sample_sum: a.sample_sum + b.sample_sum,
        buckets: merge_buckets(&a.buckets, &b.buckets),
    }
}

/// Walks both bucket lists in upper-bound order: shared bounds add their
/// cumulative counts, the others pass through.
pub(crate) fn merge_buckets(a: &[Bucket], b: &[Bucket]) -> Vec<Bucket> {
    a.iter()
        .merge_join_by(b.iter(), |x, y| x.upper_bound.total_cmp(&y.upper_bound))
        .map(|pair| match pair {
            EitherOrBoth::Left(x) | EitherOrBoth::Right(x) => *x,
            EitherOrBoth::Both(x, y) => Bucket {
                upper_bound: x.upper_bound,
                cumulative_count: x.cumulative_count.saturating_add(y.cumulative_count),
            },
        })
        .collect()
}
