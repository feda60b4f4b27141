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

use strum::{AsRefStr, EnumString};

/// How two untyped samples of the same series are combined. Producers say
/// nothing about the semantics, so this is a deployment choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum UntypedRule {
    #[default]
    Sum,
    Avg,
}

impl UntypedRule {
    pub(crate) fn apply(self, a: f64, n_a: u64, b: f64, n_b: u64) -> f64 {
        match self {
            UntypedRule::Sum => super::counter(a, b),
            UntypedRule::Avg => super::weighted_avg(a, n_a, b, n_b),
        }
    }
}
