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

use once_cell::sync::Lazy;
use regex::Regex;
use strum::{AsRefStr, EnumString};

/// Matches `<gauge:agg:RULE>` anywhere in a family's help text.
static DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<gauge:agg:([A-Za-z]+)>").expect("valid regex"));

/// How two gauge samples of the same series are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GaugeRule {
    #[default]
    Sum,
    Max,
    Min,
    /// Keep the incoming sample.
    Last,
    /// Keep the stored sample.
    First,
    /// Running mean over every observation.
    Avg,
}

impl GaugeRule {
    pub(crate) fn apply(self, a: f64, n_a: u64, b: f64, n_b: u64) -> f64 {
        match self {
            GaugeRule::Sum => a + b,
            GaugeRule::Max => {
                if a >= b {
                    a
                } else {
                    b
                }
            }
            GaugeRule::Min => {
                if a <= b {
                    a
                } else {
                    b
                }
            }
            GaugeRule::Last => b,
            GaugeRule::First => a,
            GaugeRule::Avg => super::weighted_avg(a, n_a, b, n_b),
        }
    }
}

/// Resolves the rule of a gauge family from its help text, falling back to
/// `default` when there is no directive or it names an unknown rule.
pub fn gauge_rule_from_help(help: Option<&str>, default: GaugeRule) -> GaugeRule {
    let Some(caps) = help.and_then(|h| DIRECTIVE.captures(h)) else {
        return default;
    };
    match caps[1].parse() {
        Ok(rule) => rule,
        Err(_) => {
            tracing::warn!(rule = &caps[1], "unknown gauge aggregation rule, using default");
            default
        }
    }
}
