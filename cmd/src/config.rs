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

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use promagg::{GaugeRule, IgnoredLabels, Options, UntypedRule, DEFAULT_JOB_LABEL};

use crate::{api::ApiRouterConfig, auth::process_auth_config};

#[derive(Debug, Clone, Parser)]
#[command(name = "prom-aggregation-gateway", version, about = "Prometheus aggregation gateway")]
pub struct Cli {
    /// Listen for API requests on this host/port.
    #[arg(long, env = "PAG_API_LISTEN", default_value = "0.0.0.0:80")]
    pub api_listen: SocketAddr,

    /// Listen for lifecycle requests (health, metrics) on this host/port.
    #[arg(long, env = "PAG_LIFECYCLE_LISTEN", default_value = "0.0.0.0:8888")]
    pub lifecycle_listen: SocketAddr,

    /// The 'Access-Control-Allow-Origin' value to be returned.
    #[arg(long, env = "PAG_CORS", default_value = "*")]
    pub cors: String,

    /// Allowed auth users and their passwords, e.g. "user1=pass1,user2=pass2".
    #[arg(long, env = "PAG_AUTH_USERS", value_delimiter = ',')]
    pub auth_users: Vec<String>,

    /// Label names stripped from every pushed metric (case-insensitive).
    #[arg(long, env = "PAG_IGNORED_LABELS", value_delimiter = ',')]
    pub ignored_labels: Vec<String>,

    /// Evict metrics of push jobs silent for this many seconds; 0 disables.
    #[arg(long, env = "PAG_METRIC_TTL", value_name = "SECONDS")]
    pub metric_ttl: Option<u64>,

    /// Seconds between two staleness sweeps.
    #[arg(
        long,
        env = "PAG_SWEEP_INTERVAL",
        value_name = "SECONDS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval: u64,

    /// Default gauge aggregation: sum, max, min, last, first or avg.
    #[arg(long, env = "PAG_GAUGE_AGGREGATION", default_value = "sum", value_parser = parse_gauge_rule)]
    pub gauge_aggregation: GaugeRule,

    /// Untyped aggregation: sum or avg.
    #[arg(long, env = "PAG_UNTYPED_AGGREGATION", default_value = "sum", value_parser = parse_untyped_rule)]
    pub untyped_aggregation: UntypedRule,

    /// Path label naming the push job.
    #[arg(long, env = "PAG_JOB_LABEL", default_value = DEFAULT_JOB_LABEL)]
    pub job_label: String,
}

fn parse_gauge_rule(s: &str) -> Result<GaugeRule, String> {
    s.parse()
        .map_err(|_| format!("unknown gauge aggregation {s:?}"))
}

fn parse_untyped_rule(s: &str) -> Result<UntypedRule, String> {
    s.parse()
        .map_err(|_| format!("unknown untyped aggregation {s:?}"))
}

impl Cli {
    pub fn metric_ttl(&self) -> Option<Duration> {
        self.metric_ttl
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    pub fn store_options(&self) -> Options {
        Options::default()
            .with_ignored_labels(IgnoredLabels::new(&self.ignored_labels))
            .with_metric_ttl(self.metric_ttl())
            .with_gauge_rule(self.gauge_aggregation)
            .with_untyped_rule(self.untyped_aggregation)
            .with_job_label(&self.job_label)
    }

    pub fn api_router_config(&self) -> ApiRouterConfig {
        ApiRouterConfig {
            cors_domain: self.cors.clone(),
            accounts: process_auth_config(&self.auth_users),
        }
    }
}
