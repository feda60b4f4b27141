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

use std::io;

use crate::value::MetricType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The payload could not be parsed; nothing was ingested.
    #[error("failed to parse metrics: {0}")]
    Parse(String),

    #[error("invalid label {name:?} in metric family '{family}': {reason}")]
    InvalidLabel {
        family: String,
        name: String,
        reason: &'static str,
    },

    /// Two metrics of one payload resolve to the same series. `labels` is the
    /// colliding label set, including `__name__`.
    #[error("duplicate labels: {labels}")]
    DuplicateLabels { family: String, labels: String },

    #[error("cannot merge metric '{family}': type {existing} != {incoming}")]
    TypeMismatch {
        family: String,
        existing: MetricType,
        incoming: MetricType,
    },

    /// Some families of a payload were rejected; the others were committed.
    #[error("{}", join(.0))]
    Rejected(Vec<Error>),

    #[error("failed to encode metric family '{family}': {source}")]
    Encode {
        family: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Name of the metric family the error is about, if any.
    pub fn family(&self) -> Option<&str> {
        match self {
            Error::InvalidLabel { family, .. }
            | Error::DuplicateLabels { family, .. }
            | Error::TypeMismatch { family, .. }
            | Error::Encode { family, .. } => Some(family),
            Error::Parse(_) | Error::Rejected(_) => None,
        }
    }
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
