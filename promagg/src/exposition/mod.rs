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

//! Prometheus exposition formats: the line-oriented text format and the
//! length-delimited protobuf encoding of `io.prometheus.client.MetricFamily`.

use std::io;

use crate::{error::Result, value::MetricFamily};

pub mod proto;
pub mod text;

pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
pub const PROTO_CONTENT_TYPE: &str =
    "application/vnd.google.protobuf; proto=io.prometheus.client.MetricFamily; encoding=delimited";

const PROTO_MEDIA_TYPE: &str = "application/vnd.google.protobuf";
const PROTO_MESSAGE: &str = "io.prometheus.client.MetricFamily";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Text,
    ProtoDelimited,
}

impl Format {
    pub fn content_type(self) -> &'static str {
        match self {
            Format::Text => TEXT_CONTENT_TYPE,
            Format::ProtoDelimited => PROTO_CONTENT_TYPE,
        }
    }

    /// Picks the response format from an `Accept` header. Protobuf is only
    /// chosen when the delimited `MetricFamily` encoding is asked for.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return Format::Text;
        };
        let mut ranges = accept
            .split(',')
            .map(MediaRange::parse)
            .filter(|r| r.q > 0.0)
            .collect::<Vec<_>>();
        // stable, so equal weights keep header order
        ranges.sort_by(|a, b| b.q.total_cmp(&a.q));
        for range in ranges {
            if range.is_delimited_proto() {
                return Format::ProtoDelimited;
            }
            if range.media_type == "text/plain" {
                return Format::Text;
            }
        }
        Format::Text
    }

    /// Picks the format of a pushed body from its `Content-Type`.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type.map(MediaRange::parse) {
            Some(range) if range.is_delimited_proto() => Format::ProtoDelimited,
            _ => Format::Text,
        }
    }
}

struct MediaRange<'a> {
    media_type: &'a str,
    q: f64,
    proto: Option<&'a str>,
    encoding: Option<&'a str>,
}

impl<'a> MediaRange<'a> {
    fn parse(s: &'a str) -> Self {
        let mut parts = s.split(';').map(str::trim);
        let media_type = parts.next().unwrap_or_default();
        let mut range = MediaRange {
            media_type,
            q: 1.0,
            proto: None,
            encoding: None,
        };
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match key.trim() {
                "q" => range.q = value.parse().unwrap_or(0.0),
                "proto" => range.proto = Some(value),
                "encoding" => range.encoding = Some(value),
                _ => {}
            }
        }
        range
    }

    fn is_delimited_proto(&self) -> bool {
        self.media_type == PROTO_MEDIA_TYPE
            && self.proto == Some(PROTO_MESSAGE)
            && self.encoding == Some("delimited")
    }
}

/// Parses a pushed payload into metric families, in payload order.
pub fn parse(payload: &[u8], format: Format) -> Result<Vec<MetricFamily>> {
    match format {
        Format::Text => text::parse(payload),
        Format::ProtoDelimited => proto::parse(payload),
    }
}

/// Encodes one metric family.
pub fn encode<W: io::Write>(w: &mut W, format: Format, family: &MetricFamily) -> io::Result<()> {
    match format {
        Format::Text => text::encode(w, family),
        Format::ProtoDelimited => proto::encode(w, family),
    }
}

pub(crate) fn check_not_empty(family: &MetricFamily) -> io::Result<()> {
    if family.metrics.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("metric family {:?} has no metrics", family.name),
        ));
    }
    Ok(())
}
