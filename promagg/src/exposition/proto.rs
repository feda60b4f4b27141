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

//! Length-delimited `io.prometheus.client.MetricFamily` messages.

use std::io::{self, Write};

use indexmap::{map::Entry, IndexMap};
use prost::Message;

use crate::{
    error::{Error, Result},
    labels::{Label, Labels},
    value::{
        Bucket, Histogram, Metric, MetricFamily, MetricType, MetricValue, Quantile, Summary,
        FIELD_BUCKET, FIELD_QUANTILE,
    },
};

/// The `io.prometheus.client` messages.
///
/// The fields must be in the same order as the protobuf definition.
pub mod pb {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct LabelPair {
        #[prost(string, optional, tag = "1")]
        pub name: Option<String>,
        #[prost(string, optional, tag = "2")]
        pub value: Option<String>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Gauge {
        #[prost(double, optional, tag = "1")]
        pub value: Option<f64>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Counter {
        #[prost(double, optional, tag = "1")]
        pub value: Option<f64>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Quantile {
        #[prost(double, optional, tag = "1")]
        pub quantile: Option<f64>,
        #[prost(double, optional, tag = "2")]
        pub value: Option<f64>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Summary {
        #[prost(uint64, optional, tag = "1")]
        pub sample_count: Option<u64>,
        #[prost(double, optional, tag = "2")]
        pub sample_sum: Option<f64>,
        #[prost(message, repeated, tag = "3")]
        pub quantile: Vec<Quantile>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Untyped {
        #[prost(double, optional, tag = "1")]
        pub value: Option<f64>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Histogram {
        #[prost(uint64, optional, tag = "1")]
        pub sample_count: Option<u64>,
        #[prost(double, optional, tag = "2")]
        pub sample_sum: Option<f64>,
        #[prost(message, repeated, tag = "3")]
        pub bucket: Vec<Bucket>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Bucket {
        #[prost(uint64, optional, tag = "1")]
        pub cumulative_count: Option<u64>,
        #[prost(double, optional, tag = "2")]
        pub upper_bound: Option<f64>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Metric {
        #[prost(message, repeated, tag = "1")]
        pub label: Vec<LabelPair>,
        #[prost(message, optional, tag = "2")]
        pub gauge: Option<Gauge>,
        #[prost(message, optional, tag = "3")]
        pub counter: Option<Counter>,
        #[prost(message, optional, tag = "4")]
        pub summary: Option<Summary>,
        #[prost(message, optional, tag = "5")]
        pub untyped: Option<Untyped>,
        #[prost(int64, optional, tag = "6")]
        pub timestamp_ms: Option<i64>,
        #[prost(message, optional, tag = "7")]
        pub histogram: Option<Histogram>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct MetricFamily {
        #[prost(string, optional, tag = "1")]
        pub name: Option<String>,
        #[prost(string, optional, tag = "2")]
        pub help: Option<String>,
        #[prost(enumeration = "MetricType", optional, tag = "3")]
        pub r#type: Option<i32>,
        #[prost(message, repeated, tag = "4")]
        pub metric: Vec<Metric>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum MetricType {
        Counter = 0,
        Gauge = 1,
        Summary = 2,
        Untyped = 3,
        Histogram = 4,
    }
}

impl From<pb::MetricType> for MetricType {
    fn from(t: pb::MetricType) -> Self {
        match t {
            pb::MetricType::Counter => MetricType::Counter,
            pb::MetricType::Gauge => MetricType::Gauge,
            pb::MetricType::Summary => MetricType::Summary,
            pb::MetricType::Untyped => MetricType::Untyped,
            pb::MetricType::Histogram => MetricType::Histogram,
        }
    }
}

impl From<MetricType> for pb::MetricType {
    fn from(t: MetricType) -> Self {
        match t {
            MetricType::Counter => pb::MetricType::Counter,
            MetricType::Gauge => pb::MetricType::Gauge,
            MetricType::Summary => pb::MetricType::Summary,
            MetricType::Untyped => pb::MetricType::Untyped,
            MetricType::Histogram => pb::MetricType::Histogram,
        }
    }
}

/// Decodes a stream of length-delimited families. Repeated family names are
/// concatenated; a repeat with a different type fails the whole payload.
pub(crate) fn parse(mut payload: &[u8]) -> Result<Vec<MetricFamily>> {
    let mut families: IndexMap<String, MetricFamily> = IndexMap::new();
    while !payload.is_empty() {
        let msg = pb::MetricFamily::decode_length_delimited(&mut payload)
            .map_err(|e| Error::Parse(format!("invalid protobuf payload: {e}")))?;
        let family = from_proto(msg)?;
        match families.entry(family.name.clone()) {
            Entry::Occupied(mut e) => {
                let existing = e.get_mut();
                if existing.metric_type != family.metric_type {
                    return Err(Error::Parse(format!(
                        "metric family '{}' sent twice with types {} and {}",
                        family.name, existing.metric_type, family.metric_type
                    )));
                }
                existing.metrics.extend(family.metrics);
            }
            Entry::Vacant(e) => {
                e.insert(family);
            }
        }
    }
    Ok(families
        .into_values()
        .filter(|f| !f.metrics.is_empty())
        .collect())
}

fn from_proto(msg: pb::MetricFamily) -> Result<MetricFamily> {
    let name = match msg.name {
        Some(name) if !name.is_empty() => name,
        _ => return Err(Error::Parse("metric family without a name".to_owned())),
    };
    let raw_type = msg.r#type.unwrap_or_default();
    let metric_type: MetricType = pb::MetricType::from_i32(raw_type)
        .ok_or_else(|| Error::Parse(format!("metric family '{name}' has unknown type {raw_type}")))?
        .into();

    let mut metrics = Vec::with_capacity(msg.metric.len());
    for m in msg.metric {
        let labels = Labels::try_new(m.label.into_iter().map(|pair| {
            Label::new(pair.name.unwrap_or_default(), pair.value.unwrap_or_default())
        }))
        .map_err(|e| Error::Parse(format!("metric family '{name}': {e}")))?;
        let value = match metric_type {
            MetricType::Counter => {
                MetricValue::Counter(m.counter.and_then(|c| c.value).unwrap_or_default())
            }
            MetricType::Gauge => {
                MetricValue::Gauge(m.gauge.and_then(|g| g.value).unwrap_or_default())
            }
            MetricType::Untyped => {
                MetricValue::Untyped(m.untyped.and_then(|u| u.value).unwrap_or_default())
            }
            MetricType::Histogram => {
                let h = m.histogram.unwrap_or_default();
                let mut histogram = Histogram {
                    sample_count: h.sample_count.unwrap_or_default(),
                    sample_sum: h.sample_sum.unwrap_or_default(),
                    buckets: h
                        .bucket
                        .into_iter()
                        .map(|b| -> Result<Bucket> {
                            Ok(Bucket {
                                upper_bound: not_nan(&name, FIELD_BUCKET, b.upper_bound)?,
                                cumulative_count: b.cumulative_count.unwrap_or_default(),
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                };
                histogram.normalize();
                MetricValue::Histogram(histogram)
            }
            MetricType::Summary => {
                let s = m.summary.unwrap_or_default();
                let mut quantiles = s
                    .quantile
                    .into_iter()
                    .map(|q| -> Result<Quantile> {
                        Ok(Quantile {
                            quantile: not_nan(&name, FIELD_QUANTILE, q.quantile)?,
                            value: q.value.unwrap_or_default(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                quantiles.sort_by(|a, b| a.quantile.total_cmp(&b.quantile));
                MetricValue::Summary(Summary {
                    sample_count: s.sample_count.unwrap_or_default(),
                    sample_sum: s.sample_sum.unwrap_or_default(),
                    quantiles,
                })
            }
        };
        metrics.push(Metric::new(labels, value));
    }

    Ok(MetricFamily {
        name,
        help: msg.help,
        metric_type,
        metrics,
    })
}

/// Bucket bounds and quantiles order the metric, so NaN is not accepted.
fn not_nan(family: &str, field: &str, v: Option<f64>) -> Result<f64> {
    match v.unwrap_or_default() {
        v if v.is_nan() => Err(Error::Parse(format!(
            "metric family '{family}': {field} value is NaN"
        ))),
        v => Ok(v),
    }
}

fn to_proto(family: &MetricFamily) -> pb::MetricFamily {
    let metric = family
        .metrics
        .iter()
        .map(|m| {
            let mut out = pb::Metric {
                label: m
                    .labels
                    .iter()
                    .map(|l| pb::LabelPair {
                        name: Some(l.name.clone()),
                        value: Some(l.value.clone()),
                    })
                    .collect(),
                ..Default::default()
            };
            match &m.value {
                MetricValue::Counter(v) => out.counter = Some(pb::Counter { value: Some(*v) }),
                MetricValue::Gauge(v) => out.gauge = Some(pb::Gauge { value: Some(*v) }),
                MetricValue::Untyped(v) => out.untyped = Some(pb::Untyped { value: Some(*v) }),
                MetricValue::Histogram(h) => {
                    out.histogram = Some(pb::Histogram {
                        sample_count: Some(h.sample_count),
                        sample_sum: Some(h.sample_sum),
                        bucket: h
                            .buckets
                            .iter()
                            .map(|b| pb::Bucket {
                                cumulative_count: Some(b.cumulative_count),
                                upper_bound: Some(b.upper_bound),
                            })
                            .collect(),
                    })
                }
                MetricValue::Summary(s) => {
                    out.summary = Some(pb::Summary {
                        sample_count: Some(s.sample_count),
                        sample_sum: Some(s.sample_sum),
                        quantile: s
                            .quantiles
                            .iter()
                            .map(|q| pb::Quantile {
                                quantile: Some(q.quantile),
                                value: Some(q.value),
                            })
                            .collect(),
                    })
                }
            }
            out
        })
        .collect();

    pb::MetricFamily {
        name: Some(family.name.clone()),
        help: family.help.clone(),
        r#type: Some(pb::MetricType::from(family.metric_type) as i32),
        metric,
    }
}

pub(crate) fn encode<W: Write>(w: &mut W, family: &MetricFamily) -> io::Result<()> {
    super::check_not_empty(family)?;
    let msg = to_proto(family);
    let mut buf = Vec::with_capacity(msg.encoded_len() + 10);
    msg.encode_length_delimited(&mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    w.write_all(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram_family() -> MetricFamily {
        MetricFamily::new("histogram", MetricType::Histogram)
            .with_help("A histogram")
            .with_metric(Metric::new(
                Labels::new([("job", "test")]),
                MetricValue::Histogram(Histogram {
                    sample_count: 9,
                    sample_sum: 7.0,
                    buckets: vec![
                        Bucket {
                            upper_bound: 1.0,
                            cumulative_count: 0,
                        },
                        Bucket {
                            upper_bound: f64::INFINITY,
                            cumulative_count: 9,
                        },
                    ],
                }),
            ))
    }

    #[test]
    fn test_encode_bytes() {
        let family = MetricFamily::new("a", MetricType::Gauge)
            .with_metric(Metric::new(Labels::default(), MetricValue::Gauge(1.0)));
        let mut out = Vec::new();
        encode(&mut out, &family).unwrap();
        assert_eq!(
            out,
            [
                0x12, // message length
                0x0a, 0x01, b'a', // name
                0x18, 0x01, // type GAUGE
                0x22, 0x0b, // metric
                0x12, 0x09, 0x09, 0, 0, 0, 0, 0, 0, 0xf0, 0x3f, // gauge { value: 1.0 }
            ]
        );
    }

    #[test]
    fn test_roundtrip() {
        let counter = MetricFamily::new("counter", MetricType::Counter)
            .with_metric(Metric::new(
                Labels::new([("a", "a"), ("b", "b")]),
                MetricValue::Counter(31.0),
            ));
        let histogram = histogram_family();

        let mut buf = Vec::new();
        encode(&mut buf, &counter).unwrap();
        encode(&mut buf, &histogram).unwrap();

        let families = parse(&buf).unwrap();
        assert_eq!(families, [counter, histogram]);
    }

    #[test]
    fn test_repeated_family_concatenated() {
        let one = |v: &str| {
            MetricFamily::new("c", MetricType::Counter).with_metric(Metric::new(
                Labels::new([("x", v)]),
                MetricValue::Counter(1.0),
            ))
        };
        let mut buf = Vec::new();
        encode(&mut buf, &one("1")).unwrap();
        encode(&mut buf, &one("2")).unwrap();
        let families = parse(&buf).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].metrics.len(), 2);

        encode(
            &mut buf,
            &MetricFamily::new("c", MetricType::Gauge)
                .with_metric(Metric::new(Labels::default(), MetricValue::Gauge(1.0))),
        )
        .unwrap();
        assert!(matches!(parse(&buf), Err(Error::Parse(_))));
    }

    #[test]
    fn test_missing_inf_bucket_added() {
        let msg = pb::MetricFamily {
            name: Some("h".to_owned()),
            help: None,
            r#type: Some(pb::MetricType::Histogram as i32),
            metric: vec![pb::Metric {
                histogram: Some(pb::Histogram {
                    sample_count: Some(3),
                    sample_sum: Some(1.0),
                    bucket: vec![pb::Bucket {
                        cumulative_count: Some(2),
                        upper_bound: Some(0.5),
                    }],
                }),
                ..Default::default()
            }],
        };
        let mut buf = Vec::new();
        msg.encode_length_delimited(&mut buf).unwrap();
        let families = parse(&buf).unwrap();
        let MetricValue::Histogram(h) = &families[0].metrics[0].value else {
            panic!("not a histogram");
        };
        assert_eq!(
            h.buckets.last(),
            Some(&Bucket {
                upper_bound: f64::INFINITY,
                cumulative_count: 3
            })
        );
    }

    #[test]
    fn test_nan_bounds_rejected() {
        let bucket = |upper_bound| pb::Bucket {
            cumulative_count: Some(1),
            upper_bound: Some(upper_bound),
        };
        let histogram = pb::Metric {
            histogram: Some(pb::Histogram {
                sample_count: Some(1),
                sample_sum: Some(1.0),
                bucket: vec![bucket(1.0), bucket(f64::NAN)],
            }),
            ..Default::default()
        };
        let summary = pb::Metric {
            summary: Some(pb::Summary {
                sample_count: Some(1),
                sample_sum: Some(1.0),
                quantile: vec![pb::Quantile {
                    quantile: Some(f64::NAN),
                    value: Some(1.0),
                }],
            }),
            ..Default::default()
        };

        for (metric_type, metric, want) in [
            (pb::MetricType::Histogram, histogram, "le value is NaN"),
            (pb::MetricType::Summary, summary, "quantile value is NaN"),
        ] {
            let mut buf = Vec::new();
            pb::MetricFamily {
                name: Some("x".to_owned()),
                help: None,
                r#type: Some(metric_type as i32),
                metric: vec![metric],
            }
            .encode_length_delimited(&mut buf)
            .unwrap();
            let err = parse(&buf).unwrap_err();
            assert!(matches!(err, Error::Parse(_)));
            assert!(err.to_string().ends_with(want), "{err}");
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse(&[0x05, 0x0a]), Err(Error::Parse(_))));

        let mut buf = Vec::new();
        pb::MetricFamily {
            name: None,
            help: None,
            r#type: None,
            metric: vec![],
        }
        .encode_length_delimited(&mut buf)
        .unwrap();
        let err = parse(&buf).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to parse metrics: metric family without a name"
        );
    }
}
