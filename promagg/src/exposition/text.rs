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

//! The Prometheus text exposition format, version 0.0.4.

use std::io::{self, Write};

use indexmap::IndexMap;

use crate::{
    error::{Error, Result},
    labels::{Label, Labels},
    value::{
        Bucket, Histogram, Metric, MetricFamily, MetricType, MetricValue, Quantile, Summary,
        FIELD_BUCKET, FIELD_QUANTILE, SUFFIX_BUCKET, SUFFIX_COUNT, SUFFIX_SUM,
    },
};

#[derive(Debug, Default)]
struct FamilyBuilder {
    help: Option<String>,
    metric_type: Option<MetricType>,
    seen_samples: bool,
    metrics: Vec<Metric>,
    histograms: IndexMap<Labels, Histogram>,
    summaries: IndexMap<Labels, Summary>,
}

impl FamilyBuilder {
    fn build(self, name: String) -> Option<MetricFamily> {
        let metric_type = self.metric_type?;
        let mut metrics = self.metrics;
        metrics.extend(self.histograms.into_iter().map(|(labels, mut h)| {
            h.normalize();
            Metric::new(labels, MetricValue::Histogram(h))
        }));
        metrics.extend(self.summaries.into_iter().map(|(labels, mut s)| {
            s.quantiles.sort_by(|a, b| a.quantile.total_cmp(&b.quantile));
            Metric::new(labels, MetricValue::Summary(s))
        }));
        if metrics.is_empty() {
            return None;
        }
        Some(MetricFamily {
            name,
            help: self.help,
            metric_type,
            metrics,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    Plain,
    Bucket,
    Sum,
    Count,
    Quantile,
}

/// Parses a text payload. Families come out in the order they first
/// appear; families that never got a sample are dropped.
pub(crate) fn parse(payload: &[u8]) -> Result<Vec<MetricFamily>> {
    let input = std::str::from_utf8(payload)
        .map_err(|e| Error::Parse(format!("payload is not valid UTF-8: {e}")))?;
    let mut families: IndexMap<String, FamilyBuilder> = IndexMap::new();
    for (idx, line) in input.lines().enumerate() {
        parse_line(&mut families, line)
            .map_err(|msg| Error::Parse(format!("text format parsing error in line {}: {msg}", idx + 1)))?;
    }
    Ok(families
        .into_iter()
        .filter_map(|(name, builder)| builder.build(name))
        .collect())
}

fn parse_line(families: &mut IndexMap<String, FamilyBuilder>, line: &str) -> Result<(), String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    match line.strip_prefix('#') {
        Some(comment) => parse_comment(families, comment),
        None => parse_sample(families, line),
    }
}

fn parse_comment(families: &mut IndexMap<String, FamilyBuilder>, comment: &str) -> Result<(), String> {
    let Some((keyword, rest)) = comment.trim_start().split_once([' ', '\t']) else {
        return Ok(());
    };
    let rest = rest.trim_start();
    match keyword {
        "HELP" => {
            let (name, help) = rest.split_once([' ', '\t']).unwrap_or((rest, ""));
            check_metric_name(name)?;
            let builder = families.entry(name.to_owned()).or_default();
            if builder.help.is_some() {
                return Err(format!("second HELP line for metric name {name:?}"));
            }
            builder.help = Some(unescape_help(help));
        }
        "TYPE" => {
            let mut parts = rest.split_whitespace();
            let (Some(name), Some(ty)) = (parts.next(), parts.next()) else {
                return Err("TYPE line needs a metric name and a type".to_owned());
            };
            check_metric_name(name)?;
            let metric_type = ty
                .parse::<MetricType>()
                .map_err(|_| format!("unknown metric type {ty:?}"))?;
            let builder = families.entry(name.to_owned()).or_default();
            if builder.metric_type.is_some() && builder.seen_samples {
                return Err(format!("TYPE line for {name:?} after its samples"));
            }
            if builder.metric_type.is_some() {
                return Err(format!("second TYPE line for metric name {name:?}"));
            }
            builder.metric_type = Some(metric_type);
        }
        // any other comment
        _ => {}
    }
    Ok(())
}

fn parse_sample(families: &mut IndexMap<String, FamilyBuilder>, line: &str) -> Result<(), String> {
    let sample = Sample::parse(line)?;
    let (family_name, kind) = resolve_family(families, sample.name);
    let builder = families.entry(family_name.to_owned()).or_default();
    builder.seen_samples = true;
    let metric_type = *builder.metric_type.get_or_insert(MetricType::Untyped);

    let mut labels = sample.labels;
    let special = match kind {
        SampleKind::Bucket => Some(FIELD_BUCKET),
        SampleKind::Quantile => Some(FIELD_QUANTILE),
        _ => None,
    };
    let special = match special {
        Some(name) => {
            let pos = labels
                .iter()
                .position(|l| l.name == name)
                .ok_or_else(|| format!("sample {:?} is missing label {name:?}", sample.name))?;
            let raw = labels.remove(pos).value;
            let v = parse_float(&raw)
                .filter(|v| !v.is_nan())
                .ok_or_else(|| format!("invalid {name} value {raw:?}"))?;
            Some(v)
        }
        None => None,
    };
    let labels = Labels::try_new(labels)?;
    let value = sample.value;

    match (metric_type, kind) {
        (MetricType::Counter, SampleKind::Plain) => builder
            .metrics
            .push(Metric::new(labels, MetricValue::Counter(value))),
        (MetricType::Gauge, SampleKind::Plain) => builder
            .metrics
            .push(Metric::new(labels, MetricValue::Gauge(value))),
        (MetricType::Untyped, SampleKind::Plain) => builder
            .metrics
            .push(Metric::new(labels, MetricValue::Untyped(value))),
        (MetricType::Histogram, SampleKind::Bucket) => {
            builder.histograms.entry(labels).or_default().buckets.push(Bucket {
                upper_bound: special.unwrap_or(f64::INFINITY),
                cumulative_count: value as u64,
            })
        }
        (MetricType::Histogram, SampleKind::Sum) => {
            builder.histograms.entry(labels).or_default().sample_sum = value
        }
        (MetricType::Histogram, SampleKind::Count) => {
            builder.histograms.entry(labels).or_default().sample_count = value as u64
        }
        (MetricType::Summary, SampleKind::Quantile) => {
            builder.summaries.entry(labels).or_default().quantiles.push(Quantile {
                quantile: special.unwrap_or_default(),
                value,
            })
        }
        (MetricType::Summary, SampleKind::Sum) => {
            builder.summaries.entry(labels).or_default().sample_sum = value
        }
        (MetricType::Summary, SampleKind::Count) => {
            builder.summaries.entry(labels).or_default().sample_count = value as u64
        }
        (metric_type, _) => {
            return Err(format!(
                "unexpected sample {:?} for {} family {family_name:?}",
                sample.name,
                metric_type.as_ref()
            ))
        }
    }
    Ok(())
}

/// Maps a sample name to the family it belongs to: `x_bucket`, `x_sum` and
/// `x_count` belong to `x` when `x` is a declared histogram (or summary, for
/// the latter two).
fn resolve_family<'a>(
    families: &IndexMap<String, FamilyBuilder>,
    name: &'a str,
) -> (&'a str, SampleKind) {
    let declared = |n: &str| families.get(n).and_then(|b| b.metric_type);
    for (suffix, kind) in [
        (SUFFIX_BUCKET, SampleKind::Bucket),
        (SUFFIX_SUM, SampleKind::Sum),
        (SUFFIX_COUNT, SampleKind::Count),
    ] {
        let Some(base) = name.strip_suffix(suffix) else {
            continue;
        };
        match declared(base) {
            Some(MetricType::Histogram) => return (base, kind),
            Some(MetricType::Summary) if kind != SampleKind::Bucket => return (base, kind),
            _ => {}
        }
    }
    if declared(name) == Some(MetricType::Summary) {
        return (name, SampleKind::Quantile);
    }
    (name, SampleKind::Plain)
}

fn check_metric_name(name: &str) -> Result<(), String> {
    if crate::labels::is_valid_metric_name(name) {
        Ok(())
    } else {
        Err(format!("invalid metric name {name:?}"))
    }
}

struct Sample<'a> {
    name: &'a str,
    labels: Vec<Label>,
    value: f64,
}

impl<'a> Sample<'a> {
    /// `name{label="value",...} value [timestamp]`; the timestamp is
    /// validated and discarded.
    fn parse(line: &'a str) -> Result<Self, String> {
        let mut lex = Lexer { rest: line };
        let name = lex.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
        if name.is_empty() {
            return Err(format!("invalid metric name in {line:?}"));
        }
        lex.skip_ws();
        let mut labels = Vec::new();
        if lex.eat('{') {
            loop {
                lex.skip_ws();
                if lex.eat('}') {
                    break;
                }
                let label_name = lex.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                if label_name.is_empty() {
                    return Err(format!("invalid label name for metric {name:?}"));
                }
                lex.skip_ws();
                if !lex.eat('=') {
                    return Err(format!("expected '=' after label name {label_name:?}"));
                }
                lex.skip_ws();
                let value = lex.quoted()?;
                labels.push(Label::new(label_name, value));
                lex.skip_ws();
                if lex.eat(',') {
                    continue;
                }
                if lex.eat('}') {
                    break;
                }
                return Err(format!("expected ',' or '}}' after label {label_name:?}"));
            }
        }

        let mut fields = lex.rest.split_whitespace();
        let raw = fields
            .next()
            .ok_or_else(|| format!("missing value for metric {name:?}"))?;
        let value = parse_float(raw).ok_or_else(|| format!("invalid value {raw:?}"))?;
        if let Some(ts) = fields.next() {
            ts.parse::<i64>()
                .map_err(|_| format!("invalid timestamp {ts:?}"))?;
        }
        if let Some(extra) = fields.next() {
            return Err(format!("unexpected {extra:?} after sample value"));
        }
        Ok(Sample {
            name,
            labels,
            value,
        })
    }
}

struct Lexer<'a> {
    rest: &'a str,
}

impl<'a> Lexer<'a> {
    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start_matches([' ', '\t']);
    }

    fn eat(&mut self, c: char) -> bool {
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let end = self.rest.find(|c: char| !pred(c)).unwrap_or(self.rest.len());
        let (head, tail) = self.rest.split_at(end);
        self.rest = tail;
        head
    }

    /// A double-quoted label value with `\\`, `\"` and `\n` escapes.
    fn quoted(&mut self) -> Result<String, String> {
        if !self.eat('"') {
            return Err("expected '\"' to start a label value".to_owned());
        }
        let mut out = String::new();
        let mut chars = self.rest.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.rest = &self.rest[i + 1..];
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, other)) => return Err(format!("invalid escape sequence '\\{other}'")),
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err("unterminated label value".to_owned())
    }
}

pub(crate) fn parse_float(s: &str) -> Option<f64> {
    match s {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => s.parse().ok(),
    }
}

pub(crate) fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_owned()
    } else if v == f64::INFINITY {
        "+Inf".to_owned()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_owned()
    } else {
        shortest_g(v)
    }
}

/// Shortest round-trip digits, in exponent form (`1e+21`, `1.5e-07`) once
/// the decimal exponent leaves `-4..6`.
fn shortest_g(v: f64) -> String {
    let sci = format!("{v:e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return v.to_string();
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return v.to_string();
    };
    if (-4..6).contains(&exp) {
        return v.to_string();
    }
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

fn unescape_help(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn escape_help(s: &str) -> String {
    s.replace('\\', r"\\").replace('\n', r"\n")
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', r"\\")
        .replace('"', "\\\"")
        .replace('\n', r"\n")
}

/// Writes one family in text format. Labels come out in their stored order
/// with `le`/`quantile` last.
pub(crate) fn encode<W: Write>(w: &mut W, family: &MetricFamily) -> io::Result<()> {
    super::check_not_empty(family)?;
    let name = family.name.as_str();
    if let Some(help) = &family.help {
        writeln!(w, "# HELP {name} {}", escape_help(help))?;
    }
    writeln!(w, "# TYPE {name} {}", family.metric_type.as_ref())?;

    for metric in &family.metrics {
        let labels = &metric.labels;
        match &metric.value {
            MetricValue::Counter(v) | MetricValue::Gauge(v) | MetricValue::Untyped(v) => {
                write_sample(w, name, "", labels, None, &format_float(*v))?
            }
            MetricValue::Histogram(h) => {
                for b in &h.buckets {
                    write_sample(
                        w,
                        name,
                        SUFFIX_BUCKET,
                        labels,
                        Some((FIELD_BUCKET, b.upper_bound)),
                        &b.cumulative_count.to_string(),
                    )?;
                }
                write_sample(w, name, SUFFIX_SUM, labels, None, &format_float(h.sample_sum))?;
                write_sample(w, name, SUFFIX_COUNT, labels, None, &h.sample_count.to_string())?;
            }
            MetricValue::Summary(s) => {
                for q in &s.quantiles {
                    write_sample(
                        w,
                        name,
                        "",
                        labels,
                        Some((FIELD_QUANTILE, q.quantile)),
                        &format_float(q.value),
                    )?;
                }
                write_sample(w, name, SUFFIX_SUM, labels, None, &format_float(s.sample_sum))?;
                write_sample(w, name, SUFFIX_COUNT, labels, None, &s.sample_count.to_string())?;
            }
        }
    }
    Ok(())
}

fn write_sample<W: Write>(
    w: &mut W,
    name: &str,
    suffix: &str,
    labels: &Labels,
    extra: Option<(&str, f64)>,
    value: &str,
) -> io::Result<()> {
    write!(w, "{name}{suffix}")?;
    if !labels.is_empty() || extra.is_some() {
        w.write_all(b"{")?;
        let mut sep = "";
        for label in labels.iter() {
            write!(w, "{sep}{}=\"{}\"", label.name, escape_label_value(&label.value))?;
            sep = ",";
        }
        if let Some((extra_name, extra_value)) = extra {
            write!(w, "{sep}{extra_name}=\"{}\"", format_float(extra_value))?;
        }
        w.write_all(b"}")?;
    }
    writeln!(w, " {value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    fn roundtrip(input: &str) -> String {
        let families = parse(input.as_bytes()).unwrap();
        let mut out = Vec::new();
        for family in &families {
            encode(&mut out, family).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse_simple_types() {
        let families = parse(
            br#"
# HELP gauge A gauge
# TYPE gauge gauge
gauge 42
# HELP counter A counter
# TYPE counter counter
counter{a="a",b="b"} 31 1681711100000
untyped_thing{x="1"} -Inf
"#,
        )
        .unwrap();
        let summary = families
            .iter()
            .map(|f| (f.name.as_str(), f.metric_type, f.help.as_deref(), f.metrics.len()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            [
                ("gauge", MetricType::Gauge, Some("A gauge"), 1),
                ("counter", MetricType::Counter, Some("A counter"), 1),
                ("untyped_thing", MetricType::Untyped, None, 1),
            ]
        );
        assert_eq!(families[1].metrics[0].value, MetricValue::Counter(31.0));
        assert_eq!(
            families[2].metrics[0].value,
            MetricValue::Untyped(f64::NEG_INFINITY)
        );
    }

    #[test]
    fn test_parse_histogram() {
        let families = parse(
            br#"# HELP histogram A histogram
# TYPE histogram histogram
histogram_bucket{le="1"} 0
histogram_bucket{le="3"} 3
histogram_bucket{le="2"} 0
histogram_sum{} 2.5
histogram_count 4
histogram_bucket{le="1",path="/a"} 1
histogram_count{path="/a"} 1
histogram_sum{path="/a"} 0.5
"#,
        )
        .unwrap();
        assert_eq!(families.len(), 1);
        let metrics = &families[0].metrics;
        assert_eq!(metrics.len(), 2);
        let MetricValue::Histogram(h) = &metrics[0].value else {
            panic!("not a histogram");
        };
        let bounds = h.buckets.iter().map(|b| b.upper_bound).collect::<Vec<_>>();
        assert_eq!(bounds, [1.0, 2.0, 3.0, f64::INFINITY]);
        assert_eq!(h.buckets[3].cumulative_count, 4, "+Inf filled from the count");
        assert_eq!(h.sample_sum, 2.5);
        assert_eq!(metrics[1].labels, Labels::new([("path", "/a")]));
    }

    #[test]
    fn test_roundtrip_histogram() {
        let out = roundtrip(
            r#"# HELP histogram A histogram
# TYPE histogram histogram
histogram_bucket{job="test",le="1"} 0
histogram_bucket{job="test",le="2.5"} 3
histogram_bucket{job="test",le="+Inf"} 9
histogram_sum{job="test"} 7
histogram_count{job="test"} 9
"#,
        );
        expect![[r#"
            # HELP histogram A histogram
            # TYPE histogram histogram
            histogram_bucket{job="test",le="1"} 0
            histogram_bucket{job="test",le="2.5"} 3
            histogram_bucket{job="test",le="+Inf"} 9
            histogram_sum{job="test"} 7
            histogram_count{job="test"} 9
        "#]]
        .assert_eq(&out);
    }

    #[test]
    fn test_roundtrip_summary() {
        let out = roundtrip(
            r#"# TYPE rpc_duration_seconds summary
rpc_duration_seconds{quantile="0.99"} 0.3
rpc_duration_seconds{quantile="0.5"} 0.1
rpc_duration_seconds_sum 17.5
rpc_duration_seconds_count 120
"#,
        );
        expect![[r#"
            # TYPE rpc_duration_seconds summary
            rpc_duration_seconds{quantile="0.5"} 0.1
            rpc_duration_seconds{quantile="0.99"} 0.3
            rpc_duration_seconds_sum 17.5
            rpc_duration_seconds_count 120
        "#]]
        .assert_eq(&out);
    }

    #[test]
    fn test_roundtrip_escapes() {
        let out = roundtrip(
            r#"# HELP msg Line one\nwith a \\ backslash
# TYPE msg gauge
msg{text="say \"hi\"\nnow",path="C:\\tmp"} NaN
"#,
        );
        expect![[r#"
            # HELP msg Line one\nwith a \\ backslash
            # TYPE msg gauge
            msg{path="C:\\tmp",text="say \"hi\"\nnow"} NaN
        "#]]
        .assert_eq(&out);

        let families = parse(out.as_bytes()).unwrap();
        assert_eq!(families[0].help.as_deref(), Some("Line one\nwith a \\ backslash"));
        assert_eq!(families[0].metrics[0].labels.get("text"), Some("say \"hi\"\nnow"));
    }

    #[test]
    fn test_duplicates_are_kept_for_validation() {
        let families = parse(
            br#"# TYPE ui_external_lib_loaded gauge
ui_external_lib_loaded{name="Munchkin",loaded="true"} 15171
ui_external_lib_loaded{name="Munchkin",loaded="true"} 1
"#,
        )
        .unwrap();
        assert_eq!(families[0].metrics.len(), 2);
    }

    #[test]
    fn test_parse_errors() {
        let cases = [
            ("counter{a=\"1\",a=\"2\"} 1\n", r#"duplicate label name "a""#),
            ("counter 1\n# TYPE counter counter\n", "after its samples"),
            ("# TYPE c counter\n# TYPE c gauge\n", "second TYPE line"),
            ("# HELP c one\n# HELP c two\n", "second HELP line"),
            ("# TYPE c bogus\n", "unknown metric type"),
            ("counter{a=\"1\" 1\n", "expected ',' or '}'"),
            ("counter{a=\"1} 1\n", "unterminated label value"),
            ("counter{a=\"\\x\"} 1\n", "invalid escape sequence"),
            ("counter abc\n", r#"invalid value "abc""#),
            ("counter 1 2 3\n", "unexpected \"3\""),
            ("counter 1 soon\n", "invalid timestamp"),
            ("counter\n", "missing value"),
            ("# TYPE h histogram\nh_bucket 1\n", "missing label \"le\""),
            ("# TYPE h histogram\nh 1\n", "unexpected sample"),
            ("# TYPE h histogram\nh_bucket{le=\"NaN\"} 1\n", r#"invalid le value "NaN""#),
            ("# TYPE s summary\ns{quantile=\"NaN\"} 1\n", r#"invalid quantile value "NaN""#),
            ("{a=\"b\"} 1\n", "invalid metric name"),
        ];
        for (input, want) in cases {
            let err = parse(input.as_bytes()).unwrap_err();
            assert!(matches!(err, Error::Parse(_)));
            assert!(
                err.to_string().contains(want),
                "{input:?}: {err} does not contain {want:?}"
            );
        }
    }

    #[test]
    fn test_parse_error_line_number() {
        let err = parse(b"# TYPE c counter\nc 1\nc{=\"x\"} 2\n").unwrap_err();
        expect![[r#"failed to parse metrics: text format parsing error in line 3: invalid label name for metric "c""#]]
            .assert_eq(&err.to_string());
    }

    #[test]
    fn test_empty_family_dropped() {
        let families = parse(b"# HELP lonely nobody home\n# TYPE lonely counter\n").unwrap();
        assert!(families.is_empty());
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(60.0), "60");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(f64::INFINITY), "+Inf");
        assert_eq!(format_float(-0.5), "-0.5");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(123456.0), "123456");
        assert_eq!(format_float(1234567.0), "1.234567e+06");
        assert_eq!(format_float(1e21), "1e+21");
        assert_eq!(format_float(0.00001), "1e-05");
        assert_eq!(format_float(-1.5e-300), "-1.5e-300");
        assert_eq!(format_float(f64::MAX), "1.7976931348623157e+308");
        assert_eq!(parse_float("+Inf"), Some(f64::INFINITY));
        assert!(parse_float("NaN").unwrap().is_nan());
        assert_eq!(parse_float("1e3"), Some(1000.0));
    }
}
