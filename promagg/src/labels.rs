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

use std::{fmt, ops::Index, sync::Arc};

use rustc_hash::FxHashSet;

use crate::{
    error::{Error, Result},
    value::{MetricFamily, MetricType, FIELD_BUCKET, FIELD_NAME, FIELD_QUANTILE},
};

/// Separates names and values in the fingerprint input so that
/// `("ab", "c")` and `("a", "bc")` hash differently.
const SEPARATOR: u8 = 0xff;

/// Label is a key/value pair of strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// `Labels` is a sorted set of `Label`s.
///
/// Ordering compares pairs one by one (name first, then value); a label set
/// that is a strict prefix of another sorts first.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Labels(Vec<Arc<Label>>);

impl Labels {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let labels = Self::from_unsorted(
            labels
                .into_iter()
                .map(|(k, v)| Label::new(k.as_ref(), v.as_ref())),
        );
        assert!(!labels.has_duplicate_names(), "label names are not unique");
        labels
    }

    /// Builds a label set, failing if a name appears twice.
    pub fn try_new<I>(labels: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = Label>,
    {
        let labels = Self::from_unsorted(labels);
        match labels.0.windows(2).find(|w| w[0].name == w[1].name) {
            Some(w) => Err(format!("duplicate label name {:?}", w[0].name)),
            None => Ok(labels),
        }
    }

    fn from_unsorted<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = Label>,
    {
        let mut labels = labels.into_iter().map(Arc::new).collect::<Vec<_>>();
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Self(labels)
    }

    fn has_duplicate_names(&self) -> bool {
        self.0.windows(2).any(|w| w[0].name == w[1].name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter().map(AsRef::as_ref)
    }

    /// Returns the value of the label with given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by_key(&name, |label| label.name.as_str())
            .ok()
            .map(|index| self.0[index].value.as_str())
    }

    /// Retains only the labels specified by the predicate.
    pub(crate) fn retain<P>(&mut self, mut predicate: P)
    where
        P: FnMut(&Label) -> bool,
    {
        self.0.retain(|label| predicate(label.as_ref()))
    }

    /// Digest identifying the series `family_name{self}`.
    ///
    /// Fails if the family name or any label is not a valid Prometheus name.
    pub fn fingerprint(&self, family_name: &str) -> Result<Fingerprint> {
        if !is_valid_metric_name(family_name) {
            return Err(invalid_label(family_name, FIELD_NAME, "invalid metric name"));
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(FIELD_NAME.as_bytes());
        hasher.update(&[SEPARATOR]);
        hasher.update(family_name.as_bytes());
        hasher.update(&[SEPARATOR]);
        for label in self.iter() {
            if label.name.is_empty() {
                return Err(invalid_label(family_name, &label.name, "empty label name"));
            }
            if !is_valid_label_name(&label.name) {
                return Err(invalid_label(family_name, &label.name, "invalid label name"));
            }
            hasher.update(label.name.as_bytes());
            hasher.update(&[SEPARATOR]);
            hasher.update(label.value.as_bytes());
            hasher.update(&[SEPARATOR]);
        }
        Ok(Fingerprint(hasher.finalize().into()))
    }

    /// Formats the label set together with the implicit `__name__` label,
    /// e.g. `{__name__="up", job="api"}`.
    pub fn display_with_name(&self, family_name: &str) -> String {
        let name = Label::new(FIELD_NAME, family_name);
        let mut all = self.iter().chain([&name]).collect::<Vec<_>>();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        let pairs = all
            .iter()
            .map(|l| format!("{}={:?}", l.name, l.value))
            .collect::<Vec<_>>();
        format!("{{{}}}", pairs.join(", "))
    }
}

impl Index<&str> for Labels {
    type Output = str;

    fn index(&self, key: &str) -> &Self::Output {
        match self.get(key) {
            Some(value) => value,
            None => panic!("no label found for key {key:?}"),
        }
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs = self
            .iter()
            .map(|l| format!("{}={:?}", l.name, l.value))
            .collect::<Vec<_>>();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        hex::encode(fp.0)
    }
}

/// Label names stripped from every pushed metric. Matching is
/// case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoredLabels(Vec<String>);

impl IgnoredLabels {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names = names
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        names.sort();
        names.dedup();
        Self(names)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.binary_search(&name.to_lowercase()).is_ok()
    }
}

/// Merges `injected` into `labels` (an injected name overwrites the existing
/// label of that name), drops `ignored` names and returns the sorted result.
pub fn canonicalize(labels: &Labels, injected: &[Label], ignored: &IgnoredLabels) -> Labels {
    let mut out = labels.clone();
    if !injected.is_empty() {
        let overridden = injected
            .iter()
            .map(|l| l.name.as_str())
            .collect::<FxHashSet<_>>();
        out.retain(|label| !overridden.contains(label.name.as_str()));
        let mut pairs = out.0;
        for label in injected {
            // a later injected label of the same name wins
            pairs.retain(|l| l.name != label.name);
            pairs.push(Arc::new(label.clone()));
        }
        out = Labels(pairs);
    }
    if !ignored.is_empty() {
        out.retain(|label| !ignored.contains(&label.name));
    }
    out.0.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

/// Fails with `DuplicateLabels` if two metrics of `family` are the same
/// series. Meant for freshly parsed families, before they are merged.
pub fn validate_no_duplicates(family: &MetricFamily) -> Result<()> {
    let mut seen = FxHashSet::default();
    seen.reserve(family.metrics.len());
    for metric in &family.metrics {
        let fp = metric.labels.fingerprint(&family.name)?;
        if !seen.insert(fp) {
            return Err(Error::DuplicateLabels {
                family: family.name.clone(),
                labels: metric.labels.display_with_name(&family.name),
            });
        }
    }
    Ok(())
}

/// Fails with `InvalidLabel` if a metric of `family` carries a name the
/// exposition formats reserve: `__` prefixed names, `le` on histograms and
/// `quantile` on summaries.
pub fn validate_reserved_labels(family: &MetricFamily) -> Result<()> {
    for label in family.metrics.iter().flat_map(|m| m.labels.iter()) {
        if let Some(reason) = reserved_reason(family.metric_type, &label.name) {
            return Err(invalid_label(&family.name, &label.name, reason));
        }
    }
    Ok(())
}

fn reserved_reason(metric_type: MetricType, name: &str) -> Option<&'static str> {
    match (metric_type, name) {
        (_, name) if name.starts_with("__") => Some("reserved label name"),
        (MetricType::Histogram, FIELD_BUCKET) => {
            Some("label name reserved for histogram buckets")
        }
        (MetricType::Summary, FIELD_QUANTILE) => {
            Some("label name reserved for summary quantiles")
        }
        _ => None,
    }
}

fn invalid_label(family: &str, name: &str, reason: &'static str) -> Error {
    Error::InvalidLabel {
        family: family.to_owned(),
        name: name.to_owned(),
        reason,
    }
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`
pub(crate) fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub(crate) fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Metric, MetricType, MetricValue};
    use expect_test::expect;

    #[test]
    fn test_labels() {
        let labels = Labels::new([("b", "1"), ("a", "2"), ("c", "2")]);
        expect![[r#"
            Labels(
                [
                    Label {
                        name: "a",
                        value: "2",
                    },
                    Label {
                        name: "b",
                        value: "1",
                    },
                    Label {
                        name: "c",
                        value: "2",
                    },
                ],
            )
        "#]]
        .assert_debug_eq(&labels);

        expect![[r#"
            Labels(
                [],
            )
        "#]]
        .assert_debug_eq(&Labels::default());
    }

    #[test]
    #[should_panic]
    fn test_labels_not_unique() {
        Labels::new([("b", "1"), ("a", "2"), ("a", "3"), ("a", "2")]);
    }

    #[test]
    fn test_labels_try_new() {
        let err = Labels::try_new([Label::new("a", "1"), Label::new("a", "2")]).unwrap_err();
        assert_eq!(err, r#"duplicate label name "a""#);
        assert!(Labels::try_new([Label::new("a", "1")]).is_ok());
    }

    #[test]
    fn test_labels_get_retain() {
        let mut labels = Labels::new([("a", "1"), ("b", "2")]);
        assert_eq!(labels.get("b"), Some("2"));
        assert!(labels.get("x").is_none());
        assert_eq!(&labels["a"], "1");

        labels.retain(|label| label.name != "b");
        assert!(labels.get("b").is_none());
    }

    #[test]
    #[should_panic]
    fn test_labels_index_not_found() {
        let labels = Labels::new([("a", "1")]);
        let _ = &labels["b"];
    }

    #[test]
    fn test_labels_ordering() {
        let ab = Labels::new([("a", "a"), ("b", "b")]);
        let a = Labels::new([("a", "a")]);
        let ac = Labels::new([("a", "a"), ("c", "a")]);
        let a2 = Labels::new([("a", "b")]);
        assert!(a < ab, "a strict prefix sorts first");
        assert!(ab < ac);
        assert!(ac < a2, "values compare before later names");
        assert_eq!(
            Labels::new([("b", "b"), ("a", "a")]).cmp(&ab),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn test_canonicalize() {
        let labels = Labels::new([
            ("thing2", "value2"),
            ("Ignore_Me", "ignored_value"),
            ("thing1", "value1"),
            ("job", "from_payload"),
        ]);
        let ignored = IgnoredLabels::new(["IGNORE_ME"]);
        let labels = canonicalize(&labels, &[Label::new("job", "test")], &ignored);
        expect![[r#"{job="test", thing1="value1", thing2="value2"}"#]]
            .assert_eq(&labels.to_string());
    }

    #[test]
    fn test_canonicalize_no_injected() {
        let labels = Labels::new([("b", "b"), ("a", "a")]);
        let out = canonicalize(&labels, &[], &IgnoredLabels::default());
        assert_eq!(out, labels);
    }

    #[test]
    fn test_fingerprint() {
        let labels = Labels::new([("b", "2"), ("a", "1")]);
        let fp = labels.fingerprint("up").unwrap();
        assert_eq!(String::from(fp).len(), 64);

        // reordering does not change identity
        let reordered = Labels::new([("a", "1"), ("b", "2")]);
        assert_eq!(reordered.fingerprint("up").unwrap(), fp);

        // the family name takes part in the digest
        assert_ne!(labels.fingerprint("down").unwrap(), fp);

        // so does the split between name and value
        let x = Labels::new([("ab", "c")]).fingerprint("up").unwrap();
        let y = Labels::new([("a", "bc")]).fingerprint("up").unwrap();
        assert_ne!(x, y);
    }

    #[test]
    fn test_validate_reserved_labels() {
        let family = |metric_type, name: &str| {
            MetricFamily::new("h", metric_type)
                .with_metric(Metric::new(Labels::new([("job", "a")]), MetricValue::Untyped(1.0)))
                .with_metric(Metric::new(Labels::new([(name, "5")]), MetricValue::Untyped(1.0)))
        };

        let rejected = [
            (MetricType::Histogram, "le", "label name reserved for histogram buckets"),
            (MetricType::Summary, "quantile", "label name reserved for summary quantiles"),
            (MetricType::Gauge, "__name__", "reserved label name"),
            (MetricType::Counter, "__meta", "reserved label name"),
        ];
        for (metric_type, label, want) in rejected {
            let err = validate_reserved_labels(&family(metric_type, label)).unwrap_err();
            assert!(
                matches!(&err, Error::InvalidLabel { name, reason, .. }
                    if name == label && *reason == want),
                "{metric_type:?} {label}: {err:?}"
            );
        }

        let accepted = [
            (MetricType::Gauge, "le"),
            (MetricType::Counter, "quantile"),
            (MetricType::Histogram, "_le"),
        ];
        for (metric_type, label) in accepted {
            assert!(validate_reserved_labels(&family(metric_type, label)).is_ok());
        }
    }

    #[test]
    fn test_fingerprint_invalid() {
        let labels = Labels::try_new([Label::new("", "x")]).unwrap();
        let err = labels.fingerprint("up").unwrap_err();
        assert!(matches!(err, Error::InvalidLabel { reason: "empty label name", .. }));

        let labels = Labels::new([("1abc", "x")]);
        assert!(matches!(
            labels.fingerprint("up"),
            Err(Error::InvalidLabel { .. })
        ));
        assert!(matches!(
            Labels::default().fingerprint("bad-name"),
            Err(Error::InvalidLabel { .. })
        ));
    }

    #[test]
    fn test_validate_no_duplicates() {
        let family = MetricFamily::new("ui_external_lib_loaded", MetricType::Gauge)
            .with_metric(Metric::new(
                Labels::new([("name", "Munchkin"), ("loaded", "true"), ("job", "test")]),
                MetricValue::Gauge(15171.0),
            ))
            .with_metric(Metric::new(
                Labels::new([("loaded", "true"), ("name", "Munchkin"), ("job", "test")]),
                MetricValue::Gauge(1.0),
            ));
        let err = validate_no_duplicates(&family).unwrap_err();
        expect![[r#"duplicate labels: {__name__="ui_external_lib_loaded", job="test", loaded="true", name="Munchkin"}"#]]
            .assert_eq(&err.to_string());

        let family = MetricFamily::new("x", MetricType::Counter)
            .with_metric(Metric::new(Labels::new([("a", "1")]), MetricValue::Counter(1.0)))
            .with_metric(Metric::new(Labels::new([("a", "2")]), MetricValue::Counter(1.0)));
        assert!(validate_no_duplicates(&family).is_ok());
    }

    #[test]
    fn test_ignored_labels() {
        let ignored = IgnoredLabels::new(["B", " a ", "", "b"]);
        assert_eq!(ignored, IgnoredLabels::new(["a", "b"]));
        assert!(ignored.contains("A"));
        assert!(!ignored.contains("c"));
    }
}
