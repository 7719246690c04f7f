use std::collections::HashSet;

use metrics::{
    Key,
    Label,
    Level,
    Metadata,
    Recorder as _,
};
use metrics_exporter_prometheus::PrometheusRecorder;

use super::{
    Counter,
    Error,
    Gauge,
    Histogram,
};

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

fn key(name: &'static str, labels: &[(&'static str, String)]) -> Key {
    let labels: Vec<Label> = labels
        .iter()
        .map(|(label_name, label_value)| Label::new(*label_name, label_value.clone()))
        .collect();
    Key::from_parts(name, labels)
}

fn check_duplicate_labels(
    metric_type: &'static str,
    metric_name: &'static str,
    labels: &[(&'static str, String)],
) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for (label_name, label_value) in labels {
        if !seen.insert(*label_name) {
            return Err(Error::DuplicateLabel {
                metric_type,
                metric_name,
                label_name: (*label_name).to_string(),
                label_value: label_value.clone(),
            });
        }
    }
    Ok(())
}

/// A factory for registering one or more [`Counter`]s under the same name,
/// disambiguated by their labels.
pub struct CounterFactory<'a> {
    name: &'static str,
    recorder: &'a PrometheusRecorder,
    registered: HashSet<Vec<(&'static str, String)>>,
}

impl<'a> CounterFactory<'a> {
    pub(super) fn new(name: &'static str, recorder: &'a PrometheusRecorder) -> Self {
        Self {
            name,
            recorder,
            registered: HashSet::new(),
        }
    }

    pub(super) fn metric_type() -> &'static str {
        "counter"
    }

    /// Registers the counter without labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlabeled counter was already registered.
    pub fn register(&mut self) -> Result<Counter, Error> {
        self.register_with_labels(&[])
    }

    /// Registers a counter with the given labels.
    ///
    /// # Errors
    ///
    /// Returns an error if `labels` contains a duplicate label name, or if a
    /// counter was already registered under the same labels.
    pub fn register_with_labels(
        &mut self,
        labels: &[(&'static str, String)],
    ) -> Result<Counter, Error> {
        check_duplicate_labels(Self::metric_type(), self.name, labels)?;
        if !self.registered.insert(labels.to_vec()) {
            return Err(Error::MetricWithLabelsAlreadyRegistered {
                metric_type: Self::metric_type(),
                metric_name: self.name,
            });
        }
        let key = key(self.name, labels);
        Ok(Counter::new(
            self.recorder.register_counter(&key, &metadata()),
        ))
    }
}

/// A factory for registering one or more [`Gauge`]s under the same name,
/// disambiguated by their labels.
pub struct GaugeFactory<'a> {
    name: &'static str,
    recorder: &'a PrometheusRecorder,
    registered: HashSet<Vec<(&'static str, String)>>,
}

impl<'a> GaugeFactory<'a> {
    pub(super) fn new(name: &'static str, recorder: &'a PrometheusRecorder) -> Self {
        Self {
            name,
            recorder,
            registered: HashSet::new(),
        }
    }

    pub(super) fn metric_type() -> &'static str {
        "gauge"
    }

    /// Registers the gauge without labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlabeled gauge was already registered.
    pub fn register(&mut self) -> Result<Gauge, Error> {
        self.register_with_labels(&[])
    }

    /// Registers a gauge with the given labels.
    ///
    /// # Errors
    ///
    /// Returns an error if `labels` contains a duplicate label name, or if a
    /// gauge was already registered under the same labels.
    pub fn register_with_labels(
        &mut self,
        labels: &[(&'static str, String)],
    ) -> Result<Gauge, Error> {
        check_duplicate_labels(Self::metric_type(), self.name, labels)?;
        if !self.registered.insert(labels.to_vec()) {
            return Err(Error::MetricWithLabelsAlreadyRegistered {
                metric_type: Self::metric_type(),
                metric_name: self.name,
            });
        }
        let key = key(self.name, labels);
        Ok(Gauge::new(self.recorder.register_gauge(&key, &metadata())))
    }
}

/// A factory for registering one or more [`Histogram`]s under the same name,
/// disambiguated by their labels.
pub struct HistogramFactory<'a> {
    name: &'static str,
    recorder: &'a PrometheusRecorder,
    registered: HashSet<Vec<(&'static str, String)>>,
}

impl<'a> HistogramFactory<'a> {
    pub(super) fn new(name: &'static str, recorder: &'a PrometheusRecorder) -> Self {
        Self {
            name,
            recorder,
            registered: HashSet::new(),
        }
    }

    pub(super) fn metric_type() -> &'static str {
        "histogram"
    }

    /// Registers the histogram without labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlabeled histogram was already registered.
    pub fn register(&mut self) -> Result<Histogram, Error> {
        self.register_with_labels(&[])
    }

    /// Registers a histogram with the given labels.
    ///
    /// # Errors
    ///
    /// Returns an error if `labels` contains a duplicate label name, or if a
    /// histogram was already registered under the same labels.
    pub fn register_with_labels(
        &mut self,
        labels: &[(&'static str, String)],
    ) -> Result<Histogram, Error> {
        check_duplicate_labels(Self::metric_type(), self.name, labels)?;
        if !self.registered.insert(labels.to_vec()) {
            return Err(Error::MetricWithLabelsAlreadyRegistered {
                metric_type: Self::metric_type(),
                metric_name: self.name,
            });
        }
        let key = key(self.name, labels);
        Ok(Histogram::new(
            self.recorder.register_histogram(&key, &metadata()),
        ))
    }
}
