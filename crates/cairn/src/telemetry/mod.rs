// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logs and optional OpenTelemetry counters for tiered cache operations.

use std::sync::Arc;

#[cfg(any(feature = "metrics", test))]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};
use tracing::Level;

pub(crate) mod attributes;
#[cfg(any(feature = "metrics", test))]
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheOperation {
    Get,
    Set,
    Expire,
    Exists,
    Remove,
    Populate,
}

impl CacheOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "cache.get",
            Self::Set => "cache.set",
            Self::Expire => "cache.expire",
            Self::Exists => "cache.exists",
            Self::Remove => "cache.remove",
            Self::Populate => "cache.populate",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheActivity {
    Hit,
    Miss,
    Inserted,
    Refreshed,
    Removed,
    Populated,
    Error,
}

impl CacheActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Inserted => "cache.inserted",
            Self::Refreshed => "cache.refreshed",
            Self::Removed => "cache.removed",
            Self::Populated => "cache.populated",
            Self::Error => "cache.error",
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::Hit | Self::Miss | Self::Refreshed => Level::DEBUG,
            Self::Inserted | Self::Removed | Self::Populated => Level::INFO,
            Self::Error => Level::ERROR,
        }
    }
}

/// Which tier an event happened in.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheTier {
    Near,
    Far,
}

impl CacheTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Near => "near",
            Self::Far => "far",
        }
    }
}

/// Records cache events as tracing events and, when a meter is attached, as counters.
#[derive(Clone, Debug)]
pub(crate) struct CacheTelemetry {
    name: Arc<str>,
    #[cfg(any(feature = "metrics", test))]
    event_counter: Option<Counter<u64>>,
}

impl CacheTelemetry {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            #[cfg(any(feature = "metrics", test))]
            event_counter: None,
        }
    }

    #[cfg(any(feature = "metrics", test))]
    pub fn with_meter(mut self, meter: &Meter) -> Self {
        self.event_counter = Some(metrics::create_event_counter(meter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self, operation: CacheOperation, activity: CacheActivity, tier: CacheTier) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(counter) = &self.event_counter {
            counter.add(
                1,
                &[
                    KeyValue::new(attributes::CACHE_NAME, self.name.to_string()),
                    KeyValue::new(attributes::CACHE_OPERATION_NAME, operation.as_str()),
                    KeyValue::new(attributes::CACHE_ACTIVITY_NAME, activity.as_str()),
                    KeyValue::new(attributes::CACHE_TIER_NAME, tier.as_str()),
                ],
            );
        }

        Self::emit(&self.name, operation, activity, tier);
    }

    fn emit(cache_name: &str, operation: CacheOperation, activity: CacheActivity, tier: CacheTier) {
        let op = operation.as_str();
        let act = activity.as_str();
        let tier = tier.as_str();

        // The level of a tracing event must be a constant.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    cache.name = cache_name,
                    cache.operation = op,
                    cache.activity = act,
                    cache.tier = tier,
                    "cache.event"
                )
            };
        }

        let level = activity.level();
        if level == Level::ERROR {
            emit_event!(error);
        } else if level == Level::INFO {
            emit_event!(info);
        } else {
            emit_event!(debug);
        }
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::metrics::MeterProvider;

    use super::*;
    use crate::telemetry::testing::{LogCapture, MetricTester};

    #[test]
    fn operation_and_activity_labels() {
        assert_eq!(CacheOperation::Get.as_str(), "cache.get");
        assert_eq!(CacheOperation::Populate.as_str(), "cache.populate");
        assert_eq!(CacheActivity::Hit.as_str(), "cache.hit");
        assert_eq!(CacheActivity::Populated.as_str(), "cache.populated");
        assert_eq!(CacheTier::Far.as_str(), "far");
    }

    #[test]
    fn activity_levels() {
        assert_eq!(CacheActivity::Hit.level(), Level::DEBUG);
        assert_eq!(CacheActivity::Miss.level(), Level::DEBUG);
        assert_eq!(CacheActivity::Inserted.level(), Level::INFO);
        assert_eq!(CacheActivity::Removed.level(), Level::INFO);
        assert_eq!(CacheActivity::Error.level(), Level::ERROR);
    }

    #[test]
    fn emit_contains_all_fields() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        CacheTelemetry::new("profiles").record(CacheOperation::Set, CacheActivity::Inserted, CacheTier::Near);

        capture.assert_contains(attributes::CACHE_EVENT_NAME);
        capture.assert_contains(attributes::CACHE_NAME);
        capture.assert_contains(attributes::CACHE_OPERATION_NAME);
        capture.assert_contains(attributes::CACHE_ACTIVITY_NAME);
        capture.assert_contains("profiles");
        capture.assert_contains("cache.inserted");
        capture.assert_contains("INFO");
    }

    #[test]
    fn counter_carries_attributes() {
        let tester = MetricTester::new();
        let meter = tester.meter_provider().meter("cairn");
        let telemetry = CacheTelemetry::new("profiles").with_meter(&meter);

        telemetry.record(CacheOperation::Get, CacheActivity::Miss, CacheTier::Far);

        tester.assert_attributes_contain(&[
            KeyValue::new(attributes::CACHE_NAME, "profiles"),
            KeyValue::new(attributes::CACHE_OPERATION_NAME, "cache.get"),
            KeyValue::new(attributes::CACHE_ACTIVITY_NAME, "cache.miss"),
            KeyValue::new(attributes::CACHE_TIER_NAME, "far"),
        ]);
    }
}
