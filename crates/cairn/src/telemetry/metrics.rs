// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use opentelemetry::metrics::{Counter, Meter};

const CACHE_EVENT_COUNT_NAME: &str = "cache.event.count";

pub(crate) fn create_event_counter(meter: &Meter) -> Counter<u64> {
    meter
        .u64_counter(CACHE_EVENT_COUNT_NAME)
        .with_description("Tiered cache events")
        .with_unit("{event}")
        .build()
}
