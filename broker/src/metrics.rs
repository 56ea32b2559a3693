use lazy_static::*;
use prometheus::*;

lazy_static! {
    pub static ref FETCH_LATENCY_HISTOGRAM: Histogram = register_histogram!(
        "broker_fetch_latency_histogram",
        "bucketed histogram of fetch request duration, the unit is us",
        exponential_buckets(100.0, 2.0, 18).unwrap()
    )
    .unwrap();
    pub static ref FETCH_BYTES_COUNT: IntCounter =
        register_int_counter!("broker_fetch_bytes_count", "total number of bytes fetched").unwrap();
    pub static ref FETCH_PASS_COUNT: IntCounter = register_int_counter!(
        "broker_fetch_pass_count",
        "total number of planning passes executed by fetch requests"
    )
    .unwrap();
    pub static ref FETCH_PARTITION_ERROR_COUNT: IntCounter = register_int_counter!(
        "broker_fetch_partition_error_count",
        "the count of partition reads answered with an error code"
    )
    .unwrap();
    pub static ref FETCH_SESSION_GAUGE: IntGauge =
        register_int_gauge!("broker_fetch_sessions", "number of cached fetch sessions").unwrap();
    pub static ref FETCH_SESSION_EVICTION_COUNT: IntCounter = register_int_counter!(
        "broker_fetch_session_eviction_count",
        "the count of fetch sessions evicted from the cache"
    )
    .unwrap();
}

pub(crate) fn record_fetch_operation(latency_us: u64, bytes: usize, passes: u32, errors: usize) {
    FETCH_LATENCY_HISTOGRAM.observe(latency_us as f64);
    FETCH_BYTES_COUNT.inc_by(bytes as u64);
    FETCH_PASS_COUNT.inc_by(passes as u64);
    FETCH_PARTITION_ERROR_COUNT.inc_by(errors as u64);
}

pub(crate) fn record_session_count(count: usize) {
    FETCH_SESSION_GAUGE.set(count as i64);
}

pub(crate) fn record_session_evictions(count: usize) {
    FETCH_SESSION_EVICTION_COUNT.inc_by(count as u64);
}
