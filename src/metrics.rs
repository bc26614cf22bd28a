use anyhow::Result;
use opentelemetry::{global, metrics::Counter, KeyValue};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;

use crate::rest::RestMethod;

pub fn init_provider() -> Result<Registry> {
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;
    let provider = SdkMeterProvider::builder()
        .with_resource(opentelemetry_sdk::Resource::new(vec![
            KeyValue::new("service.name", "ambry-frontend"),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]))
        .with_reader(exporter)
        .build();
    global::set_meter_provider(provider);
    Ok(registry)
}

/// Request counters for the REST surface.
#[derive(Debug)]
pub struct ApiMetrics {
    get_requests: Counter<u64>,
    head_requests: Counter<u64>,
    post_requests: Counter<u64>,
    delete_requests: Counter<u64>,
    unsupported_requests: Counter<u64>,
    error_responses: Counter<u64>,
}

impl ApiMetrics {
    pub fn new() -> Self {
        let meter = global::meter("frontend-http");
        Self {
            get_requests: meter
                .u64_counter("frontend_get_requests")
                .with_description("GET requests received")
                .init(),
            head_requests: meter
                .u64_counter("frontend_head_requests")
                .with_description("HEAD requests received")
                .init(),
            post_requests: meter
                .u64_counter("frontend_post_requests")
                .with_description("POST requests received")
                .init(),
            delete_requests: meter
                .u64_counter("frontend_delete_requests")
                .with_description("DELETE requests received")
                .init(),
            unsupported_requests: meter
                .u64_counter("frontend_unsupported_requests")
                .with_description("requests with an unsupported method")
                .init(),
            error_responses: meter
                .u64_counter("frontend_error_responses")
                .with_description("requests that terminated with an error")
                .init(),
        }
    }

    pub fn record_request(&self, method: &RestMethod) {
        match method {
            RestMethod::Get => self.get_requests.add(1, &[]),
            RestMethod::Head => self.head_requests.add(1, &[]),
            RestMethod::Post => self.post_requests.add(1, &[]),
            RestMethod::Delete => self.delete_requests.add(1, &[]),
            RestMethod::Other(_) => self.unsupported_requests.add(1, &[]),
        }
    }

    pub fn record_error(&self) {
        self.error_responses.add(1, &[]);
    }
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}
