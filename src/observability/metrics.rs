// observability/metrics.rs - Prometheus Metrics

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Configuration for metrics
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Histogram buckets for assurance computation time (in seconds)
    pub assurance_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            assurance_buckets: vec![
                0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ],
        }
    }
}

/// Handle to the Prometheus recorder
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Certificate store metrics
pub struct CertificateMetrics;

impl CertificateMetrics {
    pub const ISSUED_TOTAL: &'static str = "pki_certificates_issued_total";
    pub const EVICTED_TOTAL: &'static str = "pki_certificates_evicted_total";
    pub const MALFORMED_TOTAL: &'static str = "pki_malformed_records_total";
    pub const INDEXED: &'static str = "pki_certificates_indexed";
    pub const INDEX_REBUILDS_TOTAL: &'static str = "pki_index_rebuilds_total";
}

/// Trust computation metrics
pub struct AssuranceMetrics;

impl AssuranceMetrics {
    pub const COMPUTE_SECONDS: &'static str = "pki_assurance_compute_seconds";
}

/// Credential exchange metrics
pub struct CredentialMetrics;

impl CredentialMetrics {
    pub const SENT_TOTAL: &'static str = "pki_credentials_sent_total";
    pub const RECEIVED_TOTAL: &'static str = "pki_credentials_received_total";
    pub const DECIDED_TOTAL: &'static str = "pki_credentials_decided_total";
}

/// Install the global Prometheus recorder.
///
/// Exposition is left to the host application through [`MetricsHandle::render`].
/// Fails if a recorder is already installed.
pub fn init_metrics(config: MetricsConfig) -> Result<MetricsHandle, Box<dyn std::error::Error>> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(AssuranceMetrics::COMPUTE_SECONDS.into()),
            &config.assurance_buckets,
        )?
        .install_recorder()?;

    describe_counter!(
        CertificateMetrics::ISSUED_TOTAL,
        "Total number of certificates issued by the owner"
    );
    describe_counter!(
        CertificateMetrics::EVICTED_TOTAL,
        "Total number of certificates deleted from the transport"
    );
    describe_counter!(
        CertificateMetrics::MALFORMED_TOTAL,
        "Total number of stored records that failed to parse"
    );
    describe_gauge!(
        CertificateMetrics::INDEXED,
        "Certificates held by the subject index after the last rebuild"
    );
    describe_counter!(
        CertificateMetrics::INDEX_REBUILDS_TOTAL,
        "Total number of subject index rebuilds"
    );

    describe_histogram!(
        AssuranceMetrics::COMPUTE_SECONDS,
        "Identity assurance computation time in seconds (cache misses only)"
    );

    describe_counter!(
        CredentialMetrics::SENT_TOTAL,
        "Total number of credentials sent to peers"
    );
    describe_counter!(
        CredentialMetrics::RECEIVED_TOTAL,
        "Total number of credentials received from peers"
    );
    describe_counter!(
        CredentialMetrics::DECIDED_TOTAL,
        "Total number of received credentials accepted or rejected"
    );

    tracing::info!("Metrics initialized");

    Ok(MetricsHandle { handle })
}

// Recording functions

/// Record the owner issuing a certificate
pub fn record_certificate_issued() {
    counter!(CertificateMetrics::ISSUED_TOTAL).increment(1);
}

/// Record certificates deleted from the transport
pub fn record_certificates_evicted(reason: &str, count: usize) {
    counter!(
        CertificateMetrics::EVICTED_TOTAL,
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

/// Record a stored record that could not be parsed
pub fn record_malformed_record(kind: &str) {
    counter!(CertificateMetrics::MALFORMED_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Record a subject index rebuild
pub fn record_index_rebuild(indexed: usize) {
    counter!(CertificateMetrics::INDEX_REBUILDS_TOTAL).increment(1);
    gauge!(CertificateMetrics::INDEXED).set(indexed as f64);
}

/// Record an uncached assurance computation
pub fn record_assurance_computation(duration: Duration) {
    histogram!(AssuranceMetrics::COMPUTE_SECONDS).record(duration.as_secs_f64());
}

pub fn record_credential_sent() {
    counter!(CredentialMetrics::SENT_TOTAL).increment(1);
}

pub fn record_credential_received(connection: &str) {
    counter!(
        CredentialMetrics::RECEIVED_TOTAL,
        "connection" => connection.to_string()
    )
    .increment(1);
}

/// Record the outcome of a credential decision
pub fn record_credential_decision(accepted: bool) {
    counter!(
        CredentialMetrics::DECIDED_TOTAL,
        "accepted" => accepted.to_string()
    )
    .increment(1);
}
