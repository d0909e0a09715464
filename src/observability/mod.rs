// observability/mod.rs - Tracing and Metrics

//! Structured logging and Prometheus metrics for the PKI.
//!
//! Neither is required: without [`init_tracing`] events go nowhere, and
//! without [`init_metrics`] the recording functions are no-ops.
//!
//! # Example
//!
//! ```ignore
//! use peer_pki::observability::{init_tracing, init_metrics, MetricsConfig, TracingConfig};
//!
//! init_tracing(&TracingConfig::default())?;
//! let handle = init_metrics(MetricsConfig::default())?;
//! println!("{}", handle.render());
//! ```

mod metrics;
mod tracing_setup;

pub use metrics::{
    init_metrics, record_assurance_computation, record_certificate_issued,
    record_certificates_evicted, record_credential_decision, record_credential_received,
    record_credential_sent, record_index_rebuild, record_malformed_record, AssuranceMetrics,
    CertificateMetrics, CredentialMetrics, MetricsConfig, MetricsHandle,
};

pub use tracing_setup::{init_tracing, TracingConfig, TracingFormat};
