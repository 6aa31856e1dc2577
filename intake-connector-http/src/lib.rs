//! HTTP API connectors: generic REST and FHIR R4.
//!
//! Both connectors share one [`HttpTransport`]: an interval rate limiter,
//! exponential backoff on transient failures, HTTP status routing
//! (429 → rate-limit error with `Retry-After`, 5xx retryable, 4xx
//! terminal), and per-request auth injection including a cached OAuth2
//! token that refreshes 60 seconds before expiry.

#![deny(missing_docs)]

pub mod auth;
pub mod fhir;
pub mod flatten;
pub mod rest;
pub mod transport;

pub use auth::{AuthConfig, OAuth2Config, OAuth2Grant};
pub use fhir::FhirConnector;
pub use rest::RestConnector;
pub use transport::{HttpResponse, HttpTransport, TransportSettings};
