//! Access to the upstream claims service.

pub mod error;
pub mod http;
pub mod retry;

use chrono::{DateTime, Utc};

use crate::fhir::Bundle;

pub use error::ClientError;
pub use http::HttpClaimsClient;
pub use retry::{Retryable, RetryPolicy, RetryingClaimsClient};

/// Paginated retrieval of a patient's claims records.
pub trait ClaimsClient: Send + Sync {
    /// First page of claims for `patient_id`, optionally restricted to
    /// records updated at or after `since`.
    fn fetch_first_page(
        &self,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Bundle, ClientError>;

    /// Follows the `next` link of `bundle`.
    fn fetch_next_page(&self, bundle: &Bundle) -> Result<Bundle, ClientError>;
}
