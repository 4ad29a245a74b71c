//! Client for the remote availability/registration service.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ureq::Agent;
use ureq::http::Response;

use crate::config::Config;
use crate::error::ServiceError;

const CHECK_PATH: &str = "/check-username";
const REGISTER_PATH: &str = "/register";

/// The two operations the coordinator consumes from the service.
///
/// `check_username` is idempotent and may be called speculatively.
/// `register` is not; the coordinator calls it at most once per submission.
///
/// Implemented by [`Client`] over HTTP. Tests substitute scripted fakes.
pub trait AvailabilityService: Send + Sync + 'static {
    /// Ask whether `name` is free. `Ok(true)` means available.
    ///
    /// # Errors
    ///
    /// Any [`ServiceError`]; the caller treats all of them as "not confirmed".
    fn check_username(&self, name: &str) -> Result<bool, ServiceError>;

    /// Claim `name`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Rejected`] carrying the server's reason, or a
    /// transport error.
    fn register(&self, name: &str) -> Result<(), ServiceError>;
}

impl<T: AvailabilityService + ?Sized> AvailabilityService for Arc<T> {
    fn check_username(&self, name: &str) -> Result<bool, ServiceError> {
        (**self).check_username(name)
    }

    fn register(&self, name: &str) -> Result<(), ServiceError> {
        (**self).register(name)
    }
}

#[derive(Serialize)]
struct UsernameRequest<'a> {
    username: &'a str,
}

#[derive(Deserialize)]
struct CheckResponse {
    available: bool,
}

/// An HTTP client for the availability service.
///
/// Wraps the underlying HTTP agent to insulate callers from the specific
/// HTTP library version used internally. Non-2xx statuses are returned as
/// responses rather than errors so the register failure reason can be read.
///
/// # Example
///
/// ```no_run
/// use username_avail::check::{AvailabilityService, Client};
/// use username_avail::config::Config;
///
/// let client = Client::new(&Config::new("http://localhost:8080"));
/// if client.check_username("alice")? {
///     client.register("alice")?;
/// }
/// # Ok::<(), username_avail::error::ServiceError>(())
/// ```
#[derive(Clone)]
pub struct Client {
    agent: Agent,
    check_url: String,
    register_url: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("check_url", &self.check_url)
            .field("register_url", &self.register_url)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client for `config.base_url()` with `config.timeout()`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .http_status_as_error(false)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build();
        let base = config.base_url();
        Self {
            agent: Agent::new_with_config(agent_config),
            check_url: format!("{base}{CHECK_PATH}"),
            register_url: format!("{base}{REGISTER_PATH}"),
        }
    }

    /// Full URL of the `check-username` endpoint.
    #[must_use]
    pub fn check_url(&self) -> &str {
        &self.check_url
    }

    /// Full URL of the `register` endpoint.
    #[must_use]
    pub fn register_url(&self) -> &str {
        &self.register_url
    }

    fn post(&self, url: &str, name: &str) -> Result<Response<ureq::Body>, ServiceError> {
        let body = serde_json::to_string(&UsernameRequest { username: name })?;
        let response = self
            .agent
            .post(url)
            .header("Content-Type", "application/json")
            .send(body.as_str())?;
        Ok(response)
    }
}

impl AvailabilityService for Client {
    fn check_username(&self, name: &str) -> Result<bool, ServiceError> {
        let mut response = self.post(&self.check_url, name)?;
        let status = response.status();
        let body = response.body_mut().read_to_string()?;
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: CheckResponse = serde_json::from_str(&body)?;
        Ok(parsed.available)
    }

    fn register(&self, name: &str) -> Result<(), ServiceError> {
        let mut response = self.post(&self.register_url, name)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        // A failed body read still leaves the status as the reason.
        let text = response.body_mut().read_to_string().unwrap_or_default();
        let text = text.trim();
        let message = if text.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("registration failed")
                .to_string()
        } else {
            text.to_string()
        };
        Err(ServiceError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_normalized_base() {
        let client = Client::new(&Config::new("http://svc.test:8080/"));
        assert_eq!(client.check_url(), "http://svc.test:8080/check-username");
        assert_eq!(client.register_url(), "http://svc.test:8080/register");
    }

    #[test]
    fn request_body_is_username_object() {
        let body = serde_json::to_string(&UsernameRequest { username: "alice" }).unwrap();
        assert_eq!(body, r#"{"username":"alice"}"#);
    }

    #[test]
    fn check_response_ignores_extra_fields() {
        let parsed: CheckResponse =
            serde_json::from_str(r#"{"available":false,"suggestion":"alice2"}"#).unwrap();
        assert!(!parsed.available);
    }

    #[test]
    #[ignore = "requires a service listening on localhost:8080"]
    fn live_service_answers_check() {
        let client = Client::new(&Config::default());
        assert!(client.check_username("zzzyyyxxxwww-not-a-real-user").is_ok());
    }

    // Auto-trait compile-time tests
    #[test]
    fn client_is_send_sync() {
        fn assert_normal<T: Sized + Send + Sync>() {}
        assert_normal::<Client>();
    }

    #[test]
    fn service_error_is_send_sync() {
        fn assert_normal<T: Sized + Send + Sync>() {}
        assert_normal::<ServiceError>();
    }
}
