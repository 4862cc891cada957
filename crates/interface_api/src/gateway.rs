//! HTTP payment gateway client
//!
//! Charges a stored instrument by POSTing to `{base_url}/charges`:
//!
//! ```text
//! POST /charges
//! Authorization: Bearer <api key>
//! Idempotency-Key: PD-LC-7-20240710-1
//! {"payment_method_ref": "...", "amount": "50.00", "currency": "USD", "idempotency_key": "..."}
//!
//! 200 {"success": true, "transaction_id": "txn_123"}
//! 200 {"success": false, "failure_reason": "Insufficient funds"}
//! ```
//!
//! A 402 carrying the same body is read as a decline. Every other non-2xx
//! status becomes a `PortError`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use core_kernel::{AdapterHealth, DomainPort, HealthCheckResult, HealthCheckable, PortError};
use domain_billing::{ChargeOutcome, ChargeRequest, PaymentGateway};

const SERVICE_NAME: &str = "payment-gateway";

/// Connection settings for the gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChargeBody<'a> {
    payment_method_ref: &'a str,
    amount: Decimal,
    currency: &'a str,
    idempotency_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    success: bool,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

/// `PaymentGateway` over a JSON HTTP API
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, PortError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PortError::Internal {
                message: "failed to build HTTP client".to_string(),
                source: Some(Box::new(e)),
            })?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn transport_error(&self, error: reqwest::Error) -> PortError {
        if error.is_timeout() {
            PortError::Timeout {
                operation: "charge".to_string(),
                duration_ms: u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            PortError::Connection {
                message: format!("payment gateway unreachable: {}", error),
                source: Some(Box::new(error)),
            }
        }
    }
}

/// Maps an HTTP answer from the gateway onto the port vocabulary
fn interpret_response(
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> Result<ChargeOutcome, PortError> {
    match status {
        s if s.is_success() || s == StatusCode::PAYMENT_REQUIRED => {
            let parsed: ChargeResponse =
                serde_json::from_str(body).map_err(|e| PortError::Transformation {
                    message: format!("unreadable gateway response: {}", e),
                })?;
            // `success` alone decides; the transaction id is optional
            let mut outcome = if parsed.success {
                ChargeOutcome {
                    success: true,
                    transaction_ref: parsed.transaction_id,
                    failure_reason: None,
                    raw_response: None,
                }
            } else {
                ChargeOutcome::declined(
                    parsed
                        .failure_reason
                        .unwrap_or_else(|| "Payment declined".to_string()),
                )
            };
            outcome.raw_response = Some(body.to_string());
            Ok(outcome)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PortError::Unauthorized {
            message: format!("payment gateway rejected credentials ({})", status),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(PortError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        }),
        s if s.is_server_error() => Err(PortError::ServiceUnavailable {
            service: format!("{} ({})", SERVICE_NAME, s),
        }),
        s => Err(PortError::validation(format!(
            "payment gateway refused request ({}): {}",
            s, body
        ))),
    }
}

impl DomainPort for HttpPaymentGateway {}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key, amount = %request.amount))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PortError> {
        // Always send the currency's full precision, "50.00" rather than "50"
        let mut amount = request.amount.round_to_currency().amount();
        amount.rescale(request.amount.currency().decimal_places());

        let body = ChargeBody {
            payment_method_ref: &request.payment_method_ref,
            amount,
            currency: request.amount.currency().code(),
            idempotency_key: &request.idempotency_key,
        };

        let response = self
            .client
            .post(self.url("/charges"))
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        debug!(status = status.as_u16(), "Gateway answered");
        let outcome = interpret_response(status, retry_after, &text);
        if let Err(e) = &outcome {
            warn!(status = status.as_u16(), error = %e, "Gateway call failed");
        }
        outcome
    }
}

#[async_trait]
impl HealthCheckable for HttpPaymentGateway {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let result = self.client.get(self.url("/health")).send().await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (status, message) = match result {
            Ok(r) if r.status().is_success() => (AdapterHealth::Healthy, None),
            Ok(r) => (AdapterHealth::Degraded, Some(format!("status {}", r.status()))),
            Err(e) => (AdapterHealth::Unhealthy, Some(e.to_string())),
        };

        HealthCheckResult {
            adapter_id: SERVICE_NAME.to_string(),
            status,
            latency_ms,
            message,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approved_body() {
        let outcome = interpret_response(
            StatusCode::OK,
            None,
            r#"{"success": true, "transaction_id": "txn_9"}"#,
        )
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.transaction_ref.as_deref(), Some("txn_9"));
        assert!(outcome.raw_response.is_some());
    }

    #[test]
    fn test_decline_without_reason_gets_default() {
        let outcome = interpret_response(StatusCode::PAYMENT_REQUIRED, None, r#"{"success": false}"#)
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.failure_reason.as_deref(), Some("Payment declined"));
    }

    #[test]
    fn test_approval_without_transaction_is_still_approved() {
        let outcome = interpret_response(StatusCode::OK, None, r#"{"success": true}"#).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.transaction_ref, None);
        assert_eq!(outcome.failure_reason, None);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            interpret_response(StatusCode::UNAUTHORIZED, None, ""),
            Err(PortError::Unauthorized { .. })
        ));
        assert!(matches!(
            interpret_response(StatusCode::TOO_MANY_REQUESTS, Some(5), ""),
            Err(PortError::RateLimited { retry_after_secs: 5 })
        ));
        assert!(matches!(
            interpret_response(StatusCode::BAD_GATEWAY, None, ""),
            Err(PortError::ServiceUnavailable { .. })
        ));
        assert!(matches!(
            interpret_response(StatusCode::UNPROCESSABLE_ENTITY, None, "bad"),
            Err(PortError::Validation { .. })
        ));
    }

    #[test]
    fn test_garbage_body_is_transformation_error() {
        assert!(matches!(
            interpret_response(StatusCode::OK, None, "<html>"),
            Err(PortError::Transformation { .. })
        ));
    }
}
