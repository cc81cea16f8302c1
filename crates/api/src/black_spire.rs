//! Black Spire Outpost trading venue client.
//!
//! Beskar trades here under the `STEEL:MANDALORIAN` listing: numeric
//! amounts, a `totalPrice` fill field, and HTTP-200 failure bodies
//! flagged by the presence of `error`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::trade::{VenueClient, VenueError, VenueFill};
use crate::venue::Venue;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Listing Beskar trades under on this venue.
const ORDER_ITEM: &str = "STEEL:MANDALORIAN";

#[derive(Debug, Clone)]
pub struct BlackSpireClient {
    client: reqwest::Client,
    base_url: String,
}

impl BlackSpireClient {
    pub fn new(base_url: impl Into<String>, total_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(total_timeout)
                .build()?,
            base_url: base_url.into(),
        })
    }
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    #[serde(rename = "requestId")]
    request_id: &'a str,
    side: &'static str,
    item: &'static str,
    amount: u64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: Option<serde_json::Value>,
    #[serde(rename = "totalPrice")]
    total_price: Option<serde_json::Number>,
    error: Option<String>,
}

#[async_trait]
impl VenueClient for BlackSpireClient {
    fn venue(&self) -> Venue {
        Venue::BlackSpire
    }

    #[instrument(skip(self), fields(venue = %self.venue()))]
    async fn sell(&self, client_order_id: &str, quantity: u64) -> Result<VenueFill, VenueError> {
        let venue = self.venue();
        let url = format!("{}/market/orders", self.base_url);
        let body = OrderRequest {
            request_id: client_order_id,
            side: "SELL",
            item: ORDER_ITEM,
            amount: quantity,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| VenueError::Transport { venue, source })?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(VenueError::Rejected {
                venue,
                client_order_id: client_order_id.to_string(),
                reason: format!("HTTP {status}: {text}"),
            });
        }
        if !status.is_success() {
            return Err(VenueError::Http {
                venue,
                status: status.as_u16(),
            });
        }

        let parsed: OrderResponse = response
            .json()
            .await
            .map_err(|source| VenueError::Transport { venue, source })?;

        if let Some(error) = parsed.error {
            return Err(VenueError::Rejected {
                venue,
                client_order_id: client_order_id.to_string(),
                reason: error,
            });
        }

        let order_id = match parsed.id {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => {
                return Err(VenueError::Malformed {
                    venue,
                    detail: "fill without id".to_string(),
                })
            }
        };
        let proceeds_gc = parsed
            .total_price
            .and_then(|n| Decimal::from_str(&n.to_string()).ok())
            .ok_or_else(|| VenueError::Malformed {
                venue,
                detail: "fill without a parsable totalPrice".to_string(),
            })?;

        debug!(%order_id, quantity, %proceeds_gc, "order filled");

        Ok(VenueFill {
            venue,
            order_id,
            quantity,
            proceeds_gc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_request_wire_shape() {
        let body = OrderRequest {
            request_id: "ord-2",
            side: "SELL",
            item: ORDER_ITEM,
            amount: 50,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["requestId"], "ord-2");
        assert_eq!(json["side"], "SELL");
        assert_eq!(json["item"], "STEEL:MANDALORIAN");
        assert_eq!(json["amount"], 50);
    }

    #[test]
    fn test_success_and_failure_bodies() {
        let success: OrderResponse = serde_json::from_str(
            r#"{"requestId":"ord-2","id":4711,"side":"SELL","item":"STEEL:MANDALORIAN",
                "amount":50,"totalPrice":2490.0}"#,
        )
        .unwrap();
        assert!(success.error.is_none());
        assert_eq!(success.id.unwrap().to_string(), "4711");
        assert_eq!(
            Decimal::from_str(&success.total_price.unwrap().to_string()).unwrap(),
            Decimal::from_str("2490.0").unwrap()
        );

        let failure: OrderResponse =
            serde_json::from_str(r#"{"requestId":"ord-2","error":"spire closed"}"#).unwrap();
        assert_eq!(failure.error.as_deref(), Some("spire closed"));
    }
}
