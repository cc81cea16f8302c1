//! Mos Espa trading venue client.
//!
//! Speaks the all-strings order dialect: `POST /orders` with decimal
//! string quantities, unit prices in the fill body, and HTTP-200 failure
//! bodies flagged by `success:false`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::trade::{VenueClient, VenueError, VenueFill};
use crate::venue::Venue;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MosEspaClient {
    client: reqwest::Client,
    base_url: String,
}

impl MosEspaClient {
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
    #[serde(rename = "type")]
    order_type: &'static str,
    side: &'static str,
    asset: &'static str,
    currency: &'static str,
    quantity: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: Option<String>,
    #[serde(default)]
    success: bool,
    price: Option<String>,
    reason: Option<String>,
}

#[async_trait]
impl VenueClient for MosEspaClient {
    fn venue(&self) -> Venue {
        Venue::MosEspa
    }

    #[instrument(skip(self), fields(venue = %self.venue()))]
    async fn sell(&self, client_order_id: &str, quantity: u64) -> Result<VenueFill, VenueError> {
        let venue = self.venue();
        let url = format!("{}/orders", self.base_url);
        let body = OrderRequest {
            request_id: client_order_id,
            order_type: "market",
            side: "sell",
            asset: "BESKAR",
            currency: "GC",
            quantity: quantity.to_string(),
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
            // A 4xx on a well-formed request is a logical rejection
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

        if !parsed.success {
            return Err(VenueError::Rejected {
                venue,
                client_order_id: client_order_id.to_string(),
                reason: parsed.reason.unwrap_or_else(|| "unspecified".to_string()),
            });
        }

        let order_id = parsed.order_id.ok_or_else(|| VenueError::Malformed {
            venue,
            detail: "success without orderId".to_string(),
        })?;
        let unit_price = parsed
            .price
            .as_deref()
            .and_then(|p| Decimal::from_str(p).ok())
            .ok_or_else(|| VenueError::Malformed {
                venue,
                detail: "success without a parsable price".to_string(),
            })?;

        let proceeds_gc = unit_price * Decimal::from(quantity);
        debug!(%order_id, quantity, %unit_price, %proceeds_gc, "order filled");

        Ok(VenueFill {
            venue,
            order_id,
            quantity,
            proceeds_gc,
        })
    }
}
