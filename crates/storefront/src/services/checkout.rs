//! Hosted checkout provider client.
//!
//! Creates checkout sessions by POSTing the grouped basket and the checkout
//! metadata to the configured endpoint. The provider answers with the URL of
//! the hosted payment page, which the customer is redirected to.

use async_trait::async_trait;
use basket_core::{
    CheckoutError, CheckoutMetadata, CheckoutSessionProvider, GroupedItem, OrderNumber, Price,
    ProductId,
};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use crate::config::StorefrontConfig;
use crate::services::images::image_url;

/// Client for the hosted checkout provider.
#[derive(Clone)]
pub struct HttpCheckoutProvider {
    client: reqwest::Client,
    endpoint: Url,
    success_url: Url,
    cancel_url: Url,
    image_cdn_base_url: Option<Url>,
}

/// Body of a create-session request.
#[derive(Debug, Serialize)]
pub struct CreateSessionRequest<'a> {
    pub mode: &'static str,
    pub customer_email: Option<&'a str>,
    pub line_items: Vec<SessionLineItem>,
    pub metadata: &'a CheckoutMetadata,
    pub success_url: String,
    pub cancel_url: String,
}

/// One priced line in a create-session request.
#[derive(Debug, Serialize)]
pub struct SessionLineItem {
    pub product_id: ProductId,
    pub name: String,
    pub currency: &'static str,
    /// Unit price in minor units (cents).
    pub unit_amount: i64,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Provider response. `url` may be absent or null.
#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    #[serde(default)]
    url: Option<String>,
}

impl HttpCheckoutProvider {
    /// Create a new checkout provider client.
    ///
    /// # Errors
    ///
    /// Returns error if the secret key is not a valid header value or the
    /// HTTP client fails to build.
    pub fn new(config: &StorefrontConfig) -> Result<Self, CheckoutError> {
        let mut headers = HeaderMap::new();

        let auth_value = format!("Bearer {}", config.checkout.secret_key.expose_secret());
        let mut auth_header = HeaderValue::from_str(&auth_value)
            .map_err(|e| CheckoutError::Transport(format!("Invalid secret key format: {e}")))?;
        auth_header.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_header);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.checkout.timeout)
            .build()
            .map_err(|e| CheckoutError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.checkout.endpoint.clone(),
            success_url: config.page_url("success"),
            cancel_url: config.page_url("basket"),
            image_cdn_base_url: config.image_cdn_base_url.clone(),
        })
    }

    /// Build the request body for a session.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::EmptyBasket`] for an empty basket and
    /// [`CheckoutError::MissingPrice`] if any line has no unit price.
    pub fn build_request<'a>(
        &self,
        items: &[GroupedItem],
        metadata: &'a CheckoutMetadata,
    ) -> Result<CreateSessionRequest<'a>, CheckoutError> {
        if items.is_empty() {
            return Err(CheckoutError::EmptyBasket);
        }

        let line_items = items
            .iter()
            .map(|item| self.line_item(item))
            .collect::<Result<Vec<_>, _>>()?;

        let customer_email = (metadata.customer_email != CheckoutMetadata::UNKNOWN_EMAIL)
            .then_some(metadata.customer_email.as_str());

        Ok(CreateSessionRequest {
            mode: "payment",
            customer_email,
            line_items,
            metadata,
            success_url: self.success_url_for(metadata.order_number),
            cancel_url: self.cancel_url.to_string(),
        })
    }

    fn line_item(&self, item: &GroupedItem) -> Result<SessionLineItem, CheckoutError> {
        let product = &item.product;
        let unit_price = product
            .price
            .ok_or_else(|| CheckoutError::MissingPrice(product.id.clone()))?;
        let unit_amount = Price::usd(unit_price)
            .minor_units()
            .ok_or_else(|| CheckoutError::MissingPrice(product.id.clone()))?;

        Ok(SessionLineItem {
            product_id: product.id.clone(),
            name: product
                .name
                .clone()
                .unwrap_or_else(|| product.id.to_string()),
            currency: Price::usd(unit_price).currency_code.code(),
            unit_amount,
            quantity: item.quantity,
            image_url: product
                .image
                .as_ref()
                .and_then(|image| image_url(image, self.image_cdn_base_url.as_ref())),
        })
    }

    fn success_url_for(&self, order_number: OrderNumber) -> String {
        let mut url = self.success_url.clone();
        url.query_pairs_mut()
            .append_pair("orderNumber", &order_number.to_string());
        url.to_string()
    }
}

/// Interpret the provider's `url` field. Blank means no session.
fn parse_session_url(raw: Option<String>) -> Result<Option<Url>, CheckoutError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(url) => Url::parse(url)
            .map(Some)
            .map_err(|e| CheckoutError::Parse(format!("invalid session URL {url:?}: {e}"))),
    }
}

#[async_trait]
impl CheckoutSessionProvider for HttpCheckoutProvider {
    #[instrument(skip_all, fields(order_number = %metadata.order_number))]
    async fn create_session(
        &self,
        items: &[GroupedItem],
        metadata: &CheckoutMetadata,
    ) -> Result<Option<Url>, CheckoutError> {
        let body = self.build_request(items, metadata)?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| CheckoutError::Transport(e.to_string()))?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %message.chars().take(500).collect::<String>(),
                "Checkout provider returned non-success status"
            );
            return Err(CheckoutError::Provider {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let parsed: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| CheckoutError::Parse(e.to_string()))?;

        parse_session_url(parsed.url)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use basket_core::{Basket, BasketStore, IdentityHandle, IdentityProfile, ImageRef, Product};
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    use super::*;
    use crate::config::{CheckoutConfig, IdentityConfig};

    fn provider() -> HttpCheckoutProvider {
        provider_at("https://shop.example.net/")
    }

    fn provider_at(base_url: &str) -> HttpCheckoutProvider {
        let config = StorefrontConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            base_url: Url::parse(base_url).unwrap(),
            checkout: CheckoutConfig {
                endpoint: Url::parse("https://pay.example.net/v1/sessions").unwrap(),
                secret_key: SecretString::from("sk_aB3$xY9!mK2@nL5#pQ7&rT0"),
                timeout: Duration::from_secs(5),
            },
            image_cdn_base_url: Some(Url::parse("https://cdn.example.net/img/").unwrap()),
            identity: IdentityConfig {
                sign_in_url: Url::parse("https://accounts.example.net/sign-in").unwrap(),
                userinfo_url: Url::parse("https://accounts.example.net/v1/me").unwrap(),
                timeout: Duration::from_secs(5),
            },
            sentry_dsn: None,
            sentry_environment: None,
        };
        HttpCheckoutProvider::new(&config).unwrap()
    }

    fn metadata() -> CheckoutMetadata {
        CheckoutMetadata::for_profile(
            &IdentityProfile::new(IdentityHandle::new("u_1")).with_full_name("Jane Doe"),
        )
    }

    #[test]
    fn test_build_request_converts_lines() {
        let mut basket = Basket::default();
        let tee = Product::new("tee", Some(Decimal::new(1050, 2)))
            .with_name("Tee")
            .with_image(ImageRef::new("tee.png"));
        basket.add_item(tee.clone()).unwrap();
        basket.add_item(tee).unwrap();
        basket.add_item(Product::new("mug", Some(Decimal::new(8, 0)))).unwrap();

        let metadata = metadata();
        let request = provider()
            .build_request(&basket.grouped_items(), &metadata)
            .unwrap();

        assert_eq!(request.line_items.len(), 2);
        let tee = &request.line_items[0];
        assert_eq!(tee.name, "Tee");
        assert_eq!(tee.unit_amount, 1050);
        assert_eq!(tee.quantity, 2);
        assert_eq!(tee.currency, "usd");
        assert_eq!(
            tee.image_url.as_deref(),
            Some("https://cdn.example.net/img/tee.png")
        );

        let mug = &request.line_items[1];
        assert_eq!(mug.name, "mug");
        assert_eq!(mug.unit_amount, 800);
        assert!(mug.image_url.is_none());

        assert_eq!(request.cancel_url, "https://shop.example.net/basket");
        assert_eq!(
            request.success_url,
            format!(
                "https://shop.example.net/success?orderNumber={}",
                metadata.order_number
            )
        );
        assert!(request.customer_email.is_none());
    }

    #[test]
    fn test_build_request_serializes_metadata_camel_case() {
        let mut basket = Basket::default();
        basket.add_item(Product::new("a", Some(Decimal::ONE))).unwrap();
        let metadata = metadata();

        let request = provider()
            .build_request(&basket.grouped_items(), &metadata)
            .unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["metadata"]["customerName"], "Jane Doe");
        assert_eq!(json["metadata"]["clerkUserId"], "u_1");
        assert_eq!(json["line_items"][0]["unit_amount"], 100);
    }

    #[test]
    fn test_return_urls_keep_base_path() {
        let mut basket = Basket::default();
        basket.add_item(Product::new("a", Some(Decimal::ONE))).unwrap();
        let metadata = metadata();

        let request = provider_at("https://shop.example.net/store")
            .build_request(&basket.grouped_items(), &metadata)
            .unwrap();

        assert_eq!(request.cancel_url, "https://shop.example.net/store/basket");
        assert!(
            request
                .success_url
                .starts_with("https://shop.example.net/store/success?orderNumber=")
        );
    }

    #[test]
    fn test_build_request_rejects_missing_price() {
        let mut basket = Basket::default();
        basket.add_item(Product::new("free", None)).unwrap();

        let err = provider()
            .build_request(&basket.grouped_items(), &metadata())
            .unwrap_err();
        assert!(matches!(err, CheckoutError::MissingPrice(id) if id.as_str() == "free"));
    }

    #[test]
    fn test_build_request_rejects_empty_basket() {
        let err = provider().build_request(&[], &metadata()).unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyBasket));
    }

    #[test]
    fn test_parse_session_url() {
        assert!(parse_session_url(None).unwrap().is_none());
        assert!(parse_session_url(Some("  ".to_string())).unwrap().is_none());
        assert_eq!(
            parse_session_url(Some("https://pay.example.net/c/1".to_string()))
                .unwrap()
                .unwrap()
                .as_str(),
            "https://pay.example.net/c/1"
        );
        assert!(parse_session_url(Some("not a url".to_string())).is_err());
    }
}
