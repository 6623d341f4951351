use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RelayConfig;

/// Tag marking subscribers with a running subscription.
pub const ACTIVE_SUBSCRIPTION_TAG: &str = "active_subscription";
/// Tag applied when a subscription is stopped for good.
pub const SUBSCRIPTION_STOPPED_TAG: &str = "subscription_stopped";

const API_TIMEOUT: Duration = Duration::from_secs(30);

pub fn membership_tag(membership_id: u64) -> String {
    format!("membership_{}", membership_id)
}

pub fn membership_stopped_tag(membership_id: u64) -> String {
    format!("membership_{}_stopped", membership_id)
}

/// A MailerLite failure that aborts the current webhook.
///
/// Best-effort steps (tagging and group moves once the subscriber record is
/// secured) never produce one of these; they log a warning and return `()`,
/// so a warning-tier failure can't be propagated by accident.
#[derive(Debug, thiserror::Error)]
pub enum MailerliteError {
    #[error("MailerLite API error: {status} - {body}")]
    Api { status: StatusCode, body: String },
    #[error("MailerLite request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Subscriber data extracted from a `subscription-created` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub membership_title: String,
    pub membership_id: u64,
    pub subscription_id: String,
    pub price: String,
    pub period: String,
    pub period_type: String,
}

/// MailerLite's record of a subscriber, as returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberRecord {
    pub id: String,
    pub email: String,
}

/// MailerLite wraps every resource in a `data` object.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    data: T,
}

#[derive(Debug, Serialize)]
struct SubscriberBody {
    email: String,
    fields: SubscriberFields,
    groups: Vec<String>,
    status: &'static str,
}

// These custom fields have to exist in the MailerLite account, otherwise the
// API silently drops them.
#[derive(Debug, Serialize)]
struct SubscriberFields {
    name: String,
    last_name: String,
    membership_title: String,
    membership_id: String,
    subscription_id: String,
    subscription_price: String,
    subscription_period: String,
}

#[derive(Debug, Serialize)]
struct TagBody<'a> {
    name: &'a str,
}

fn subscriber_body(
    subscription: &NewSubscription,
    active_group_id: Option<&str>,
) -> SubscriberBody {
    SubscriberBody {
        email: subscription.email.clone(),
        fields: SubscriberFields {
            name: format!("{} {}", subscription.first_name, subscription.last_name),
            last_name: subscription.last_name.clone(),
            membership_title: subscription.membership_title.clone(),
            membership_id: subscription.membership_id.to_string(),
            subscription_id: subscription.subscription_id.clone(),
            subscription_price: subscription.price.clone(),
            subscription_period: format!("{} {}", subscription.period, subscription.period_type),
        },
        groups: active_group_id.map(str::to_owned).into_iter().collect(),
        status: "active",
    }
}

/// Operations the webhook handlers run against the email-marketing side.
///
/// [`MailerliteClient`] is the real implementation; tests substitute a
/// recording mock.
#[async_trait]
pub trait SubscriberSync: Send + Sync {
    /// Create-or-update the subscriber record keyed by email, then tag it
    /// with `membership_{id}` and `active_subscription` (both best-effort).
    async fn upsert_subscriber(
        &self,
        subscription: &NewSubscription,
    ) -> Result<SubscriberRecord, MailerliteError>;

    /// Look up the subscriber by email and delete `tag` from it.
    async fn remove_tag(&self, email: &str, tag: &str) -> Result<(), MailerliteError>;

    /// Housekeeping sequence for a stopped subscription. Only the initial
    /// subscriber lookup can fail; every later step degrades to a warning.
    async fn handle_subscription_stopped(
        &self,
        email: &str,
        membership_id: u64,
    ) -> Result<(), MailerliteError>;
}

pub struct MailerliteClient {
    http: reqwest::Client,
    api_key: SecretString,
    api_base: Url,
    active_group_id: Option<String>,
    cancelled_group_id: Option<String>,
}

impl MailerliteClient {
    pub fn new(config: &RelayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;

        Ok(Self {
            http,
            api_key: config.mailerlite_api_key.clone(),
            api_base: config.api_base.clone(),
            active_group_id: config.active_group_id.clone(),
            cancelled_group_id: config.cancelled_group_id.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base.as_str().trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, MailerliteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(MailerliteError::Api { status, body })
    }

    async fn fetch_subscriber(&self, email: &str) -> Result<SubscriberRecord, MailerliteError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/subscribers/{}", email)))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;

        let envelope: ApiEnvelope<SubscriberRecord> = Self::check(response).await?.json().await?;
        Ok(envelope.data)
    }

    /// Attaches `tag` to a subscriber. Tags are advisory metadata: a failure
    /// here only warns and must never fail the webhook.
    async fn add_tag(&self, subscriber_id: &str, tag: &str) {
        let result = async {
            let response = self
                .http
                .post(self.endpoint(&format!("/subscribers/{}/tags", subscriber_id)))
                .bearer_auth(self.api_key.expose_secret())
                .json(&TagBody { name: tag })
                .send()
                .await?;

            Self::check(response).await.map(drop)
        }
        .await;

        match result {
            Ok(()) => info!("tag '{}' added to subscriber {}", tag, subscriber_id),
            Err(err) => warn!(
                "failed to add tag '{}' to subscriber {}: {}",
                tag, subscriber_id, err
            ),
        }
    }

    async fn delete_tag(&self, subscriber_id: &str, tag: &str) -> Result<(), MailerliteError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("/subscribers/{}/tags/{}", subscriber_id, tag)))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;

        Self::check(response).await.map(drop)
    }

    async fn remove_from_group(
        &self,
        subscriber_id: &str,
        group_id: &str,
    ) -> Result<(), MailerliteError> {
        let response = self
            .http
            .delete(self.endpoint(&format!(
                "/subscribers/{}/groups/{}",
                subscriber_id, group_id
            )))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;

        Self::check(response).await.map(drop)
    }

    async fn add_to_group(
        &self,
        subscriber_id: &str,
        group_id: &str,
    ) -> Result<(), MailerliteError> {
        let response = self
            .http
            .post(self.endpoint(&format!(
                "/subscribers/{}/groups/{}",
                subscriber_id, group_id
            )))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;

        Self::check(response).await.map(drop)
    }
}

#[async_trait]
impl SubscriberSync for MailerliteClient {
    async fn upsert_subscriber(
        &self,
        subscription: &NewSubscription,
    ) -> Result<SubscriberRecord, MailerliteError> {
        let body = subscriber_body(subscription, self.active_group_id.as_deref());

        let response = self
            .http
            .post(self.endpoint("/subscribers"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let envelope: ApiEnvelope<SubscriberRecord> = Self::check(response).await?.json().await?;
        let subscriber = envelope.data;
        info!("subscriber created/updated: {}", subscriber.email);

        self.add_tag(&subscriber.id, &membership_tag(subscription.membership_id))
            .await;
        self.add_tag(&subscriber.id, ACTIVE_SUBSCRIPTION_TAG).await;

        Ok(subscriber)
    }

    async fn remove_tag(&self, email: &str, tag: &str) -> Result<(), MailerliteError> {
        let subscriber = self.fetch_subscriber(email).await?;
        self.delete_tag(&subscriber.id, tag).await?;
        info!("removed {} tag from {}", tag, email);

        Ok(())
    }

    async fn handle_subscription_stopped(
        &self,
        email: &str,
        membership_id: u64,
    ) -> Result<(), MailerliteError> {
        // The lookup is the only hard dependency of the whole sequence.
        let subscriber = self.fetch_subscriber(email).await?;
        debug!(
            "processing subscription stopped for {} (subscriber id: {})",
            email, subscriber.id
        );

        match self.delete_tag(&subscriber.id, ACTIVE_SUBSCRIPTION_TAG).await {
            Ok(()) => info!("removed {} tag from {}", ACTIVE_SUBSCRIPTION_TAG, email),
            Err(err) => warn!(
                "could not remove {} tag from {}: {}",
                ACTIVE_SUBSCRIPTION_TAG, email, err
            ),
        }

        self.add_tag(&subscriber.id, SUBSCRIPTION_STOPPED_TAG).await;
        self.add_tag(&subscriber.id, &membership_stopped_tag(membership_id))
            .await;

        // The group migration only makes sense with both ends configured.
        if let (Some(active), Some(cancelled)) = (
            self.active_group_id.as_deref(),
            self.cancelled_group_id.as_deref(),
        ) {
            match self.remove_from_group(&subscriber.id, active).await {
                Ok(()) => info!("removed {} from active group {}", email, active),
                Err(err) => warn!("could not remove {} from active group: {}", email, err),
            }

            match self.add_to_group(&subscriber.id, cancelled).await {
                Ok(()) => info!("added {} to cancelled group {}", email, cancelled),
                Err(err) => warn!("could not add {} to cancelled group: {}", email, err),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn subscription() -> NewSubscription {
        NewSubscription {
            email: "test@example.com".to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            membership_title: "Premium Academy".to_string(),
            membership_id: 1257,
            subscription_id: "sub_test123456789".to_string(),
            price: "12490.00".to_string(),
            period: "1".to_string(),
            period_type: "months".to_string(),
        }
    }

    #[test]
    fn subscriber_fields_follow_subscription_data() {
        let body = subscriber_body(&subscription(), None);

        assert_eq!(body.email, "test@example.com");
        assert_eq!(body.fields.name, "Test User");
        assert_eq!(body.fields.last_name, "User");
        assert_eq!(body.fields.membership_title, "Premium Academy");
        assert_eq!(body.fields.membership_id, "1257");
        assert_eq!(body.fields.subscription_id, "sub_test123456789");
        assert_eq!(body.fields.subscription_price, "12490.00");
        assert_eq!(body.fields.subscription_period, "1 months");
        assert_eq!(body.status, "active");
        assert!(body.groups.is_empty());
    }

    #[test]
    fn active_group_is_included_when_configured() {
        let body = subscriber_body(&subscription(), Some("112233"));

        assert_eq!(body.groups, vec!["112233".to_string()]);
    }

    #[test]
    fn subscriber_body_serializes_as_the_api_expects() {
        let value = serde_json::to_value(subscriber_body(&subscription(), Some("112233")))
            .expect("body is serializable");

        assert_eq!(
            value,
            json!({
                "email": "test@example.com",
                "fields": {
                    "name": "Test User",
                    "last_name": "User",
                    "membership_title": "Premium Academy",
                    "membership_id": "1257",
                    "subscription_id": "sub_test123456789",
                    "subscription_price": "12490.00",
                    "subscription_period": "1 months"
                },
                "groups": ["112233"],
                "status": "active"
            })
        );
    }

    #[test]
    fn tag_names_include_the_membership_id() {
        assert_eq!(membership_tag(1257), "membership_1257");
        assert_eq!(membership_stopped_tag(1257), "membership_1257_stopped");
    }
}
