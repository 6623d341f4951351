use std::fmt;

use serde::Deserialize;

/// Webhook payload sent by MemberPress. Real payloads carry many more keys
/// than this; only the fields the relay acts on are modeled, the rest is
/// ignored.
#[derive(Debug, Deserialize)]
pub struct MemberpressWebhook {
    pub event: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: SubscriptionData,
}

// Fields beyond what the handlers read are kept so validation covers the
// full schema.
#[allow(dead_code)]
#[derive(Debug, Deserialize)]
pub struct SubscriptionData {
    pub id: String,
    /// Gateway-side subscription id, e.g. `sub_...` for Stripe.
    pub subscr_id: String,
    pub gateway: String,
    pub price: String,
    pub period: String,
    pub period_type: String,
    pub status: String,
    pub created_at: String,
    pub total: String,
    pub membership: Membership,
    pub member: Member,
    pub cc_last4: Option<String>,
    pub cc_exp_month: Option<String>,
    pub cc_exp_year: Option<String>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
pub struct Membership {
    pub id: u64,
    pub title: String,
    pub price: String,
    pub period: String,
    pub period_type: String,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
pub struct Member {
    pub id: u64,
    pub email: MemberEmail,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub registered_at: String,
}

/// A member's email address, validated at deserialization time so malformed
/// payloads are rejected before any handler runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct MemberEmail(String);

impl MemberEmail {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(email: &str) -> bool {
        if email.chars().any(char::is_whitespace) {
            return false;
        }

        let Some((user, domain)) = email.split_once('@') else {
            return false;
        };

        !user.is_empty()
            && !domain.is_empty()
            && !domain.contains('@')
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
    }
}

impl TryFrom<String> for MemberEmail {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(format!("invalid email address: {:?}", value))
        }
    }
}

impl fmt::Display for MemberEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trimmed-down version of a live MemberPress payload, extra keys included
/// on purpose. Shared by the schema tests here and the route tests one
/// level up.
#[cfg(test)]
pub(crate) fn memberpress_payload(event: &str) -> serde_json::Value {
    use serde_json::json;

    json!({
        "event": event,
        "type": "subscription",
        "data": {
            "coupon": false,
            "membership": {
                "id": 1257,
                "title": "Premium Academy",
                "status": "publish",
                "group": "0",
                "price": "12490.00",
                "period": "1",
                "period_type": "months"
            },
            "member": {
                "id": 2470,
                "email": "test@example.com",
                "username": "testuser@example.com",
                "nicename": "testuser-example-com",
                "registered_at": "2025-12-01 22:24:17",
                "first_name": "Test",
                "last_name": "User",
                "display_name": "Test User"
            },
            "id": "3245",
            "subscr_id": "sub_test123456789",
            "gateway": "scvlz8-ji",
            "price": "12490.00",
            "period": "1",
            "period_type": "months",
            "trial": "0",
            "status": "active",
            "created_at": "2025-12-01 22:25:24",
            "total": "12490.00",
            "tax_rate": "0.000",
            "cc_last4": "6618",
            "cc_exp_month": "6",
            "cc_exp_year": "2026",
            "order_id": "0"
        }
    })
}
