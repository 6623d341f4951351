use anyhow::anyhow;
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    response::status::Custom,
    serde::json::Json,
    Request, State,
};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::mailerlite::{
    MailerliteError, NewSubscription, SubscriberSync, ACTIVE_SUBSCRIPTION_TAG,
};

pub(crate) mod events;
use events::MemberpressWebhook;

const AUTHORIZATION: &str = "Authorization";

/// Shared secret expected from MemberPress, if one is configured.
pub struct WebhookSecret(pub Option<String>);

pub(crate) struct MemberpressAuthorization;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for MemberpressAuthorization {
    type Error = anyhow::Error;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let secret = &request.guard::<&State<WebhookSecret>>().await.unwrap().0;

        // Without a configured secret every caller is accepted.
        let Some(secret) = secret else {
            return Outcome::Success(MemberpressAuthorization);
        };

        let authorization = request.headers().get(AUTHORIZATION).collect::<Vec<_>>();
        if authorization.len() != 1 {
            trace!("couldn't locate {} header", AUTHORIZATION);
            return Outcome::Error((
                Status::Unauthorized,
                anyhow!("request needs an authorization header"),
            ));
        }

        if authorization[0] != secret {
            trace!("secret validation failed, stopping here...");
            return Outcome::Error((Status::Unauthorized, anyhow!("secret doesn't match")));
        }

        trace!("validated MemberPress request");
        Outcome::Success(MemberpressAuthorization)
    }
}

/// The lifecycle events MemberPress can notify us about. Everything else
/// maps to [`Unrecognized`](Self::Unrecognized) and is acknowledged without
/// action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberpressEventType {
    SubscriptionCreated,
    SubscriptionCancelled,
    SubscriptionStopped,
    SubscriptionPaused,
    SubscriptionResumed,
    Unrecognized,
}

impl MemberpressEventType {
    pub fn from_event(event: &str) -> Self {
        match event {
            "subscription-created" => Self::SubscriptionCreated,
            "subscription-cancelled" => Self::SubscriptionCancelled,
            "subscription-stopped" => Self::SubscriptionStopped,
            "subscription-paused" => Self::SubscriptionPaused,
            "subscription-resumed" => Self::SubscriptionResumed,
            _ => Self::Unrecognized,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    status: &'static str,
    message: String,
}

impl WebhookResponse {
    fn processed(event: &str) -> Self {
        Self {
            status: "success",
            message: format!("Event {} processed successfully", event),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    detail: String,
}

impl ErrorDetail {
    pub(crate) fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[rocket::post("/webhook/memberpress", format = "json", data = "<payload>")]
pub(crate) async fn memberpress_webhook(
    _auth: MemberpressAuthorization,
    payload: Json<MemberpressWebhook>,
    sync: &State<Box<dyn SubscriberSync>>,
) -> Result<Json<WebhookResponse>, Custom<Json<ErrorDetail>>> {
    let webhook = payload.into_inner();
    info!("received webhook event: {} ({})", webhook.event, webhook.kind);
    debug!("member: {}", webhook.data.member.email);

    let sync = sync.inner().as_ref();
    let outcome = match MemberpressEventType::from_event(&webhook.event) {
        MemberpressEventType::SubscriptionCreated => {
            handle_subscription_created(&webhook, sync).await
        }
        MemberpressEventType::SubscriptionCancelled => {
            handle_subscription_cancelled(&webhook, sync).await
        }
        MemberpressEventType::SubscriptionStopped => {
            handle_subscription_stopped(&webhook, sync).await
        }
        MemberpressEventType::SubscriptionPaused | MemberpressEventType::SubscriptionResumed => {
            // No remote action for pause/resume.
            info!(
                "no action for {} ({})",
                webhook.event, webhook.data.member.email
            );
            Ok(())
        }
        MemberpressEventType::Unrecognized => {
            warn!("unhandled event type: {}", webhook.event);
            Ok(())
        }
    };

    match outcome {
        Ok(()) => Ok(Json(WebhookResponse::processed(&webhook.event))),
        Err(err) => {
            error!("error processing webhook: {}", err);
            Err(Custom(
                Status::InternalServerError,
                Json(ErrorDetail::new(format!(
                    "Error processing webhook: {}",
                    err
                ))),
            ))
        }
    }
}

async fn handle_subscription_created(
    webhook: &MemberpressWebhook,
    sync: &dyn SubscriberSync,
) -> Result<(), MailerliteError> {
    let data = &webhook.data;
    info!("processing subscription creation for {}", data.member.email);

    let subscriber = sync
        .upsert_subscriber(&NewSubscription {
            email: data.member.email.to_string(),
            first_name: data.member.first_name.clone(),
            last_name: data.member.last_name.clone(),
            membership_title: data.membership.title.clone(),
            membership_id: data.membership.id,
            subscription_id: data.subscr_id.clone(),
            price: data.price.clone(),
            period: data.period.clone(),
            period_type: data.period_type.clone(),
        })
        .await?;

    info!("created/updated subscriber in MailerLite: {}", subscriber.email);
    Ok(())
}

async fn handle_subscription_cancelled(
    webhook: &MemberpressWebhook,
    sync: &dyn SubscriberSync,
) -> Result<(), MailerliteError> {
    let email = &webhook.data.member.email;
    info!("processing subscription cancellation for {}", email);

    sync.remove_tag(email.as_str(), ACTIVE_SUBSCRIPTION_TAG)
        .await?;

    info!("processed subscription cancellation for {}", email);
    Ok(())
}

async fn handle_subscription_stopped(
    webhook: &MemberpressWebhook,
    sync: &dyn SubscriberSync,
) -> Result<(), MailerliteError> {
    let email = &webhook.data.member.email;
    info!("processing subscription stopped for {}", email);

    sync.handle_subscription_stopped(email.as_str(), webhook.data.membership.id)
        .await?;

    info!("processed subscription stopped for {}", email);
    Ok(())
}
