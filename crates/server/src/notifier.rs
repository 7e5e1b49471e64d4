//! Notification adapters: a relay that renders and sends mail, and a log-only
//! fallback for deployments without one.

use approvey_core::{
    DeliveryError, DeliveryReceipt, NotificationPayload, NotificationPort, TemplateKind, UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Records notices in the log stream. Access tokens are never written.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotificationPort;

#[async_trait]
impl NotificationPort for LogNotificationPort {
    async fn send(
        &self,
        recipient: &UserId,
        template: TemplateKind,
        payload: &NotificationPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let receipt = DeliveryReceipt::accepted_now();
        info!(
            event_name = "notification.logged",
            delivery_id = %receipt.delivery_id,
            proposal_id = %payload.proposal_id.0,
            recipient = %recipient,
            template = template.as_str(),
            subject = %subject(template, payload),
            "notification recorded without a relay"
        );
        Ok(receipt)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResponseLinks {
    pub approve: String,
    pub reject: String,
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    template: &'static str,
    subject: String,
    public_id: &'a str,
    proposal_id: &'a str,
    proposal_name: &'a str,
    proposal_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    responder: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    links: Option<ResponseLinks>,
}

#[derive(Debug, Default, Deserialize)]
struct RelayAccepted {
    #[serde(default)]
    id: Option<String>,
}

/// Posts notices as JSON to an outbound mail relay.
pub struct RelayNotificationPort {
    client: reqwest::Client,
    relay_url: String,
    api_key: SecretString,
    sender: String,
    response_base_url: String,
}

impl RelayNotificationPort {
    pub fn new(
        client: reqwest::Client,
        relay_url: String,
        api_key: SecretString,
        sender: String,
        response_base_url: String,
    ) -> Self {
        Self { client, relay_url, api_key, sender, response_base_url }
    }

    fn message<'a>(
        &'a self,
        recipient: &'a UserId,
        template: TemplateKind,
        payload: &'a NotificationPayload,
    ) -> Result<RelayMessage<'a>, DeliveryError> {
        let links = match (template, &payload.access_token) {
            (TemplateKind::ApprovalRequested, Some(token)) => {
                Some(response_links(&self.response_base_url, recipient, payload, token)?)
            }
            _ => None,
        };

        Ok(RelayMessage {
            from: &self.sender,
            to: recipient.as_str(),
            template: template.as_str(),
            subject: subject(template, payload),
            public_id: &payload.public_id.0,
            proposal_id: &payload.proposal_id.0,
            proposal_name: &payload.proposal_name,
            proposal_status: payload.proposal_status.as_str(),
            responder: payload.responder.as_ref().map(UserId::as_str),
            message: payload.message.as_deref(),
            links,
        })
    }
}

#[async_trait]
impl NotificationPort for RelayNotificationPort {
    async fn send(
        &self,
        recipient: &UserId,
        template: TemplateKind,
        payload: &NotificationPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let message = self.message(recipient, template, payload)?;

        let response = self
            .client
            .post(&self.relay_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&message)
            .send()
            .await
            .map_err(|error| DeliveryError::Unavailable(error.without_url().to_string()))?;

        let status = response.status();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            return Err(DeliveryError::Refused {
                recipient: recipient.to_string(),
                reason: format!("relay answered {status}"),
            });
        }
        if !status.is_success() {
            return Err(DeliveryError::Unavailable(format!("relay answered {status}")));
        }

        let accepted: RelayAccepted = response.json().await.unwrap_or_default();
        Ok(match accepted.id {
            Some(delivery_id) => DeliveryReceipt { delivery_id, accepted_at: Utc::now() },
            None => DeliveryReceipt::accepted_now(),
        })
    }
}

/// One-click approve/reject URLs for an approval request.
pub fn response_links(
    base_url: &str,
    recipient: &UserId,
    payload: &NotificationPayload,
    token: &str,
) -> Result<ResponseLinks, DeliveryError> {
    let endpoint = format!("{}/approval_response", base_url.trim_end_matches('/'));
    let link = |action: &str| {
        Url::parse_with_params(
            &endpoint,
            &[
                ("cart_id", payload.proposal_id.0.as_str()),
                ("user_id", recipient.as_str()),
                ("cch", token),
                ("approver_action", action),
            ],
        )
        .map(String::from)
        .map_err(|error| DeliveryError::Unavailable(format!("invalid response url: {error}")))
    };

    Ok(ResponseLinks { approve: link("approve")?, reject: link("reject")? })
}

pub fn subject(template: TemplateKind, payload: &NotificationPayload) -> String {
    let public_id = &payload.public_id.0;
    let name = &payload.proposal_name;
    match template {
        TemplateKind::ProposalCreatedConfirmation => {
            format!("Request {public_id} submitted: {name}")
        }
        TemplateKind::ApprovalRequested => {
            format!("Approval needed for request {public_id}: {name}")
        }
        TemplateKind::ApprovalReplyReceived => {
            format!("Request {public_id} was {}", payload.proposal_status.as_str())
        }
        TemplateKind::ProposalRejected => format!("Request {public_id} was rejected"),
        TemplateKind::ObserverUpdate => format!("Update on request {public_id}: {name}"),
        TemplateKind::CommentAdded => format!("New comment on request {public_id}"),
    }
}
