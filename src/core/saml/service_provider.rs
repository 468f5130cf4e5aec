// src/core/saml/service_provider.rs

//! The artifact-binding service provider: outbound redirects to the IdP and
//! back-channel artifact resolution.

use crate::core::acl::AuthnIdentity;
use crate::core::errors::FeedgateError;
use crate::core::saml::messages;
use crate::core::session::{AuthnState, Session};
use crate::core::time::TimeSource;
use parking_lot::Mutex;
use rsa::RsaPrivateKey;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Sessions authenticate for this long when the assertion carries no
/// expiration of its own.
const DEFAULT_AUTHN_LIFETIME_MINS: i64 = 30;

pub struct SamlServiceProvider {
    entity_id: String,
    acs_url: Url,
    idp_entity_id: String,
    idp_sso_url: Url,
    idp_artifact_resolve_url: Url,
    signing_key: Arc<RsaPrivateKey>,
    client: reqwest::Client,
    time: Arc<dyn TimeSource>,
}

impl SamlServiceProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity_id: String,
        acs_url: Url,
        idp_entity_id: String,
        idp_sso_url: Url,
        idp_artifact_resolve_url: Url,
        signing_key: Arc<RsaPrivateKey>,
        client: reqwest::Client,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            entity_id,
            acs_url,
            idp_entity_id,
            idp_sso_url,
            idp_artifact_resolve_url,
            signing_key,
            client,
            time,
        }
    }

    pub fn acs_url(&self) -> &Url {
        &self.acs_url
    }

    /// Starts an authentication attempt: records the pending request in the
    /// session and returns the IdP redirect for the user agent.
    pub fn start_attempt(
        &self,
        session: &Mutex<Session>,
        original_uri: &str,
    ) -> Result<Url, FeedgateError> {
        let request_id = messages::new_message_id();
        let request_xml = messages::build_authn_request(
            &request_id,
            self.time.now(),
            &self.entity_id,
            &self.acs_url,
            &self.idp_sso_url,
        );
        let redirect = messages::redirect_binding_url(
            &self.idp_sso_url,
            &request_xml,
            Some(original_uri),
            &self.signing_key,
        )?;

        session.lock().authn_state = Some(AuthnState::StartAttempt {
            saml_request_id: request_id,
            original_uri: original_uri.to_string(),
        });
        Ok(redirect)
    }

    /// Resolves an artifact on the back channel and, when every check
    /// passes, marks the session authenticated. Returns the URI the user
    /// originally requested.
    pub async fn consume_artifact(
        &self,
        session: &Mutex<Session>,
        artifact: &str,
    ) -> Result<String, FeedgateError> {
        let (expected_request_id, original_uri) = {
            let session = session.lock();
            match &session.authn_state {
                Some(AuthnState::StartAttempt {
                    saml_request_id,
                    original_uri,
                }) => (saml_request_id.clone(), original_uri.clone()),
                Some(AuthnState::Authenticated { expires_millis, .. })
                    if *expires_millis > self.time.now_millis() =>
                {
                    // A live session replaying an artifact is a protocol
                    // violation, not a retry.
                    return Err(FeedgateError::InvalidState(
                        "session is already authenticated".to_string(),
                    ));
                }
                _ => {
                    return Err(FeedgateError::Saml(
                        "no authentication attempt in progress".to_string(),
                    ));
                }
            }
        };

        let resolve_xml = messages::build_artifact_resolve(
            &messages::new_message_id(),
            self.time.now(),
            &self.entity_id,
            artifact,
        );
        let response = self
            .client
            .post(self.idp_artifact_resolve_url.clone())
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "http://www.oasis-open.org/committees/security")
            .body(resolve_xml)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FeedgateError::Saml(format!(
                "artifact resolution returned HTTP {}",
                response.status()
            )));
        }
        let body = response.text().await?;
        let parsed = messages::parse_artifact_response(&body)?;

        if !parsed.status_success {
            return Err(FeedgateError::Saml("IdP reported failure".to_string()));
        }
        if parsed.in_response_to.as_deref() != Some(expected_request_id.as_str()) {
            return Err(FeedgateError::Saml(
                "InResponseTo does not match the pending request".to_string(),
            ));
        }
        if parsed.issuer.as_deref() != Some(self.idp_entity_id.as_str()) {
            warn!(
                "Assertion issuer '{}' does not match the configured peer.",
                parsed.issuer.as_deref().unwrap_or("<none>")
            );
            return Err(FeedgateError::Saml("unexpected issuer".to_string()));
        }
        let now = self.time.now();
        let expires = match parsed.not_on_or_after {
            Some(not_on_or_after) if not_on_or_after > now => not_on_or_after,
            Some(_) => {
                return Err(FeedgateError::Saml("assertion has expired".to_string()));
            }
            None => now + chrono::Duration::minutes(DEFAULT_AUTHN_LIFETIME_MINS),
        };
        if let Some(recipient) = &parsed.recipient {
            if recipient != self.acs_url.as_str() {
                return Err(FeedgateError::Saml(format!(
                    "assertion recipient '{recipient}' is not this endpoint"
                )));
            }
        }

        let identity = match parsed.verified_identity {
            Some(identity) => identity,
            None => {
                let name_id = parsed.subject_name_id.ok_or_else(|| {
                    FeedgateError::Saml("assertion carries no subject".to_string())
                })?;
                AuthnIdentity::for_user(crate::core::acl::Principal::user(name_id))
            }
        };

        info!(
            "Authenticated '{}' until {expires}.",
            identity
                .user
                .as_ref()
                .map(|u| u.name())
                .unwrap_or("<unknown>")
        );
        session.lock().authn_state = Some(AuthnState::Authenticated {
            identity,
            expires_millis: expires.timestamp_millis() as u64,
        });
        Ok(original_uri)
    }
}
