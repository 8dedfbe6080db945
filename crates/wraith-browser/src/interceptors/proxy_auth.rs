//! Proxy-authentication interception loop.
//!
//! Enables the `Fetch` domain with `handle_auth_requests`, answers
//! `Fetch.authRequired` with the configured credentials, and continues every
//! other paused request unmodified.

use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::target::EventTargetDestroyed;
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::Arc;

use super::InterceptorHandle;
use crate::listener_group::ListenerGroup;
use crate::BrowserError;

#[derive(Debug, Clone)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

/// Install the proxy-auth interception loop. May be called at most once per
/// page; a second call while the first is still active will race on the
/// same `Fetch` domain registration.
pub async fn install_proxy_auth(
    page: &Page,
    credentials: ProxyCredentials,
) -> Result<InterceptorHandle, BrowserError> {
    page.execute(EnableParams::builder().handle_auth_requests(true).build())
        .await
        .map_err(|e| BrowserError::Interceptor(format!("Fetch.enable failed: {e}")))?;

    let mut auth_events = page
        .event_listener::<EventAuthRequired>()
        .await
        .map_err(|e| BrowserError::Interceptor(format!("failed to listen for auth events: {e}")))?;
    let mut paused_events = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| BrowserError::Interceptor(format!("failed to listen for paused events: {e}")))?;
    let mut destroyed_events = page
        .event_listener::<EventTargetDestroyed>()
        .await
        .map_err(|e| BrowserError::Interceptor(format!("failed to listen for target-destroyed: {e}")))?;

    let (group, stop) = ListenerGroup::new();

    let auth_page = page.clone();
    let auth_stop = stop.clone();
    group.track(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = auth_stop.cancelled() => break,
                event = auth_events.next() => {
                    let Some(event) = event else { break };
                    let response = AuthChallengeResponse::builder()
                        .response(AuthChallengeResponseResponse::ProvideCredentials)
                        .username(credentials.username.clone())
                        .password(credentials.password.clone())
                        .build();
                    let params = ContinueWithAuthParams::builder()
                        .request_id(event.request_id.clone())
                        .auth_challenge_response(response)
                        .build()
                        .expect("request_id and auth_challenge_response are set");
                    if let Err(e) = auth_page.execute(params).await {
                        tracing::debug!(error = %e, "continueWithAuth failed");
                    }
                }
            }
        }
    }));

    let passthrough_page = page.clone();
    let passthrough_stop = stop.clone();
    group.track(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = passthrough_stop.cancelled() => break,
                event = paused_events.next() => {
                    let Some(event) = event else { break };
                    let params = ContinueRequestParams::builder()
                        .request_id(event.request_id.clone())
                        .build()
                        .expect("request_id is set");
                    if let Err(e) = passthrough_page.execute(params).await {
                        tracing::debug!(error = %e, "continueRequest failed");
                    }
                }
            }
        }
    }));

    let destroyed_group = Arc::clone(&group);
    let destroyed_stop = stop.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = destroyed_stop.cancelled() => {},
            _ = destroyed_events.next() => {
                destroyed_group.cleanup().await;
            }
        }
    });

    Ok(InterceptorHandle::new(group))
}
