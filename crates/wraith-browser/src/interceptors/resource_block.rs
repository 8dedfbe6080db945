//! Resource-blocking interception loop.
//!
//! Refuses requests whose CDP resource type is an image, stylesheet, font,
//! or media asset; continues everything else unmodified. Used to cut page
//! load time and bandwidth when only the document's HTML/cookies/UA are
//! needed, not a fully rendered screenshot.

use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, ErrorReason, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::ResourceType;
use chromiumoxide::cdp::browser_protocol::target::EventTargetDestroyed;
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::Arc;

use super::InterceptorHandle;
use crate::listener_group::ListenerGroup;
use crate::BrowserError;

fn is_blocked(resource_type: &ResourceType) -> bool {
    matches!(
        resource_type,
        ResourceType::Image | ResourceType::Stylesheet | ResourceType::Font | ResourceType::Media
    )
}

/// Install the resource-blocking interception loop. May be called at most
/// once per page.
pub async fn install_resource_block(page: &Page) -> Result<InterceptorHandle, BrowserError> {
    page.execute(EnableParams::default())
        .await
        .map_err(|e| BrowserError::Interceptor(format!("Fetch.enable failed: {e}")))?;

    let mut paused_events = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| BrowserError::Interceptor(format!("failed to listen for paused events: {e}")))?;
    let mut destroyed_events = page
        .event_listener::<EventTargetDestroyed>()
        .await
        .map_err(|e| BrowserError::Interceptor(format!("failed to listen for target-destroyed: {e}")))?;

    let (group, stop) = ListenerGroup::new();

    let filter_page = page.clone();
    let filter_stop = stop.clone();
    group.track(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = filter_stop.cancelled() => break,
                event = paused_events.next() => {
                    let Some(event) = event else { break };
                    let blocked = is_blocked(&event.resource_type);

                    let result = if blocked {
                        let params = FailRequestParams::builder()
                            .request_id(event.request_id.clone())
                            .error_reason(ErrorReason::BlockedByClient)
                            .build()
                            .expect("request_id and error_reason are set");
                        filter_page.execute(params).await.map(|_| ())
                    } else {
                        let params = ContinueRequestParams::builder()
                            .request_id(event.request_id.clone())
                            .build()
                            .expect("request_id is set");
                        filter_page.execute(params).await.map(|_| ())
                    };

                    if let Err(e) = result {
                        tracing::debug!(error = %e, "fetch continuation failed");
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
