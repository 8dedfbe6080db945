//! Page-level request-interception loops (§C2).
//!
//! Both loops attach to a page's `Fetch` domain and drive it from a spawned
//! task. Installation returns an [`InterceptorHandle`] whose `cleanup()` is
//! idempotent and safe to call from any task; a `Target.targetDestroyed`
//! listener calls the same cleanup automatically so a page that closes out
//! from under a forgotten handle never leaks its task.

mod proxy_auth;
mod resource_block;

pub use proxy_auth::{install_proxy_auth, ProxyCredentials};
pub use resource_block::install_resource_block;

use crate::listener_group::ListenerGroup;
use std::sync::Arc;

/// Returned by both interceptor installers. `cleanup()` may be called any
/// number of times, concurrently, from any task.
pub struct InterceptorHandle {
    group: Arc<ListenerGroup>,
}

impl InterceptorHandle {
    fn new(group: Arc<ListenerGroup>) -> Self {
        Self { group }
    }

    pub async fn cleanup(&self) {
        self.group.cleanup().await;
    }
}
