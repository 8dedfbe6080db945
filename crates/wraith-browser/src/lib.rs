//! Browser process launching, health probing, and page-level request
//! interception (§C2), built on `chromiumoxide`'s CDP bindings.

mod interceptors;
mod launch;
mod listener_group;

pub use interceptors::{install_proxy_auth, install_resource_block, InterceptorHandle, ProxyCredentials};
pub use launch::{health_probe, launch, launch_with_proxy, LaunchConfig, LaunchedBrowser};
pub use listener_group::{ListenerGroup, StopSignal};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("browser unhealthy: {0}")]
    Unhealthy(String),
    #[error("interceptor error: {0}")]
    Interceptor(String),
}
