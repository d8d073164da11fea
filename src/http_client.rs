use std::time::Duration;

use reqwest::ClientBuilder;

use crate::config::Provider;

/// Connections idle longer than this are dropped from the per-provider pool.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn has_proxy_env() -> bool {
    [
        "HTTPS_PROXY",
        "https_proxy",
        "HTTP_PROXY",
        "http_proxy",
        "ALL_PROXY",
        "all_proxy",
    ]
    .iter()
    .any(|k| std::env::var(k).is_ok_and(|v| !v.trim().is_empty()))
}

fn bypass_hosts_from_env() -> Vec<String> {
    std::env::var("GATEWAY_NO_PROXY_HOSTS")
        .map(|v| {
            v.split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn should_bypass_proxy_impl(url: &str, proxy_env_present: bool, bypass_hosts: &[String]) -> bool {
    if !proxy_env_present || bypass_hosts.is_empty() {
        return false;
    }
    let Ok(u) = reqwest::Url::parse(url) else {
        return false;
    };
    let Some(host) = u.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    bypass_hosts
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
}

pub fn maybe_disable_proxy(builder: ClientBuilder, url: &str) -> ClientBuilder {
    if should_bypass_proxy_impl(url, has_proxy_env(), &bypass_hosts_from_env()) {
        builder.no_proxy()
    } else {
        builder
    }
}

/// Pooled client for one provider, reused by every request routed to it.
pub fn client_for_provider(provider: &Provider) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT);
    if let Some(secs) = provider.timeout_secs.filter(|s| *s > 0) {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    maybe_disable_proxy(builder, &provider.effective_base_url()).build()
}

/// Client for attachment downloads; bounded so a slow object store cannot stall a request.
pub fn client_for_downloads(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
}
