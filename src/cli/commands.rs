//! CLI commands implementation.

use console::style;
use futures::future::join_all;

use ratekeeper::config::ConfigFile;
use ratekeeper::{EndpointKey, ManagerConfig, RateLimitManager, RequestDescriptor};

/// Queue every URL, wait for all of them, report per URL.
pub async fn cmd_fetch(
    config: ManagerConfig,
    urls: &[String],
    endpoint: Option<&str>,
    priority: i32,
    summary: bool,
) -> anyhow::Result<()> {
    let manager = RateLimitManager::new(config)?;
    let mut failed = 0usize;

    let mut pending = Vec::with_capacity(urls.len());
    for url in urls {
        let key = endpoint
            .map(EndpointKey::from)
            .unwrap_or_else(|| manager.endpoint_key_for(url));
        match manager
            .queue_request(RequestDescriptor::get(url.as_str()), key, priority)
            .await
        {
            Ok(handle) => pending.push(async move { (url, handle.await) }),
            Err(e) => {
                failed += 1;
                println!("{} {} {}", style("✗").red(), url, e);
            }
        }
    }

    for (url, result) in join_all(pending).await {
        match result {
            Ok(response) => {
                let origin = if response.from_cache {
                    style("cache").dim().to_string()
                } else {
                    style("network").dim().to_string()
                };
                println!(
                    "{} {} {} ({} bytes, {})",
                    style("✓").green(),
                    response.status.as_u16(),
                    url,
                    response.body.len(),
                    origin
                );
            }
            Err(e) => {
                failed += 1;
                println!("{} {} {}", style("✗").red(), url, e);
            }
        }
    }

    if summary {
        let status = manager.get_status_summary().await;
        println!();
        println!("{}", style("Status").bold());
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    manager.shutdown().await;

    if failed > 0 {
        anyhow::bail!("{} of {} requests failed", failed, urls.len());
    }
    Ok(())
}

/// Print the resolved configuration in config file form.
pub fn cmd_config(config: &ManagerConfig) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(&ConfigFile::from(config))?;
    print!("{}", rendered);
    Ok(())
}
