//! Public IP change detector.
//!
//! Asks an echo endpoint (ipify by default) for this host's public address
//! and logs when it differs from the previous observation.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use beacon_core::config::IpMonitorConfig;
use beacon_scheduler::{Handler, Reporter, RunContext};
use tracing::{debug, info, warn};

/// Outcome of comparing a fetched address with the last one seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    First(IpAddr),
    Unchanged(IpAddr),
    Changed { old: IpAddr, new: IpAddr },
}

pub struct IpMonitor {
    client: reqwest::Client,
    endpoint: String,
    last: Mutex<Option<IpAddr>>,
}

impl IpMonitor {
    pub fn new(cfg: &IpMonitorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building ip monitor http client")?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            last: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> anyhow::Result<IpAddr> {
        let body = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .with_context(|| format!("requesting {}", self.endpoint))?
            .error_for_status()?
            .text()
            .await?;
        parse_ip(&body)
    }

    /// Record `ip` as the latest address and classify it.
    pub fn observe(&self, ip: IpAddr) -> Observation {
        let mut last = self.last.lock().expect("ip monitor state poisoned");
        let seen = match *last {
            None => Observation::First(ip),
            Some(old) if old == ip => Observation::Unchanged(ip),
            Some(old) => Observation::Changed { old, new: ip },
        };
        *last = Some(ip);
        seen
    }

    pub fn last_seen(&self) -> Option<IpAddr> {
        *self.last.lock().expect("ip monitor state poisoned")
    }
}

#[async_trait]
impl Handler for IpMonitor {
    async fn exec(&self, _ctx: RunContext, reporter: Reporter) {
        match self.fetch().await {
            Ok(ip) => match self.observe(ip) {
                Observation::First(ip) => info!(ip = %ip, "public ip observed"),
                Observation::Unchanged(ip) => debug!(ip = %ip, "public ip unchanged"),
                Observation::Changed { old, new } => {
                    warn!(old = %old, new = %new, "public ip changed")
                }
            },
            Err(e) => reporter.error(e),
        }
        reporter.done();
    }
}

/// The echo services answer with the bare address, sometimes followed by a
/// newline.
fn parse_ip(body: &str) -> anyhow::Result<IpAddr> {
    let text = body.trim();
    text.parse().with_context(|| {
        let shown: String = text.chars().take(64).collect();
        format!("endpoint returned {shown:?}, not an ip address")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_scheduler::HandlerEvent;

    fn monitor(endpoint: &str) -> IpMonitor {
        IpMonitor::new(&IpMonitorConfig {
            endpoint: endpoint.to_string(),
            timeout_secs: 2,
            ..IpMonitorConfig::default()
        })
        .unwrap()
    }

    fn ctx() -> RunContext {
        RunContext {
            job: "IpMonitor".into(),
            trace_id: "host-1-5yc1s".into(),
            span: tracing::Span::none(),
        }
    }

    #[test]
    fn parses_bare_and_newline_terminated_bodies() {
        assert_eq!(parse_ip("203.0.113.7").unwrap().to_string(), "203.0.113.7");
        assert_eq!(parse_ip("2001:db8::1\n").unwrap().to_string(), "2001:db8::1");
    }

    #[test]
    fn rejects_html_error_pages() {
        let err = parse_ip("<html>rate limited</html>").unwrap_err();
        assert!(err.to_string().contains("not an ip address"));
    }

    #[test]
    fn observe_tracks_changes() {
        let m = monitor("http://127.0.0.1:9");
        let a: IpAddr = "198.51.100.1".parse().unwrap();
        let b: IpAddr = "198.51.100.2".parse().unwrap();

        assert_eq!(m.observe(a), Observation::First(a));
        assert_eq!(m.observe(a), Observation::Unchanged(a));
        assert_eq!(m.observe(b), Observation::Changed { old: a, new: b });
        assert_eq!(m.last_seen(), Some(b));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_error_then_done() {
        // port 9 (discard) is closed on test hosts, so the connect is refused
        let m = monitor("http://127.0.0.1:9/");
        let (reporter, mut rx) = Reporter::channel();
        m.exec(ctx(), reporter).await;

        assert!(matches!(rx.recv().await, Some(HandlerEvent::Error(_))));
        assert!(matches!(rx.recv().await, Some(HandlerEvent::Done)));
        assert_eq!(m.last_seen(), None);
    }
}
