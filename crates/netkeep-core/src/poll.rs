//! Standalone mode: keep a fixed list of accounts logged in.

use crate::dispatch::Dispatcher;
use netkeep_proto::Credential;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl PassReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

pub struct Poller {
    dispatcher: Arc<Dispatcher>,
    accounts: Vec<Credential>,
    interval: Duration,
}

impl Poller {
    pub fn new(dispatcher: Arc<Dispatcher>, accounts: Vec<Credential>, interval: Duration) -> Self {
        Self {
            dispatcher,
            accounts,
            interval,
        }
    }

    /// Logs in every account once, in order.
    pub async fn run_once(&self) -> PassReport {
        let mut report = PassReport::default();
        for account in &self.accounts {
            let frame = self.dispatcher.login(account, "").await;
            if frame.success {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Repeats passes forever, sleeping `interval` between them.
    pub async fn run(&self) {
        info!(accounts = self.accounts.len(), interval_secs = self.interval.as_secs(), "polling started");
        loop {
            let report = self.run_once().await;
            debug!(succeeded = report.succeeded, failed = report.failed, "poll pass finished");
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::{LogoutDefaults, PortalClient};
    use crate::test_support::credential;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn poller(server: &MockServer, accounts: Vec<Credential>) -> Poller {
        let portal = PortalClient::new(format!("{}/eportal/", server.uri()), Duration::from_secs(2))
            .expect("client");
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(portal), LogoutDefaults::default()));
        Poller::new(dispatcher, accounts, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn pass_counts_each_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("user_account", "good"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"dr1({"result":"1","msg":"ok"})"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("user_account", "bad"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"dr1({"result":"0","msg":"no"})"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("user_account", "down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let poller = poller(
            &server,
            vec![credential("good"), credential("bad"), credential("down"), credential("good")],
        )
        .await;
        let report = poller.run_once().await;
        assert_eq!(report, PassReport { succeeded: 2, failed: 2 });
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn empty_account_list_is_a_clean_pass() {
        let server = MockServer::start().await;
        let report = poller(&server, Vec::new()).await.run_once().await;
        assert!(report.all_succeeded());
        assert_eq!(report.succeeded, 0);
    }

    #[tokio::test]
    async fn run_keeps_polling_after_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"dr1({"result":"0"})"#))
            .mount(&server)
            .await;
        let poller = poller(&server, vec![credential("u1")]).await;

        let _ = tokio::time::timeout(Duration::from_millis(300), poller.run()).await;
        let requests = server.received_requests().await.unwrap_or_default();
        assert!(requests.len() >= 2, "expected repeated passes, got {}", requests.len());
    }
}
