use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::document_source::{DocumentBatch, DocumentSource, FetchFuture, FetchOutcome, SourceError};
use crate::governor::RateGovernor;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::{ConfigError, DocumentType, RawDocument, SourceId, Unit};

const DEFAULT_USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

const DEFAULT_BLOCKED_MARKERS: [&str; 4] =
    ["captcha", "access denied", "unusual traffic", "are you a robot"];

/// One `[[sources]]` entry: URL templates per document type.
///
/// Templates accept `{entity}` (URL-encoded), `{year}` and `{quarter}` (1 to 4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSourceDefinition {
    pub id: String,
    #[serde(default)]
    pub annual_report: Option<String>,
    #[serde(default)]
    pub call_transcript: Option<String>,
    /// Visited once before the first fetch to establish session cookies.
    #[serde(default)]
    pub warm_up_url: Option<String>,
    #[serde(default)]
    pub user_agents: Vec<String>,
    #[serde(default = "default_blocked_markers")]
    pub blocked_markers: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl HttpSourceDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            annual_report: None,
            call_transcript: None,
            warm_up_url: None,
            user_agents: Vec::new(),
            blocked_markers: default_blocked_markers(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    #[must_use]
    pub fn with_template(mut self, document_type: DocumentType, template: impl Into<String>) -> Self {
        let template = Some(template.into());
        match document_type {
            DocumentType::AnnualReport => self.annual_report = template,
            DocumentType::CallTranscript => self.call_transcript = template,
        }
        self
    }

    #[must_use]
    pub fn with_warm_up(mut self, url: impl Into<String>) -> Self {
        self.warm_up_url = Some(url.into());
        self
    }

    pub fn template(&self, document_type: DocumentType) -> Option<&str> {
        match document_type {
            DocumentType::AnnualReport => self.annual_report.as_deref(),
            DocumentType::CallTranscript => self.call_transcript.as_deref(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidSource {
            source_id: self.id.clone(),
            reason: reason.to_owned(),
        };

        SourceId::parse(&self.id)?;
        if self.annual_report.is_none() && self.call_transcript.is_none() {
            return Err(invalid("at least one document type template is required"));
        }
        for document_type in DocumentType::ALL {
            let Some(template) = self.template(document_type) else {
                continue;
            };
            if !is_http_url(template) {
                return Err(invalid("templates must be http(s) urls"));
            }
            if !template.contains("{entity}") {
                return Err(invalid("templates must contain {entity}"));
            }
            if document_type == DocumentType::AnnualReport && template.contains("{quarter}") {
                return Err(invalid("annual report templates cannot use {quarter}"));
            }
        }
        if let Some(url) = self.warm_up_url.as_deref() {
            if !is_http_url(url) {
                return Err(invalid("warm_up_url must be an http(s) url"));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}

/// Generic HTTP adapter: renders a URL per unit and classifies the response.
///
/// The body is stored as-is; no period is detected from it.
pub struct HttpDocumentSource {
    id: SourceId,
    definition: HttpSourceDefinition,
    client: Arc<dyn HttpClient>,
    governor: Option<Arc<RateGovernor>>,
    warmed_up: OnceCell<()>,
}

impl HttpDocumentSource {
    /// Build the adapter over a cookie-keeping reqwest client.
    pub fn from_definition(definition: HttpSourceDefinition) -> Result<Self, ConfigError> {
        let client = ReqwestHttpClient::new().map_err(|error| ConfigError::InvalidSource {
            source_id: definition.id.clone(),
            reason: error.to_string(),
        })?;
        Self::with_client(definition, Arc::new(client))
    }

    pub fn with_client(
        definition: HttpSourceDefinition,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, ConfigError> {
        definition.validate()?;
        Ok(Self {
            id: SourceId::parse(&definition.id)?,
            definition,
            client,
            governor: None,
            warmed_up: OnceCell::new(),
        })
    }

    /// Pace the session warm-up through `governor`, like the worker paces fetches.
    #[must_use]
    pub fn with_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Concrete URL for a unit, or `None` when this source does not carry its type.
    pub fn render_url(&self, unit: &Unit) -> Option<String> {
        let template = self.definition.template(unit.document_type)?;
        let quarter = unit
            .period
            .fiscal_quarter()
            .map(|quarter| quarter.number().to_string())
            .unwrap_or_default();

        Some(
            template
                .replace("{entity}", &urlencoding::encode(unit.entity_id.as_str()))
                .replace("{year}", &unit.period.fiscal_year().to_string())
                .replace("{quarter}", &quarter),
        )
    }

    fn request(&self, url: &str) -> HttpRequest {
        HttpRequest::get(url)
            .with_header("user-agent", self.user_agent())
            .with_header(
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .with_header("accept-language", "en-US,en;q=0.5")
            .with_header("upgrade-insecure-requests", "1")
            .with_header("cache-control", "max-age=0")
            .with_timeout(Duration::from_millis(self.definition.request_timeout_ms))
    }

    fn user_agent(&self) -> String {
        if self.definition.user_agents.is_empty() {
            let index = fastrand::usize(..DEFAULT_USER_AGENTS.len());
            DEFAULT_USER_AGENTS[index].to_owned()
        } else {
            let index = fastrand::usize(..self.definition.user_agents.len());
            self.definition.user_agents[index].clone()
        }
    }

    async fn warm_up(&self) {
        let Some(url) = self.definition.warm_up_url.as_deref() else {
            return;
        };
        self.warmed_up
            .get_or_init(|| async {
                self.governed_turn().await;
                let outcome = match self.client.execute(self.request(url)).await {
                    Ok(response) => {
                        tracing::debug!(source = %self.id, status = response.status, "session warm-up done");
                        match self.classify(url.to_owned(), response) {
                            Ok(_) => FetchOutcome::Success,
                            Err(error) => error.outcome(),
                        }
                    }
                    Err(error) => {
                        tracing::warn!(source = %self.id, error = %error, "session warm-up failed; continuing without it");
                        FetchOutcome::NetworkError
                    }
                };
                if let Some(governor) = self.governor.as_ref() {
                    governor.on_response(&self.id, outcome);
                }
                // The fetch that triggered the warm-up needs a slot of its own.
                self.governed_turn().await;
            })
            .await;
    }

    async fn governed_turn(&self) {
        let Some(governor) = self.governor.as_ref() else {
            return;
        };
        tokio::time::sleep(governor.before_request(&self.id)).await;
        while let Err(wait) = governor.admit(&self.id) {
            tokio::time::sleep(wait).await;
        }
    }

    fn classify(&self, url: String, response: HttpResponse) -> Result<DocumentBatch, SourceError> {
        let status = response.status;
        match status {
            429 => Err(SourceError::rate_limited(format!("{url} answered 429"))),
            401 | 403 => Err(SourceError::blocked(format!("{url} answered {status}"))),
            404 | 410 => Err(SourceError::not_found(format!("{url} answered {status}"))),
            500..=599 => Err(SourceError::network(format!("{url} answered {status}"))),
            _ if response.is_success() => {
                if let Some(marker) = self.blocked_marker(&response.body) {
                    return Err(SourceError::blocked(format!(
                        "{url} served an anti-bot page ({marker})"
                    )));
                }
                if response.body.trim().is_empty() {
                    return Err(SourceError::not_found(format!("{url} returned an empty body")));
                }
                Ok(DocumentBatch::single(RawDocument::new(url, response.body)))
            }
            _ => Err(SourceError::invalid(format!(
                "{url} answered unexpected status {status}"
            ))),
        }
    }

    fn blocked_marker(&self, body: &str) -> Option<&str> {
        let lowered = body.to_ascii_lowercase();
        self.definition
            .blocked_markers
            .iter()
            .map(String::as_str)
            .find(|marker| lowered.contains(&marker.to_ascii_lowercase()))
    }
}

impl DocumentSource for HttpDocumentSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    fn supports(&self, document_type: DocumentType) -> bool {
        self.definition.template(document_type).is_some()
    }

    fn fetch<'a>(&'a self, unit: &'a Unit) -> FetchFuture<'a> {
        Box::pin(async move {
            let url = self.render_url(unit).ok_or_else(|| {
                SourceError::invalid(format!(
                    "source '{}' has no template for {}",
                    self.id, unit.document_type
                ))
            })?;

            self.warm_up().await;

            let response = self
                .client
                .execute(self.request(&url))
                .await
                .map_err(|error| SourceError::network(error.message().to_owned()))?;
            self.classify(url, response)
        })
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

fn default_blocked_markers() -> Vec<String> {
    DEFAULT_BLOCKED_MARKERS.iter().map(|marker| (*marker).to_owned()).collect()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_source::SourceErrorKind;
    use crate::governor::GovernorPolicy;
    use crate::http_client::{HttpError, HttpFuture};
    use crate::{EntityId, Period, Quarter};
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingClient {
        responses: Mutex<Vec<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingClient {
        fn with(responses: Vec<Result<HttpResponse, HttpError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .expect("requests")
                .iter()
                .map(|request| request.url.clone())
                .collect()
        }
    }

    impl HttpClient for RecordingClient {
        fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
            Box::pin(async move {
                self.requests.lock().expect("requests").push(request);
                let mut responses = self.responses.lock().expect("responses");
                if responses.is_empty() {
                    Ok(HttpResponse::new(200, "warm"))
                } else {
                    responses.remove(0)
                }
            })
        }
    }

    fn definition() -> HttpSourceDefinition {
        HttpSourceDefinition::new("filings")
            .with_template(DocumentType::AnnualReport, "https://filings.test/{entity}/ar/{year}")
            .with_template(
                DocumentType::CallTranscript,
                "https://filings.test/{entity}/calls/{year}/q{quarter}",
            )
    }

    fn transcript_unit() -> Unit {
        Unit::new(
            EntityId::parse("M&M").expect("entity"),
            DocumentType::CallTranscript,
            Period::quarter(2024, Quarter::Q3),
        )
    }

    async fn fetch_with(
        response: Result<HttpResponse, HttpError>,
    ) -> Result<DocumentBatch, SourceError> {
        let source = HttpDocumentSource::with_client(definition(), RecordingClient::with(vec![response]))
            .expect("source");
        source.fetch(&transcript_unit()).await
    }

    #[test]
    fn renders_templates_with_encoded_entity() {
        let source = HttpDocumentSource::with_client(definition(), RecordingClient::with(Vec::new()))
            .expect("source");
        assert_eq!(
            source.render_url(&transcript_unit()).as_deref(),
            Some("https://filings.test/M%26M/calls/2024/q3")
        );
    }

    #[test]
    fn rejects_templates_without_entity_placeholder() {
        let definition = HttpSourceDefinition::new("filings")
            .with_template(DocumentType::AnnualReport, "https://filings.test/static");
        assert!(matches!(
            definition.validate(),
            Err(ConfigError::InvalidSource { .. })
        ));

        let definition = HttpSourceDefinition::new("filings");
        assert!(definition.validate().is_err());
    }

    #[tokio::test]
    async fn classifies_statuses() {
        let kind = |result: Result<DocumentBatch, SourceError>| result.expect_err("error").kind();

        assert_eq!(
            kind(fetch_with(Ok(HttpResponse::new(429, ""))).await),
            SourceErrorKind::RateLimited
        );
        assert_eq!(
            kind(fetch_with(Ok(HttpResponse::new(403, "forbidden"))).await),
            SourceErrorKind::Blocked
        );
        assert_eq!(
            kind(fetch_with(Ok(HttpResponse::new(404, ""))).await),
            SourceErrorKind::NotFound
        );
        assert_eq!(
            kind(fetch_with(Ok(HttpResponse::new(503, ""))).await),
            SourceErrorKind::Network
        );
        assert_eq!(
            kind(fetch_with(Err(HttpError::new("connection reset"))).await),
            SourceErrorKind::Network
        );
        assert_eq!(
            kind(fetch_with(Ok(HttpResponse::new(200, "  "))).await),
            SourceErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn anti_bot_pages_count_as_blocked() {
        let result = fetch_with(Ok(HttpResponse::new(
            200,
            "<html>Please complete the CAPTCHA to continue</html>",
        )))
        .await;
        assert_eq!(result.expect_err("blocked").kind(), SourceErrorKind::Blocked);
    }

    #[tokio::test]
    async fn success_returns_raw_body_under_rendered_url() {
        let batch = fetch_with(Ok(HttpResponse::new(200, "transcript text")))
            .await
            .expect("batch");
        assert_eq!(batch.documents.len(), 1);
        assert_eq!(batch.documents[0].source_url, "https://filings.test/M%26M/calls/2024/q3");
        assert_eq!(batch.documents[0].raw_content, "transcript text");
        assert_eq!(batch.documents[0].detected_period, None);
    }

    #[tokio::test]
    async fn warm_up_runs_once_before_first_fetch() {
        let client = RecordingClient::with(vec![
            Ok(HttpResponse::new(200, "home")),
            Ok(HttpResponse::new(200, "first")),
            Ok(HttpResponse::new(200, "second")),
        ]);
        let source = HttpDocumentSource::with_client(
            definition().with_warm_up("https://filings.test/"),
            client.clone(),
        )
        .expect("source");

        source.fetch(&transcript_unit()).await.expect("first");
        source.fetch(&transcript_unit()).await.expect("second");

        let urls = client.urls();
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0], "https://filings.test/");
        assert!(client.requests.lock().expect("requests")[1]
            .headers
            .contains_key("user-agent"));
    }

    #[tokio::test]
    async fn warm_up_is_paced_and_reported_to_the_governor() {
        let governor = Arc::new(RateGovernor::new(GovernorPolicy {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            jitter: Duration::ZERO,
            ..GovernorPolicy::default()
        }));
        let client = RecordingClient::with(vec![
            Ok(HttpResponse::new(429, "slow down")),
            Ok(HttpResponse::new(200, "transcript text")),
        ]);
        let source = HttpDocumentSource::with_client(
            definition().with_warm_up("https://filings.test/"),
            client.clone(),
        )
        .expect("source")
        .with_governor(governor.clone());

        let started = Instant::now();
        source.fetch(&transcript_unit()).await.expect("fetch");

        // The throttled warm-up raised the floor, and the page request waited it out.
        assert_eq!(client.urls().len(), 2);
        assert_eq!(governor.delay_floor(&source.id()), Duration::from_millis(20));
        assert!(started.elapsed() >= Duration::from_millis(18));
    }
}
