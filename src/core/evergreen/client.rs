use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::header::LINK;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::core::config::{validate_endpoint, EvergreenConnection};
use crate::core::formatter::format_api_duration;
use crate::core::models::distro::{Distro, DistroCost, Project, TaskCost};
use crate::core::models::report::ReportWindow;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid evergreen url '{0}'")]
    InvalidUrl(String),
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unauthorized - check evergreen.user and evergreen.key")]
    Unauthorized,
    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} should not be a paginated route")]
    UnexpectedPagination(String),
}

/// The slice of the Evergreen REST API cost reporting depends on.
#[async_trait]
pub trait EvergreenApi: Send + Sync {
    async fn list_distro_ids(&self) -> Result<Vec<String>, ApiError>;

    async fn get_distro_cost(
        &self,
        distro_id: &str,
        window: &ReportWindow,
    ) -> Result<DistroCost, ApiError>;

    async fn list_project_ids(&self) -> Result<Vec<String>, ApiError>;

    async fn get_project_task_costs(
        &self,
        project_id: &str,
        window: &ReportWindow,
    ) -> Result<Vec<TaskCost>, ApiError>;
}

/// HTTP client for Evergreen's `/rest/v2` API.
#[derive(Clone)]
pub struct EvergreenClient {
    http: reqwest::Client,
    base: Url,
    user: String,
    key: String,
}

impl EvergreenClient {
    pub fn new(conn: &EvergreenConnection) -> Result<Self, ApiError> {
        validate_endpoint(&conn.root_url, "evergreen").map_err(ApiError::InvalidUrl)?;
        let base = Url::parse(conn.root_url.trim_end_matches('/'))
            .map_err(|_| ApiError::InvalidUrl(conn.root_url.clone()))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| ApiError::Request {
                url: conn.root_url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            base,
            user: conn.user.clone(),
            key: conn.key.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["rest", "v2"])
            .extend(segments);
        Ok(url)
    }

    fn window_query(window: &ReportWindow) -> [(&'static str, String); 2] {
        [
            (
                "starttime",
                window.begin.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("duration", format_api_duration(window.duration)),
        ]
    }

    /// Fetch one page. Returns the body and the `rel="next"` link, if any.
    async fn get_page(&self, url: Url) -> Result<(Vec<u8>, Option<Url>), ApiError> {
        debug!(url = %url, "evergreen request");
        let response = self
            .http
            .get(url.clone())
            .header("Api-User", &self.user)
            .header("Api-Key", &self.key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| ApiError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        let next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_link);

        let body = response.bytes().await.map_err(|source| ApiError::Request {
            url: url.to_string(),
            source,
        })?;
        Ok((body.to_vec(), next))
    }

    /// GET a route that must answer in a single page.
    async fn get_single<T: DeserializeOwned>(&self, route: &str, url: Url) -> Result<T, ApiError> {
        let (body, next) = self.get_page(url.clone()).await?;
        if next.is_some() {
            return Err(ApiError::UnexpectedPagination(route.to_string()));
        }
        decode(&url, &body)
    }

    /// GET a paginated list route, following `Link: rel="next"` to the end.
    async fn get_all<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let (body, link) = self.get_page(url.clone()).await?;
            let page: Vec<T> = decode(&url, &body)?;
            items.extend(page);
            next = link;
        }
        Ok(items)
    }
}

fn decode<T: DeserializeOwned>(url: &Url, body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|source| ApiError::Decode {
        url: url.to_string(),
        source,
    })
}

/// Extract the `rel="next"` target from a Link header value.
fn next_link(header: &str) -> Option<Url> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

#[async_trait]
impl EvergreenApi for EvergreenClient {
    async fn list_distro_ids(&self) -> Result<Vec<String>, ApiError> {
        let url = self.endpoint(&["distros"])?;
        let distros: Vec<Distro> = self.get_single("/distros", url).await?;
        Ok(distros.into_iter().map(|d| d.distro_id).collect())
    }

    async fn get_distro_cost(
        &self,
        distro_id: &str,
        window: &ReportWindow,
    ) -> Result<DistroCost, ApiError> {
        let mut url = self.endpoint(&["cost", "distro", distro_id])?;
        url.query_pairs_mut()
            .extend_pairs(Self::window_query(window).iter().map(|(k, v)| (*k, v.as_str())));
        self.get_single("/cost/distro", url).await
    }

    async fn list_project_ids(&self) -> Result<Vec<String>, ApiError> {
        let url = self.endpoint(&["projects"])?;
        let projects: Vec<Project> = self.get_all(url).await?;
        Ok(projects.into_iter().map(|p| p.identifier).collect())
    }

    async fn get_project_task_costs(
        &self,
        project_id: &str,
        window: &ReportWindow,
    ) -> Result<Vec<TaskCost>, ApiError> {
        let mut url = self.endpoint(&["cost", "project", project_id, "tasks"])?;
        url.query_pairs_mut()
            .extend_pairs(Self::window_query(window).iter().map(|(k, v)| (*k, v.as_str())));
        self.get_all(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;

    fn window() -> ReportWindow {
        ReportWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Duration::from_secs(7200),
        )
    }

    fn client(url: &str) -> EvergreenClient {
        EvergreenClient::new(&EvergreenConnection {
            root_url: url.to_string(),
            user: "cost-bot".to_string(),
            key: "secret".to_string(),
            projects: Vec::new(),
        })
        .unwrap()
    }

    fn window_matcher() -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("starttime".into(), "2024-03-01T00:00:00Z".into()),
            Matcher::UrlEncoded("duration".into(), "2h".into()),
        ])
    }

    #[test]
    fn new_rejects_remote_http() {
        let err = EvergreenClient::new(&EvergreenConnection {
            root_url: "http://evergreen.example.com".to_string(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::InvalidUrl(_)));
    }

    #[test]
    fn endpoint_appends_rest_prefix() {
        let c = client("https://evergreen.example.com/");
        let url = c.endpoint(&["cost", "distro", "ubuntu 16"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://evergreen.example.com/rest/v2/cost/distro/ubuntu%2016"
        );
    }

    #[test]
    fn next_link_parsing() {
        let header = r#"<https://e.example.com/rest/v2/projects?start_at=b>; rel="next", <https://e.example.com/rest/v2/projects>; rel="prev""#;
        let next = next_link(header).unwrap();
        assert_eq!(next.as_str(), "https://e.example.com/rest/v2/projects?start_at=b");
        assert!(next_link(r#"<https://e.example.com/x>; rel="prev""#).is_none());
        assert!(next_link("garbage").is_none());
    }

    #[tokio::test]
    async fn list_distro_ids_sends_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v2/distros")
            .match_header("api-user", "cost-bot")
            .match_header("api-key", "secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"_id": "ubuntu1604"}, {"_id": "rhel70"}]"#)
            .create_async()
            .await;

        let ids = client(&server.url()).list_distro_ids().await.unwrap();
        assert_eq!(ids, vec!["ubuntu1604", "rhel70"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn list_distro_ids_rejects_pagination() {
        let mut server = mockito::Server::new_async().await;
        let link = format!("<{}/rest/v2/distros?start_at=x>; rel=\"next\"", server.url());
        server
            .mock("GET", "/rest/v2/distros")
            .with_status(200)
            .with_header("link", &link)
            .with_body("[]")
            .create_async()
            .await;

        let err = client(&server.url()).list_distro_ids().await.unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedPagination(_)));
    }

    #[tokio::test]
    async fn get_distro_cost_passes_window() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v2/cost/distro/ubuntu1604")
            .match_query(window_matcher())
            .with_status(200)
            .with_body(
                r#"{"distro_id": "ubuntu1604", "provider": "ec2", "instance_type": "c3.xlarge",
                    "sum_time_taken": 120000000000, "sum_estimated_cost": 0.75}"#,
            )
            .create_async()
            .await;

        let cost = client(&server.url())
            .get_distro_cost("ubuntu1604", &window())
            .await
            .unwrap();
        assert_eq!(cost.provider, "ec2");
        assert_eq!(cost.sum_time_taken, Duration::from_secs(120));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_is_distinct() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v2/distros")
            .with_status(401)
            .create_async()
            .await;

        let err = client(&server.url()).list_distro_ids().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn server_error_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v2/cost/distro/rhel70")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client(&server.url())
            .get_distro_cost("rhel70", &window())
            .await
            .unwrap_err();
        match err {
            ApiError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v2/distros")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = client(&server.url()).list_distro_ids().await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[tokio::test]
    async fn list_projects_follows_pagination() {
        let mut server = mockito::Server::new_async().await;
        let link = format!("<{}/rest/v2/projects?start_at=b>; rel=\"next\"", server.url());
        let first = server
            .mock("GET", "/rest/v2/projects")
            .match_query(Matcher::Missing)
            .with_status(200)
            .with_header("link", &link)
            .with_body(r#"[{"identifier": "mongodb-mongo-master"}]"#)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/rest/v2/projects")
            .match_query(Matcher::UrlEncoded("start_at".into(), "b".into()))
            .with_status(200)
            .with_body(r#"[{"identifier": "sys-perf"}]"#)
            .create_async()
            .await;

        let ids = client(&server.url()).list_project_ids().await.unwrap();
        assert_eq!(ids, vec!["mongodb-mongo-master", "sys-perf"]);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn project_task_costs() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v2/cost/project/sys-perf/tasks")
            .match_query(window_matcher())
            .with_status(200)
            .with_body(
                r#"[{"githash": "abc123", "display_name": "compile", "distro": "rhel70",
                     "build_variant": "linux-64", "time_taken": 30000000000}]"#,
            )
            .create_async()
            .await;

        let tasks = client(&server.url())
            .get_project_task_costs("sys-perf", &window())
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].display_name, "compile");
        assert_eq!(tasks[0].time_taken, 30_000_000_000);
    }
}
