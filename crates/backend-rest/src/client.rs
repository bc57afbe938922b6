//! HTTP implementations of the feed and auth seams.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backend_core::{
    AuthApi, AuthGrant, CredentialSource, FeedApi, FeedError, FeedErrorKind, Message, MessageId,
    Profile, ProfileUpdate, classify_http_status,
};
use reqwest::{RequestBuilder, Response, header::AUTHORIZATION};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};
use url::Url;

const MESSAGES_PATH: &str = "/api/messages/";
const LOGIN_PATH: &str = "/api/auth/login/";
const REGISTER_PATH: &str = "/api/auth/register/";
const LOGOUT_PATH: &str = "/api/auth/logout/";
const PROFILE_PATH: &str = "/api/profile/";

#[derive(Debug, Serialize)]
struct ContentBody<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CredentialsBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    username: String,
}

#[derive(Debug, Deserialize)]
struct DetailBody {
    detail: String,
}

/// Shared reqwest client, base URL and credential source.
#[derive(Clone)]
struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpTransport {
    fn new(
        base_url: &str,
        request_timeout: Duration,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, FeedError> {
        let parsed = Url::parse(base_url).map_err(|err| {
            FeedError::new(
                FeedErrorKind::Rejected,
                "invalid_base_url",
                format!("invalid base url '{base_url}': {err}"),
            )
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FeedError::new(
                FeedErrorKind::Rejected,
                "invalid_base_url",
                format!("unsupported scheme '{}' in base url", parsed.scheme()),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|err| {
                FeedError::new(FeedErrorKind::ServerError, "http_client_build", err.to_string())
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, FeedError> {
        let token = self
            .credentials
            .credential()
            .ok_or_else(FeedError::credential_missing)?;
        Ok(builder.header(AUTHORIZATION, format!("Token {token}")))
    }

    async fn execute(&self, operation: &str, builder: RequestBuilder) -> Result<Response, FeedError> {
        let response = builder
            .send()
            .await
            .map_err(|err| map_transport_error(operation, &err))?;

        if response.status().is_success() {
            debug!(operation, status = response.status().as_u16(), "request succeeded");
            return Ok(response);
        }
        Err(error_from_response(operation, response).await)
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: Response,
    ) -> Result<T, FeedError> {
        let body = response
            .bytes()
            .await
            .map_err(|err| map_transport_error(operation, &err))?;
        serde_json::from_slice(&body).map_err(|err| {
            warn!(operation, error = %err, "undecodable response body");
            FeedError::new(
                FeedErrorKind::ServerError,
                "malformed_response",
                format!("{operation}: {err}"),
            )
        })
    }
}

/// `FeedApi` over the REST message resource.
#[derive(Clone)]
pub struct RestFeedClient {
    transport: HttpTransport,
}

impl RestFeedClient {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, request_timeout, credentials)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.transport.base_url
    }

    fn message_path(id: MessageId) -> String {
        format!("{MESSAGES_PATH}{id}/")
    }
}

#[async_trait]
impl FeedApi for RestFeedClient {
    async fn list(&self) -> Result<Vec<Message>, FeedError> {
        let t = &self.transport;
        let request = t.authorized(t.http.get(t.url(MESSAGES_PATH)))?;
        let response = t.execute("list", request).await?;
        t.decode("list", response).await
    }

    async fn create(&self, content: &str) -> Result<Message, FeedError> {
        let t = &self.transport;
        let request = t
            .authorized(t.http.post(t.url(MESSAGES_PATH)))?
            .json(&ContentBody { content });
        let response = t.execute("create", request).await?;
        t.decode("create", response).await
    }

    async fn update(&self, id: MessageId, content: &str) -> Result<Message, FeedError> {
        let t = &self.transport;
        let request = t
            .authorized(t.http.put(t.url(&Self::message_path(id))))?
            .json(&ContentBody { content });
        let response = t.execute("update", request).await?;
        t.decode("update", response).await
    }

    async fn delete(&self, id: MessageId) -> Result<(), FeedError> {
        let t = &self.transport;
        let request = t.authorized(t.http.delete(t.url(&Self::message_path(id))))?;
        t.execute("delete", request).await?;
        Ok(())
    }
}

/// `AuthApi` over the REST auth and profile resources.
#[derive(Clone)]
pub struct RestAuthClient {
    transport: HttpTransport,
}

impl RestAuthClient {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, request_timeout, credentials)?,
        })
    }
}

#[async_trait]
impl AuthApi for RestAuthClient {
    async fn login(&self, username: &str, password: &str) -> Result<AuthGrant, FeedError> {
        let t = &self.transport;
        let request = t
            .http
            .post(t.url(LOGIN_PATH))
            .json(&CredentialsBody { username, password });
        let response = t.execute("login", request).await?;
        t.decode("login", response).await
    }

    async fn register(&self, username: &str, password: &str) -> Result<(), FeedError> {
        let t = &self.transport;
        let request = t
            .http
            .post(t.url(REGISTER_PATH))
            .json(&CredentialsBody { username, password });
        let response = t.execute("register", request).await?;
        let created: RegisterResponse = t.decode("register", response).await?;
        debug!(username = %created.username, "account registered");
        Ok(())
    }

    async fn logout(&self) -> Result<(), FeedError> {
        let t = &self.transport;
        let request = t.authorized(t.http.post(t.url(LOGOUT_PATH)))?;
        t.execute("logout", request).await?;
        Ok(())
    }

    async fn profile(&self) -> Result<Profile, FeedError> {
        let t = &self.transport;
        let request = t.authorized(t.http.get(t.url(PROFILE_PATH)))?;
        let response = t.execute("profile", request).await?;
        t.decode("profile", response).await
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, FeedError> {
        let t = &self.transport;
        let request = t
            .authorized(t.http.put(t.url(PROFILE_PATH)))?
            .json(update);
        let response = t.execute("update_profile", request).await?;
        t.decode("update_profile", response).await
    }
}

/// Build both clients over one connection pool.
pub fn rest_clients(
    base_url: &str,
    request_timeout: Duration,
    credentials: Arc<dyn CredentialSource>,
) -> Result<(RestFeedClient, RestAuthClient), FeedError> {
    let transport = HttpTransport::new(base_url, request_timeout, credentials)?;
    Ok((
        RestFeedClient {
            transport: transport.clone(),
        },
        RestAuthClient { transport },
    ))
}

fn map_transport_error(operation: &str, err: &reqwest::Error) -> FeedError {
    if err.is_timeout() {
        return FeedError::timeout(operation);
    }
    if err.is_connect() {
        return FeedError::new(
            FeedErrorKind::Network,
            "connect_failed",
            format!("{operation}: {err}"),
        );
    }
    if err.is_decode() {
        return FeedError::new(
            FeedErrorKind::ServerError,
            "malformed_response",
            format!("{operation}: {err}"),
        );
    }
    FeedError::new(
        FeedErrorKind::Network,
        "transport_error",
        format!("{operation}: {err}"),
    )
}

async fn error_from_response(operation: &str, response: Response) -> FeedError {
    let status = response.status();
    let kind = classify_http_status(status.as_u16());
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();

    let message = if kind == FeedErrorKind::Rejected && !body.is_empty() {
        body.to_owned()
    } else if let Ok(detail) = serde_json::from_str::<DetailBody>(body) {
        detail.detail
    } else {
        format!("{operation} failed with HTTP {}", status.as_u16())
    };

    debug!(
        operation,
        status = status.as_u16(),
        error_kind = ?kind,
        "request rejected by server"
    );
    FeedError::new(kind, "http_status", message)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path},
    };

    use super::*;

    struct FixedCredential(Option<&'static str>);

    impl CredentialSource for FixedCredential {
        fn credential(&self) -> Option<String> {
            self.0.map(str::to_owned)
        }
    }

    fn message_json(id: i64, author: &str, content: &str) -> serde_json::Value {
        json!({
            "id": id,
            "content": content,
            "author": author,
            "created_at": "2024-11-07T10:00:00Z",
            "updated_at": "2024-11-07T10:00:00Z",
            "is_edited": false,
        })
    }

    fn clients(server: &MockServer, token: Option<&'static str>) -> (RestFeedClient, RestAuthClient) {
        rest_clients(
            &format!("{}/", server.uri()),
            Duration::from_millis(500),
            Arc::new(FixedCredential(token)),
        )
        .expect("clients should build")
    }

    #[tokio::test]
    async fn list_sends_token_header_and_decodes_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/messages/"))
            .and(header("Authorization", "Token tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                message_json(1, "alice", "hi"),
                message_json(2, "bob", "hey"),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let (feed, _) = clients(&server, Some("tok-1"));
        let messages = feed.list().await.expect("list should work");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, MessageId(1));
        assert_eq!(messages[1].author, "bob");
    }

    #[tokio::test]
    async fn create_posts_content_and_returns_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/messages/"))
            .and(body_json(json!({ "content": "hello" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(message_json(42, "alice", "hello")))
            .expect(1)
            .mount(&server)
            .await;

        let (feed, _) = clients(&server, Some("tok"));
        let created = feed.create("hello").await.expect("create should work");
        assert_eq!(created.id, MessageId(42));
    }

    #[tokio::test]
    async fn update_and_delete_target_message_paths() {
        let server = MockServer::start().await;
        let mut edited = message_json(7, "alice", "new");
        edited["is_edited"] = json!(true);
        Mock::given(method("PUT"))
            .and(path("/api/messages/7/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(edited))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/messages/7/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (feed, _) = clients(&server, Some("tok"));
        let updated = feed.update(MessageId(7), "new").await.expect("update");
        assert!(updated.is_edited);
        feed.delete(MessageId(7)).await.expect("delete");
    }

    #[tokio::test]
    async fn maps_status_codes_to_error_kinds() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/messages/1/"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({ "detail": "Permission denied - not the author" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/messages/2/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/messages/"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"content":["This field may not be blank."]}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/messages/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/messages/3/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (feed, _) = clients(&server, Some("tok"));

        let err = feed.update(MessageId(1), "x").await.expect_err("403");
        assert_eq!(err.kind, FeedErrorKind::Forbidden);
        assert_eq!(err.message, "Permission denied - not the author");

        let err = feed.update(MessageId(2), "x").await.expect_err("404");
        assert_eq!(err.kind, FeedErrorKind::NotFound);

        let err = feed.create("x").await.expect_err("400");
        assert_eq!(err.kind, FeedErrorKind::Rejected);
        assert_eq!(err.message, r#"{"content":["This field may not be blank."]}"#);

        let err = feed.list().await.expect_err("503");
        assert_eq!(err.kind, FeedErrorKind::ServerError);
        assert!(err.is_retryable());

        let err = feed.delete(MessageId(3)).await.expect_err("401");
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn missing_credential_fails_without_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let (feed, auth) = clients(&server, None);
        let err = feed.list().await.expect_err("must fail");
        assert_eq!(err.code, "credential_missing");
        let err = auth.profile().await.expect_err("must fail");
        assert_eq!(err.kind, FeedErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn slow_response_resolves_as_network_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/messages/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let (feed, _) = clients(&server, Some("tok"));
        let err = feed.list().await.expect_err("must time out");
        assert_eq!(err.kind, FeedErrorKind::Network);
        assert_eq!(err.code, "request_timeout");
    }

    #[tokio::test]
    async fn undecodable_body_is_a_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/messages/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let (feed, _) = clients(&server, Some("tok"));
        let err = feed.list().await.expect_err("must fail");
        assert_eq!(err.kind, FeedErrorKind::ServerError);
        assert_eq!(err.code, "malformed_response");
    }

    #[tokio::test]
    async fn login_returns_grant_without_credential_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/"))
            .and(body_json(json!({ "username": "alice", "password": "hunter22" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "abc",
                "user": { "id": 1, "username": "alice" },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (_, auth) = clients(&server, None);
        let grant = auth.login("alice", "hunter22").await.expect("login");
        assert_eq!(grant.token, "abc");
        assert_eq!(grant.user.username, "alice");

        let requests = server.received_requests().await.expect("recording enabled");
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn register_and_profile_round_trip_through_the_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/register/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 3,
                "username": "carol",
                "message": "User registered successfully",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/profile/"))
            .and(header("Authorization", "Token tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 3,
                "username": "carol",
                "email": "",
                "first_name": "",
                "last_name": "",
                "date_joined": "2024-11-07T10:00:00Z",
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "detail": "ok" })))
            .mount(&server)
            .await;

        let (_, auth) = clients(&server, Some("tok"));
        auth.register("carol", "longenough").await.expect("register");
        let profile = auth.profile().await.expect("profile");
        assert_eq!(profile.username, "carol");
        assert!(profile.date_joined.is_some());
        auth.logout().await.expect("logout");
    }

    #[tokio::test]
    async fn profile_update_sends_only_changed_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/profile/"))
            .and(header("Authorization", "Token tok"))
            .and(body_json(json!({ "last_name": "Jones" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 3,
                "username": "carol",
                "email": "carol@example.org",
                "first_name": "Carol",
                "last_name": "Jones",
                "date_joined": "2024-11-07T10:00:00Z",
            })))
            .mount(&server)
            .await;

        let (_, auth) = clients(&server, Some("tok"));
        let profile = auth
            .update_profile(&ProfileUpdate {
                last_name: Some("Jones".to_owned()),
                ..ProfileUpdate::default()
            })
            .await
            .expect("update");
        assert_eq!(profile.last_name, "Jones");
        assert_eq!(profile.email, "carol@example.org");
    }

    #[tokio::test]
    async fn invalid_profile_update_keeps_the_validation_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/profile/"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"email":["Enter a valid email address."]}"#),
            )
            .mount(&server)
            .await;

        let (_, auth) = clients(&server, Some("tok"));
        let err = auth
            .update_profile(&ProfileUpdate {
                email: Some("nope".to_owned()),
                ..ProfileUpdate::default()
            })
            .await
            .expect_err("must fail");
        assert_eq!(err.kind, FeedErrorKind::Rejected);
        assert!(err.message.contains("valid email"));
    }

    #[test]
    fn rejects_invalid_base_urls() {
        let creds: Arc<dyn CredentialSource> = Arc::new(FixedCredential(None));
        let err = RestFeedClient::new("not a url", Duration::from_secs(1), creds.clone())
            .err()
            .expect("must fail");
        assert_eq!(err.code, "invalid_base_url");

        let err = RestFeedClient::new("ftp://example.org", Duration::from_secs(1), creds.clone())
            .err()
            .expect("must fail");
        assert_eq!(err.code, "invalid_base_url");

        let client = RestFeedClient::new("http://127.0.0.1:8000///", Duration::from_secs(1), creds)
            .expect("valid url");
        assert_eq!(client.base_url(), "http://127.0.0.1:8000");
    }
}
