//! Browser sign-in for federated providers.
//!
//! A terminal has no popup, so the authorization page is opened by the user
//! and the provider redirects back to a one-shot listener on
//! `http://127.0.0.1:<port>/`. The code from that redirect is exchanged for
//! an ID token, which `accounts:signInWithIdp` then turns into a session.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use url::Url;

use super::provider::ProviderError;

pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const MAX_REQUEST_HEAD: usize = 8 * 1024;

const DONE_PAGE: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/html; charset=utf-8\r\n\
Connection: close\r\n\r\n\
<html><body><p>Login concluído. Você pode fechar esta janela.</p></body></html>";

const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    /// 0 picks a free port.
    pub redirect_port: u16,
    pub redirect_timeout_secs: u64,
    /// Pre-issued ID token; skips the browser step when set.
    pub id_token: String,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        OAuthSettings {
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: GOOGLE_AUTHORIZE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            redirect_port: 0,
            redirect_timeout_secs: 120,
            id_token: String::new(),
        }
    }
}

/// Credential handed to `accounts:signInWithIdp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdpCredential {
    IdToken(String),
    AccessToken(String),
}

impl IdpCredential {
    /// Form-encoded `postBody` of the `signInWithIdp` request.
    pub fn post_body(&self, provider_id: &str) -> String {
        let (key, value) = match self {
            IdpCredential::IdToken(token) => ("id_token", token),
            IdpCredential::AccessToken(token) => ("access_token", token),
        };
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair(key, value)
            .append_pair("providerId", provider_id)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenExchange {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

fn cancelled(message: impl Into<String>) -> ProviderError {
    ProviderError::new("auth/popup-closed-by-user", message)
}

fn internal(message: impl Into<String>) -> ProviderError {
    ProviderError::new("auth/internal-error", message)
}

pub struct BrowserSignIn<'a> {
    http: &'a reqwest::Client,
    settings: &'a OAuthSettings,
}

impl<'a> BrowserSignIn<'a> {
    pub fn new(http: &'a reqwest::Client, settings: &'a OAuthSettings) -> Self {
        BrowserSignIn { http, settings }
    }

    /// Runs the redirect flow and returns the provider credential.
    ///
    /// A refused consent or no redirect within `redirect_timeout_secs` is a
    /// cancelled popup.
    pub async fn obtain(&self, scopes: &[String]) -> Result<IdpCredential, ProviderError> {
        if !self.settings.id_token.trim().is_empty() {
            debug!("Using configured ID token for federated sign-in");
            return Ok(IdpCredential::IdToken(self.settings.id_token.trim().to_string()));
        }
        if self.settings.client_id.trim().is_empty() {
            return Err(ProviderError::new(
                "auth/operation-not-supported-in-this-environment",
                "no OAuth client configured for federated sign-in",
            ));
        }

        let listener = TcpListener::bind(("127.0.0.1", self.settings.redirect_port))
            .await
            .map_err(|e| internal(format!("redirect listener: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| internal(format!("redirect listener: {e}")))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}");
        let state = format!("{:016x}", rand::random::<u64>());

        let authorize = self.authorize_url(&redirect_uri, scopes, &state)?;
        info!("Open this address in a browser to sign in: {}", authorize);

        let wait = Duration::from_secs(self.settings.redirect_timeout_secs);
        let params = match tokio::time::timeout(wait, accept_redirect(&listener)).await {
            Ok(params) => params?,
            Err(_) => {
                warn!("No sign-in redirect within {}s", wait.as_secs());
                return Err(cancelled("sign-in window was not completed"));
            }
        };

        let param = |name: &str| {
            params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        if let Some(error) = param("error") {
            return Err(match error {
                "access_denied" => cancelled("consent refused"),
                other => internal(other.to_string()),
            });
        }
        if param("state") != Some(state.as_str()) {
            return Err(internal("redirect state does not match"));
        }
        let code = param("code").ok_or_else(|| internal("redirect without code"))?;

        self.exchange(code, &redirect_uri).await
    }

    fn authorize_url(
        &self,
        redirect_uri: &str,
        scopes: &[String],
        state: &str,
    ) -> Result<Url, ProviderError> {
        let scope = if scopes.is_empty() {
            "openid".to_string()
        } else {
            format!("openid {}", scopes.join(" "))
        };
        Url::parse_with_params(
            &self.settings.authorize_url,
            &[
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| internal(format!("authorize url: {e}")))
    }

    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<IdpCredential, ProviderError> {
        let response = self
            .http
            .post(&self.settings.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::new("auth/network-request-failed", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("Token exchange answered {}: {}", status, body);
            return Err(ProviderError::new(
                "auth/invalid-credential",
                format!("token exchange failed with HTTP {status}"),
            ));
        }

        let tokens: TokenExchange = response
            .json()
            .await
            .map_err(|e| internal(format!("bad token response: {e}")))?;
        match (tokens.id_token, tokens.access_token) {
            (Some(id_token), _) => Ok(IdpCredential::IdToken(id_token)),
            (None, Some(access_token)) => Ok(IdpCredential::AccessToken(access_token)),
            (None, None) => Err(ProviderError::new(
                "auth/invalid-credential",
                "token response without a token",
            )),
        }
    }
}

/// Waits for the browser redirect and returns its query parameters.
///
/// Requests without a query (favicon and the like) get a 404 and are skipped.
async fn accept_redirect(listener: &TcpListener) -> Result<Vec<(String, String)>, ProviderError> {
    loop {
        let (mut stream, peer) = listener
            .accept()
            .await
            .map_err(|e| internal(format!("redirect accept: {e}")))?;
        debug!("Redirect connection from {}", peer);

        let target = match read_request_target(&mut stream).await {
            Some(target) if target.contains('?') => target,
            _ => {
                let _ = stream.write_all(NOT_FOUND.as_bytes()).await;
                continue;
            }
        };

        if let Err(e) = stream.write_all(DONE_PAGE.as_bytes()).await {
            debug!("Could not answer the browser: {}", e);
        }
        let url = Url::parse(&format!("http://127.0.0.1{target}"))
            .map_err(|e| internal(format!("redirect target: {e}")))?;
        return Ok(url.query_pairs().into_owned().collect());
    }
}

/// Request target of `GET <target> HTTP/1.1`, once the head has arrived.
async fn read_request_target(stream: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 || head.len() + read > MAX_REQUEST_HEAD {
            break;
        }
        head.extend_from_slice(&chunk[..read]);
    }

    let head = String::from_utf8_lossy(&head);
    let mut request_line = head.lines().next()?.split_whitespace();
    match (request_line.next(), request_line.next()) {
        (Some("GET"), Some(target)) if target.starts_with('/') => Some(target.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Plays the browser: requests `target` on the redirect port once it is open.
    async fn redirect_to(port: u16, target: String) -> String {
        let mut stream = loop {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        };
        let request = format!("GET {target} HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut page = String::new();
        stream.read_to_string(&mut page).await.unwrap();
        page
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn post_body_is_form_encoded() {
        let credential = IdpCredential::IdToken("a+b/c".to_string());
        assert_eq!(
            credential.post_body("google.com"),
            "id_token=a%2Bb%2Fc&providerId=google.com"
        );
        let credential = IdpCredential::AccessToken("tok".to_string());
        assert_eq!(
            credential.post_body("google.com"),
            "access_token=tok&providerId=google.com"
        );
    }

    #[tokio::test]
    async fn configured_token_skips_the_browser() {
        let http = reqwest::Client::new();
        let settings = OAuthSettings {
            id_token: "preissued".to_string(),
            ..OAuthSettings::default()
        };
        let credential = BrowserSignIn::new(&http, &settings)
            .obtain(&[])
            .await
            .unwrap();
        assert_eq!(credential, IdpCredential::IdToken("preissued".to_string()));
    }

    #[tokio::test]
    async fn missing_client_is_unsupported() {
        let http = reqwest::Client::new();
        let settings = OAuthSettings::default();
        let err = BrowserSignIn::new(&http, &settings)
            .obtain(&[])
            .await
            .unwrap_err();
        assert_eq!(err.code, "auth/operation-not-supported-in-this-environment");
    }

    #[tokio::test]
    async fn refused_consent_is_a_cancelled_popup() {
        let http = reqwest::Client::new();
        let port = free_port();
        let settings = OAuthSettings {
            client_id: "client".to_string(),
            redirect_port: port,
            ..OAuthSettings::default()
        };

        let browser = tokio::spawn(redirect_to(port, "/?error=access_denied".to_string()));
        let err = BrowserSignIn::new(&http, &settings)
            .obtain(&["email".to_string()])
            .await
            .unwrap_err();

        assert_eq!(err.code, "auth/popup-closed-by-user");
        assert!(browser.await.unwrap().starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn unanswered_redirect_times_out_as_cancelled() {
        let http = reqwest::Client::new();
        let settings = OAuthSettings {
            client_id: "client".to_string(),
            redirect_timeout_secs: 0,
            ..OAuthSettings::default()
        };
        let err = BrowserSignIn::new(&http, &settings)
            .obtain(&[])
            .await
            .unwrap_err();
        assert_eq!(err.code, "auth/popup-closed-by-user");
    }

    #[tokio::test]
    async fn mismatched_state_is_rejected() {
        let http = reqwest::Client::new();
        let port = free_port();
        let settings = OAuthSettings {
            client_id: "client".to_string(),
            redirect_port: port,
            ..OAuthSettings::default()
        };

        let browser = tokio::spawn(async move {
            // a favicon request first, then a forged redirect
            let missing = redirect_to(port, "/favicon.ico".to_string()).await;
            assert!(missing.starts_with("HTTP/1.1 404"));
            redirect_to(port, "/?code=abc&state=forged".to_string()).await
        });
        let err = BrowserSignIn::new(&http, &settings)
            .obtain(&[])
            .await
            .unwrap_err();

        assert_eq!(err.code, "auth/internal-error");
        browser.await.unwrap();
    }

    #[tokio::test]
    async fn code_is_exchanged_for_an_id_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=one-time"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "id_token": "google-id-token",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let settings = OAuthSettings {
            client_id: "client".to_string(),
            token_url: format!("{}/token", server.uri()),
            ..OAuthSettings::default()
        };
        let flow = BrowserSignIn::new(&http, &settings);

        let credential = flow
            .exchange("one-time", "http://127.0.0.1:1")
            .await
            .unwrap();
        assert_eq!(credential, IdpCredential::IdToken("google-id-token".to_string()));
    }
}
