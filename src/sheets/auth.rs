// src/sheets/auth.rs

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{expand_path, AuthConfig};

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SLACK_SECS: i64 = 60;

/// Bearer token for the Sheets API.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// On-disk user token, in the same shape the Google client libraries write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedUser {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl AuthorizedUser {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expiry) {
            (Some(_), Some(expiry)) => expiry - Duration::seconds(EXPIRY_SLACK_SECS) > now,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn access_token(&self) -> Result<AccessToken> {
        self.token
            .clone()
            .map(AccessToken)
            .context("stored credentials hold no access token")
    }

    fn apply(&mut self, resp: TokenResponse, now: DateTime<Utc>) {
        self.token = Some(resp.access_token);
        self.expiry = resp.expires_in.map(|secs| now + Duration::seconds(secs));
        // refresh responses usually omit the refresh token; keep the old one
        if resp.refresh_token.is_some() {
            self.refresh_token = resp.refresh_token;
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct ClientSecrets {
    installed: Option<ClientConfig>,
    web: Option<ClientConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientConfig {
    client_id: String,
    client_secret: String,
    #[serde(default = "default_auth_uri")]
    auth_uri: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

/// Obtain an access token: service account if configured, otherwise the
/// cached user token (refreshed or re-consented as needed).
#[instrument(level = "info", skip_all)]
pub async fn authorize(cfg: &AuthConfig, http: &Client) -> Result<AccessToken> {
    if let Some(sa) = cfg.service_account.as_deref().filter(|s| !s.is_empty()) {
        return service_account_token(http, &expand_path(sa)).await;
    }

    let token_path = expand_path(&cfg.token);
    let stored = load_authorized_user(&token_path)?;
    let now = Utc::now();
    if let Some(user) = stored.as_ref().filter(|u| u.is_valid(now)) {
        debug!(path = %token_path.display(), "using stored token");
        return user.access_token();
    }

    let user = match stored {
        Some(user) if user.refresh_token.is_some() => {
            println!("Credentials expired, please re-authenticate...");
            refresh(http, user).await?
        }
        _ => installed_app_flow(http, &expand_path(&cfg.credentials)).await?,
    };
    save_authorized_user(&token_path, &user)?;
    info!(path = %token_path.display(), "saved token");
    user.access_token()
}

async fn request_token(http: &Client, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
    let resp = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .with_context(|| format!("POST {}", token_uri))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("token endpoint {} returned {}: {}", token_uri, status, body);
    }
    resp.json()
        .await
        .with_context(|| format!("decoding token response from {}", token_uri))
}

async fn service_account_token(http: &Client, key_path: &Path) -> Result<AccessToken> {
    let text = fs::read_to_string(key_path)
        .with_context(|| format!("reading service account {}", key_path.display()))?;
    let key: ServiceAccountKey = serde_json::from_str(&text)
        .with_context(|| format!("parsing service account {}", key_path.display()))?;

    let now = Utc::now().timestamp();
    let claims = JwtClaims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + 3600,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .context("parsing service account private key")?;
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
        .context("signing service account assertion")?;

    let resp = request_token(
        http,
        &key.token_uri,
        &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
    )
    .await?;
    info!(account = %key.client_email, "authorized service account");
    Ok(AccessToken(resp.access_token))
}

async fn refresh(http: &Client, mut user: AuthorizedUser) -> Result<AuthorizedUser> {
    let refresh_token = user
        .refresh_token
        .clone()
        .context("no refresh token stored")?;
    let resp = request_token(
        http,
        &user.token_uri,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", user.client_id.as_str()),
            ("client_secret", user.client_secret.as_str()),
        ],
    )
    .await
    .context("refreshing stored credentials")?;
    user.apply(resp, Utc::now());
    Ok(user)
}

async fn installed_app_flow(http: &Client, secrets_path: &Path) -> Result<AuthorizedUser> {
    let text = fs::read_to_string(secrets_path)
        .with_context(|| format!("reading client secrets {}", secrets_path.display()))?;
    let client = parse_client_secrets(&text)
        .with_context(|| format!("parsing client secrets {}", secrets_path.display()))?;

    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .context("binding local redirect listener")?;
    let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());
    let state = format!("{:x}{:x}", std::process::id(), Utc::now().timestamp_micros());

    let consent_url = Url::parse_with_params(
        &client.auth_uri,
        &[
            ("response_type", "code"),
            ("client_id", client.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("scope", SHEETS_SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state.as_str()),
        ],
    )
    .with_context(|| format!("building consent URL from {}", client.auth_uri))?;

    println!("Please visit this URL to authorize this application: {}", consent_url);
    if let Err(e) = open::that(consent_url.as_str()) {
        warn!(error = %e, "could not open a browser");
    }

    let code = wait_for_code(&listener, &state).await?;
    let resp = request_token(
        http,
        &client.token_uri,
        &[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ],
    )
    .await
    .context("exchanging authorization code")?;

    let mut user = AuthorizedUser {
        token: None,
        refresh_token: None,
        token_uri: client.token_uri,
        client_id: client.client_id,
        client_secret: client.client_secret,
        scopes: vec![SHEETS_SCOPE.to_string()],
        expiry: None,
    };
    user.apply(resp, Utc::now());
    Ok(user)
}

fn parse_client_secrets(text: &str) -> Result<ClientConfig> {
    let secrets: ClientSecrets = serde_json::from_str(text)?;
    secrets
        .installed
        .or(secrets.web)
        .context("client secrets need an 'installed' or 'web' section")
}

async fn wait_for_code(listener: &TcpListener, state: &str) -> Result<String> {
    loop {
        let (stream, peer) = listener.accept().await.context("accepting redirect")?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        debug!(%peer, request = request_line.trim(), "redirect request");

        let target = request_line.split_whitespace().nth(1).unwrap_or("/");
        let outcome = parse_redirect(target, state);
        let (status, body) = match &outcome {
            Ok(Some(_)) => (
                "200 OK",
                "The authentication flow has completed. You may close this window.",
            ),
            Ok(None) => ("404 Not Found", "Not found."),
            Err(_) => ("400 Bad Request", "Authentication failed."),
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        write_half.write_all(response.as_bytes()).await?;
        write_half.shutdown().await.ok();

        if let Some(code) = outcome? {
            return Ok(code);
        }
    }
}

/// Extract the authorization code from a redirect request target.
/// `Ok(None)` means the request was unrelated (e.g. `/favicon.ico`).
fn parse_redirect(target: &str, expected_state: &str) -> Result<Option<String>> {
    let url = Url::parse("http://127.0.0.1")?.join(target)?;
    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => bail!("authorization was denied: {}", value),
            _ => {}
        }
    }
    let Some(code) = code else {
        return Ok(None);
    };
    if state.as_deref() != Some(expected_state) {
        bail!("authorization response state mismatch");
    }
    Ok(Some(code))
}

pub fn load_authorized_user(path: &Path) -> Result<Option<AuthorizedUser>> {
    if !path.exists() {
        return Ok(None);
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("reading token {}", path.display()))?;
    let user = serde_json::from_str(&text)
        .with_context(|| format!("parsing token {}", path.display()))?;
    Ok(Some(user))
}

/// Write the token file readable by the owner only.
pub fn save_authorized_user(path: &Path, user: &AuthorizedUser) -> Result<()> {
    let json = serde_json::to_string_pretty(user)?;
    fs::write(path, json).with_context(|| format!("writing token {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting permissions on {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn user(expiry: Option<DateTime<Utc>>) -> AuthorizedUser {
        AuthorizedUser {
            token: Some("ya29.tok".into()),
            refresh_token: Some("1//refresh".into()),
            token_uri: default_token_uri(),
            client_id: "cid".into(),
            client_secret: "secret".into(),
            scopes: vec![SHEETS_SCOPE.into()],
            expiry,
        }
    }

    #[test]
    fn validity_respects_slack() {
        let now = Utc::now();
        assert!(user(Some(now + Duration::minutes(10))).is_valid(now));
        assert!(!user(Some(now + Duration::seconds(30))).is_valid(now));
        assert!(!user(Some(now - Duration::minutes(1))).is_valid(now));
        assert!(user(None).is_valid(now));

        let mut empty = user(None);
        empty.token = None;
        assert!(!empty.is_valid(now));
    }

    #[test]
    fn refresh_response_keeps_refresh_token() {
        let now = Utc::now();
        let mut u = user(None);
        u.apply(
            TokenResponse {
                access_token: "new".into(),
                expires_in: Some(3599),
                refresh_token: None,
            },
            now,
        );
        assert_eq!(u.token.as_deref(), Some("new"));
        assert_eq!(u.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(u.expiry, Some(now + Duration::seconds(3599)));
    }

    #[test]
    fn reads_google_token_format() -> Result<()> {
        let u: AuthorizedUser = serde_json::from_str(
            r#"{"token": "ya29.x", "refresh_token": "1//r", "token_uri": "https://oauth2.googleapis.com/token",
                "client_id": "id", "client_secret": "s", "scopes": ["https://www.googleapis.com/auth/spreadsheets"],
                "expiry": "2023-05-26T12:44:00.123456Z"}"#,
        )?;
        assert_eq!(u.expiry.map(|e| e.timestamp()), Some(1_685_105_040));
        assert!(!u.is_valid(Utc::now()));
        Ok(())
    }

    #[test]
    fn token_round_trips_on_disk() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".token.json");
        assert!(load_authorized_user(&path)?.is_none());

        save_authorized_user(&path, &user(None))?;
        let loaded = load_authorized_user(&path)?.expect("token should load");
        assert_eq!(loaded.client_id, "cid");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path)?.permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        Ok(())
    }

    #[test]
    fn client_secrets_accept_installed_or_web() -> Result<()> {
        let c = parse_client_secrets(r#"{"installed": {"client_id": "a", "client_secret": "b"}}"#)?;
        assert_eq!(c.client_id, "a");
        assert_eq!(c.token_uri, GOOGLE_TOKEN_URI);
        let c = parse_client_secrets(
            r#"{"web": {"client_id": "w", "client_secret": "b", "token_uri": "http://t"}}"#,
        )?;
        assert_eq!(c.token_uri, "http://t");
        assert!(parse_client_secrets(r#"{"other": {}}"#).is_err());
        Ok(())
    }

    #[test]
    fn redirect_parsing() -> Result<()> {
        assert_eq!(
            parse_redirect("/?state=s1&code=4%2F0Ab&scope=x", "s1")?,
            Some("4/0Ab".to_string())
        );
        assert_eq!(parse_redirect("/favicon.ico", "s1")?, None);
        assert!(parse_redirect("/?code=c&state=other", "s1").is_err());
        assert!(parse_redirect("/?error=access_denied", "s1").is_err());
        Ok(())
    }
}
