//! Google Drive + Slides implementation of [`SlideConverter`].
//!
//! Upload goes through the Drive v3 multipart endpoint with the target
//! mime type set to a Google Slides presentation, which makes Drive convert
//! the PPTX on import. Thumbnails come from the Slides v1
//! `pages/{id}/thumbnail` endpoint (PNG, `LARGE`), whose `contentUrl` is then
//! downloaded.
//!
//! ## Credentials
//!
//! Resolved in this order:
//! 1. `credentials_path` from the config
//! 2. `SLIDECITE_GOOGLE_ACCESS_TOKEN` (a ready bearer token)
//! 3. `GOOGLE_APPLICATION_CREDENTIALS`
//!
//! A credential file is one of:
//! - a `service_account` key: an RS256-signed JWT assertion carrying the
//!   configured scopes is exchanged for a token (JWT-bearer grant)
//! - an `authorized_user` file (client id, client secret and refresh token,
//!   as written by `gcloud auth application-default login`)
//! - a JSON object holding an `access_token`/`token`

use crate::config::CheckConfig;
use crate::error::SlideCiteError;
use crate::pipeline::render::SlideConverter;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
pub const SLIDES_API_URL: &str = "https://slides.googleapis.com/v1";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const PPTX_MIME: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const SLIDES_MIME: &str = "application/vnd.google-apps.presentation";
const MULTIPART_BOUNDARY: &str = "slidecite-upload-boundary";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Lifetime of a service-account assertion; Google caps it at one hour.
const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// Environment variable holding a bearer token.
pub const ACCESS_TOKEN_ENV: &str = "SLIDECITE_GOOGLE_ACCESS_TOKEN";

// ── Credentials ──────────────────────────────────────────────────────────

/// Loaded Google credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum GoogleCredentials {
    AccessToken(String),
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        token_uri: String,
    },
    ServiceAccount {
        client_email: String,
        private_key: String,
        private_key_id: Option<String>,
        token_uri: String,
    },
}

impl std::fmt::Debug for GoogleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GoogleCredentials::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            GoogleCredentials::AuthorizedUser { client_id, .. } => f
                .debug_struct("AuthorizedUser")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            GoogleCredentials::ServiceAccount { client_email, .. } => f
                .debug_struct("ServiceAccount")
                .field("client_email", client_email)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    access_token: Option<String>,
    token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token_uri: Option<String>,
    client_email: Option<String>,
    private_key: Option<String>,
    private_key_id: Option<String>,
}

/// Claims of a service-account assertion.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl GoogleCredentials {
    /// Resolve credentials from an explicit file or the environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self, SlideCiteError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.trim().is_empty() {
                return Ok(GoogleCredentials::AccessToken(token.trim().to_string()));
            }
        }
        if let Ok(file) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            if !file.is_empty() {
                return Self::from_file(&PathBuf::from(file));
            }
        }
        Err(SlideCiteError::RenderAuth {
            detail: format!(
                "no Google credentials found.\n\
                Pass --credentials, or set {ACCESS_TOKEN_ENV} or GOOGLE_APPLICATION_CREDENTIALS."
            ),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, SlideCiteError> {
        let raw = std::fs::read_to_string(path).map_err(|e| SlideCiteError::RenderAuth {
            detail: format!("cannot read credentials '{}': {e}", path.display()),
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, SlideCiteError> {
        let file: CredentialFile =
            serde_json::from_str(raw).map_err(|e| SlideCiteError::RenderAuth {
                detail: format!("credentials are not valid JSON: {e}"),
            })?;

        if file.kind.as_deref() == Some("service_account") {
            let (Some(client_email), Some(private_key)) = (file.client_email, file.private_key)
            else {
                return Err(SlideCiteError::RenderAuth {
                    detail: "service-account key lacks client_email or private_key".into(),
                });
            };
            return Ok(GoogleCredentials::ServiceAccount {
                client_email,
                private_key,
                private_key_id: file.private_key_id,
                token_uri: file.token_uri.unwrap_or_else(|| TOKEN_URL.to_string()),
            });
        }

        if let (Some(client_id), Some(client_secret), Some(refresh_token)) = (
            file.client_id.clone(),
            file.client_secret.clone(),
            file.refresh_token.clone(),
        ) {
            return Ok(GoogleCredentials::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri: file.token_uri.unwrap_or_else(|| TOKEN_URL.to_string()),
            });
        }

        file.access_token
            .or(file.token)
            .filter(|t| !t.is_empty())
            .map(GoogleCredentials::AccessToken)
            .ok_or_else(|| SlideCiteError::RenderAuth {
                detail: "credential file has neither a refresh token nor an access token".into(),
            })
    }

    /// Exchange the credentials for a bearer token.
    ///
    /// `scopes` only matter for service accounts; the other kinds carry the
    /// scopes they were granted with.
    pub async fn access_token(
        &self,
        client: &reqwest::Client,
        scopes: &[String],
    ) -> Result<String, SlideCiteError> {
        match self {
            GoogleCredentials::AccessToken(token) => Ok(token.clone()),
            GoogleCredentials::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri,
            } => {
                debug!("Refreshing Google access token");
                let params = [
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                ];
                request_token(client, token_uri, &params).await
            }
            GoogleCredentials::ServiceAccount {
                client_email,
                token_uri,
                ..
            } => {
                debug!("Requesting access token for service account {}", client_email);
                let assertion = self.assertion(scopes, unix_now())?;
                let params = jwt_bearer_form(&assertion);
                request_token(client, token_uri, &params).await
            }
        }
    }

    /// Signed JWT for the service-account grant, issued at `issued_at`.
    ///
    /// Fails with `RenderAuth` for other credential kinds or an unusable key.
    fn assertion(&self, scopes: &[String], issued_at: u64) -> Result<String, SlideCiteError> {
        let GoogleCredentials::ServiceAccount {
            client_email,
            private_key,
            private_key_id,
            token_uri,
        } = self
        else {
            return Err(SlideCiteError::RenderAuth {
                detail: "only service accounts sign assertions".into(),
            });
        };
        if scopes.is_empty() {
            return Err(SlideCiteError::RenderAuth {
                detail: "service-account grant needs at least one scope".into(),
            });
        }

        let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|e| {
            SlideCiteError::RenderAuth {
                detail: format!("service-account private_key is not a usable RSA key: {e}"),
            }
        })?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = private_key_id.clone();
        let claims = AssertionClaims {
            iss: client_email.clone(),
            scope: scopes.join(" "),
            aud: token_uri.clone(),
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &key).map_err(|e| SlideCiteError::RenderAuth {
            detail: format!("cannot sign service-account assertion: {e}"),
        })
    }
}

fn jwt_bearer_form(assertion: &str) -> [(&'static str, &str); 2] {
    [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)]
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// POST a token grant form and return the `access_token` it yields.
async fn request_token(
    client: &reqwest::Client,
    token_uri: &str,
    params: &[(&str, &str)],
) -> Result<String, SlideCiteError> {
    let response = client
        .post(token_uri)
        .form(params)
        .send()
        .await
        .map_err(|e| SlideCiteError::RenderAuth {
            detail: format!("token request failed: {e}"),
        })?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(SlideCiteError::RenderAuth {
            detail: format!("token request rejected (HTTP {status}): {body}"),
        });
    }
    let token: TokenResponse =
        serde_json::from_str(&body).map_err(|e| SlideCiteError::RenderAuth {
            detail: format!("malformed token response: {e}"),
        })?;
    Ok(token.access_token)
}

// ── Converter ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Presentation {
    #[serde(default)]
    slides: Vec<PageRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageRef {
    object_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thumbnail {
    content_url: String,
}

/// [`SlideConverter`] backed by Google Drive and Google Slides.
pub struct GoogleSlidesConverter {
    client: reqwest::Client,
    token: String,
    drive_upload_url: String,
    slides_api_url: String,
}

impl std::fmt::Debug for GoogleSlidesConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleSlidesConverter")
            .field("drive_upload_url", &self.drive_upload_url)
            .field("slides_api_url", &self.slides_api_url)
            .finish_non_exhaustive()
    }
}

impl GoogleSlidesConverter {
    /// Load credentials per the config and obtain an access token.
    pub async fn connect(config: &CheckConfig) -> Result<Self, SlideCiteError> {
        let credentials = GoogleCredentials::resolve(config.credentials_path.as_deref())?;
        let client = http_client(config.render_timeout_secs)?;
        let token = credentials.access_token(&client, &config.scopes).await?;
        Ok(Self::from_parts(client, token))
    }

    /// Build a converter around an existing bearer token.
    pub fn with_token(token: impl Into<String>, timeout_secs: u64) -> Result<Self, SlideCiteError> {
        Ok(Self::from_parts(http_client(timeout_secs)?, token.into()))
    }

    /// Point the converter at different API roots.
    pub fn with_base_urls(mut self, drive_upload: impl Into<String>, slides_api: impl Into<String>) -> Self {
        self.drive_upload_url = drive_upload.into();
        self.slides_api_url = slides_api.into();
        self
    }

    fn from_parts(client: reqwest::Client, token: String) -> Self {
        Self {
            client,
            token,
            drive_upload_url: DRIVE_UPLOAD_URL.to_string(),
            slides_api_url: SLIDES_API_URL.to_string(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, stage: &str) -> Result<T, SlideCiteError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| transport(stage, e))?;
        let body = check_status(response, stage).await?;
        serde_json::from_slice(&body).map_err(|e| SlideCiteError::RenderFailed {
            stage: stage.to_string(),
            detail: format!("unexpected response: {e}"),
        })
    }
}

#[async_trait]
impl SlideConverter for GoogleSlidesConverter {
    async fn upload(&self, deck_path: &Path) -> Result<String, SlideCiteError> {
        let bytes = tokio::fs::read(deck_path)
            .await
            .map_err(|e| SlideCiteError::io(deck_path, e))?;
        let name = deck_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("deck");

        let body = multipart_body(name, &bytes);
        let url = format!("{}?uploadType=multipart&fields=id", self.drive_upload_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| transport("upload", e))?;

        let body = check_status(response, "upload").await?;
        let file: UploadedFile =
            serde_json::from_slice(&body).map_err(|e| SlideCiteError::RenderFailed {
                stage: "upload".into(),
                detail: format!("unexpected response: {e}"),
            })?;
        Ok(file.id)
    }

    async fn slide_ids(&self, presentation_id: &str) -> Result<Vec<String>, SlideCiteError> {
        let url = format!(
            "{}/presentations/{}?fields=slides.objectId",
            self.slides_api_url, presentation_id
        );
        let presentation: Presentation = self.get_json(&url, "presentation lookup").await?;
        Ok(presentation.slides.into_iter().map(|p| p.object_id).collect())
    }

    async fn export_thumbnail(
        &self,
        presentation_id: &str,
        slide_object_id: &str,
    ) -> Result<Vec<u8>, SlideCiteError> {
        let url = format!(
            "{}/presentations/{}/pages/{}/thumbnail?thumbnailProperties.mimeType=PNG&thumbnailProperties.thumbnailSize=LARGE",
            self.slides_api_url, presentation_id, slide_object_id
        );
        let thumb: Thumbnail = self.get_json(&url, "thumbnail export").await?;

        let response = self
            .client
            .get(&thumb.content_url)
            .send()
            .await
            .map_err(|e| transport("thumbnail download", e))?;
        check_status(response, "thumbnail download").await
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, SlideCiteError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SlideCiteError::Internal(format!("HTTP client: {e}")))
}

/// `multipart/related` body: JSON metadata part, then the PPTX bytes.
fn multipart_body(name: &str, deck: &[u8]) -> Vec<u8> {
    let metadata = serde_json::json!({ "name": name, "mimeType": SLIDES_MIME });
    let mut body = Vec::with_capacity(deck.len() + 512);
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{MULTIPART_BOUNDARY}\r\nContent-Type: {PPTX_MIME}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(deck);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

fn transport(stage: &str, e: reqwest::Error) -> SlideCiteError {
    SlideCiteError::RenderFailed {
        stage: stage.to_string(),
        detail: e.to_string(),
    }
}

/// Body of a successful response; 401/403 become [`SlideCiteError::RenderAuth`].
async fn check_status(response: reqwest::Response, stage: &str) -> Result<Vec<u8>, SlideCiteError> {
    let status = response.status();
    let body = response.bytes().await.map_err(|e| transport(stage, e))?;
    if status.is_success() {
        return Ok(body.to_vec());
    }
    let detail = format!("HTTP {status}: {}", String::from_utf8_lossy(&body));
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(SlideCiteError::RenderAuth { detail })
    } else {
        Err(SlideCiteError::RenderFailed {
            stage: stage.to_string(),
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorized_user_file_is_parsed() {
        let creds = GoogleCredentials::from_json(
            r#"{"type":"authorized_user","client_id":"id","client_secret":"s","refresh_token":"r"}"#,
        )
        .unwrap();
        assert_eq!(
            creds,
            GoogleCredentials::AuthorizedUser {
                client_id: "id".into(),
                client_secret: "s".into(),
                refresh_token: "r".into(),
                token_uri: TOKEN_URL.into(),
            }
        );
    }

    #[test]
    fn token_file_is_parsed() {
        let creds = GoogleCredentials::from_json(r#"{"token":"ya29.abc"}"#).unwrap();
        assert_eq!(creds, GoogleCredentials::AccessToken("ya29.abc".into()));
    }

    const TEST_KEY: &str = include_str!("../../tests/fixtures/service_account_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../../tests/fixtures/service_account_key.pub.pem");

    fn service_account() -> GoogleCredentials {
        let raw = serde_json::json!({
            "type": "service_account",
            "client_email": "checker@demo.iam.gserviceaccount.com",
            "private_key_id": "kid-1",
            "private_key": TEST_KEY,
        });
        GoogleCredentials::from_json(&raw.to_string()).unwrap()
    }

    #[test]
    fn service_account_file_is_parsed() {
        match service_account() {
            GoogleCredentials::ServiceAccount {
                client_email,
                private_key_id,
                token_uri,
                ..
            } => {
                assert_eq!(client_email, "checker@demo.iam.gserviceaccount.com");
                assert_eq!(private_key_id.as_deref(), Some("kid-1"));
                assert_eq!(token_uri, TOKEN_URL);
            }
            other => panic!("expected service account, got {other:?}"),
        }
    }

    #[test]
    fn service_account_without_key_is_rejected() {
        let err = GoogleCredentials::from_json(r#"{"type":"service_account","client_email":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, SlideCiteError::RenderAuth { .. }));
    }

    #[test]
    fn assertion_is_signed_and_carries_scopes() {
        let scopes: Vec<String> = crate::config::DEFAULT_SCOPES
            .iter()
            .map(|s| s.to_string())
            .collect();
        let now = unix_now();
        let jwt = service_account().assertion(&scopes, now).unwrap();

        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("kid-1"));

        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.set_audience(&[TOKEN_URL]);
        let key = jsonwebtoken::DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap();
        let claims = jsonwebtoken::decode::<AssertionClaims>(&jwt, &key, &validation)
            .unwrap()
            .claims;
        assert_eq!(
            claims,
            AssertionClaims {
                iss: "checker@demo.iam.gserviceaccount.com".into(),
                scope: "https://www.googleapis.com/auth/drive \
                        https://www.googleapis.com/auth/presentations.readonly"
                    .into(),
                aud: TOKEN_URL.into(),
                iat: now,
                exp: now + 3600,
            }
        );
    }

    #[test]
    fn assertion_needs_scopes() {
        let err = service_account().assertion(&[], unix_now()).unwrap_err();
        assert!(matches!(err, SlideCiteError::RenderAuth { .. }));
    }

    #[test]
    fn unusable_private_key_is_an_auth_error() {
        let creds = GoogleCredentials::ServiceAccount {
            client_email: "x@y".into(),
            private_key: "not a pem".into(),
            private_key_id: None,
            token_uri: TOKEN_URL.into(),
        };
        let err = creds.assertion(&["s".to_string()], 0).unwrap_err();
        assert!(matches!(err, SlideCiteError::RenderAuth { .. }));
    }

    #[test]
    fn jwt_bearer_form_fields() {
        let form = jwt_bearer_form("a.b.c");
        assert_eq!(
            form,
            [
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", "a.b.c"),
            ]
        );
        let encoded = serde_urlencoded_form(&form);
        assert_eq!(
            encoded,
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer&assertion=a.b.c"
        );
    }

    /// The body reqwest sends for `.form(&params)`.
    fn serde_urlencoded_form(params: &[(&str, &str)]) -> String {
        let request = reqwest::Client::new()
            .post("http://localhost/token")
            .form(params)
            .build()
            .unwrap();
        String::from_utf8(request.body().unwrap().as_bytes().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn debug_hides_service_account_key() {
        assert!(!format!("{:?}", service_account()).contains("PRIVATE KEY"));
    }

    #[test]
    fn debug_redacts_token() {
        let creds = GoogleCredentials::AccessToken("secret".into());
        assert!(!format!("{creds:?}").contains("secret"));
    }

    #[test]
    fn multipart_body_layout() {
        let body = multipart_body("deck", b"PKDATA");
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with(&format!("--{MULTIPART_BOUNDARY}\r\n")));
        assert!(text.contains(r#""mimeType":"application/vnd.google-apps.presentation""#));
        assert!(text.contains(PPTX_MIME));
        assert!(text.contains("\r\n\r\nPKDATA\r\n"));
        assert!(text.ends_with(&format!("--{MULTIPART_BOUNDARY}--\r\n")));
    }

    #[tokio::test]
    async fn bearer_token_needs_no_exchange() {
        let client = reqwest::Client::new();
        let token = GoogleCredentials::AccessToken("t".into())
            .access_token(&client, &[])
            .await
            .unwrap();
        assert_eq!(token, "t");
    }
}
