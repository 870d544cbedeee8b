//! X (Twitter) API client
//!
//! Reads go through the v2 API with the app bearer token. Writes use OAuth 1.0a
//! user context: v2 for new posts, v1.1 for re-shares and the media upload
//! host. Responses are decoded into typed structs here and validated into
//! [`Post`]/[`Attachment`] before they leave the module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ApiConfig, Credentials};
use crate::error::{PlatformError, Result};
use crate::platforms::oauth::OAuth1Signer;
use crate::platforms::{MediaSource, PlatformResult, ReadApi, WriteApi};
use crate::types::{Attachment, Batch, MediaKind, Post};

/// Smallest page the timeline endpoint accepts
const API_MIN_RESULTS: usize = 5;
const API_MAX_RESULTS: usize = 100;
/// Segment size for chunked uploads
const UPLOAD_CHUNK_SIZE: usize = 4 * 1024 * 1024;
const MAX_STATUS_POLLS: u32 = 30;
const ERROR_BODY_SNIPPET: usize = 300;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiProblem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl ApiProblem {
    fn describe(&self) -> String {
        match (&self.title, &self.detail) {
            (_, Some(detail)) => detail.clone(),
            (Some(title), None) => title.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    #[serde(default)]
    data: Option<UserData>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    data: Vec<TweetData>,
    #[serde(default)]
    includes: Option<Includes>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    attachments: Option<TweetAttachments>,
}

#[derive(Debug, Deserialize, Default)]
struct TweetAttachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Includes {
    #[serde(default)]
    media: Vec<MediaData>,
}

#[derive(Debug, Deserialize)]
struct MediaData {
    media_key: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    variants: Vec<MediaVariant>,
}

#[derive(Debug, Deserialize)]
struct MediaVariant {
    #[serde(default)]
    bit_rate: Option<u64>,
    content_type: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct CreatePostResponse {
    data: CreatedPost,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    media_id_string: String,
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

#[derive(Debug, Deserialize)]
struct ProcessingInfo {
    state: String,
    #[serde(default)]
    check_after_secs: Option<u64>,
    #[serde(default)]
    error: Option<ProcessingError>,
}

#[derive(Debug, Deserialize)]
struct ProcessingError {
    #[serde(default)]
    message: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

pub struct XClient {
    http: Client,
    api_base: String,
    upload_base: String,
    bearer: SecretString,
    signer: OAuth1Signer,
}

impl XClient {
    /// Create a client from API settings and credentials
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &ApiConfig, credentials: Credentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("newsrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let Credentials {
            bearer_token,
            api_key,
            api_secret,
            access_token,
            access_secret,
        } = credentials;

        Ok(Self {
            http,
            api_base: config.base_url.trim_end_matches('/').to_string(),
            upload_base: config.upload_url.trim_end_matches('/').to_string(),
            bearer: bearer_token,
            signer: OAuth1Signer::new(api_key, api_secret, access_token, access_secret),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn upload_url(&self) -> String {
        format!("{}/1.1/media/upload.json", self.upload_base)
    }

    async fn upload_simple(&self, bytes: Vec<u8>, kind: MediaKind) -> PlatformResult<String> {
        let url = self.upload_url();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(format!("media.{}", kind.extension()))
            .mime_str(kind.mime_type())
            .map_err(|e| PlatformError::Decode(format!("Invalid media type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("media", part);

        let auth = self.signer.authorization_header("POST", &url, &[])?;
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, auth)
            .multipart(form)
            .send()
            .await
            .map_err(|e| network_error(e, "media upload"))?;
        let uploaded: UploadResponse = decode(check_status(response, "media upload").await?).await?;
        Ok(uploaded.media_id_string)
    }

    async fn upload_chunked(&self, bytes: Vec<u8>, kind: MediaKind) -> PlatformResult<String> {
        let url = self.upload_url();
        let total_bytes = bytes.len().to_string();

        // INIT
        let init_params = [
            ("command", "INIT"),
            ("total_bytes", total_bytes.as_str()),
            ("media_type", kind.mime_type()),
            ("media_category", kind.media_category()),
        ];
        let auth = self.signer.authorization_header("POST", &url, &init_params)?;
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, auth)
            .form(&init_params)
            .send()
            .await
            .map_err(|e| network_error(e, "media upload INIT"))?;
        let init: UploadResponse = decode(check_status(response, "media upload INIT").await?).await?;
        let media_id = init.media_id_string;

        // APPEND
        for (index, chunk) in bytes.chunks(UPLOAD_CHUNK_SIZE).enumerate() {
            let part = reqwest::multipart::Part::bytes(chunk.to_vec())
                .file_name("chunk")
                .mime_str("application/octet-stream")
                .map_err(|e| PlatformError::Decode(format!("Invalid media type: {}", e)))?;
            let form = reqwest::multipart::Form::new()
                .text("command", "APPEND")
                .text("media_id", media_id.clone())
                .text("segment_index", index.to_string())
                .part("media", part);

            let auth = self.signer.authorization_header("POST", &url, &[])?;
            let response = self
                .http
                .post(&url)
                .header(AUTHORIZATION, auth)
                .multipart(form)
                .send()
                .await
                .map_err(|e| network_error(e, "media upload APPEND"))?;
            check_status(response, "media upload APPEND").await?;
        }

        // FINALIZE
        let finalize_params = [("command", "FINALIZE"), ("media_id", media_id.as_str())];
        let auth = self
            .signer
            .authorization_header("POST", &url, &finalize_params)?;
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, auth)
            .form(&finalize_params)
            .send()
            .await
            .map_err(|e| network_error(e, "media upload FINALIZE"))?;
        let finalized: UploadResponse =
            decode(check_status(response, "media upload FINALIZE").await?).await?;

        if let Some(info) = finalized.processing_info {
            self.wait_for_processing(&media_id, info).await?;
        }
        Ok(media_id)
    }

    /// Poll STATUS until the uploaded media finished processing
    async fn wait_for_processing(
        &self,
        media_id: &str,
        mut info: ProcessingInfo,
    ) -> PlatformResult<()> {
        let url = self.upload_url();
        for _ in 0..MAX_STATUS_POLLS {
            match info.state.as_str() {
                "succeeded" => return Ok(()),
                "failed" => {
                    let message = info
                        .error
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "processing failed".to_string());
                    return Err(PlatformError::Api {
                        status: 400,
                        message: format!("Media {} {}", media_id, message),
                    });
                }
                _ => {}
            }

            let wait = info.check_after_secs.unwrap_or(1);
            debug!("Media {} is {}, checking again in {}s", media_id, info.state, wait);
            tokio::time::sleep(Duration::from_secs(wait)).await;

            let query = [("command", "STATUS"), ("media_id", media_id)];
            let auth = self.signer.authorization_header("GET", &url, &query)?;
            let response = self
                .http
                .get(&url)
                .header(AUTHORIZATION, auth)
                .query(&query)
                .send()
                .await
                .map_err(|e| network_error(e, "media upload STATUS"))?;
            let status: UploadResponse =
                decode(check_status(response, "media upload STATUS").await?).await?;
            match status.processing_info {
                Some(next) => info = next,
                None => return Ok(()),
            }
        }

        Err(PlatformError::Network(format!(
            "Media {} still processing after {} status checks",
            media_id, MAX_STATUS_POLLS
        )))
    }
}

#[async_trait]
impl ReadApi for XClient {
    async fn lookup_account(&self, handle: &str) -> PlatformResult<String> {
        let url = self.api_url(&format!("2/users/by/username/{}", handle));
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.bearer.expose_secret())
            .send()
            .await
            .map_err(|e| network_error(e, "user lookup"))?;

        let body: UserResponse = decode(check_status(response, "user lookup").await?).await?;
        match body.data {
            Some(user) => Ok(user.id),
            None => {
                let reason = body
                    .errors
                    .first()
                    .map(ApiProblem::describe)
                    .unwrap_or_else(|| "no user data".to_string());
                Err(PlatformError::NotFound(format!("@{}: {}", handle, reason)))
            }
        }
    }

    async fn recent_posts(
        &self,
        account_id: &str,
        since_id: Option<&str>,
        limit: usize,
    ) -> PlatformResult<Batch> {
        let url = self.api_url(&format!("2/users/{}/tweets", account_id));
        let max_results = limit.clamp(API_MIN_RESULTS, API_MAX_RESULTS).to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("max_results", max_results.as_str()),
            ("tweet.fields", "created_at,text,attachments"),
            ("expansions", "attachments.media_keys"),
            ("media.fields", "url,type,variants,preview_image_url"),
        ];
        if let Some(since) = since_id {
            query.push(("since_id", since));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.bearer.expose_secret())
            .query(&query)
            .send()
            .await
            .map_err(|e| network_error(e, "timeline fetch"))?;

        let body: TimelineResponse = decode(check_status(response, "timeline fetch").await?).await?;
        // Suspended and deleted accounts answer 200 with only an errors array
        if body.data.is_empty() {
            if let Some(problem) = body.errors.first() {
                return Err(PlatformError::NotFound(format!(
                    "account {}: {}",
                    account_id,
                    problem.describe()
                )));
            }
        }
        Ok(into_batch(body, limit))
    }
}

#[async_trait]
impl WriteApi for XClient {
    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        kind: MediaKind,
        chunked: bool,
    ) -> PlatformResult<String> {
        debug!("Uploading {} bytes of {} (chunked: {})", bytes.len(), kind, chunked);
        if chunked {
            self.upload_chunked(bytes, kind).await
        } else {
            self.upload_simple(bytes, kind).await
        }
    }

    async fn publish(&self, text: &str, media_ids: &[String]) -> PlatformResult<String> {
        let url = self.api_url("2/tweets");
        let mut body = serde_json::json!({ "text": text });
        if !media_ids.is_empty() {
            body["media"] = serde_json::json!({ "media_ids": media_ids });
        }

        let auth = self.signer.authorization_header("POST", &url, &[])?;
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, auth)
            .json(&body)
            .send()
            .await
            .map_err(|e| network_error(e, "publish"))?;

        let created: CreatePostResponse = decode(check_status(response, "publish").await?).await?;
        Ok(created.data.id)
    }

    async fn reshare(&self, post_id: &str) -> PlatformResult<()> {
        let url = self.api_url(&format!("1.1/statuses/retweet/{}.json", post_id));
        let auth = self.signer.authorization_header("POST", &url, &[])?;
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| network_error(e, "reshare"))?;
        check_status(response, "reshare").await?;
        Ok(())
    }
}

#[async_trait]
impl MediaSource for XClient {
    async fn fetch_bytes(&self, url: &str) -> PlatformResult<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(e, "media download"))?;
        let response = check_status(response, "media download").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| network_error(e, "media download"))?;
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// Response handling
// ============================================================================

fn network_error(error: reqwest::Error, context: &str) -> PlatformError {
    PlatformError::Network(format!("{} request failed: {}", context, error))
}

/// Map non-success HTTP statuses onto platform errors
async fn check_status(response: Response, context: &str) -> PlatformResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let reset = response
        .headers()
        .get("x-rate-limit-reset")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(ERROR_BODY_SNIPPET).collect();

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => PlatformError::RateLimit(match reset {
            Some(reset) => format!("{} throttled, window resets at {}", context, reset),
            None => format!("{} throttled", context),
        }),
        StatusCode::NOT_FOUND => PlatformError::NotFound(format!("{}: {}", context, snippet)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            PlatformError::Authentication(format!("{} rejected ({}): {}", context, status, snippet))
        }
        _ => PlatformError::Api {
            status: status.as_u16(),
            message: format!("{}: {}", context, snippet),
        },
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> PlatformResult<T> {
    let body = response
        .text()
        .await
        .map_err(|e| PlatformError::Network(format!("Failed to read response body: {}", e)))?;
    serde_json::from_str(&body).map_err(|e| {
        let snippet: String = body.chars().take(ERROR_BODY_SNIPPET).collect();
        PlatformError::Decode(format!("{} (body: {})", e, snippet))
    })
}

/// Validate the wire response into a batch, keeping the newest `limit` posts
fn into_batch(body: TimelineResponse, limit: usize) -> Batch {
    let mut posts = Vec::with_capacity(body.data.len());
    for tweet in body.data {
        let created_at = match tweet.created_at.as_deref().map(DateTime::parse_from_rfc3339) {
            Some(Ok(ts)) => ts.with_timezone(&Utc),
            Some(Err(e)) => {
                warn!("Dropping post {}: invalid created_at: {}", tweet.id, e);
                continue;
            }
            None => {
                warn!("Dropping post {}: response has no created_at", tweet.id);
                continue;
            }
        };
        posts.push(Post {
            id: tweet.id,
            text: tweet.text,
            created_at,
            attachment_keys: tweet.attachments.unwrap_or_default().media_keys,
        });
    }

    posts.sort_by(|a, b| crate::types::compare_ids(&b.id, &a.id));
    posts.truncate(limit);

    let mut attachments = HashMap::new();
    for media in body.includes.unwrap_or_default().media {
        let Some(kind) = MediaKind::from_api_str(&media.kind) else {
            debug!("Ignoring media {} of unsupported type {}", media.media_key, media.kind);
            continue;
        };
        let url = match kind {
            MediaKind::Photo => media.url,
            MediaKind::Video | MediaKind::AnimatedGif => best_mp4_variant(&media.variants),
        };
        attachments.insert(
            media.media_key.clone(),
            Attachment {
                key: media.media_key,
                kind,
                url,
            },
        );
    }

    Batch { posts, attachments }
}

fn best_mp4_variant(variants: &[MediaVariant]) -> Option<String> {
    variants
        .iter()
        .filter(|v| v.content_type == "video/mp4")
        .max_by_key(|v| v.bit_rate.unwrap_or(0))
        .map(|v| v.url.clone())
}
