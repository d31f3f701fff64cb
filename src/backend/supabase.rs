use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use super::{AuthProvider, AuthTokens, BackendError, RemoteStore};
use crate::core::config::BackendConfig;
use crate::learn::types::{
    Category, Course, CourseDraft, DiscussionPost, ExternalResource, Identity, NewResource,
    NewReview, Notification, NotificationType, ProgressPatch, ProgressRecord, Review, UserPatch,
};

const PROGRESS_CONFLICT_KEY: &str = "user_id,course_id";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// REST client for a Supabase project. One instance per identity: the
/// anonymous client carries the anon key as bearer, `store_for` clones it
/// with the identity's access token.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct GoTrueSession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: u64,
    user: GoTrueUser,
}

impl From<GoTrueSession> for AuthTokens {
    fn from(session: GoTrueSession) -> Self {
        Self {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            user_id: session.user.id,
            expires_in: session.expires_in,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ServiceError {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ServiceError {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
    }
}

#[derive(Serialize)]
struct IncrementPoints {
    user_id: Uuid,
    points_to_add: i64,
}

#[derive(Serialize)]
struct CreateNotification<'a> {
    p_user_id: Uuid,
    p_type: NotificationType,
    p_message: &'a str,
}

impl SupabaseClient {
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: None,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(&config.url, &config.anon_key)
    }

    pub fn with_access_token(&self, access_token: &str) -> Self {
        Self {
            access_token: Some(access_token.to_string()),
            ..self.clone()
        }
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ServiceError>(&body)
            .ok()
            .and_then(ServiceError::into_message)
            .unwrap_or_else(|| {
                if body.is_empty() {
                    status.to_string()
                } else {
                    body.clone()
                }
            });
        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendError::Unauthorized(message));
        }
        Err(BackendError::http(status.as_u16(), message))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(), BackendError> {
        Self::check(request.send().await?).await?;
        Ok(())
    }

    /// Single row out of a `return=representation` write.
    async fn fetch_one<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, BackendError> {
        let rows: Vec<T> = self
            .fetch(request.header("Prefer", "return=representation"))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(what.to_string()))
    }

    async fn rpc<B: Serialize + ?Sized>(&self, function: &str, body: &B) -> Result<(), BackendError> {
        let url = self.rest_url(&format!("rpc/{function}"));
        self.execute(self.request(Method::POST, url).json(body)).await
    }

    async fn token(&self, grant_type: &str, body: serde_json::Value) -> Result<AuthTokens, BackendError> {
        let url = self.auth_url(&format!("token?grant_type={grant_type}"));
        let session: GoTrueSession = self
            .fetch(
                self.client
                    .post(url)
                    .header("apikey", &self.anon_key)
                    .json(&body),
            )
            .await?;
        Ok(session.into())
    }
}

#[async_trait]
impl RemoteStore for SupabaseClient {
    async fn fetch_profile(&self) -> Result<Option<Identity>, BackendError> {
        let url = self.rest_url("rpc/get_user_profile");
        let response = self
            .request(Method::POST, url)
            .header("Accept", SINGLE_OBJECT)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        // PostgREST answers 406 when the single-object query matched no row.
        if response.status() == StatusCode::NOT_ACCEPTABLE {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        Ok(Some(response.json::<Identity>().await?))
    }

    async fn list_users(&self) -> Result<Vec<Identity>, BackendError> {
        self.fetch(self.request(Method::GET, self.rest_url("users?select=*")))
            .await
    }

    async fn list_courses(&self) -> Result<Vec<Course>, BackendError> {
        let url = self.rest_url("courses?select=*,reviews(*)&order=created_at.desc");
        self.fetch(self.request(Method::GET, url)).await
    }

    async fn list_featured_courses(&self, limit: usize) -> Result<Vec<Course>, BackendError> {
        let url = self.rest_url(&format!("courses?select=*&order=created_at.desc&limit={limit}"));
        self.fetch(self.request(Method::GET, url)).await
    }

    async fn list_categories(&self) -> Result<Vec<Category>, BackendError> {
        let url = self.rest_url("course_categories?select=*&order=name.asc");
        self.fetch(self.request(Method::GET, url)).await
    }

    async fn list_resources(&self) -> Result<Vec<ExternalResource>, BackendError> {
        let url = self.rest_url("external_resources?select=*&order=created_at.desc");
        self.fetch(self.request(Method::GET, url)).await
    }

    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, BackendError> {
        let url = self.rest_url(&format!(
            "notifications?select=*&user_id=eq.{user_id}&order=timestamp.desc"
        ));
        self.fetch(self.request(Method::GET, url)).await
    }

    async fn notifications_since(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, BackendError> {
        let mut path = format!("notifications?select=*&user_id=eq.{user_id}&order=timestamp.asc");
        if let Some(since) = since {
            path.push_str(&format!(
                "&timestamp=gte.{}",
                urlencoding::encode(&since.to_rfc3339())
            ));
        }
        self.fetch(self.request(Method::GET, self.rest_url(&path)))
            .await
    }

    async fn list_progress(&self, user_id: Option<Uuid>) -> Result<Vec<ProgressRecord>, BackendError> {
        let path = match user_id {
            Some(id) => format!("user_progress?select=*&user_id=eq.{id}"),
            None => "user_progress?select=*".to_string(),
        };
        self.fetch(self.request(Method::GET, self.rest_url(&path)))
            .await
    }

    async fn upsert_progress(&self, patch: &ProgressPatch) -> Result<ProgressRecord, BackendError> {
        let url = self.rest_url(&format!("user_progress?on_conflict={PROGRESS_CONFLICT_KEY}"));
        let rows: Vec<ProgressRecord> = self
            .fetch(
                self.request(Method::POST, url)
                    .header("Prefer", "resolution=merge-duplicates,return=representation")
                    .json(patch),
            )
            .await?;
        rows.into_iter().next().ok_or_else(|| {
            error!(
                "Progress upsert for {}/{} returned no row",
                patch.user_id, patch.course_id
            );
            BackendError::Decode("progress upsert returned no row".into())
        })
    }

    async fn increment_points(&self, user_id: Uuid, amount: i64) -> Result<(), BackendError> {
        self.rpc(
            "increment_points",
            &IncrementPoints {
                user_id,
                points_to_add: amount,
            },
        )
        .await
    }

    async fn replace_badges(&self, user_id: Uuid, badges: &BTreeSet<String>) -> Result<(), BackendError> {
        let url = self.rest_url(&format!("users?id=eq.{user_id}"));
        self.execute(
            self.request(Method::PATCH, url)
                .json(&serde_json::json!({ "badges": badges })),
        )
        .await
    }

    async fn create_notification(
        &self,
        user_id: Uuid,
        kind: NotificationType,
        message: &str,
    ) -> Result<(), BackendError> {
        self.rpc(
            "create_notification",
            &CreateNotification {
                p_user_id: user_id,
                p_type: kind,
                p_message: message,
            },
        )
        .await
    }

    async fn mark_notifications_read(&self, ids: &[Uuid]) -> Result<(), BackendError> {
        if ids.is_empty() {
            return Ok(());
        }
        let list = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
        let url = self.rest_url(&format!("notifications?id=in.({list})"));
        self.execute(
            self.request(Method::PATCH, url)
                .json(&serde_json::json!({ "read": true })),
        )
        .await
    }

    async fn insert_review(&self, review: &NewReview) -> Result<Review, BackendError> {
        let mut body = serde_json::to_value(review)?;
        body["timestamp"] = serde_json::json!(Utc::now());
        let request = self
            .request(Method::POST, self.rest_url("reviews"))
            .json(&body);
        self.fetch_one(request, "inserted review").await
    }

    async fn insert_course(&self, draft: &CourseDraft) -> Result<Course, BackendError> {
        let request = self
            .request(Method::POST, self.rest_url("courses"))
            .json(draft);
        self.fetch_one(request, "inserted course").await
    }

    async fn update_course(&self, course_id: Uuid, draft: &CourseDraft) -> Result<Course, BackendError> {
        let url = self.rest_url(&format!("courses?id=eq.{course_id}&select=*,reviews(*)"));
        let request = self.request(Method::PATCH, url).json(draft);
        self.fetch_one(request, &format!("course {course_id}")).await
    }

    async fn update_discussion(
        &self,
        course_id: Uuid,
        discussion: &[DiscussionPost],
    ) -> Result<(), BackendError> {
        let url = self.rest_url(&format!("courses?id=eq.{course_id}"));
        self.execute(
            self.request(Method::PATCH, url)
                .json(&serde_json::json!({ "discussion": discussion })),
        )
        .await
    }

    async fn delete_course(&self, course_id: Uuid) -> Result<(), BackendError> {
        let url = self.rest_url(&format!("courses?id=eq.{course_id}"));
        self.execute(self.request(Method::DELETE, url)).await
    }

    async fn rename_course_category(&self, from: &str, to: &str) -> Result<(), BackendError> {
        let url = self.rest_url(&format!("courses?category=eq.{}", urlencoding::encode(from)));
        self.execute(
            self.request(Method::PATCH, url)
                .json(&serde_json::json!({ "category": to })),
        )
        .await
    }

    async fn update_user(&self, user_id: Uuid, patch: &UserPatch) -> Result<Identity, BackendError> {
        let url = self.rest_url(&format!("users?id=eq.{user_id}"));
        let request = self.request(Method::PATCH, url).json(patch);
        self.fetch_one(request, &format!("user {user_id}")).await
    }

    async fn insert_category(&self, name: &str) -> Result<Category, BackendError> {
        let request = self
            .request(Method::POST, self.rest_url("course_categories"))
            .json(&serde_json::json!({ "name": name }));
        self.fetch_one(request, "inserted category").await
    }

    async fn update_category(&self, category_id: Uuid, name: &str) -> Result<Category, BackendError> {
        let url = self.rest_url(&format!("course_categories?id=eq.{category_id}"));
        let request = self
            .request(Method::PATCH, url)
            .json(&serde_json::json!({ "name": name }));
        self.fetch_one(request, &format!("category {category_id}")).await
    }

    async fn delete_category(&self, category_id: Uuid) -> Result<(), BackendError> {
        let url = self.rest_url(&format!("course_categories?id=eq.{category_id}"));
        self.execute(self.request(Method::DELETE, url)).await
    }

    async fn insert_resource(&self, resource: &NewResource) -> Result<ExternalResource, BackendError> {
        let request = self
            .request(Method::POST, self.rest_url("external_resources"))
            .json(resource);
        self.fetch_one(request, "inserted resource").await
    }

    async fn delete_resource(&self, resource_id: Uuid) -> Result<(), BackendError> {
        let url = self.rest_url(&format!("external_resources?id=eq.{resource_id}"));
        self.execute(self.request(Method::DELETE, url)).await
    }

    async fn remove_assets(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        if paths.is_empty() {
            return Ok(());
        }
        debug!("Removing {} stored assets from {}", paths.len(), bucket);
        let url = format!("{}/storage/v1/object/{}", self.base_url, bucket);
        self.execute(
            self.request(Method::DELETE, url)
                .json(&serde_json::json!({ "prefixes": paths })),
        )
        .await
    }
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthTokens, BackendError> {
        self.token(
            "password",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, BackendError> {
        self.token(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": { "name": name }
            }));
        self.execute(request).await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token);
        self.execute(request).await
    }

    async fn recover_password(&self, email: &str) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.auth_url("recover"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email }));
        self.execute(request).await
    }

    async fn update_password(&self, access_token: &str, password: &str) -> Result<(), BackendError> {
        let request = self
            .client
            .put(self.auth_url("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "password": password }));
        self.execute(request).await
    }

    fn store_for(&self, tokens: &AuthTokens) -> Arc<dyn RemoteStore> {
        Arc::new(self.with_access_token(&tokens.access_token))
    }

    fn anonymous_store(&self) -> Arc<dyn RemoteStore> {
        Arc::new(Self {
            access_token: None,
            ..self.clone()
        })
    }
}
