//! Boundary to the hosted backend service: relational tables, RPC functions,
//! password auth and asset storage.
//!
//! Everything the portal persists goes through [`RemoteStore`]; sign-in and
//! account management go through [`AuthProvider`], which also hands out
//! stores scoped to one signed-in identity.

pub mod memory;
#[cfg(feature = "supabase")]
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::learn::types::{
    Category, Course, CourseDraft, DiscussionPost, ExternalResource, Identity, NewResource,
    NewReview, Notification, NotificationType, ProgressPatch, ProgressRecord, Review, UserPatch,
};

pub use memory::InMemoryStore;
#[cfg(feature = "supabase")]
pub use supabase::SupabaseClient;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl BackendError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }
}

#[cfg(feature = "supabase")]
impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::http(status.as_u16(), err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: Uuid,
    #[serde(default)]
    pub expires_in: u64,
}

/// Table and RPC access as seen by one caller.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Profile row of the caller, via the `get_user_profile` RPC.
    async fn fetch_profile(&self) -> Result<Option<Identity>, BackendError>;
    async fn list_users(&self) -> Result<Vec<Identity>, BackendError>;
    /// Courses with their reviews embedded, newest first.
    async fn list_courses(&self) -> Result<Vec<Course>, BackendError>;
    async fn list_featured_courses(&self, limit: usize) -> Result<Vec<Course>, BackendError>;
    async fn list_categories(&self) -> Result<Vec<Category>, BackendError>;
    async fn list_resources(&self) -> Result<Vec<ExternalResource>, BackendError>;
    /// Newest first.
    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, BackendError>;
    /// Rows stamped at or after `since`, oldest first.
    async fn notifications_since(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, BackendError>;
    /// All rows when `user_id` is `None`.
    async fn list_progress(&self, user_id: Option<Uuid>) -> Result<Vec<ProgressRecord>, BackendError>;

    /// Upsert on (user_id, course_id); only fields set on the patch are written.
    async fn upsert_progress(&self, patch: &ProgressPatch) -> Result<ProgressRecord, BackendError>;
    /// Server-side atomic `points = points + amount`.
    async fn increment_points(&self, user_id: Uuid, amount: i64) -> Result<(), BackendError>;
    async fn replace_badges(&self, user_id: Uuid, badges: &BTreeSet<String>) -> Result<(), BackendError>;
    /// Runs with elevated privilege so administrators can target anyone.
    async fn create_notification(
        &self,
        user_id: Uuid,
        kind: NotificationType,
        message: &str,
    ) -> Result<(), BackendError>;
    async fn mark_notifications_read(&self, ids: &[Uuid]) -> Result<(), BackendError>;
    async fn insert_review(&self, review: &NewReview) -> Result<Review, BackendError>;

    async fn insert_course(&self, draft: &CourseDraft) -> Result<Course, BackendError>;
    async fn update_course(&self, course_id: Uuid, draft: &CourseDraft) -> Result<Course, BackendError>;
    async fn update_discussion(
        &self,
        course_id: Uuid,
        discussion: &[DiscussionPost],
    ) -> Result<(), BackendError>;
    async fn delete_course(&self, course_id: Uuid) -> Result<(), BackendError>;
    async fn rename_course_category(&self, from: &str, to: &str) -> Result<(), BackendError>;

    async fn update_user(&self, user_id: Uuid, patch: &UserPatch) -> Result<Identity, BackendError>;

    async fn insert_category(&self, name: &str) -> Result<Category, BackendError>;
    async fn update_category(&self, category_id: Uuid, name: &str) -> Result<Category, BackendError>;
    async fn delete_category(&self, category_id: Uuid) -> Result<(), BackendError>;

    async fn insert_resource(&self, resource: &NewResource) -> Result<ExternalResource, BackendError>;
    async fn delete_resource(&self, resource_id: Uuid) -> Result<(), BackendError>;

    /// Deletes objects from a storage bucket. `paths` are bucket-relative.
    async fn remove_assets(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthTokens, BackendError>;
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, BackendError>;
    /// Creates the account; the profile row starts unapproved.
    async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<(), BackendError>;
    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError>;
    async fn recover_password(&self, email: &str) -> Result<(), BackendError>;
    async fn update_password(&self, access_token: &str, password: &str) -> Result<(), BackendError>;

    /// Store acting as the identity the tokens belong to.
    fn store_for(&self, tokens: &AuthTokens) -> Arc<dyn RemoteStore>;
    /// Store acting with the public key only.
    fn anonymous_store(&self) -> Arc<dyn RemoteStore>;
}

/// Bucket-relative object path of a public storage URL, if it points into `bucket`.
pub fn storage_path_from_url(url: &str, bucket: &str) -> Option<String> {
    let marker = format!("/storage/v1/object/public/{bucket}/");
    let idx = url.find(&marker)?;
    let raw = url[idx + marker.len()..].split(['?', '#']).next()?;
    if raw.is_empty() {
        return None;
    }
    urlencoding::decode(raw).ok().map(|p| p.into_owned())
}

/// Public URL of an object stored in `bucket`.
pub fn public_object_url(base_url: &str, bucket: &str, path: &str) -> String {
    format!(
        "{}/storage/v1/object/public/{}/{}",
        base_url.trim_end_matches('/'),
        bucket,
        path.trim_start_matches('/')
    )
}
