//! Session and identity control.
//!
//! A [`SessionContext`] is the mirror of remote state for one signed-in
//! identity. It is built on sign-in or restore, owned by a [`PortalSession`]
//! behind a mutex so operations on one session run one at a time, and dropped
//! on sign-out.

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::backend::{AuthProvider, AuthTokens, RemoteStore};
use crate::learn::catalog;
use crate::learn::types::{
    Category, Course, ExternalResource, Identity, Notification, ProgressMap, ProgressRecord,
};
use crate::learn::views::Navigation;
use crate::learn::LearnError;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionContext {
    pub identity: Option<Identity>,
    pub users: Vec<Identity>,
    pub courses: Vec<Course>,
    pub categories: Vec<Category>,
    pub resources: Vec<ExternalResource>,
    pub notifications: Vec<Notification>,
    pub progress: ProgressMap,
    pub nav: Navigation,
}

impl SessionContext {
    pub fn for_identity(identity: Identity) -> Self {
        let nav = Navigation::landing(identity.role);
        Self {
            identity: Some(identity),
            nav,
            ..Self::default()
        }
    }

    pub fn identity(&self) -> Result<&Identity, LearnError> {
        self.identity
            .as_ref()
            .ok_or_else(|| LearnError::Unauthorized("not signed in".into()))
    }

    pub fn user_id(&self) -> Result<Uuid, LearnError> {
        self.identity().map(|i| i.id)
    }

    pub fn is_admin(&self) -> bool {
        self.identity.as_ref().is_some_and(|i| i.role.is_admin())
    }

    pub fn course(&self, course_id: Uuid) -> Result<&Course, LearnError> {
        self.courses
            .iter()
            .find(|c| c.id == course_id)
            .ok_or_else(|| LearnError::NotFound(format!("course {course_id}")))
    }

    pub fn course_mut(&mut self, course_id: Uuid) -> Result<&mut Course, LearnError> {
        self.courses
            .iter_mut()
            .find(|c| c.id == course_id)
            .ok_or_else(|| LearnError::NotFound(format!("course {course_id}")))
    }

    pub fn my_progress(&self, course_id: Uuid) -> Option<&ProgressRecord> {
        let user_id = self.identity.as_ref()?.id;
        self.progress.get(user_id, course_id)
    }

    /// Mirrors a confirmed point increment into every local copy of the identity.
    pub fn apply_points(&mut self, user_id: Uuid, amount: i64) {
        for user in self.users.iter_mut().filter(|u| u.id == user_id) {
            user.points += amount;
        }
        if let Some(me) = self.identity.as_mut().filter(|i| i.id == user_id) {
            me.points += amount;
        }
    }

    pub fn apply_badges(&mut self, user_id: Uuid, badges: &BTreeSet<String>) {
        for user in self.users.iter_mut().filter(|u| u.id == user_id) {
            user.badges = badges.clone();
        }
        if let Some(me) = self.identity.as_mut().filter(|i| i.id == user_id) {
            me.badges = badges.clone();
        }
    }

    pub fn replace_user(&mut self, updated: &Identity) {
        for user in self.users.iter_mut().filter(|u| u.id == updated.id) {
            *user = updated.clone();
        }
        if let Some(me) = self.identity.as_mut().filter(|i| i.id == updated.id) {
            *me = updated.clone();
        }
    }

    /// Prepends a pushed notification addressed to this identity. Returns
    /// false for duplicates and for rows addressed to someone else.
    pub fn apply_notification(&mut self, notification: Notification) -> bool {
        let Some(me) = self.identity.as_ref() else {
            return false;
        };
        if notification.user_id != me.id || self.notifications.iter().any(|n| n.id == notification.id) {
            return false;
        }
        self.notifications.insert(0, notification);
        true
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    /// Back to the signed-out state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

pub struct PortalSession {
    pub store: Arc<dyn RemoteStore>,
    pub tokens: AuthTokens,
    pub ctx: SessionContext,
    /// Timestamp of the newest notification already delivered.
    pub notification_watermark: Option<DateTime<Utc>>,
}

impl PortalSession {
    pub fn user_id(&self) -> Uuid {
        self.tokens.user_id
    }
}

pub type SharedSession = Arc<Mutex<PortalSession>>;

#[derive(Debug, Clone, Serialize)]
pub struct SignedIn {
    pub session_id: String,
    pub refresh_token: String,
    pub identity: Identity,
}

/// Bookkeeping kept beside each session so lookups never wait on the
/// session's own lock.
struct SessionEntry {
    session: SharedSession,
    refresh_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl SessionEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Absolute expiry of an access token. A zero lifetime means the provider
/// did not say.
fn token_expiry(tokens: &AuthTokens, issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if tokens.expires_in == 0 {
        return None;
    }
    let lifetime = Duration::try_seconds(i64::try_from(tokens.expires_in).ok()?)?;
    issued_at.checked_add_signed(lifetime)
}

pub struct SessionManager {
    auth: Arc<dyn AuthProvider>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            auth,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    /// Live session by id. An expired session is dropped on lookup; the
    /// client re-enters through [`SessionManager::restore`].
    pub async fn get(&self, session_id: &str) -> Option<SharedSession> {
        {
            let sessions = self.sessions.read().await;
            let entry = sessions.get(session_id)?;
            if !entry.is_expired(Utc::now()) {
                return Some(Arc::clone(&entry.session));
            }
        }
        self.drop_sessions(&[session_id.to_string()], "access token expired")
            .await;
        None
    }

    pub async fn all(&self) -> Vec<SharedSession> {
        self.sessions
            .read()
            .await
            .values()
            .map(|entry| Arc::clone(&entry.session))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drops every session whose access token has lapsed by `now`. Returns
    /// how many went.
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        self.drop_sessions(&expired, "access token expired").await
    }

    async fn drop_sessions(&self, ids: &[String], reason: &str) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let removed: Vec<SessionEntry> = {
            let mut sessions = self.sessions.write().await;
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for entry in &removed {
            let mut session = entry.session.lock().await;
            debug!("Dropping session for {}: {}", session.user_id(), reason);
            session.ctx.clear();
        }
        removed.len()
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, LearnError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(LearnError::validation("Email and password are required."));
        }
        let tokens = self.auth.sign_in(email.trim(), password).await?;
        self.establish(tokens).await
    }

    /// Re-enters the app from a stored refresh token. The provider rotates
    /// the token, so the session that held it is retired.
    pub async fn restore(&self, refresh_token: &str) -> Result<SignedIn, LearnError> {
        let tokens = self.auth.refresh(refresh_token).await?;
        let superseded: Vec<String> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.refresh_token == refresh_token)
            .map(|(id, _)| id.clone())
            .collect();
        self.drop_sessions(&superseded, "superseded by restore").await;
        self.establish(tokens).await
    }

    async fn establish(&self, tokens: AuthTokens) -> Result<SignedIn, LearnError> {
        let store = self.auth.store_for(&tokens);

        let profile = match store.fetch_profile().await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                error!("No profile for signed-in user {}", tokens.user_id);
                self.discard_tokens(&tokens).await;
                return Err(LearnError::Unauthorized(
                    "Login failed: Could not retrieve user profile.".into(),
                ));
            }
            Err(e) => {
                error!("Error fetching profile for {}: {}", tokens.user_id, e);
                self.discard_tokens(&tokens).await;
                return Err(LearnError::Unauthorized(
                    "Could not load your profile. Please try logging in again.".into(),
                ));
            }
        };

        if !profile.may_sign_in() {
            info!("Rejected sign-in for unapproved user {}", profile.id);
            self.discard_tokens(&tokens).await;
            return Err(LearnError::PendingApproval);
        }

        let ctx = catalog::load(store.as_ref(), profile.clone()).await?;
        let watermark = ctx.notifications.iter().map(|n| n.timestamp).max();

        let session_id = Uuid::new_v4().to_string();
        let refresh_token = tokens.refresh_token.clone();
        let expires_at = token_expiry(&tokens, Utc::now());
        let session = PortalSession {
            store,
            tokens,
            ctx,
            notification_watermark: watermark,
        };
        self.sessions.write().await.insert(
            session_id.clone(),
            SessionEntry {
                session: Arc::new(Mutex::new(session)),
                refresh_token: refresh_token.clone(),
                expires_at,
            },
        );

        info!("Session started for {} ({})", profile.id, profile.role);
        Ok(SignedIn {
            session_id,
            refresh_token,
            identity: profile,
        })
    }

    async fn discard_tokens(&self, tokens: &AuthTokens) {
        if let Err(e) = self.auth.sign_out(&tokens.access_token).await {
            warn!("Sign-out after rejected session failed: {}", e);
        }
    }

    /// Drops all local state first, then revokes the tokens remotely.
    pub async fn sign_out(&self, session_id: &str) -> Result<(), LearnError> {
        let Some(entry) = self.sessions.write().await.remove(session_id) else {
            return Err(LearnError::Unauthorized("unknown session".into()));
        };
        let access_token = {
            let mut session = entry.session.lock().await;
            session.ctx.clear();
            session.tokens.access_token.clone()
        };
        self.auth.sign_out(&access_token).await?;
        Ok(())
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<(), LearnError> {
        if name.trim().is_empty() || email.trim().is_empty() {
            return Err(LearnError::validation("Name and email are required."));
        }
        check_password(password)?;
        self.auth.sign_up(name.trim(), email.trim(), password).await?;
        info!("Registration submitted for {}", email.trim());
        Ok(())
    }

    pub async fn recover_password(&self, email: &str) -> Result<(), LearnError> {
        if email.trim().is_empty() {
            return Err(LearnError::validation("Email is required."));
        }
        self.auth.recover_password(email.trim()).await?;
        Ok(())
    }

    pub async fn update_password(&self, session_id: &str, password: &str) -> Result<(), LearnError> {
        check_password(password)?;
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| LearnError::Unauthorized("unknown session".into()))?;
        let access_token = session.lock().await.tokens.access_token.clone();
        self.auth.update_password(&access_token, password).await?;
        Ok(())
    }
}

fn check_password(password: &str) -> Result<(), LearnError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(LearnError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long."
        )));
    }
    Ok(())
}
