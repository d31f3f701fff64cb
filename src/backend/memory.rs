//! In-process stand-in for the hosted backend.
//!
//! Mirrors the semantics the portal relies on: unique (user, course) progress
//! upserts with partial fields, atomic point increments, server-assigned
//! review ids and timestamps, and notification inserts that show up through
//! [`RemoteStore::notifications_since`]. Any operation can be made to fail with
//! [`InMemoryStore::fail_on`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};
use uuid::Uuid;

use super::{AuthProvider, AuthTokens, BackendError, RemoteStore};
use crate::learn::types::{
    Category, Course, CourseDraft, DiscussionPost, ExternalResource, Identity, Module,
    ModuleKind, NewResource, NewReview, Notification, NotificationType, ProgressPatch,
    ProgressRecord, QuizQuestion, Review, Role, UserPatch,
};

#[derive(Default)]
struct Db {
    users: HashMap<Uuid, Identity>,
    credentials: HashMap<String, (Uuid, String)>,
    access_tokens: HashMap<String, Uuid>,
    refresh_tokens: HashMap<String, Uuid>,
    courses: Vec<Course>,
    reviews: Vec<Review>,
    categories: Vec<Category>,
    resources: Vec<ExternalResource>,
    notifications: Vec<Notification>,
    progress: HashMap<(Uuid, Uuid), ProgressRecord>,
    assets: BTreeSet<String>,
    /// op name -> successful calls left before it starts failing
    failures: HashMap<String, usize>,
    calls: Vec<String>,
    /// Access token lifetime in seconds; `None` is one hour.
    token_lifetime: Option<u64>,
}

impl Db {
    fn course_with_reviews(&self, course: &Course) -> Course {
        let mut course = course.clone();
        course.reviews = self
            .reviews
            .iter()
            .filter(|r| r.course_id == course.id)
            .cloned()
            .collect();
        course
    }

    fn issue_tokens(&mut self, user_id: Uuid) -> AuthTokens {
        let access_token = format!("mem-access-{}", Uuid::new_v4());
        let refresh_token = format!("mem-refresh-{}", Uuid::new_v4());
        self.access_tokens.insert(access_token.clone(), user_id);
        self.refresh_tokens.insert(refresh_token.clone(), user_id);
        AuthTokens {
            access_token,
            refresh_token,
            user_id,
            expires_in: self.token_lifetime.unwrap_or(3600),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    db: Arc<RwLock<Db>>,
    caller: Option<Uuid>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same data, acting as `user_id`.
    pub fn as_user(&self, user_id: Uuid) -> Self {
        Self {
            db: Arc::clone(&self.db),
            caller: Some(user_id),
        }
    }

    /// Makes every later call of the named operation fail with HTTP 500.
    pub async fn fail_on(&self, op: &str) {
        self.fail_after(op, 0).await;
    }

    /// Lets `successes` more calls of `op` through, then fails the rest.
    pub async fn fail_after(&self, op: &str, successes: usize) {
        self.db
            .write()
            .await
            .failures
            .insert(op.to_string(), successes);
    }

    pub async fn clear_failures(&self) {
        self.db.write().await.failures.clear();
    }

    /// Lifetime reported for tokens issued from now on.
    pub async fn set_token_lifetime(&self, seconds: u64) {
        self.db.write().await.token_lifetime = Some(seconds);
    }

    /// Names of the operations invoked so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.db.read().await.calls.clone()
    }

    pub async fn seed_user(&self, identity: Identity, password: &str) {
        let mut db = self.db.write().await;
        db.credentials.insert(
            identity.email.to_lowercase(),
            (identity.id, password.to_string()),
        );
        db.users.insert(identity.id, identity);
    }

    pub async fn seed_course(&self, course: Course) {
        let mut db = self.db.write().await;
        db.reviews.extend(course.reviews.iter().cloned());
        db.courses.push(course);
    }

    pub async fn seed_progress(&self, record: ProgressRecord) {
        self.db
            .write()
            .await
            .progress
            .insert((record.user_id, record.course_id), record);
    }

    pub async fn seed_category(&self, name: &str) -> Category {
        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.db.write().await.categories.push(category.clone());
        category
    }

    /// Stored object, keyed `<bucket>/<path>`.
    pub async fn seed_asset(&self, bucket: &str, path: &str) {
        self.db
            .write()
            .await
            .assets
            .insert(format!("{bucket}/{path}"));
    }

    pub async fn user(&self, user_id: Uuid) -> Option<Identity> {
        self.db.read().await.users.get(&user_id).cloned()
    }

    pub async fn progress(&self, user_id: Uuid, course_id: Uuid) -> Option<ProgressRecord> {
        self.db.read().await.progress.get(&(user_id, course_id)).cloned()
    }

    pub async fn notifications_for(&self, user_id: Uuid) -> Vec<Notification> {
        self.db
            .read()
            .await
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn reviews(&self) -> Vec<Review> {
        self.db.read().await.reviews.clone()
    }

    pub async fn assets(&self) -> BTreeSet<String> {
        self.db.read().await.assets.clone()
    }

    pub async fn course(&self, course_id: Uuid) -> Option<Course> {
        let db = self.db.read().await;
        db.courses
            .iter()
            .find(|c| c.id == course_id)
            .map(|c| db.course_with_reviews(c))
    }

    /// Demo data for `backend.kind = memory`: one administrator, one approved
    /// learner, a category and a short course.
    pub async fn seed_demo(&self) {
        let admin = Identity {
            id: Uuid::new_v4(),
            name: "Portal Admin".to_string(),
            email: "admin@learnportal.local".to_string(),
            role: Role::Administrator,
            approved: true,
            points: 0,
            badges: BTreeSet::new(),
            profile_image_url: None,
        };
        let learner = Identity {
            id: Uuid::new_v4(),
            name: "Demo Learner".to_string(),
            email: "learner@learnportal.local".to_string(),
            role: Role::Learner,
            ..admin.clone()
        };
        self.seed_user(admin.clone(), "admin123").await;
        self.seed_user(learner.clone(), "learner123").await;
        let category = self.seed_category("Compliance").await;

        let id = Uuid::new_v4();
        self.seed_course(Course {
            id,
            title: "Workplace Safety Basics".to_string(),
            description: "Spotting hazards and reporting them.".to_string(),
            category: category.name,
            modules: vec![
                Module {
                    id: format!("m-{}-1", id.simple()),
                    title: "Why safety matters".to_string(),
                    kind: ModuleKind::Text,
                    content: "Most incidents are preventable.".to_string(),
                    video_source: None,
                },
                Module {
                    id: format!("m-{}-2", id.simple()),
                    title: "Reporting a hazard".to_string(),
                    kind: ModuleKind::Text,
                    content: "Tell your supervisor and log it the same day.".to_string(),
                    video_source: None,
                },
            ],
            quiz: vec![QuizQuestion {
                question: "When should a hazard be logged?".to_string(),
                options: vec![
                    "Next week".to_string(),
                    "The same day".to_string(),
                    "Never".to_string(),
                ],
                correct_answer: 1,
            }],
            passing_score: 70,
            image_url: None,
            reviews: Vec::new(),
            discussion: Vec::new(),
            textbook_url: None,
            textbook_name: None,
            created_at: Some(Utc::now()),
        })
        .await;

        info!(
            "Demo accounts: {} / admin123, {} / learner123",
            admin.email, learner.email
        );
    }

    async fn begin(&self, op: &str) -> Result<RwLockWriteGuard<'_, Db>, BackendError> {
        let mut db = self.db.write().await;
        db.calls.push(op.to_string());
        if let Some(remaining) = db.failures.get_mut(op) {
            if *remaining == 0 {
                debug!("Injected failure for {}", op);
                return Err(BackendError::http(500, format!("injected failure in {op}")));
            }
            *remaining -= 1;
        }
        Ok(db)
    }
}

fn course_from_draft(id: Uuid, draft: &CourseDraft) -> Result<Course, BackendError> {
    let passing_score = u8::try_from(draft.passing_score)
        .ok()
        .filter(|s| *s <= 100)
        .ok_or_else(|| BackendError::http(400, "passing_score must be between 0 and 100"))?;
    Ok(Course {
        id,
        title: draft.title.clone(),
        description: draft.description.clone(),
        category: draft.category.clone(),
        modules: draft.modules.clone(),
        quiz: draft.quiz.clone(),
        passing_score,
        image_url: draft.image_url.clone(),
        reviews: Vec::new(),
        discussion: Vec::new(),
        textbook_url: draft.textbook_url.clone(),
        textbook_name: draft.textbook_name.clone(),
        created_at: Some(Utc::now()),
    })
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn fetch_profile(&self) -> Result<Option<Identity>, BackendError> {
        let db = self.begin("fetch_profile").await?;
        let caller = self
            .caller
            .ok_or_else(|| BackendError::Unauthorized("no signed-in caller".into()))?;
        Ok(db.users.get(&caller).cloned())
    }

    async fn list_users(&self) -> Result<Vec<Identity>, BackendError> {
        let db = self.begin("list_users").await?;
        let mut users: Vec<Identity> = db.users.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    async fn list_courses(&self) -> Result<Vec<Course>, BackendError> {
        let db = self.begin("list_courses").await?;
        let mut courses: Vec<Course> = db.courses.iter().map(|c| db.course_with_reviews(c)).collect();
        courses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(courses)
    }

    async fn list_featured_courses(&self, limit: usize) -> Result<Vec<Course>, BackendError> {
        let db = self.begin("list_featured_courses").await?;
        let mut courses = db.courses.clone();
        courses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        courses.truncate(limit);
        Ok(courses)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, BackendError> {
        let db = self.begin("list_categories").await?;
        let mut categories = db.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn list_resources(&self) -> Result<Vec<ExternalResource>, BackendError> {
        let db = self.begin("list_resources").await?;
        let mut resources = db.resources.clone();
        resources.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(resources)
    }

    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, BackendError> {
        let db = self.begin("list_notifications").await?;
        let mut notifications: Vec<Notification> = db
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(notifications)
    }

    async fn notifications_since(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, BackendError> {
        let db = self.begin("notifications_since").await?;
        let mut notifications: Vec<Notification> = db
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && since.map_or(true, |ts| n.timestamp >= ts))
            .cloned()
            .collect();
        notifications.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(notifications)
    }

    async fn list_progress(&self, user_id: Option<Uuid>) -> Result<Vec<ProgressRecord>, BackendError> {
        let db = self.begin("list_progress").await?;
        Ok(db
            .progress
            .values()
            .filter(|p| user_id.map_or(true, |u| p.user_id == u))
            .cloned()
            .collect())
    }

    async fn upsert_progress(&self, patch: &ProgressPatch) -> Result<ProgressRecord, BackendError> {
        let mut db = self.begin("upsert_progress").await?;
        let record = db
            .progress
            .entry((patch.user_id, patch.course_id))
            .or_insert_with(|| ProgressRecord::new(patch.user_id, patch.course_id));
        record.merge(patch);
        Ok(record.clone())
    }

    async fn increment_points(&self, user_id: Uuid, amount: i64) -> Result<(), BackendError> {
        let mut db = self.begin("increment_points").await?;
        let user = db
            .users
            .get_mut(&user_id)
            .ok_or_else(|| BackendError::NotFound(format!("user {user_id}")))?;
        user.points += amount;
        Ok(())
    }

    async fn replace_badges(&self, user_id: Uuid, badges: &BTreeSet<String>) -> Result<(), BackendError> {
        let mut db = self.begin("replace_badges").await?;
        let user = db
            .users
            .get_mut(&user_id)
            .ok_or_else(|| BackendError::NotFound(format!("user {user_id}")))?;
        user.badges = badges.clone();
        Ok(())
    }

    async fn create_notification(
        &self,
        user_id: Uuid,
        kind: NotificationType,
        message: &str,
    ) -> Result<(), BackendError> {
        let mut db = self.begin("create_notification").await?;
        db.notifications.push(Notification {
            id: Uuid::new_v4(),
            user_id,
            kind,
            message: message.to_string(),
            read: false,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn mark_notifications_read(&self, ids: &[Uuid]) -> Result<(), BackendError> {
        let mut db = self.begin("mark_notifications_read").await?;
        for notification in db.notifications.iter_mut().filter(|n| ids.contains(&n.id)) {
            notification.read = true;
        }
        Ok(())
    }

    async fn insert_review(&self, review: &NewReview) -> Result<Review, BackendError> {
        let mut db = self.begin("insert_review").await?;
        let saved = Review {
            id: Uuid::new_v4(),
            course_id: review.course_id,
            author_id: review.author_id,
            author_name: review.author_name.clone(),
            rating: review.rating,
            comment: review.comment.clone(),
            timestamp: Utc::now(),
        };
        db.reviews.push(saved.clone());
        Ok(saved)
    }

    async fn insert_course(&self, draft: &CourseDraft) -> Result<Course, BackendError> {
        let mut db = self.begin("insert_course").await?;
        let course = course_from_draft(Uuid::new_v4(), draft)?;
        db.courses.push(course.clone());
        Ok(course)
    }

    async fn update_course(&self, course_id: Uuid, draft: &CourseDraft) -> Result<Course, BackendError> {
        let mut db = self.begin("update_course").await?;
        let mut updated = course_from_draft(course_id, draft)?;
        let existing = db
            .courses
            .iter_mut()
            .find(|c| c.id == course_id)
            .ok_or_else(|| BackendError::NotFound(format!("course {course_id}")))?;
        updated.created_at = existing.created_at;
        updated.discussion = std::mem::take(&mut existing.discussion);
        *existing = updated.clone();
        Ok(db.course_with_reviews(&updated))
    }

    async fn update_discussion(
        &self,
        course_id: Uuid,
        discussion: &[DiscussionPost],
    ) -> Result<(), BackendError> {
        let mut db = self.begin("update_discussion").await?;
        let course = db
            .courses
            .iter_mut()
            .find(|c| c.id == course_id)
            .ok_or_else(|| BackendError::NotFound(format!("course {course_id}")))?;
        course.discussion = discussion.to_vec();
        Ok(())
    }

    async fn delete_course(&self, course_id: Uuid) -> Result<(), BackendError> {
        let mut db = self.begin("delete_course").await?;
        let before = db.courses.len();
        db.courses.retain(|c| c.id != course_id);
        if db.courses.len() == before {
            return Err(BackendError::NotFound(format!("course {course_id}")));
        }
        db.reviews.retain(|r| r.course_id != course_id);
        db.progress.retain(|(_, course), _| *course != course_id);
        Ok(())
    }

    async fn rename_course_category(&self, from: &str, to: &str) -> Result<(), BackendError> {
        let mut db = self.begin("rename_course_category").await?;
        for course in db.courses.iter_mut().filter(|c| c.category == from) {
            course.category = to.to_string();
        }
        Ok(())
    }

    async fn update_user(&self, user_id: Uuid, patch: &UserPatch) -> Result<Identity, BackendError> {
        let mut db = self.begin("update_user").await?;
        let user = db
            .users
            .get_mut(&user_id)
            .ok_or_else(|| BackendError::NotFound(format!("user {user_id}")))?;
        patch.apply_to(user);
        Ok(user.clone())
    }

    async fn insert_category(&self, name: &str) -> Result<Category, BackendError> {
        let mut db = self.begin("insert_category").await?;
        if db.categories.iter().any(|c| c.name == name) {
            return Err(BackendError::http(
                409,
                "duplicate key value violates unique constraint \"course_categories_name_key\"",
            ));
        }
        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        db.categories.push(category.clone());
        Ok(category)
    }

    async fn update_category(&self, category_id: Uuid, name: &str) -> Result<Category, BackendError> {
        let mut db = self.begin("update_category").await?;
        let category = db
            .categories
            .iter_mut()
            .find(|c| c.id == category_id)
            .ok_or_else(|| BackendError::NotFound(format!("category {category_id}")))?;
        category.name = name.to_string();
        Ok(category.clone())
    }

    async fn delete_category(&self, category_id: Uuid) -> Result<(), BackendError> {
        let mut db = self.begin("delete_category").await?;
        db.categories.retain(|c| c.id != category_id);
        Ok(())
    }

    async fn insert_resource(&self, resource: &NewResource) -> Result<ExternalResource, BackendError> {
        let mut db = self.begin("insert_resource").await?;
        let saved = ExternalResource {
            id: Uuid::new_v4(),
            title: resource.title.clone(),
            url: resource.url.clone(),
            description: resource.description.clone(),
            created_at: Some(Utc::now()),
        };
        db.resources.push(saved.clone());
        Ok(saved)
    }

    async fn delete_resource(&self, resource_id: Uuid) -> Result<(), BackendError> {
        let mut db = self.begin("delete_resource").await?;
        db.resources.retain(|r| r.id != resource_id);
        Ok(())
    }

    async fn remove_assets(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        let mut db = self.begin("remove_assets").await?;
        for path in paths {
            db.assets.remove(&format!("{bucket}/{path}"));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for InMemoryStore {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthTokens, BackendError> {
        let mut db = self.begin("sign_in").await?;
        let user_id = match db.credentials.get(&email.to_lowercase()) {
            Some((id, stored)) if stored == password => *id,
            _ => return Err(BackendError::http(400, "Invalid login credentials")),
        };
        Ok(db.issue_tokens(user_id))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, BackendError> {
        let mut db = self.begin("refresh").await?;
        let user_id = db
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| BackendError::Unauthorized("Invalid Refresh Token".into()))?;
        Ok(db.issue_tokens(user_id))
    }

    async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<(), BackendError> {
        let mut db = self.begin("sign_up").await?;
        let key = email.to_lowercase();
        if db.credentials.contains_key(&key) {
            return Err(BackendError::http(422, "User already registered"));
        }
        let identity = Identity {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            role: Role::Learner,
            approved: false,
            points: 0,
            badges: BTreeSet::new(),
            profile_image_url: None,
        };
        info!("Registered {} (pending approval)", identity.id);
        db.credentials.insert(key, (identity.id, password.to_string()));
        db.users.insert(identity.id, identity);
        Ok(())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        let mut db = self.begin("sign_out").await?;
        if let Some(user_id) = db.access_tokens.remove(access_token) {
            db.refresh_tokens.retain(|_, id| *id != user_id);
        }
        Ok(())
    }

    async fn recover_password(&self, email: &str) -> Result<(), BackendError> {
        drop(self.begin("recover_password").await?);
        debug!("Password recovery requested for {}", email);
        Ok(())
    }

    async fn update_password(&self, access_token: &str, password: &str) -> Result<(), BackendError> {
        let mut db = self.begin("update_password").await?;
        let user_id = *db
            .access_tokens
            .get(access_token)
            .ok_or_else(|| BackendError::Unauthorized("invalid access token".into()))?;
        for (id, stored) in db.credentials.values_mut() {
            if *id == user_id {
                *stored = password.to_string();
            }
        }
        Ok(())
    }

    fn store_for(&self, tokens: &AuthTokens) -> Arc<dyn RemoteStore> {
        Arc::new(self.as_user(tokens.user_id))
    }

    fn anonymous_store(&self) -> Arc<dyn RemoteStore> {
        Arc::new(Self {
            db: Arc::clone(&self.db),
            caller: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learner(email: &str) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            name: "Amina".into(),
            email: email.into(),
            role: Role::Learner,
            approved: true,
            points: 0,
            badges: BTreeSet::new(),
            profile_image_url: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_merges_partial_fields() {
        let store = InMemoryStore::new();
        let (user, course) = (Uuid::new_v4(), Uuid::new_v4());

        store
            .upsert_progress(&ProgressPatch::new(user, course).completed_modules(vec!["m-1".into()]))
            .await
            .unwrap();
        let record = store
            .upsert_progress(&ProgressPatch::new(user, course).quiz_score(40))
            .await
            .unwrap();

        assert_eq!(record.completed_modules, vec!["m-1".to_string()]);
        assert_eq!(record.quiz_score, Some(40));
        assert_eq!(store.list_progress(Some(user)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_data_untouched() {
        let store = InMemoryStore::new();
        let identity = learner("a@corp.test");
        let id = identity.id;
        store.seed_user(identity, "secret1").await;
        store.fail_on("increment_points").await;

        let err = store.increment_points(id, 10).await.unwrap_err();
        assert!(matches!(err, BackendError::Http { status: 500, .. }));
        assert_eq!(store.user(id).await.unwrap().points, 0);
        assert_eq!(store.calls().await, vec!["increment_points".to_string()]);
    }

    #[tokio::test]
    async fn test_sign_in_and_profile() {
        let store = InMemoryStore::new();
        let identity = learner("Amina@Corp.test");
        let id = identity.id;
        store.seed_user(identity, "secret1").await;

        assert!(store.sign_in("amina@corp.test", "wrong").await.is_err());
        let tokens = store.sign_in("amina@corp.test", "secret1").await.unwrap();
        assert_eq!(tokens.user_id, id);

        let scoped = store.store_for(&tokens);
        let profile = scoped.fetch_profile().await.unwrap().unwrap();
        assert_eq!(profile.id, id);

        let anon = store.anonymous_store();
        assert!(matches!(
            anon.fetch_profile().await,
            Err(BackendError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_is_single_use() {
        let store = InMemoryStore::new();
        let identity = learner("b@corp.test");
        store.seed_user(identity, "secret1").await;
        let tokens = store.sign_in("b@corp.test", "secret1").await.unwrap();

        let renewed = store.refresh(&tokens.refresh_token).await.unwrap();
        assert_ne!(renewed.refresh_token, tokens.refresh_token);
        assert!(store.refresh(&tokens.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_recover_password_releases_store() {
        let store = InMemoryStore::new();
        store.recover_password("amina@corp.test").await.unwrap();
        store.sign_up("Amina", "amina@corp.test", "secret1").await.unwrap();
        assert_eq!(store.calls().await, vec!["recover_password", "sign_up"]);

        store.fail_on("recover_password").await;
        assert!(store.recover_password("amina@corp.test").await.is_err());
    }

    #[tokio::test]
    async fn test_token_lifetime_is_reported() {
        let store = InMemoryStore::new();
        store.seed_user(learner("c@corp.test"), "secret1").await;
        let tokens = store.sign_in("c@corp.test", "secret1").await.unwrap();
        assert_eq!(tokens.expires_in, 3600);

        store.set_token_lifetime(5).await;
        let renewed = store.refresh(&tokens.refresh_token).await.unwrap();
        assert_eq!(renewed.expires_in, 5);
    }

    #[tokio::test]
    async fn test_sign_up_creates_unapproved_learner() {
        let store = InMemoryStore::new();
        store.sign_up("New Hire", "new@corp.test", "secret1").await.unwrap();
        let tokens = store.sign_in("new@corp.test", "secret1").await.unwrap();
        let user = store.user(tokens.user_id).await.unwrap();
        assert_eq!(user.role, Role::Learner);
        assert!(!user.approved);
        assert!(store.sign_up("x", "NEW@corp.test", "secret1").await.is_err());
    }

    #[tokio::test]
    async fn test_notifications_since_is_oldest_first() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        store
            .create_notification(user, NotificationType::Reminder, "one")
            .await
            .unwrap();
        store
            .create_notification(user, NotificationType::Reminder, "two")
            .await
            .unwrap();
        store
            .create_notification(Uuid::new_v4(), NotificationType::Reminder, "other")
            .await
            .unwrap();

        let all = store.notifications_since(user, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "one");

        let newest = store.list_notifications(user).await.unwrap();
        assert_eq!(newest[0].message, "two");
    }

    #[tokio::test]
    async fn test_duplicate_category_is_conflict() {
        let store = InMemoryStore::new();
        store.insert_category("Compliance").await.unwrap();
        let err = store.insert_category("Compliance").await.unwrap_err();
        assert!(matches!(err, BackendError::Http { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_demo_accounts_can_sign_in() {
        let store = InMemoryStore::new();
        store.seed_demo().await;
        let tokens = store
            .sign_in("Admin@LearnPortal.local", "admin123")
            .await
            .unwrap();
        let profile = store.store_for(&tokens).fetch_profile().await.unwrap().unwrap();
        assert!(profile.role.is_admin());
        assert!(store.sign_in("learner@learnportal.local", "learner123").await.is_ok());
        assert_eq!(store.list_courses().await.unwrap().len(), 1);
    }
}
