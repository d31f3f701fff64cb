//! Administration: course editor, user approval, categories, resources,
//! announcements and course analytics.
//!
//! Every operation checks the signed-in role first and writes remotely before
//! touching the mirror, like the reconciler.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::reconciler::SyncWarning;
use super::types::{
    Category, Course, CourseDraft, ExternalResource, Identity, NewResource, NotificationType,
    Role, UserPatch,
};
use super::LearnError;
use crate::backend::{storage_path_from_url, RemoteStore};
use crate::session::SessionContext;

pub const MIN_QUIZ_OPTIONS: usize = 2;
pub const MAX_QUIZ_OPTIONS: usize = 6;

fn require_admin(ctx: &SessionContext) -> Result<&Identity, LearnError> {
    let me = ctx.identity()?;
    if !me.role.is_admin() {
        return Err(LearnError::Forbidden("administrator role required".into()));
    }
    Ok(me)
}

/// Checks a course draft and fills in missing module ids.
pub fn validate_draft(draft: &mut CourseDraft, categories: &[Category]) -> Result<(), LearnError> {
    draft.title = draft.title.trim().to_string();
    draft.description = draft.description.trim().to_string();
    if draft.title.is_empty() || draft.description.is_empty() {
        return Err(LearnError::validation("Title and Description are required."));
    }
    if !(0..=100).contains(&draft.passing_score) {
        return Err(LearnError::validation("Passing score must be between 0 and 100."));
    }
    if !categories.is_empty() && !categories.iter().any(|c| c.name == draft.category) {
        return Err(LearnError::validation("Please select a category."));
    }

    for module in draft.modules.iter_mut() {
        if module.title.trim().is_empty() {
            return Err(LearnError::validation("Every module needs a title."));
        }
        if module.id.is_empty() {
            module.id = format!("m-{}", Uuid::new_v4().simple());
        }
    }

    for (n, question) in draft.quiz.iter().enumerate() {
        if question.question.trim().is_empty() {
            return Err(LearnError::validation(format!("Question {} has no text.", n + 1)));
        }
        if question.options.len() < MIN_QUIZ_OPTIONS {
            return Err(LearnError::validation("A question must have at least 2 options."));
        }
        if question.options.len() > MAX_QUIZ_OPTIONS {
            return Err(LearnError::validation(
                "A maximum of 6 options are allowed per question.",
            ));
        }
        if question.correct_answer >= question.options.len() {
            return Err(LearnError::validation(format!(
                "Question {} has no valid correct answer.",
                n + 1
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseCreated {
    pub course: Course,
    pub notified: usize,
    pub warnings: Vec<SyncWarning>,
}

pub async fn create_course(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    mut draft: CourseDraft,
) -> Result<CourseCreated, LearnError> {
    require_admin(ctx)?;
    validate_draft(&mut draft, &ctx.categories)?;

    let course = store.insert_course(&draft).await.map_err(|e| {
        error!("Error creating course \"{}\": {}", draft.title, e);
        e
    })?;
    ctx.courses.insert(0, course.clone());
    info!("Course {} created: {}", course.id, course.title);

    let message = format!("A new course has been added: \"{}\"", course.title);
    let learners: Vec<Uuid> = ctx
        .users
        .iter()
        .filter(|u| u.role == Role::Learner)
        .map(|u| u.id)
        .collect();
    let mut notified = 0;
    let mut warnings = Vec::new();
    for user_id in learners {
        match store
            .create_notification(user_id, NotificationType::NewCourse, &message)
            .await
        {
            Ok(()) => notified += 1,
            Err(e) => {
                warn!("New course notification to {} failed: {}", user_id, e);
                warnings.push(SyncWarning {
                    operation: "create_notification",
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(CourseCreated {
        course,
        notified,
        warnings,
    })
}

pub async fn update_course(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    course_id: Uuid,
    mut draft: CourseDraft,
) -> Result<Course, LearnError> {
    require_admin(ctx)?;
    ctx.course(course_id)?;
    validate_draft(&mut draft, &ctx.categories)?;

    let updated = store.update_course(course_id, &draft).await.map_err(|e| {
        error!("Error updating course {}: {}", course_id, e);
        e
    })?;
    *ctx.course_mut(course_id)? = updated.clone();
    info!("Course {} updated", course_id);
    Ok(updated)
}

/// Storage paths a course owns in `bucket`: cover image, uploaded videos and
/// textbook.
pub fn course_asset_paths(course: &Course, bucket: &str) -> Vec<String> {
    let mut paths = Vec::new();
    if let Some(path) = course
        .image_url
        .as_deref()
        .and_then(|url| storage_path_from_url(url, bucket))
    {
        paths.push(path);
    }
    paths.extend(
        course
            .modules
            .iter()
            .filter(|m| m.is_uploaded_video())
            .filter_map(|m| storage_path_from_url(&m.content, bucket)),
    );
    if let Some(path) = course
        .textbook_url
        .as_deref()
        .and_then(|url| storage_path_from_url(url, bucket))
    {
        paths.push(path);
    }
    paths
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseDeleted {
    pub removed_assets: Vec<String>,
    pub warnings: Vec<SyncWarning>,
}

/// Removes the course's stored files, then the course row. File removal is
/// best-effort: a failure becomes a warning and the row is deleted anyway.
pub async fn delete_course(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    bucket: &str,
    course_id: Uuid,
) -> Result<CourseDeleted, LearnError> {
    require_admin(ctx)?;
    let paths = course_asset_paths(ctx.course(course_id)?, bucket);

    let mut warnings = Vec::new();
    let mut removed_assets = Vec::new();
    if !paths.is_empty() {
        match store.remove_assets(bucket, &paths).await {
            Ok(()) => removed_assets = paths,
            Err(e) => {
                warn!(
                    "Could not delete files of course {}: {}. Check storage manually.",
                    course_id, e
                );
                warnings.push(SyncWarning {
                    operation: "remove_assets",
                    message: e.to_string(),
                });
            }
        }
    }

    store.delete_course(course_id).await.map_err(|e| {
        error!("Error deleting course {}: {}", course_id, e);
        e
    })?;
    ctx.courses.retain(|c| c.id != course_id);
    ctx.progress.remove_course(course_id);
    info!("Course {} deleted", course_id);
    Ok(CourseDeleted {
        removed_assets,
        warnings,
    })
}

async fn patch_user(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    user_id: Uuid,
    patch: &UserPatch,
) -> Result<Identity, LearnError> {
    let updated = store.update_user(user_id, patch).await.map_err(|e| {
        error!("Error updating user {}: {}", user_id, e);
        e
    })?;
    ctx.replace_user(&updated);
    Ok(updated)
}

pub async fn approve_user(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    user_id: Uuid,
) -> Result<Identity, LearnError> {
    require_admin(ctx)?;
    let patch = UserPatch {
        approved: Some(true),
        ..Default::default()
    };
    let user = patch_user(store, ctx, user_id, &patch).await?;
    info!("User {} approved", user_id);
    Ok(user)
}

pub async fn change_role(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    user_id: Uuid,
    role: Role,
) -> Result<Identity, LearnError> {
    let me = require_admin(ctx)?;
    if me.id == user_id && role != me.role {
        return Err(LearnError::validation("You cannot change your own role."));
    }
    let patch = UserPatch {
        role: Some(role),
        ..Default::default()
    };
    let user = patch_user(store, ctx, user_id, &patch).await?;
    info!("User {} is now {}", user_id, role);
    Ok(user)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "profileImageUrl")]
    pub profile_image_url: Option<String>,
}

impl ProfileUpdate {
    fn into_patch(self) -> Result<UserPatch, LearnError> {
        let name = self.name.map(|n| n.trim().to_string());
        let email = self.email.map(|e| e.trim().to_string());
        if name.as_deref().is_some_and(str::is_empty) {
            return Err(LearnError::validation("Name cannot be empty."));
        }
        if email.as_deref().is_some_and(|e| !e.contains('@')) {
            return Err(LearnError::validation("Please enter a valid email address."));
        }
        Ok(UserPatch {
            name,
            email,
            profile_image_url: self.profile_image_url,
            ..Default::default()
        })
    }
}

/// Profile edit by an administrator for any identity.
pub async fn update_profile(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    user_id: Uuid,
    update: ProfileUpdate,
) -> Result<Identity, LearnError> {
    require_admin(ctx)?;
    let patch = update.into_patch()?;
    patch_user(store, ctx, user_id, &patch).await
}

/// Self-service profile edit, open to every signed-in identity.
pub async fn update_own_profile(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    update: ProfileUpdate,
) -> Result<Identity, LearnError> {
    let user_id = ctx.user_id()?;
    let patch = update.into_patch()?;
    let updated = patch_user(store, ctx, user_id, &patch).await?;
    info!("Profile updated for {}", user_id);
    Ok(updated)
}

pub async fn add_category(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    name: &str,
) -> Result<Category, LearnError> {
    require_admin(ctx)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(LearnError::validation("Category name cannot be empty."));
    }
    if ctx.categories.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
        return Err(LearnError::validation(format!("Category \"{name}\" already exists.")));
    }
    let category = store.insert_category(name).await?;
    ctx.categories.push(category.clone());
    ctx.categories.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(category)
}

/// Renames a category and every course filed under the old name.
pub async fn rename_category(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    category_id: Uuid,
    name: &str,
) -> Result<Category, LearnError> {
    require_admin(ctx)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(LearnError::validation("Category name cannot be empty."));
    }
    let old = ctx
        .categories
        .iter()
        .find(|c| c.id == category_id)
        .map(|c| c.name.clone())
        .ok_or_else(|| LearnError::NotFound(format!("category {category_id}")))?;
    if old == name {
        return Ok(Category {
            id: category_id,
            name: old,
        });
    }
    if ctx
        .categories
        .iter()
        .any(|c| c.id != category_id && c.name.eq_ignore_ascii_case(name))
    {
        return Err(LearnError::validation(format!("Category \"{name}\" already exists.")));
    }

    let category = store.update_category(category_id, name).await?;
    if let Some(c) = ctx.categories.iter_mut().find(|c| c.id == category_id) {
        *c = category.clone();
    }
    ctx.categories.sort_by(|a, b| a.name.cmp(&b.name));

    store.rename_course_category(&old, name).await.map_err(|e| {
        error!("Courses still filed under \"{}\": {}", old, e);
        e
    })?;
    for course in ctx.courses.iter_mut().filter(|c| c.category == old) {
        course.category = name.to_string();
    }
    info!("Category \"{}\" renamed to \"{}\"", old, name);
    Ok(category)
}

pub async fn delete_category(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    category_id: Uuid,
) -> Result<(), LearnError> {
    require_admin(ctx)?;
    store.delete_category(category_id).await?;
    ctx.categories.retain(|c| c.id != category_id);
    Ok(())
}

pub async fn add_resource(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    resource: NewResource,
) -> Result<ExternalResource, LearnError> {
    require_admin(ctx)?;
    let resource = NewResource {
        title: resource.title.trim().to_string(),
        url: resource.url.trim().to_string(),
        description: resource
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
    };
    if resource.title.is_empty() {
        return Err(LearnError::validation("Resource title is required."));
    }
    if !(resource.url.starts_with("http://") || resource.url.starts_with("https://")) {
        return Err(LearnError::validation("Resource URL must start with http:// or https://"));
    }
    let saved = store.insert_resource(&resource).await?;
    ctx.resources.insert(0, saved.clone());
    Ok(saved)
}

pub async fn delete_resource(
    store: &dyn RemoteStore,
    ctx: &mut SessionContext,
    resource_id: Uuid,
) -> Result<(), LearnError> {
    require_admin(ctx)?;
    store.delete_resource(resource_id).await?;
    ctx.resources.retain(|r| r.id != resource_id);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "user_id", rename_all = "snake_case")]
pub enum Audience {
    User(Uuid),
    AllLearners,
}

#[derive(Debug, Clone, Serialize)]
pub struct Broadcast {
    pub sent: usize,
    pub warnings: Vec<SyncWarning>,
}

pub async fn send_notification(
    store: &dyn RemoteStore,
    ctx: &SessionContext,
    audience: Audience,
    kind: NotificationType,
    message: &str,
) -> Result<Broadcast, LearnError> {
    require_admin(ctx)?;
    let message = message.trim();
    if message.is_empty() {
        return Err(LearnError::validation("Notification message cannot be empty."));
    }

    match audience {
        Audience::User(user_id) => {
            store.create_notification(user_id, kind, message).await?;
            Ok(Broadcast {
                sent: 1,
                warnings: Vec::new(),
            })
        }
        Audience::AllLearners => {
            let mut sent = 0;
            let mut warnings = Vec::new();
            for user in ctx.users.iter().filter(|u| u.role == Role::Learner) {
                match store.create_notification(user.id, kind, message).await {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        warn!("Notification to {} failed: {}", user.id, e);
                        warnings.push(SyncWarning {
                            operation: "create_notification",
                            message: e.to_string(),
                        });
                    }
                }
            }
            info!("Broadcast {} notification to {} learners", kind.as_str(), sent);
            Ok(Broadcast { sent, warnings })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseStats {
    pub course_id: Uuid,
    pub title: String,
    pub enrolled: usize,
    pub completed: usize,
    /// Percent of enrolled identities that completed, 0 when nobody enrolled.
    pub completion_rate: f32,
    pub average_rating: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortalStats {
    pub learners: usize,
    pub pending_approvals: usize,
    pub courses: Vec<CourseStats>,
}

pub fn analytics(ctx: &SessionContext) -> Result<PortalStats, LearnError> {
    require_admin(ctx)?;
    let courses = ctx
        .courses
        .iter()
        .map(|course| {
            let rows: Vec<_> = ctx.progress.all().filter(|p| p.course_id == course.id).collect();
            let enrolled = rows.len();
            let completed = rows.iter().filter(|p| p.is_completed()).count();
            let completion_rate = if enrolled == 0 {
                0.0
            } else {
                completed as f32 * 100.0 / enrolled as f32
            };
            CourseStats {
                course_id: course.id,
                title: course.title.clone(),
                enrolled,
                completed,
                completion_rate,
                average_rating: course.average_rating(),
            }
        })
        .collect();

    let learners: Vec<&Identity> = ctx.users.iter().filter(|u| u.role == Role::Learner).collect();
    Ok(PortalStats {
        learners: learners.len(),
        pending_approvals: learners.iter().filter(|u| !u.approved).count(),
        courses,
    })
}
