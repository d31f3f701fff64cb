//! HTTP handlers for the portal API.
//!
//! Every signed-in route takes a [`Portal`] extractor, which resolves the
//! bearer session id to the identity's session. Handlers lock that session for
//! the whole operation so two requests on one session never interleave.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::admin::{self, Audience, ProfileUpdate};
use super::catalog::{self, CourseQuery};
use super::discussion;
use super::notifications;
use super::reconciler::{grade_quiz, Reconciler};
use super::types::{
    CertificateData, Course, CourseDraft, NewResource, NotificationType, ProgressRecord, Review,
    Role, ShareLinks,
};
use super::views::{Page, View};
use super::LearnError;
use crate::backend::public_object_url;
use crate::core::shared::state::AppState;
use crate::session::{SessionContext, SharedSession};

pub const REGISTERED_MESSAGE: &str =
    "Registration successful! Your account now requires administrator approval before you can log in.";

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// The caller's session, resolved from `Authorization: Bearer <session id>`.
pub struct Portal {
    pub session_id: String,
    pub session: SharedSession,
    pub user_id: Uuid,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Portal {
    type Rejection = LearnError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let session_id = bearer_token(&parts.headers)
            .ok_or_else(|| LearnError::Unauthorized("Authentication required".into()))?;
        let session = state
            .sessions
            .get(&session_id)
            .await
            .ok_or_else(|| LearnError::Unauthorized("Session expired or unknown".into()))?;
        let user_id = session.lock().await.user_id();
        Ok(Self {
            session_id,
            session,
            user_id,
        })
    }
}

#[derive(Debug, Serialize)]
struct Message {
    message: String,
}

fn message(text: impl Into<String>) -> Json<Message> {
    Json(Message {
        message: text.into(),
    })
}

// ============================================================================
// AUTH
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let signed_in = state.sessions.sign_in(&req.email, &req.password).await?;
    Ok(Json(signed_in))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let signed_in = state.sessions.restore(&req.refresh_token).await?;
    Ok(Json(signed_in))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, LearnError> {
    state
        .sessions
        .register(&req.name, &req.email, &req.password)
        .await?;
    Ok((StatusCode::CREATED, message(REGISTERED_MESSAGE)))
}

pub async fn logout(State(state): State<Arc<AppState>>, portal: Portal) -> Result<StatusCode, LearnError> {
    state.sessions.sign_out(&portal.session_id).await?;
    info!("Signed out {}", portal.user_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn recover_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecoverRequest>,
) -> Result<impl IntoResponse, LearnError> {
    state.sessions.recover_password(&req.email).await?;
    Ok(message("Password reset instructions have been sent to your email."))
}

pub async fn update_password(
    State(state): State<Arc<AppState>>,
    portal: Portal,
    Json(req): Json<PasswordRequest>,
) -> Result<impl IntoResponse, LearnError> {
    state
        .sessions
        .update_password(&portal.session_id, &req.password)
        .await?;
    Ok(message("Password updated successfully!"))
}

// ============================================================================
// SESSION & NAVIGATION
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub view: View,
    pub unread_notifications: usize,
    #[serde(flatten)]
    pub context: SessionContext,
}

fn snapshot(ctx: &SessionContext) -> SessionSnapshot {
    let role = ctx.identity.as_ref().map_or(Role::Learner, |i| i.role);
    SessionSnapshot {
        view: ctx.nav.resolve(role),
        unread_notifications: ctx.unread_count(),
        context: ctx.clone(),
    }
}

pub async fn get_session(portal: Portal) -> Result<impl IntoResponse, LearnError> {
    let session = portal.session.lock().await;
    Ok(Json(snapshot(&session.ctx)))
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub view: Option<View>,
    pub page: Option<Page>,
    pub course_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct NavigationState {
    pub page: Page,
    pub view: View,
    pub selected_course: Option<Uuid>,
}

pub async fn navigate(portal: Portal, Json(req): Json<NavigateRequest>) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let ctx = &mut session.ctx;
    let role = ctx.identity()?.role;

    if let Some(page) = req.page {
        ctx.nav.set_page(page);
    }
    match (req.view, req.course_id) {
        (_, Some(course_id)) => {
            ctx.course(course_id)?;
            ctx.nav.select_course(course_id);
        }
        (Some(view), None) => ctx.nav.navigate(view),
        (None, None) => {}
    }

    Ok(Json(NavigationState {
        page: ctx.nav.page,
        view: ctx.nav.resolve(role),
        selected_course: ctx.nav.selected_course,
    }))
}

// ============================================================================
// CATALOG
// ============================================================================

pub async fn featured_courses(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.auth.anonymous_store();
    Json(catalog::featured_courses(store.as_ref()).await)
}

pub async fn list_courses(portal: Portal, Query(query): Query<CourseQuery>) -> impl IntoResponse {
    let session = portal.session.lock().await;
    Json(catalog::course_cards(&session.ctx, &query))
}

#[derive(Debug, Serialize)]
pub struct CourseDetail {
    pub course: Course,
    pub progress: Option<ProgressRecord>,
    pub my_review: Option<Review>,
    pub average_rating: Option<f32>,
}

pub async fn get_course(portal: Portal, Path(course_id): Path<Uuid>) -> Result<impl IntoResponse, LearnError> {
    let session = portal.session.lock().await;
    let course = session.ctx.course(course_id)?.clone();
    let my_review = course
        .reviews
        .iter()
        .find(|r| r.author_id == portal.user_id)
        .cloned();
    Ok(Json(CourseDetail {
        average_rating: course.average_rating(),
        progress: session.ctx.my_progress(course_id).cloned(),
        my_review,
        course,
    }))
}

pub async fn leaderboard(portal: Portal) -> impl IntoResponse {
    let session = portal.session.lock().await;
    Json(catalog::leaderboard(&session.ctx.users))
}

#[derive(Debug, Serialize)]
pub struct CertificateView {
    #[serde(flatten)]
    pub data: CertificateData,
    pub formatted_date: String,
    pub share: ShareLinks,
}

fn certificate_view(state: &AppState, user_id: Uuid, data: CertificateData) -> CertificateView {
    let image = public_object_url(
        &state.config.backend.url,
        state.assets_bucket(),
        &format!("public/shared-certificates/{}-{}.png", user_id, data.course_id),
    );
    CertificateView {
        formatted_date: data.formatted_date(),
        share: data.share_links(&image),
        data,
    }
}

pub async fn list_certificates(State(state): State<Arc<AppState>>, portal: Portal) -> impl IntoResponse {
    let session = portal.session.lock().await;
    let views: Vec<CertificateView> = catalog::certificates(&session.ctx)
        .into_iter()
        .map(|c| certificate_view(&state, portal.user_id, c))
        .collect();
    Json(views)
}

pub async fn get_certificate(
    State(state): State<Arc<AppState>>,
    portal: Portal,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let data = catalog::certificates(&session.ctx)
        .into_iter()
        .find(|c| c.course_id == course_id)
        .ok_or_else(|| LearnError::NotFound(format!("certificate for course {course_id}")))?;
    session.ctx.nav.show_certificate(data.clone());
    Ok(Json(certificate_view(&state, portal.user_id, data)))
}

// ============================================================================
// PROGRESS
// ============================================================================

pub async fn enroll(
    State(state): State<Arc<AppState>>,
    portal: Portal,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let record = Reconciler::new(store.as_ref(), &state.config.rewards)
        .enroll(&mut session.ctx, course_id)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Serialize)]
pub struct Opened {
    pub enrolled: bool,
}

pub async fn open_course(
    State(state): State<Arc<AppState>>,
    portal: Portal,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let enrolled = Reconciler::new(store.as_ref(), &state.config.rewards)
        .open_course(&mut session.ctx, course_id)
        .await?;
    session.ctx.nav.select_course(course_id);
    Ok(Json(Opened { enrolled }))
}

pub async fn complete_module(
    State(state): State<Arc<AppState>>,
    portal: Portal,
    Path((course_id, module_id)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let outcome = Reconciler::new(store.as_ref(), &state.config.rewards)
        .record_module_completion(&mut session.ctx, course_id, &module_id)
        .await?;
    Ok(Json(outcome))
}

/// Either the chosen option per question, graded here, or a score the client
/// already computed.
#[derive(Debug, Deserialize)]
pub struct QuizSubmission {
    pub answers: Option<Vec<usize>>,
    pub score: Option<i32>,
}

pub async fn submit_quiz(
    State(state): State<Arc<AppState>>,
    portal: Portal,
    Path(course_id): Path<Uuid>,
    Json(req): Json<QuizSubmission>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let score = match (req.answers, req.score) {
        (Some(answers), _) => i32::from(grade_quiz(session.ctx.course(course_id)?, &answers)?),
        (None, Some(score)) => score,
        (None, None) => return Err(LearnError::validation("Provide either answers or a score")),
    };

    let store = Arc::clone(&session.store);
    let outcome = Reconciler::new(store.as_ref(), &state.config.rewards)
        .submit_quiz(&mut session.ctx, course_id, score)
        .await?;
    if let super::reconciler::QuizOutcome::Passed { certificate, .. } = &outcome {
        session.ctx.nav.show_certificate(certificate.clone());
    }
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub rating: i32,
    #[serde(default)]
    pub comment: String,
}

pub async fn rate_course(
    State(state): State<Arc<AppState>>,
    portal: Portal,
    Path(course_id): Path<Uuid>,
    Json(req): Json<RatingRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let outcome = Reconciler::new(store.as_ref(), &state.config.rewards)
        .rate_course(&mut session.ctx, course_id, req.rating, &req.comment)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

// ============================================================================
// DISCUSSION
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PostRequest {
    pub text: String,
}

pub async fn create_post(
    portal: Portal,
    Path(course_id): Path<Uuid>,
    Json(req): Json<PostRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let post = discussion::post(store.as_ref(), &mut session.ctx, course_id, &req.text).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn create_reply(
    portal: Portal,
    Path((course_id, post_id)): Path<(Uuid, String)>,
    Json(req): Json<PostRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let reply =
        discussion::reply(store.as_ref(), &mut session.ctx, course_id, &post_id, &req.text).await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

pub async fn list_notifications(portal: Portal) -> impl IntoResponse {
    let session = portal.session.lock().await;
    Json(session.ctx.notifications.clone())
}

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub marked: usize,
}

pub async fn mark_notifications_read(portal: Portal) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let marked = notifications::mark_all_read(store.as_ref(), &mut session.ctx).await?;
    Ok(Json(MarkedRead { marked }))
}

#[cfg(feature = "realtime")]
pub async fn notification_stream(
    State(state): State<Arc<AppState>>,
    portal: Portal,
) -> axum::response::Sse<
    impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>,
> {
    use axum::response::sse::{Event, KeepAlive, Sse};
    use tokio_stream::wrappers::BroadcastStream;
    use tokio_stream::StreamExt;

    let user_id = portal.user_id;
    info!("Notification stream opened for {}", user_id);
    let stream = BroadcastStream::new(state.feed.subscribe()).filter_map(move |item| match item {
        Ok(n) if n.user_id == user_id => Event::default()
            .event("notification")
            .json_data(&n)
            .ok()
            .map(Ok),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Notification stream for {} fell behind: {}", user_id, e);
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============================================================================
// PROFILE & ADMIN
// ============================================================================

pub async fn update_own_profile(
    portal: Portal,
    Json(update): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let updated = admin::update_own_profile(store.as_ref(), &mut session.ctx, update).await?;
    Ok(Json(updated))
}

pub async fn admin_create_course(
    portal: Portal,
    Json(draft): Json<CourseDraft>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let created = admin::create_course(store.as_ref(), &mut session.ctx, draft).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn admin_update_course(
    portal: Portal,
    Path(course_id): Path<Uuid>,
    Json(draft): Json<CourseDraft>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let course = admin::update_course(store.as_ref(), &mut session.ctx, course_id, draft).await?;
    Ok(Json(course))
}

pub async fn admin_delete_course(
    State(state): State<Arc<AppState>>,
    portal: Portal,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let deleted =
        admin::delete_course(store.as_ref(), &mut session.ctx, state.assets_bucket(), course_id)
            .await?;
    Ok(Json(deleted))
}

pub async fn admin_approve_user(
    portal: Portal,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let user = admin::approve_user(store.as_ref(), &mut session.ctx, user_id).await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: Role,
}

pub async fn admin_change_role(
    portal: Portal,
    Path(user_id): Path<Uuid>,
    Json(req): Json<RoleRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let user = admin::change_role(store.as_ref(), &mut session.ctx, user_id, req.role).await?;
    Ok(Json(user))
}

pub async fn admin_update_profile(
    portal: Portal,
    Path(user_id): Path<Uuid>,
    Json(update): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let user = admin::update_profile(store.as_ref(), &mut session.ctx, user_id, update).await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
}

pub async fn admin_add_category(
    portal: Portal,
    Json(req): Json<CategoryRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let category = admin::add_category(store.as_ref(), &mut session.ctx, &req.name).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn admin_rename_category(
    portal: Portal,
    Path(category_id): Path<Uuid>,
    Json(req): Json<CategoryRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let category =
        admin::rename_category(store.as_ref(), &mut session.ctx, category_id, &req.name).await?;
    Ok(Json(category))
}

pub async fn admin_delete_category(
    portal: Portal,
    Path(category_id): Path<Uuid>,
) -> Result<StatusCode, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    admin::delete_category(store.as_ref(), &mut session.ctx, category_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn admin_add_resource(
    portal: Portal,
    Json(resource): Json<NewResource>,
) -> Result<impl IntoResponse, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    let saved = admin::add_resource(store.as_ref(), &mut session.ctx, resource).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn admin_delete_resource(
    portal: Portal,
    Path(resource_id): Path<Uuid>,
) -> Result<StatusCode, LearnError> {
    let mut session = portal.session.lock().await;
    let store = Arc::clone(&session.store);
    admin::delete_resource(store.as_ref(), &mut session.ctx, resource_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub audience: Audience,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
}

pub async fn admin_send_notification(
    portal: Portal,
    Json(req): Json<SendNotificationRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let session = portal.session.lock().await;
    let broadcast = admin::send_notification(
        session.store.as_ref(),
        &session.ctx,
        req.audience,
        req.kind,
        &req.message,
    )
    .await?;
    Ok(Json(broadcast))
}

pub async fn admin_analytics(portal: Portal) -> Result<impl IntoResponse, LearnError> {
    let session = portal.session.lock().await;
    Ok(Json(admin::analytics(&session.ctx)?))
}
