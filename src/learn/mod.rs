//! # Learn Module - corporate e-learning portal
//!
//! - Course catalog, enrolment and module progress per identity
//! - Quiz grading with certificates on first pass
//! - Points, badges and the leaderboard
//! - Course reviews and threaded discussion
//! - In-app notifications with a push stream
//! - Administration of courses, users, categories and resources
//!
//! ## Architecture
//!
//! - `reconciler` keeps remote progress/gamification state and the session
//!   mirror consistent
//! - `catalog` loads and shapes what a role may see
//! - `handlers` exposes it all over axum

pub mod admin;
pub mod badges;
pub mod catalog;
pub mod discussion;
pub mod error;
pub mod handlers;
pub mod notifications;
pub mod reconciler;
pub mod types;
pub mod views;

pub use error::LearnError;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

use crate::core::shared::state::AppState;
use handlers::*;

pub fn configure_learn_routes() -> Router<Arc<AppState>> {
    let router = Router::new()
        // Auth
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/register", post(register))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/recover", post(recover_password))
        .route("/api/auth/password", post(update_password))
        // Session
        .route("/api/session", get(get_session))
        .route("/api/navigation", post(navigate))
        .route("/api/profile", put(update_own_profile))
        // Catalog
        .route("/api/featured", get(featured_courses))
        .route("/api/courses", get(list_courses))
        .route("/api/courses/:id", get(get_course))
        .route("/api/courses/:id/enroll", post(enroll))
        .route("/api/courses/:id/open", post(open_course))
        .route(
            "/api/courses/:id/modules/:module_id/complete",
            post(complete_module),
        )
        .route("/api/courses/:id/quiz", post(submit_quiz))
        .route("/api/courses/:id/rating", post(rate_course))
        .route("/api/courses/:id/discussion", post(create_post))
        .route(
            "/api/courses/:id/discussion/:post_id/replies",
            post(create_reply),
        )
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/certificates", get(list_certificates))
        .route("/api/certificates/:course_id", get(get_certificate))
        // Notifications
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read", post(mark_notifications_read))
        // Admin
        .route("/api/admin/courses", post(admin_create_course))
        .route(
            "/api/admin/courses/:id",
            put(admin_update_course).delete(admin_delete_course),
        )
        .route("/api/admin/users/:id/approve", post(admin_approve_user))
        .route("/api/admin/users/:id/role", put(admin_change_role))
        .route("/api/admin/users/:id/profile", put(admin_update_profile))
        .route("/api/admin/categories", post(admin_add_category))
        .route(
            "/api/admin/categories/:id",
            put(admin_rename_category).delete(admin_delete_category),
        )
        .route("/api/admin/resources", post(admin_add_resource))
        .route("/api/admin/resources/:id", delete(admin_delete_resource))
        .route("/api/admin/notifications", post(admin_send_notification))
        .route("/api/admin/analytics", get(admin_analytics));

    #[cfg(feature = "realtime")]
    let router = router.route("/api/notifications/stream", get(notification_stream));

    router
}
