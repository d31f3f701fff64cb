//! Types for the Learn module
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use super::badges::Badge;

/// Module ids are free-form strings minted by the course editor (`m-<millis>-<n>`).
pub type ModuleId = String;

/// Treats an explicit JSON `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// IDENTITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "employee", alias = "learner")]
    Learner,
    #[serde(rename = "admin", alias = "administrator")]
    Administrator,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Administrator)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Learner => write!(f, "employee"),
            Role::Administrator => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_default")]
    pub approved: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub points: i64,
    /// Raw badge ids as stored. Ids this build does not know are carried
    /// through untouched so a badge replace never drops them.
    #[serde(default, deserialize_with = "null_as_default")]
    pub badges: BTreeSet<String>,
    #[serde(
        default,
        rename = "profileImageUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_image_url: Option<String>,
}

impl Identity {
    pub fn holds(&self, badge: Badge) -> bool {
        self.badges.contains(badge.id())
    }

    /// May this identity enter the app at all? Administrators always can.
    pub fn may_sign_in(&self) -> bool {
        self.approved || self.role.is_admin()
    }

    pub fn known_badges(&self) -> Vec<Badge> {
        self.badges.iter().filter_map(|id| Badge::from_id(id)).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "profileImageUrl", skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl UserPatch {
    pub fn apply_to(&self, identity: &mut Identity) {
        if let Some(name) = &self.name {
            identity.name = name.clone();
        }
        if let Some(email) = &self.email {
            identity.email = email.clone();
        }
        if let Some(url) = &self.profile_image_url {
            identity.profile_image_url = Some(url.clone());
        }
        if let Some(approved) = self.approved {
            identity.approved = approved;
        }
        if let Some(role) = self.role {
            identity.role = role;
        }
    }
}

// ============================================================================
// COURSES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Text,
    Video,
    Pdf,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSource {
    Embed,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ModuleKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(rename = "videoType", default, skip_serializing_if = "Option::is_none")]
    pub video_source: Option<VideoSource>,
}

impl Module {
    pub fn is_uploaded_video(&self) -> bool {
        self.kind == ModuleKind::Video && self.video_source == Some(VideoSource::Upload)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    #[serde(rename = "correctAnswer")]
    pub correct_answer: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub course_id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub rating: u8,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReview {
    pub course_id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub rating: u8,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionPost {
    pub id: String,
    pub author_id: Uuid,
    #[serde(rename = "authorName")]
    pub author_name: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub replies: Vec<DiscussionPost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub modules: Vec<Module>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quiz: Vec<QuizQuestion>,
    pub passing_score: u8,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reviews: Vec<Review>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub discussion: Vec<DiscussionPost>,
    #[serde(default)]
    pub textbook_url: Option<String>,
    #[serde(default)]
    pub textbook_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Course {
    pub fn module(&self, module_id: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == module_id)
    }

    /// Zero-based ordering position of a module within this course.
    pub fn module_position(&self, module_id: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.id == module_id)
    }

    pub fn has_quiz(&self) -> bool {
        !self.quiz.is_empty()
    }

    pub fn passes(&self, score: u8) -> bool {
        score >= self.passing_score
    }

    pub fn average_rating(&self) -> Option<f32> {
        if self.reviews.is_empty() {
            return None;
        }
        let total: u32 = self.reviews.iter().map(|r| u32::from(r.rating)).sum();
        Some(total as f32 / self.reviews.len() as f32)
    }
}

/// Editable course fields as submitted by the course editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseDraft {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub passing_score: i32,
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub quiz: Vec<QuizQuestion>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub textbook_url: Option<String>,
    #[serde(default)]
    pub textbook_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalResource {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewResource {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// PROGRESS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub user_id: Uuid,
    pub course_id: Uuid,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completed_modules: Vec<ModuleId>,
    #[serde(default)]
    pub quiz_score: Option<u8>,
    #[serde(default)]
    pub completion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default, rename = "recently_viewed")]
    pub last_viewed: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    pub fn new(user_id: Uuid, course_id: Uuid) -> Self {
        Self {
            user_id,
            course_id,
            completed_modules: Vec::new(),
            quiz_score: None,
            completion_date: None,
            rating: None,
            last_viewed: None,
        }
    }

    pub fn has_completed_module(&self, module_id: &str) -> bool {
        self.completed_modules.iter().any(|m| m == module_id)
    }

    pub fn is_completed(&self) -> bool {
        self.completion_date.is_some()
    }

    /// Folds a confirmed partial write into this record. Fields the patch does
    /// not carry stay as they were.
    pub fn merge(&mut self, patch: &ProgressPatch) {
        if let Some(modules) = &patch.completed_modules {
            self.completed_modules = modules.clone();
        }
        if let Some(score) = patch.quiz_score {
            self.quiz_score = Some(score);
        }
        if let Some(date) = patch.completion_date {
            self.completion_date = Some(date);
        }
        if let Some(rating) = patch.rating {
            self.rating = Some(rating);
        }
        if let Some(viewed) = patch.last_viewed {
            self.last_viewed = Some(viewed);
        }
    }
}

/// Partial upsert on the (user_id, course_id) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPatch {
    pub user_id: Uuid,
    pub course_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_modules: Option<Vec<ModuleId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(rename = "recently_viewed", skip_serializing_if = "Option::is_none")]
    pub last_viewed: Option<DateTime<Utc>>,
}

impl ProgressPatch {
    pub fn new(user_id: Uuid, course_id: Uuid) -> Self {
        Self {
            user_id,
            course_id,
            completed_modules: None,
            quiz_score: None,
            completion_date: None,
            rating: None,
            last_viewed: None,
        }
    }

    pub fn completed_modules(mut self, modules: Vec<ModuleId>) -> Self {
        self.completed_modules = Some(modules);
        self
    }

    pub fn quiz_score(mut self, score: u8) -> Self {
        self.quiz_score = Some(score);
        self
    }

    pub fn completion_date(mut self, date: DateTime<Utc>) -> Self {
        self.completion_date = Some(date);
        self
    }

    pub fn rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn last_viewed(mut self, at: DateTime<Utc>) -> Self {
        self.last_viewed = Some(at);
        self
    }
}

/// identity id -> course id -> progress, the nested shape the views read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressMap(HashMap<Uuid, HashMap<Uuid, ProgressRecord>>);

impl ProgressMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = ProgressRecord>) -> Self {
        let mut map = Self::new();
        for row in rows {
            map.insert(row);
        }
        map
    }

    pub fn insert(&mut self, record: ProgressRecord) {
        self.0
            .entry(record.user_id)
            .or_default()
            .insert(record.course_id, record);
    }

    pub fn get(&self, user_id: Uuid, course_id: Uuid) -> Option<&ProgressRecord> {
        self.0.get(&user_id).and_then(|courses| courses.get(&course_id))
    }

    pub fn get_mut(&mut self, user_id: Uuid, course_id: Uuid) -> Option<&mut ProgressRecord> {
        self.0
            .get_mut(&user_id)
            .and_then(|courses| courses.get_mut(&course_id))
    }

    pub fn for_user(&self, user_id: Uuid) -> impl Iterator<Item = &ProgressRecord> {
        self.0.get(&user_id).into_iter().flat_map(|courses| courses.values())
    }

    pub fn completed_count(&self, user_id: Uuid) -> usize {
        self.for_user(user_id).filter(|p| p.is_completed()).count()
    }

    pub fn all(&self) -> impl Iterator<Item = &ProgressRecord> {
        self.0.values().flat_map(|courses| courses.values())
    }

    /// Drops every identity's record for a deleted course.
    pub fn remove_course(&mut self, course_id: Uuid) {
        for courses in self.0.values_mut() {
            courses.remove(&course_id);
        }
        self.0.retain(|_, courses| !courses.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Certificate,
    Badge,
    NewCourse,
    Reminder,
    Announcement,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::Certificate => "certificate",
            NotificationType::Badge => "badge",
            NotificationType::NewCourse => "new_course",
            NotificationType::Reminder => "reminder",
            NotificationType::Announcement => "announcement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// CERTIFICATES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateData {
    pub course_id: Uuid,
    pub employee_name: String,
    pub course_name: String,
    /// First passing date; retakes never move it.
    pub completion_date: DateTime<Utc>,
}

impl CertificateData {
    /// Long English date as printed on the certificate, e.g. "March 5, 2025".
    pub fn formatted_date(&self) -> String {
        self.completion_date.format("%B %-d, %Y").to_string()
    }

    pub fn share_text(&self) -> String {
        format!(
            "I'm proud to have earned a certificate for completing the '{}' course! #ProfessionalDevelopment",
            self.course_name
        )
    }

    /// Share intents pointing at the certificate's public image.
    pub fn share_links(&self, public_url: &str) -> ShareLinks {
        let url = urlencoding::encode(public_url);
        let text = urlencoding::encode(&self.share_text()).into_owned();
        ShareLinks {
            linkedin: format!("https://www.linkedin.com/sharing/share-offsite/?url={url}"),
            twitter: format!("https://twitter.com/intent/tweet?text={text}"),
            facebook: format!("https://www.facebook.com/sharer/sharer.php?u={url}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareLinks {
    pub linkedin: String,
    pub twitter: String,
    pub facebook: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Learner).unwrap(), "\"employee\"");
        assert_eq!(serde_json::to_string(&Role::Administrator).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"learner\"").unwrap();
        assert_eq!(role, Role::Learner);
    }

    #[test]
    fn test_identity_tolerates_null_badges() {
        let identity: Identity = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(),
            "name": "Amina",
            "role": "employee",
            "approved": true,
            "points": 40,
            "badges": null
        }))
        .unwrap();
        assert!(identity.badges.is_empty());
        assert!(identity.may_sign_in());
    }

    #[test]
    fn test_unapproved_admin_may_sign_in() {
        let identity: Identity = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(),
            "name": "Root",
            "role": "admin",
            "approved": false
        }))
        .unwrap();
        assert!(identity.may_sign_in());
    }

    #[test]
    fn test_course_row_from_backend() {
        let course: Course = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(),
            "title": "AML Basics",
            "description": null,
            "category": "Compliance",
            "passing_score": 70,
            "modules": [
                {"id": "m-1", "title": "Intro", "type": "text", "content": "..."},
                {"id": "m-2", "title": "Video", "type": "video", "content": "https://x/y.mp4", "videoType": "upload"}
            ],
            "quiz": [{"question": "Q", "options": ["a", "b"], "correctAnswer": 1}],
            "reviews": null
        }))
        .unwrap();
        assert_eq!(course.description, "");
        assert_eq!(course.module_position("m-2"), Some(1));
        assert!(course.modules[1].is_uploaded_video());
        assert!(course.passes(70));
        assert!(!course.passes(69));
        assert_eq!(course.average_rating(), None);
    }

    #[test]
    fn test_progress_patch_serializes_only_set_fields() {
        let patch = ProgressPatch::new(Uuid::nil(), Uuid::nil()).quiz_score(85);
        let value = serde_json::to_value(&patch).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["quiz_score"], 85);
        assert!(!object.contains_key("completion_date"));
    }

    #[test]
    fn test_progress_map_flattening() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut done = ProgressRecord::new(user, Uuid::new_v4());
        done.completion_date = Some(Utc::now());
        let map = ProgressMap::from_rows(vec![
            done,
            ProgressRecord::new(user, Uuid::new_v4()),
            ProgressRecord::new(other, Uuid::new_v4()),
        ]);
        assert_eq!(map.for_user(user).count(), 2);
        assert_eq!(map.completed_count(user), 1);
        assert_eq!(map.completed_count(other), 0);
        assert_eq!(map.all().count(), 3);
    }

    #[test]
    fn test_certificate_date_format() {
        let cert = CertificateData {
            course_id: Uuid::nil(),
            employee_name: "Amina".into(),
            course_name: "AML Basics".into(),
            completion_date: Utc.with_ymd_and_hms(2025, 3, 5, 10, 0, 0).unwrap(),
        };
        assert_eq!(cert.formatted_date(), "March 5, 2025");
    }

    #[test]
    fn test_share_links_encode_url_and_text() {
        let cert = CertificateData {
            course_id: Uuid::nil(),
            employee_name: "Amina".into(),
            course_name: "AML & KYC".into(),
            completion_date: Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap(),
        };
        let links = cert.share_links("https://x.test/c.png?v=1");
        assert_eq!(
            links.linkedin,
            "https://www.linkedin.com/sharing/share-offsite/?url=https%3A%2F%2Fx.test%2Fc.png%3Fv%3D1"
        );
        assert!(links.twitter.contains("AML%20%26%20KYC"));
        assert!(links.facebook.starts_with("https://www.facebook.com/sharer/sharer.php?u=https%3A"));
    }
}
