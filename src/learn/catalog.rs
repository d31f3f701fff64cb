use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use super::types::{CertificateData, Course, Identity, ProgressMap, Role};
use super::LearnError;
use crate::backend::RemoteStore;
use crate::session::SessionContext;

pub const FEATURED_COURSE_COUNT: usize = 3;

/// Loads everything the identity's role may see and shapes it into a fresh
/// session context. Reads run concurrently; the first failure fails the load.
pub async fn load(store: &dyn RemoteStore, identity: Identity) -> Result<SessionContext, LearnError> {
    let progress_scope = match identity.role {
        Role::Administrator => None,
        Role::Learner => Some(identity.id),
    };

    let (courses, resources, categories, notifications, users, progress) = tokio::try_join!(
        store.list_courses(),
        store.list_resources(),
        store.list_categories(),
        store.list_notifications(identity.id),
        store.list_users(),
        store.list_progress(progress_scope),
    )?;

    debug!(
        "Loaded {} courses, {} progress rows for {}",
        courses.len(),
        progress.len(),
        identity.id
    );

    let mut ctx = SessionContext::for_identity(identity);
    ctx.courses = courses;
    ctx.resources = resources;
    ctx.categories = categories;
    ctx.notifications = notifications;
    ctx.users = users;
    ctx.progress = ProgressMap::from_rows(progress);
    Ok(ctx)
}

/// Newest courses for the public home page. Never fails: an unreachable
/// backend just means an empty shelf.
pub async fn featured_courses(store: &dyn RemoteStore) -> Vec<Course> {
    match store.list_featured_courses(FEATURED_COURSE_COUNT).await {
        Ok(courses) => courses,
        Err(e) => {
            warn!("Could not load featured courses: {}", e);
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseSort {
    #[default]
    Newest,
    Title,
    Modules,
    QuizLength,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourseQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub sort: CourseSort,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseCard {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub image_url: Option<String>,
    pub module_count: usize,
    pub quiz_length: usize,
    pub completed_modules: usize,
    pub progress_percent: u8,
    pub enrolled: bool,
    pub completed: bool,
    pub average_rating: Option<f32>,
}

fn compare(a: &Course, b: &Course, sort: CourseSort) -> Ordering {
    match sort {
        CourseSort::Newest => a.created_at.cmp(&b.created_at),
        CourseSort::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        CourseSort::Modules => a.modules.len().cmp(&b.modules.len()),
        CourseSort::QuizLength => a.quiz.len().cmp(&b.quiz.len()),
    }
}

pub fn filter_courses<'a>(courses: &'a [Course], query: &CourseQuery) -> Vec<&'a Course> {
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let category = query.category.as_deref().filter(|c| !c.is_empty() && *c != "all");

    let mut matched: Vec<&Course> = courses
        .iter()
        .filter(|c| category.map_or(true, |cat| c.category == cat))
        .filter(|c| {
            needle.as_ref().map_or(true, |n| {
                c.title.to_lowercase().contains(n) || c.description.to_lowercase().contains(n)
            })
        })
        .collect();

    matched.sort_by(|a, b| {
        let ord = compare(a, b, query.sort);
        match query.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
    matched
}

/// Course list as one learner sees it.
pub fn course_cards(ctx: &SessionContext, query: &CourseQuery) -> Vec<CourseCard> {
    filter_courses(&ctx.courses, query)
        .into_iter()
        .map(|course| {
            let progress = ctx.my_progress(course.id);
            let completed_modules = progress.map_or(0, |p| {
                p.completed_modules
                    .iter()
                    .filter(|m| course.module(m).is_some())
                    .count()
            });
            let progress_percent = if course.modules.is_empty() {
                0
            } else {
                ((completed_modules * 100) / course.modules.len()) as u8
            };
            CourseCard {
                id: course.id,
                title: course.title.clone(),
                description: course.description.clone(),
                category: course.category.clone(),
                image_url: course.image_url.clone(),
                module_count: course.modules.len(),
                quiz_length: course.quiz.len(),
                completed_modules,
                progress_percent,
                enrolled: progress.is_some(),
                completed: progress.is_some_and(|p| p.is_completed()),
                average_rating: course.average_rating(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub id: Uuid,
    pub name: String,
    pub points: i64,
    pub badge_count: usize,
    pub profile_image_url: Option<String>,
}

/// Learners by points, highest first; ties broken by name.
pub fn leaderboard(users: &[Identity]) -> Vec<LeaderboardEntry> {
    let mut learners: Vec<&Identity> = users.iter().filter(|u| u.role == Role::Learner).collect();
    learners.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.name.cmp(&b.name)));
    learners
        .into_iter()
        .enumerate()
        .map(|(i, u)| LeaderboardEntry {
            rank: i + 1,
            id: u.id,
            name: u.name.clone(),
            points: u.points,
            badge_count: u.badges.len(),
            profile_image_url: u.profile_image_url.clone(),
        })
        .collect()
}

/// Certificates the signed-in identity has earned, most recent first. Each
/// carries the original completion date.
pub fn certificates(ctx: &SessionContext) -> Vec<CertificateData> {
    let Some(me) = ctx.identity.as_ref() else {
        return Vec::new();
    };
    let mut earned: Vec<CertificateData> = ctx
        .progress
        .for_user(me.id)
        .filter_map(|p| {
            let date = p.completion_date?;
            let course = ctx.courses.iter().find(|c| c.id == p.course_id)?;
            Some(CertificateData {
                course_id: course.id,
                employee_name: me.name.clone(),
                course_name: course.title.clone(),
                completion_date: date,
            })
        })
        .collect();
    earned.sort_by(|a, b| b.completion_date.cmp(&a.completion_date));
    earned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryStore;
    use crate::core::shared::test_utils::{course, learner};
    use crate::learn::types::ProgressRecord;
    use chrono::{Duration, Utc};

    fn catalog() -> Vec<Course> {
        let now = Utc::now();
        let mut a = course("AML Basics", 70, 3);
        a.category = "Compliance".into();
        a.description = "Anti money laundering".into();
        a.created_at = Some(now - Duration::days(2));
        let mut b = course("Customer Care", 60, 1);
        b.category = "Service".into();
        b.created_at = Some(now - Duration::days(1));
        let mut c = course("KYC Deep Dive", 80, 5);
        c.category = "Compliance".into();
        c.created_at = Some(now);
        vec![a, b, c]
    }

    #[test]
    fn test_filter_by_category_and_search() {
        let courses = catalog();
        let query = CourseQuery {
            category: Some("Compliance".into()),
            ..Default::default()
        };
        let titles: Vec<&str> = filter_courses(&courses, &query)
            .iter()
            .map(|c| c.title.as_str())
            .collect();
        assert_eq!(titles, vec!["KYC Deep Dive", "AML Basics"]);

        let query = CourseQuery {
            search: Some("  money ".into()),
            ..Default::default()
        };
        assert_eq!(filter_courses(&courses, &query).len(), 1);
    }

    #[test]
    fn test_sort_by_module_count_ascending() {
        let courses = catalog();
        let query = CourseQuery {
            sort: CourseSort::Modules,
            direction: SortDirection::Asc,
            ..Default::default()
        };
        let counts: Vec<usize> = filter_courses(&courses, &query)
            .iter()
            .map(|c| c.modules.len())
            .collect();
        assert_eq!(counts, vec![1, 3, 5]);
    }

    #[test]
    fn test_leaderboard_only_ranks_learners() {
        let mut a = learner("Amina", "a@corp.test");
        a.points = 120;
        let mut b = learner("Bilal", "b@corp.test");
        b.points = 300;
        let mut root = crate::core::shared::test_utils::admin("Root", "r@corp.test");
        root.points = 1000;
        let board = leaderboard(&[a, b, root]);
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].name, "Bilal");
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[1].rank, 2);
    }

    #[test]
    fn test_course_cards_and_certificates() {
        let me = learner("Amina", "a@corp.test");
        let mut ctx = SessionContext::for_identity(me.clone());
        ctx.courses = catalog();
        let target = ctx.courses[0].clone();

        let mut record = ProgressRecord::new(me.id, target.id);
        record.completed_modules = vec![target.modules[0].id.clone(), "m-gone".into()];
        record.completion_date = Some(Utc::now());
        ctx.progress.insert(record);

        let cards = course_cards(&ctx, &CourseQuery::default());
        let card = cards.iter().find(|c| c.id == target.id).unwrap();
        assert!(card.enrolled);
        assert!(card.completed);
        assert_eq!(card.completed_modules, 1);
        assert_eq!(card.progress_percent, 33);

        let certs = certificates(&ctx);
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].course_name, "AML Basics");
    }

    #[tokio::test]
    async fn test_featured_courses_swallow_failures() {
        let store = InMemoryStore::new();
        for c in catalog() {
            store.seed_course(c).await;
        }
        let featured = featured_courses(&store).await;
        assert_eq!(featured.len(), 3);
        assert_eq!(featured[0].title, "KYC Deep Dive");

        store.fail_on("list_featured_courses").await;
        assert!(featured_courses(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_load_fails_on_first_error() {
        let store = InMemoryStore::new();
        let me = learner("Amina", "a@corp.test");
        store.seed_user(me.clone(), "secret1").await;
        store.fail_on("list_resources").await;
        let err = load(&store.as_user(me.id), me).await.unwrap_err();
        assert!(matches!(err, LearnError::Remote(_)));
    }
}
