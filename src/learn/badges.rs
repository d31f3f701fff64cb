use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Closed set of achievement badges. Declaration order is evaluation order,
/// which is also the order badge notifications go out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Badge {
    FirstCourse,
    ProlificLearner,
    QuizMaster,
    Completionist,
}

/// What the badge rules look at. Taken once per evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadgeSnapshot {
    pub completed_courses: usize,
    pub total_courses: usize,
    pub score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BadgeAward {
    pub badges: Vec<Badge>,
    pub points: u32,
}

impl BadgeAward {
    pub fn is_empty(&self) -> bool {
        self.badges.is_empty()
    }

    /// Union of `held` and the newly awarded ids.
    pub fn merged_with(&self, held: &BTreeSet<String>) -> BTreeSet<String> {
        let mut all = held.clone();
        all.extend(self.badges.iter().map(|b| b.id().to_string()));
        all
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BadgeInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub points: u32,
}

impl Badge {
    pub const ALL: [Badge; 4] = [
        Badge::FirstCourse,
        Badge::ProlificLearner,
        Badge::QuizMaster,
        Badge::Completionist,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Badge::FirstCourse => "first-course",
            Badge::ProlificLearner => "prolific-learner",
            Badge::QuizMaster => "quiz-master",
            Badge::Completionist => "completionist",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Badge::FirstCourse => "First Steps",
            Badge::ProlificLearner => "Prolific Learner",
            Badge::QuizMaster => "Quiz Master",
            Badge::Completionist => "Completionist",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Badge::FirstCourse => "Completed your first course.",
            Badge::ProlificLearner => "Completed 3 courses.",
            Badge::QuizMaster => "Scored 100% on a quiz.",
            Badge::Completionist => "Completed every course in the catalog.",
        }
    }

    pub fn points(self) -> u32 {
        match self {
            Badge::FirstCourse => 50,
            Badge::ProlificLearner => 100,
            Badge::QuizMaster => 75,
            Badge::Completionist => 200,
        }
    }

    pub fn qualifies(self, snapshot: &BadgeSnapshot) -> bool {
        match self {
            Badge::FirstCourse => snapshot.completed_courses >= 1,
            Badge::ProlificLearner => snapshot.completed_courses >= 3,
            Badge::QuizMaster => snapshot.score == 100,
            Badge::Completionist => {
                snapshot.total_courses > 0 && snapshot.completed_courses == snapshot.total_courses
            }
        }
    }

    pub fn info(self) -> BadgeInfo {
        BadgeInfo {
            id: self.id(),
            name: self.name(),
            description: self.description(),
            points: self.points(),
        }
    }

    pub fn notification_message(self) -> String {
        format!(
            "You earned the \"{}\" badge and {} points!",
            self.name(),
            self.points()
        )
    }
}

/// Runs every rule against one snapshot. Badges already in `held` are skipped,
/// and nothing awarded in this pass feeds back into the snapshot.
pub fn evaluate(snapshot: &BadgeSnapshot, held: &BTreeSet<String>) -> BadgeAward {
    let mut award = BadgeAward::default();
    for badge in Badge::ALL {
        if held.contains(badge.id()) || !badge.qualifies(snapshot) {
            continue;
        }
        award.points += badge.points();
        award.badges.push(badge);
    }
    award
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_completion_awards_first_course() {
        let snapshot = BadgeSnapshot {
            completed_courses: 1,
            total_courses: 5,
            score: 85,
        };
        let award = evaluate(&snapshot, &BTreeSet::new());
        assert_eq!(award.badges, vec![Badge::FirstCourse]);
        assert_eq!(award.points, 50);
    }

    #[test]
    fn test_perfect_score_on_second_course() {
        let snapshot = BadgeSnapshot {
            completed_courses: 2,
            total_courses: 5,
            score: 100,
        };
        let award = evaluate(&snapshot, &held(&["first-course"]));
        assert_eq!(award.badges, vec![Badge::QuizMaster]);
        assert_eq!(award.points, 75);
    }

    #[test]
    fn test_all_rules_in_one_pass_keep_order() {
        let snapshot = BadgeSnapshot {
            completed_courses: 3,
            total_courses: 3,
            score: 100,
        };
        let award = evaluate(&snapshot, &BTreeSet::new());
        assert_eq!(award.badges, Badge::ALL.to_vec());
        assert_eq!(award.points, 50 + 100 + 75 + 200);
    }

    #[test]
    fn test_holding_everything_awards_nothing() {
        let snapshot = BadgeSnapshot {
            completed_courses: 4,
            total_courses: 4,
            score: 100,
        };
        let all = held(&["first-course", "prolific-learner", "quiz-master", "completionist"]);
        let award = evaluate(&snapshot, &all);
        assert!(award.is_empty());
        assert_eq!(award.points, 0);
    }

    #[test]
    fn test_completionist_needs_a_catalog() {
        let snapshot = BadgeSnapshot {
            completed_courses: 0,
            total_courses: 0,
            score: 90,
        };
        assert!(!Badge::Completionist.qualifies(&snapshot));
    }

    #[test]
    fn test_merge_keeps_unknown_ids() {
        let award = BadgeAward {
            badges: vec![Badge::FirstCourse],
            points: 50,
        };
        let merged = award.merged_with(&held(&["legacy-badge"]));
        assert!(merged.contains("legacy-badge"));
        assert!(merged.contains("first-course"));
    }

    #[test]
    fn test_ids_round_trip_through_registry() {
        for badge in Badge::ALL {
            assert_eq!(Badge::from_id(badge.id()), Some(badge));
            assert_eq!(
                serde_json::to_value(badge).unwrap(),
                serde_json::Value::String(badge.id().to_string())
            );
        }
        assert_eq!(Badge::from_id("unknown"), None);
    }

    #[test]
    fn test_catalogue_ids_and_points() {
        let catalogue: Vec<(&str, u32)> = Badge::ALL.iter().map(|b| (b.id(), b.points())).collect();
        assert_eq!(
            catalogue,
            vec![
                ("first-course", 50),
                ("prolific-learner", 100),
                ("quiz-master", 75),
                ("completionist", 200),
            ]
        );
    }
}
