use crate::backend::InMemoryStore;
use crate::core::config::{AppConfig, BackendKind};
use crate::core::shared::state::AppState;
use crate::learn::types::{Course, Identity, Module, ModuleKind, QuizQuestion, Role};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

pub fn learner(name: &str, email: &str) -> Identity {
    Identity {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: email.to_string(),
        role: Role::Learner,
        approved: true,
        points: 0,
        badges: BTreeSet::new(),
        profile_image_url: None,
    }
}

pub fn admin(name: &str, email: &str) -> Identity {
    Identity {
        role: Role::Administrator,
        ..learner(name, email)
    }
}

/// Course with `modules` text modules and a two-question quiz whose right
/// answers are both option 1.
pub fn course(title: &str, passing_score: u8, modules: usize) -> Course {
    let id = Uuid::new_v4();
    Course {
        id,
        title: title.to_string(),
        description: format!("{title} description"),
        category: String::new(),
        modules: (1..=modules)
            .map(|n| Module {
                id: format!("m-{}-{n}", id.simple()),
                title: format!("Module {n}"),
                kind: ModuleKind::Text,
                content: "Lorem ipsum".to_string(),
                video_source: None,
            })
            .collect(),
        quiz: (1..=2)
            .map(|n| QuizQuestion {
                question: format!("Question {n}"),
                options: vec!["a".into(), "b".into(), "c".into()],
                correct_answer: 1,
            })
            .collect(),
        passing_score,
        image_url: None,
        reviews: Vec::new(),
        discussion: Vec::new(),
        textbook_url: None,
        textbook_name: None,
        created_at: Some(Utc::now()),
    }
}

#[derive(Debug)]
pub struct TestAppStateBuilder {
    config: AppConfig,
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.backend.kind = BackendKind::Memory;
        Self { config }
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self, store: &InMemoryStore) -> Arc<AppState> {
        Arc::new(AppState::new(self.config, Arc::new(store.clone())))
    }
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
