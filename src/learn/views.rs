//! Page and view routing for a session.
//!
//! Pages are the top-level screens (public home, login, register, the app);
//! views are the screens inside the app. [`Navigation::resolve`] decides what
//! actually gets shown for a role, so a stale or forbidden view never renders.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{CertificateData, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    Home,
    Login,
    Register,
    App,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminTab {
    #[default]
    Courses,
    Users,
    Categories,
    Resources,
    Notifications,
    Analytics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "tab", rename_all = "lowercase")]
pub enum View {
    Dashboard,
    Courses,
    Course,
    Certificate,
    Admin(AdminTab),
    Leaderboard,
    Resources,
    Profile,
    Certificates,
}

pub fn landing_view(role: Role) -> View {
    match role {
        Role::Administrator => View::Admin(AdminTab::Courses),
        Role::Learner => View::Dashboard,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    pub page: Page,
    pub view: View,
    pub selected_course: Option<Uuid>,
    pub certificate: Option<CertificateData>,
}

impl Default for Navigation {
    fn default() -> Self {
        Self::public()
    }
}

impl Navigation {
    pub fn public() -> Self {
        Self {
            page: Page::Home,
            view: View::Dashboard,
            selected_course: None,
            certificate: None,
        }
    }

    pub fn landing(role: Role) -> Self {
        Self {
            page: Page::App,
            view: landing_view(role),
            selected_course: None,
            certificate: None,
        }
    }

    /// Switches view and drops any selected course or certificate.
    pub fn navigate(&mut self, view: View) {
        self.selected_course = None;
        self.certificate = None;
        self.view = view;
    }

    pub fn set_page(&mut self, page: Page) {
        self.page = page;
    }

    pub fn select_course(&mut self, course_id: Uuid) {
        self.certificate = None;
        self.selected_course = Some(course_id);
        self.view = View::Course;
    }

    pub fn show_certificate(&mut self, certificate: CertificateData) {
        self.certificate = Some(certificate);
        self.view = View::Certificate;
    }

    /// The view that is rendered for `role` given the current state.
    pub fn resolve(&self, role: Role) -> View {
        match (self.view, role) {
            (View::Profile, _) => View::Profile,
            (View::Admin(tab), Role::Administrator) => View::Admin(tab),
            (_, Role::Administrator) => View::Admin(AdminTab::default()),
            (View::Admin(_), Role::Learner) => View::Dashboard,
            (View::Course, Role::Learner) if self.selected_course.is_none() => View::Dashboard,
            (View::Certificate, Role::Learner) if self.certificate.is_none() => View::Dashboard,
            (view, Role::Learner) => view,
        }
    }
}
