mod health;
mod identity;
mod projects;

pub use health::{health_check, readiness_check, root};
pub use identity::me;
pub use projects::{create_project, delete_project, get_project, list_projects};
