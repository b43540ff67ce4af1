mod api;
mod project;

pub use api::{
    CreateProjectRequest, HealthResponse, IdentityResponse, MessageResponse, ReadyResponse,
};
pub use project::{NewProject, Project};
