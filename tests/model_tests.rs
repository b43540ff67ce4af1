//! Wire-shape tests for the public models.
//!
//! Run with: `cargo test --test model_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use serde_json::{Map, json};
use uuid::Uuid;

mod project_tests {
    use super::*;
    use cineforge_gateway::models::{CreateProjectRequest, Project};

    #[test]
    fn test_project_omits_missing_description() {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            owner_id: "user-1".to_string(),
            title: "Pilot".to_string(),
            description: None,
            created_at: now,
            updated_at: now,
        };

        let value = serde_json::to_value(&project).unwrap();
        assert!(value.get("description").is_none());
        assert_eq!(value["owner_id"], "user-1");
        assert_eq!(value["id"], project.id.to_string());
    }

    #[test]
    fn test_project_deserializes_without_description() {
        let raw = json!({
            "id": Uuid::nil(),
            "owner_id": "user-1",
            "title": "Pilot",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z",
        });

        let project: Project = serde_json::from_value(raw).unwrap();
        assert_eq!(project.description, None);
        assert_eq!(project.id, Uuid::nil());
    }

    #[test]
    fn test_create_request_rejects_unknown_fields() {
        let result: Result<CreateProjectRequest, _> =
            serde_json::from_value(json!({ "title": "Pilot", "owner_id": "someone-else" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_create_request_description_optional() {
        let request: CreateProjectRequest =
            serde_json::from_value(json!({ "title": "Pilot" })).unwrap();
        assert_eq!(request.title, "Pilot");
        assert!(request.description.is_none());
    }
}

mod response_tests {
    use super::*;
    use cineforge_gateway::models::{HealthResponse, IdentityResponse, ReadyResponse};

    #[test]
    fn test_health_response_shape() {
        let response = HealthResponse {
            status: "ok".to_string(),
            env: "production".to_string(),
            version: "0.1.0".to_string(),
            timestamp: Utc::now(),
            uptime_seconds: 12,
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["env"], "production");
        assert_eq!(value["uptime_seconds"], 12);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_ready_response_shape() {
        let value = serde_json::to_value(ReadyResponse {
            ready: false,
            store: false,
        })
        .unwrap();
        assert_eq!(value, json!({ "ready": false, "store": false }));
    }

    #[test]
    fn test_identity_response_carries_extra_claims() {
        let mut claims = Map::new();
        claims.insert("role".to_string(), json!("editor"));

        let value = serde_json::to_value(IdentityResponse {
            id: "user-9".to_string(),
            expires_at: 1_700_000_000,
            claims,
        })
        .unwrap();
        assert_eq!(value["id"], "user-9");
        assert_eq!(value["expires_at"], 1_700_000_000);
        assert_eq!(value["claims"]["role"], "editor");
    }
}
