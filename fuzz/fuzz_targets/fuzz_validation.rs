//! Fuzz target for project input validation.
//!
//! Every validator must return a `Result` for any input, never panic.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use cineforge_gateway::models::CreateProjectRequest;
use cineforge_gateway::validation::{
    parse_project_id, validate_description, validate_new_project, validate_project_title,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = validate_project_title(s);
        let _ = validate_description(Some(s));
        let _ = parse_project_id(s);
    }

    // Whole request bodies, as the create handler sees them
    if let Ok(request) = serde_json::from_slice::<CreateProjectRequest>(data) {
        if let Ok(project) = validate_new_project(request) {
            assert!(!project.title.is_empty());
            assert_eq!(project.title, project.title.trim());
        }
    }
});
