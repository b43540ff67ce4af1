use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{CreateProjectRequest, NewProject};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length for project titles, in characters.
pub const MAX_TITLE_LENGTH: usize = 200;

/// Maximum length for project descriptions, in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 5000;

/// Client-visible message for unknown or foreign projects.
pub const PROJECT_NOT_FOUND: &str = "Project not found.";

/// Validate a project title and return it trimmed.
///
/// Rules:
/// - Must be between 1 and 200 characters after trimming
/// - Cannot contain control characters
pub fn validate_project_title(title: &str) -> AppResult<String> {
    let title = title.trim();

    if title.is_empty() {
        return Err(AppError::BadRequest(
            "Project title cannot be empty".to_string(),
        ));
    }

    let len = title.chars().count();
    if len > MAX_TITLE_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Project title cannot exceed {MAX_TITLE_LENGTH} characters (got {len})"
        )));
    }

    if let Some(pos) = title.chars().position(char::is_control) {
        return Err(AppError::BadRequest(format!(
            "Project title contains invalid control character at position {pos}"
        )));
    }

    Ok(title.to_string())
}

/// Validate an optional description. Blank descriptions become `None`.
///
/// Newlines and tabs are allowed; other control characters are not.
pub fn validate_description(description: Option<&str>) -> AppResult<Option<String>> {
    let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };

    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Project description cannot exceed {MAX_DESCRIPTION_LENGTH} characters"
        )));
    }

    if description
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
    {
        return Err(AppError::BadRequest(
            "Project description contains invalid control characters".to_string(),
        ));
    }

    Ok(Some(description.to_string()))
}

/// Validate a create request into a [`NewProject`].
pub fn validate_new_project(request: CreateProjectRequest) -> AppResult<NewProject> {
    Ok(NewProject {
        title: validate_project_title(&request.title)?,
        description: validate_description(request.description.as_deref())?,
    })
}

/// Parse a project id from a path segment.
///
/// A malformed id can never match a stored project, so it is reported as
/// not found rather than as a bad request.
pub fn parse_project_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound(PROJECT_NOT_FOUND.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_titles() {
        assert_eq!(validate_project_title("Night Shoot").unwrap(), "Night Shoot");
        assert_eq!(validate_project_title("  padded  ").unwrap(), "padded");
        assert!(validate_project_title("a").is_ok());
        assert!(validate_project_title("Épisode 2 – Le Retour").is_ok());
    }

    #[test]
    fn test_empty_title() {
        for title in ["", "   "] {
            let result = validate_project_title(title);
            assert!(result.unwrap_err().to_string().contains("cannot be empty"));
        }
    }

    #[test]
    fn test_title_too_long() {
        let long = "a".repeat(MAX_TITLE_LENGTH + 1);
        let result = validate_project_title(&long);
        assert!(result.unwrap_err().to_string().contains("cannot exceed"));

        // Counted in characters, not bytes
        let multibyte = "é".repeat(MAX_TITLE_LENGTH);
        assert!(validate_project_title(&multibyte).is_ok());
    }

    #[test]
    fn test_title_control_characters() {
        let result = validate_project_title("line\nbreak");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("control character")
        );
    }

    #[test]
    fn test_description_rules() {
        assert_eq!(validate_description(None).unwrap(), None);
        assert_eq!(validate_description(Some("  ")).unwrap(), None);
        assert_eq!(
            validate_description(Some("Act one.\n\tAct two.")).unwrap(),
            Some("Act one.\n\tAct two.".to_string())
        );
        assert!(validate_description(Some("bell\u{7}")).is_err());
        assert!(validate_description(Some(&"x".repeat(MAX_DESCRIPTION_LENGTH + 1))).is_err());
    }

    #[test]
    fn test_parse_project_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_project_id(&id.to_string()).unwrap(), id);

        let err = parse_project_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
