use serde::{Deserialize, Serialize};

/// A single problem found in submitted answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Outcome of checking an answers object against a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<ValidationError>,
    #[serde(default)]
    pub missing_required: Vec<String>,
    #[serde(default)]
    pub unknown_fields: Vec<String>,
}

impl ValidationResult {
    /// Errors raised for `name` itself or for fields inside its repeat entries.
    pub fn errors_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ValidationError> + 'a {
        self.errors.iter().filter(move |error| {
            error.question_id.as_deref() == Some(name)
                || error.path.as_deref().is_some_and(|path| {
                    path.strip_prefix('/')
                        .and_then(|rest| rest.strip_prefix(name))
                        .is_some_and(|rest| rest.starts_with('/'))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(question_id: &str, path: &str) -> ValidationError {
        ValidationError {
            question_id: Some(question_id.into()),
            path: Some(path.into()),
            message: "type mismatch".into(),
            code: Some("type_mismatch".into()),
        }
    }

    #[test]
    fn errors_for_includes_repeat_entries() {
        let result = ValidationResult {
            valid: false,
            errors: vec![
                error("member_age", "/members/0/member_age"),
                error("age", "/age"),
                error("members_total", "/members_total"),
            ],
            missing_required: Vec::new(),
            unknown_fields: Vec::new(),
        };
        let paths = |name: &'static str| {
            result
                .errors_for(name)
                .filter_map(|error| error.path.as_deref())
                .collect::<Vec<_>>()
        };
        assert_eq!(paths("members"), vec!["/members/0/member_age"]);
        assert_eq!(paths("age"), vec!["/age"]);
        assert!(paths("region").is_empty());
    }
}
