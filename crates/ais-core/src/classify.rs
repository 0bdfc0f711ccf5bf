//! Maps provider failures onto a small taxonomy with remediation hints.

use std::fmt;

use crate::providers::ProviderError;

/// Failure categories surfaced to the user after a turn fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    RateLimited,
    ModelNotFound,
    InvalidRequest,
    ContentPolicyBlocked,
    Unknown,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "Authentication failed",
            ErrorKind::RateLimited => "Rate limited",
            ErrorKind::ModelNotFound => "Model not found",
            ErrorKind::InvalidRequest => "Invalid request",
            ErrorKind::ContentPolicyBlocked => "Blocked by content policy",
            ErrorKind::Unknown => "Request failed",
        }
    }

    pub fn remediation(self) -> &'static str {
        match self {
            ErrorKind::Authentication => {
                "Check your API key with `ais config show`, or set the provider's environment variable."
            }
            ErrorKind::RateLimited => {
                "You have hit a rate or quota limit. Wait a moment and try again, or check your plan and billing."
            }
            ErrorKind::ModelNotFound => {
                "The configured model was not recognized. Run `ais models` to list supported models."
            }
            ErrorKind::InvalidRequest => {
                "The provider rejected the request. Check the model name and configured parameters."
            }
            ErrorKind::ContentPolicyBlocked => {
                "The provider blocked this content. Rephrase the message and try again."
            }
            ErrorKind::Unknown => "An unexpected error occurred. Re-run with -v for details.",
        }
    }
}

/// A failure classified for display. The session keeps running after one.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn remediation(&self) -> &'static str {
        self.kind.remediation()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

// Case-sensitive on purpose: these match literal provider wording
// ("RESOURCE_EXHAUSTED" is a gRPC code, "Invalid" starts OpenAI messages).
// Order matters; the first match wins.
const SUBSTRING_RULES: &[(&str, ErrorKind)] = &[
    ("API key not valid", ErrorKind::Authentication),
    ("PERMISSION_DENIED", ErrorKind::Authentication),
    ("quota", ErrorKind::RateLimited),
    ("RESOURCE_EXHAUSTED", ErrorKind::RateLimited),
    ("not found", ErrorKind::ModelNotFound),
    ("NOT_FOUND", ErrorKind::ModelNotFound),
    ("Invalid", ErrorKind::InvalidRequest),
    ("INVALID_ARGUMENT", ErrorKind::InvalidRequest),
    ("SAFETY", ErrorKind::ContentPolicyBlocked),
    ("blocked", ErrorKind::ContentPolicyBlocked),
];

/// Classifies a turn failure.
///
/// Structured status codes win over message text; the substring pass is a
/// fallback for providers that only surface prose.
pub fn classify(error: &anyhow::Error) -> ClassifiedError {
    let status = error
        .downcast_ref::<ProviderError>()
        .and_then(|provider| provider.status);

    if let Some(kind) = status.and_then(classify_status) {
        return ClassifiedError {
            kind,
            message: format!("{error:#}"),
        };
    }

    let message = format!("{error:#}");
    let kind = SUBSTRING_RULES
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map_or(ErrorKind::Unknown, |(_, kind)| *kind);

    ClassifiedError { kind, message }
}

fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 | 403 => Some(ErrorKind::Authentication),
        429 => Some(ErrorKind::RateLimited),
        404 => Some(ErrorKind::ModelNotFound),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;

    fn classify_provider(err: ProviderError) -> ClassifiedError {
        classify(&anyhow::Error::from(err))
    }

    #[test]
    fn status_401_is_authentication() {
        let classified = classify_provider(ProviderError::http_status(401, ""));
        assert_eq!(classified.kind, ErrorKind::Authentication);
    }

    #[test]
    fn status_403_is_authentication() {
        let classified = classify_provider(ProviderError::http_status(403, ""));
        assert_eq!(classified.kind, ErrorKind::Authentication);
    }

    #[test]
    fn status_429_is_rate_limited() {
        let classified = classify_provider(ProviderError::http_status(429, ""));
        assert_eq!(classified.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn status_404_is_model_not_found() {
        let classified = classify_provider(ProviderError::http_status(404, ""));
        assert_eq!(classified.kind, ErrorKind::ModelNotFound);
    }

    #[test]
    fn status_beats_substrings() {
        // Body mentions quota but the 404 wins.
        let classified =
            classify_provider(ProviderError::http_status(404, "quota check failed too"));
        assert_eq!(classified.kind, ErrorKind::ModelNotFound);
    }

    #[test]
    fn resource_exhausted_substring() {
        let classified = classify(&anyhow::anyhow!("8 RESOURCE_EXHAUSTED: ran out"));
        assert_eq!(classified.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn quota_before_invalid() {
        // "Invalid" also present; the earlier quota rule wins.
        let classified = classify(&anyhow::anyhow!("Invalid plan: quota exceeded"));
        assert_eq!(classified.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn substrings_are_case_sensitive() {
        // Lowercase "invalid" does not match the "Invalid" rule.
        let classified = classify(&anyhow::anyhow!("something invalid happened"));
        assert_eq!(classified.kind, ErrorKind::Unknown);
    }

    #[test]
    fn safety_maps_to_content_policy() {
        let classified = classify(&anyhow::anyhow!("Finish reason: SAFETY"));
        assert_eq!(classified.kind, ErrorKind::ContentPolicyBlocked);
    }

    #[test]
    fn unmatched_defaults_to_unknown() {
        let classified = classify(&anyhow::anyhow!("socket closed unexpectedly"));
        assert_eq!(classified.kind, ErrorKind::Unknown);
    }

    #[test]
    fn api_error_without_status_falls_through_to_substrings() {
        let classified =
            classify_provider(ProviderError::api_error("api_error", "model not found"));
        assert_eq!(classified.kind, ErrorKind::ModelNotFound);
    }
}
