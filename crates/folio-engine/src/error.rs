use thiserror::Error;

/// Stand-in printed for credentials in `Debug` output.
pub const REDACTED: &str = "<redacted>";

/// Failure talking to the image-generation service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} request failed ({endpoint})")]
    Transport {
        service: &'static str,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} request failed ({status}): {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("{service} returned an unexpected payload: {detail}")]
    Payload {
        service: &'static str,
        detail: String,
    },
}

/// Failure storing a blob.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob store request failed ({endpoint})")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("blob store rejected {key} ({status}): {body}")]
    Status {
        key: String,
        status: u16,
        body: String,
    },
    #[error("blob store misconfigured: {0}")]
    Config(String),
}

/// Flattens an error and its sources into one line, skipping repeats.
pub fn error_chain_text(err: &(dyn std::error::Error + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty()
            && !parts
                .last()
                .map(|existing| existing == trimmed)
                .unwrap_or(false)
        {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::{error_chain_text, truncate_text, ServiceError};

    #[test]
    fn chain_text_includes_status_and_body() {
        let err = ServiceError::Status {
            service: "Replicate",
            status: 422,
            body: "{\"detail\":\"invalid aspect_ratio\"}".to_string(),
        };
        assert_eq!(
            error_chain_text(&err, 512),
            "Replicate request failed (422): {\"detail\":\"invalid aspect_ratio\"}"
        );
    }

    #[test]
    fn chain_text_is_truncated() {
        let err = ServiceError::Payload {
            service: "Replicate",
            detail: "x".repeat(100),
        };
        let text = error_chain_text(&err, 20);
        assert_eq!(text.chars().count(), 21);
        assert!(text.ends_with('…'));
        assert_eq!(truncate_text("short", 20), "short");
    }
}
