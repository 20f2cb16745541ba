//! URL normalization for API endpoint construction.

/// Joins a base URL and an endpoint path without producing double slashes.
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_tolerates_slash_variants() {
        for base in [
            "https://openrouter.ai/api/v1",
            "https://openrouter.ai/api/v1/",
            "https://openrouter.ai/api/v1///",
        ] {
            assert_eq!(
                construct_api_url(base, "chat/completions"),
                "https://openrouter.ai/api/v1/chat/completions"
            );
        }
        assert_eq!(
            construct_api_url("https://openrouter.ai/api/v1", "/chat/completions"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }
}
