use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use tracing::{debug, warn};
use url::{form_urlencoded, Url};

use super::AppState;

pub const UNIQUE_BODY: &str = "ok";
pub const DUPLICATE_BODY: &str = "ok (duplicate), retry with different id";
pub const INVALID_ID_BODY: &str = "Invalid or missing 'id' parameter";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AcceptParams {
    id: Option<String>,
    endpoint: Option<String>,
}

impl AcceptParams {
    /// Parse a raw query string. A repeated parameter keeps its first value.
    fn from_query(query: Option<&str>) -> Self {
        let mut params = AcceptParams::default();

        for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "id" if params.id.is_none() => params.id = Some(value.into_owned()),
                "endpoint" if params.endpoint.is_none() => {
                    params.endpoint = Some(value.into_owned())
                }
                _ => {}
            }
        }

        params
    }
}

/// Identifiers must be strictly positive decimal integers.
fn parse_id(raw: Option<&str>) -> Option<u64> {
    raw?.parse::<u64>().ok().filter(|id| *id > 0)
}

pub async fn accept(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> (StatusCode, &'static str) {
    let params = AcceptParams::from_query(query.as_deref());
    debug!("received params: {:?}", params);

    let id = match parse_id(params.id.as_deref()) {
        Some(id) => id,
        None => return (StatusCode::BAD_REQUEST, INVALID_ID_BODY),
    };

    if !state.dedup.claim(id).await {
        return (StatusCode::OK, DUPLICATE_BODY);
    }

    // The notification runs on the worker, the response does not wait for it
    if let Some(endpoint) = params.endpoint.as_deref().filter(|e| !e.is_empty()) {
        match Url::parse(endpoint) {
            Ok(url) => {
                state.notifier.notify(url);
            }
            Err(e) => warn!("invalid notification endpoint {}: {}", endpoint, e),
        }
    }

    (StatusCode::OK, UNIQUE_BODY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_accepts_positive_integers() {
        assert_eq!(parse_id(Some("5")), Some(5));
        assert_eq!(parse_id(Some("18446744073709551615")), Some(u64::MAX));
    }

    #[test]
    fn parse_id_rejects_everything_else() {
        for raw in ["", "0", "-3", "abc", "1.5", " 5", "18446744073709551616"] {
            assert_eq!(parse_id(Some(raw)), None, "{raw:?} should be rejected");
        }
        assert_eq!(parse_id(None), None);
    }

    #[test]
    fn repeated_params_keep_the_first_value() {
        let params = AcceptParams::from_query(Some(
            "id=7&id=8&endpoint=http%3A%2F%2Flocalhost%2Fa&endpoint=http://localhost/b",
        ));

        assert_eq!(
            params,
            AcceptParams {
                id: Some("7".to_owned()),
                endpoint: Some("http://localhost/a".to_owned()),
            }
        );
    }

    #[test]
    fn missing_query_has_no_params() {
        assert_eq!(AcceptParams::from_query(None), AcceptParams::default());
        assert_eq!(
            AcceptParams::from_query(Some("other=1")),
            AcceptParams::default()
        );
    }
}
