use url::Url;

use crate::{consts::TOKEN_QUERY_PARAM, prelude::*, WsError};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Build the connection URL, appending the auth token as a query parameter
/// when one is available.
pub fn build_endpoint_url(base: &str, token: Option<&str>) -> Result<String> {
    let mut url = Url::parse(base).map_err(|e| WsError::InvalidUrl(format!("{base}: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(WsError::InvalidUrl(format!("unsupported scheme '{other}'")).into());
        }
    }

    if let Some(token) = token.filter(|t| !t.is_empty()) {
        // Drop a stale credential left in the configured URL
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != TOKEN_QUERY_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &retained {
                pairs.append_pair(k, v);
            }
            pairs.append_pair(TOKEN_QUERY_PARAM, token);
        }
    }

    Ok(url.into())
}
