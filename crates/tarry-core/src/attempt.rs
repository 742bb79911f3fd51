//! A single attempt of a request
//!
//! Used both for the synchronous first attempt inside `submit` and for every
//! retry made by the drain loop.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::policy::ErrorContext;
use crate::transport::{Exchange, Transport, DEFAULT_USER_AGENT};
use crate::{Error, Request, Result};

const APPLICATION_JSON: &str = "application/json";

/// Send `request` once and decode a 2xx body into `R`
///
/// On failure the request's policy interprets the response. A patched body
/// returned by the policy is stored back into the request before the error
/// is returned.
pub(crate) async fn attempt<B, R>(transport: &dyn Transport, request: &mut Request<B>) -> Result<R>
where
    B: Serialize,
    R: DeserializeOwned,
{
    let exchange = build_exchange(request)?;

    let parsed = match transport.exchange(exchange).await {
        Ok(response) if response.is_success() => return decode(&response.body),
        Ok(response) => {
            let ctx =
                ErrorContext::from_response(response.status, &response.headers, &response.body);
            request.policy.parse_error(&ctx, request.body.as_ref())
        }
        Err(e) => request
            .policy
            .parse_error(&ErrorContext::from_transport(&e), request.body.as_ref()),
    };

    if let Some(patched) = parsed.patched_body {
        log::info!("Request body for {} corrected for the next attempt", request.url);
        request.body = Some(patched);
    }

    Err(parsed.error)
}

pub(crate) fn build_exchange<B: Serialize>(request: &Request<B>) -> Result<Exchange> {
    let body = request
        .body
        .as_ref()
        .map(serde_json::to_vec)
        .transpose()
        .map_err(|e| Error::Encode {
            message: e.to_string(),
            source: e,
        })?;

    Ok(Exchange {
        method: request.method.clone(),
        url: request.url.clone(),
        headers: build_headers(&request.headers, body.as_ref().is_some_and(|b| !b.is_empty())),
        body,
        timeout: request.timeout,
    })
}

fn build_headers(caller: &HeaderMap, has_body: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if has_body {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    }

    // The first caller value of a name replaces ours, later ones are appended
    for name in caller.keys() {
        let mut values = caller.get_all(name).iter();
        if let Some(first) = values.next() {
            headers.insert(name.clone(), first.clone());
        }
        for value in values {
            headers.append(name.clone(), value.clone());
        }
    }

    headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    }
    headers
}

fn decode<R: DeserializeOwned>(body: &[u8]) -> Result<R> {
    // An empty 2xx body decodes like JSON null so `()` and `Option<T>` work
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"null".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| Error::Decode {
        message: format!("unmarshal response: {}", e),
        source: e,
    })
}
