use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::{request::Parts, HeaderMap},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::case_convert::{self, KeyCase};
use crate::error::AdminError;
use crate::validation::Validate;

pub const KEY_CASE_HEADER: &str = "x-key-case";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Key case the client wants in `data`, from `x-key-case` or `?case=`.
#[derive(Debug, Clone, Copy)]
pub struct ResponseCase(pub KeyCase);

impl<S: Send + Sync> FromRequestParts<S> for ResponseCase {
    type Rejection = AdminError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(requested_case(&parts.headers, parts.uri.query())))
    }
}

fn requested_case(headers: &HeaderMap, query: Option<&str>) -> KeyCase {
    let from_header = headers
        .get(KEY_CASE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(KeyCase::parse);
    let from_query = || {
        query?
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "case")
            .and_then(|(_, value)| KeyCase::parse(value))
    };
    from_header.or_else(from_query).unwrap_or_default()
}

/// Acting user for the change log, from the optional `x-user-id` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct Actor(pub Option<i32>);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = AdminError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(Self(None));
        };
        raw.to_str()
            .ok()
            .and_then(|value| value.trim().parse::<i32>().ok())
            .filter(|id| *id > 0)
            .map(|id| Self(Some(id)))
            .ok_or_else(|| {
                AdminError::Validation(format!("{USER_ID_HEADER} must be a positive integer"))
            })
    }
}

/// `Path` with rejections reported through the envelope.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AdminError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<T>::from_request_parts(parts, state)
            .await
            .map(|Path(value)| Self(value))
            .map_err(|rejection| AdminError::Validation(rejection.body_text()))
    }
}

/// `Query` with rejections reported through the envelope.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AdminError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| Self(value))
            .map_err(|rejection| AdminError::Validation(rejection.body_text()))
    }
}

/// JSON body normalised to snake_case keys, deserialised into `T` and validated.
/// `raw` keeps the normalised document for the change log.
pub struct ValidJson<T> {
    pub value: T,
    pub raw: Value,
}

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate + Send,
{
    type Rejection = AdminError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| AdminError::Validation(rejection.body_text()))?;
        let raw = case_convert::into_snake(body);
        let value: T = serde_json::from_value(raw.clone())
            .map_err(|e| AdminError::Validation(format!("invalid request body: {e}")))?;
        value.validate()?;
        Ok(Self { value, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_wins_over_query() {
        let mut headers = HeaderMap::new();
        assert_eq!(requested_case(&headers, Some("page=2&case=camel")), KeyCase::Camel);
        assert_eq!(requested_case(&headers, Some("page=2")), KeyCase::Snake);

        headers.insert(KEY_CASE_HEADER, HeaderValue::from_static("snake"));
        assert_eq!(requested_case(&headers, Some("case=camel")), KeyCase::Snake);
    }
}
