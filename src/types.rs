use std::collections::HashMap;
use std::io::Cursor;

use diesel::result::Error as DieselError;
use diesel::sqlite::SqliteConnection;
use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub trait Validate
where
    Self: Sized,
{
    type Error;
    fn validate(self, connection: &mut SqliteConnection) -> Result<Self, Self::Error>;
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("entity not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("unauthorized")]
    Unauthorized,
    #[error("validation failed")]
    Validation(ValidationError),
    #[error("database error: {0}")]
    Database(DieselError),
    #[error("internal error")]
    Internal,
}

impl From<DieselError> for ApiError {
    fn from(err: DieselError) -> ApiError {
        match err {
            DieselError::NotFound => ApiError::NotFound,
            other => ApiError::Database(other),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> ApiError {
        ApiError::Validation(err)
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Default)]
pub struct ValidationError(HashMap<String, Vec<String>>);

impl ValidationError {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        let entry = self.0.entry(key.into()).or_default();
        entry.push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = ValidationError::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (key, errors) in other.0.into_iter() {
            let entry = self.0.entry(key).or_default();
            entry.extend(errors);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Existence is checked by the caller first; this only decides authorship.
pub fn assert_owner(actor_id: i32, author_id: i32) -> Result<(), ApiError> {
    if actor_id == author_id {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'static> {
        let (status, body) = match self {
            ApiError::NotFound => (
                Status::NotFound,
                json!({ "errors": { "body": ["entity not found"] } }),
            ),
            ApiError::Forbidden => (
                Status::Forbidden,
                json!({ "errors": { "body": ["forbidden"] } }),
            ),
            ApiError::Unauthorized => (
                Status::Unauthorized,
                json!({ "errors": { "body": ["unauthorized"] } }),
            ),
            ApiError::Validation(errors) => (
                Status::UnprocessableEntity,
                json!({ "errors": errors }),
            ),
            ApiError::Database(_) | ApiError::Internal => (
                Status::InternalServerError,
                json!({ "errors": { "body": ["internal server error"] } }),
            ),
        };
        let body = body.to_string();
        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}
