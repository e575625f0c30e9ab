use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use rocket::get;
use rocket::serde::json::Json;
use serde::Serialize;

use crate::db::schema::tags;
use crate::db::DbConnection;
use crate::types::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    tags: Vec<String>,
}

pub fn list_tags(connection: &mut SqliteConnection) -> Result<Vec<String>, ApiError> {
    tags::table
        .select(tags::name)
        .order(tags::name.asc())
        .load::<String>(connection)
        .map_err(|e| e.into())
}

#[get("/", format = "application/json")]
pub fn list(mut connection: DbConnection) -> ApiResult<TagsResponse> {
    let tags_list = list_tags(&mut connection)?;
    Ok(Json(TagsResponse { tags: tags_list }))
}
