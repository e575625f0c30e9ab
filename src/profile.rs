use std::borrow::Cow;

use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel::{delete as diesel_delete, insert_into, select};
use rocket::serde::json::Json;
use rocket::{delete, get, post};
use serde::Serialize;

use crate::db::DbConnection;
use crate::types::{ApiError, ApiResult, ValidationError};
use crate::users::models::User;
use crate::users::CurrentUser;

#[derive(Debug, Serialize)]
pub struct ProfileResponse<'a> {
    profile: Profile<'a>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct Profile<'a> {
    pub username: Cow<'a, str>,
    pub bio: Option<Cow<'a, str>>,
    pub image: Option<Cow<'a, str>>,
    pub following: bool,
}

pub fn is_following(
    connection: &mut SqliteConnection,
    follower: i32,
    followed: i32,
) -> Result<bool, ApiError> {
    use crate::db::schema::follows::dsl::*;
    select(exists(
        follows
            .filter(follower_id.eq(follower))
            .filter(following_id.eq(followed)),
    ))
    .get_result::<bool>(connection)
    .map_err(|e| e.into())
}

pub fn get_profile(
    connection: &mut SqliteConnection,
    viewer: Option<i32>,
    name: &str,
) -> Result<Profile<'static>, ApiError> {
    let user = User::load_by_name(name, connection)?;
    let following = match viewer {
        Some(viewer_id) => is_following(connection, viewer_id, user.id)?,
        None => false,
    };
    Ok(user.profile(following))
}

pub fn follow_user(
    connection: &mut SqliteConnection,
    actor: i32,
    name: &str,
) -> Result<Profile<'static>, ApiError> {
    use crate::db::schema::follows::dsl::*;

    let target = User::load_by_name(name, connection)?;
    if target.id == actor {
        return Err(ValidationError::from("follow", "cannot follow yourself").into());
    }
    insert_into(follows)
        .values((follower_id.eq(actor), following_id.eq(target.id)))
        .on_conflict((follower_id, following_id))
        .do_nothing()
        .execute(connection)?;
    Ok(target.profile(true))
}

pub fn unfollow_user(
    connection: &mut SqliteConnection,
    actor: i32,
    name: &str,
) -> Result<Profile<'static>, ApiError> {
    use crate::db::schema::follows::dsl::*;

    let target = User::load_by_name(name, connection)?;
    diesel_delete(
        follows
            .filter(follower_id.eq(actor))
            .filter(following_id.eq(target.id)),
    )
    .execute(connection)?;
    Ok(target.profile(false))
}

#[get("/profiles/<name>", format = "application/json")]
pub fn profile(
    mut connection: DbConnection,
    current_user: Option<User>,
    name: String,
) -> ApiResult<ProfileResponse<'static>> {
    let viewer = current_user.map(|user| user.id);
    let profile = get_profile(&mut connection, viewer, &name)?;
    Ok(Json(ProfileResponse { profile }))
}

#[post("/profiles/<name>/follow", format = "application/json")]
pub fn follow(
    mut connection: DbConnection,
    current_user: CurrentUser,
    name: String,
) -> ApiResult<ProfileResponse<'static>> {
    let current = current_user?;
    let profile = follow_user(&mut connection, current.id, &name)?;
    Ok(Json(ProfileResponse { profile }))
}

#[delete("/profiles/<name>/follow", format = "application/json")]
pub fn unfollow(
    mut connection: DbConnection,
    current_user: CurrentUser,
    name: String,
) -> ApiResult<ProfileResponse<'static>> {
    let current = current_user?;
    let profile = unfollow_user(&mut connection, current.id, &name)?;
    Ok(Json(ProfileResponse { profile }))
}
