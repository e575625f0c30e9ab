use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel::{insert_into, select, update as diesel_update};
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest, Request};
use rocket::serde::json::Json;
use rocket::{get, post, put};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::DbConnection;
use crate::types::{ApiError, ApiResult, Validate, ValidationError};

pub mod models;
mod utils;

use self::utils::{validate_email_format, validate_password, validate_username_format};

pub type CurrentUser = Result<models::User, ApiError>;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for models::User {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, ApiError> {
        let token_header = match request.headers().get_one("Authorization") {
            Some(header) => header,
            None => return Outcome::Error((Status::Unauthorized, ApiError::Unauthorized)),
        };
        let token = token_header
            .trim_start_matches("Token ")
            .trim_start_matches("Bearer ");
        match DbConnection::from_request(request).await {
            Outcome::Success(mut connection) => {
                match models::User::load_from_token(token, &mut connection) {
                    Ok(user) => Outcome::Success(user),
                    Err(e) => Outcome::Error((Status::Unauthorized, e)),
                }
            }
            _ => Outcome::Error((Status::ServiceUnavailable, ApiError::Internal)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegistrationDetails {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Registration {
    pub user: RegistrationDetails,
}

impl Validate for Registration {
    type Error = ApiError;
    fn validate(self, connection: &mut SqliteConnection) -> Result<Self, Self::Error> {
        use crate::db::schema::users::dsl::*;
        let mut errors = ValidationError::default();

        if let Err(e) = validate_email_format(&self.user.email) {
            errors.merge(e);
        }
        if let Err(e) = validate_username_format(&self.user.username) {
            errors.merge(e);
        }
        if let Err(e) = validate_password(&self.user.password) {
            errors.merge(e);
        }

        let email_taken = select(exists(users.filter(email.eq(&self.user.email))))
            .get_result::<bool>(connection)?;
        if email_taken {
            errors.add_error("email", "email already exists");
        }

        let username_taken = select(exists(users.filter(username.eq(&self.user.username))))
            .get_result::<bool>(connection)?;
        if username_taken {
            errors.add_error("username", "username already exists");
        }

        if errors.is_empty() {
            Ok(self)
        } else {
            Err(errors.into())
        }
    }
}

pub fn register_user(
    connection: &mut SqliteConnection,
    registration: Registration,
) -> Result<models::User, ApiError> {
    use crate::db::schema::users::dsl::*;

    let registration = registration.validate(connection)?;
    let new_user = models::NewUser {
        username: registration.user.username,
        email: registration.user.email,
        password: models::User::make_password(&registration.user.password)?,
    };

    insert_into(users)
        .values(&new_user)
        .get_result::<models::User>(connection)
        .map_err(|e| e.into())
}

#[post("/", format = "application/json", data = "<registration>")]
pub fn register(mut connection: DbConnection, registration: Json<Registration>) -> ApiResult<Value> {
    let user = register_user(&mut connection, registration.into_inner())?;
    let token = user.token()?;
    Ok(Json(json!({ "user": user_payload(&user, &token) })))
}

#[derive(Debug, Deserialize)]
pub struct LoginDetails {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    pub user: LoginDetails,
}

fn invalid_credentials() -> ApiError {
    ValidationError::from("email or password", "is invalid").into()
}

// Unknown email and wrong password are indistinguishable to the caller.
pub fn login_user(
    connection: &mut SqliteConnection,
    login: Login,
) -> Result<models::User, ApiError> {
    use crate::db::schema::users::dsl::*;

    let user = users
        .filter(email.eq(&login.user.email))
        .first::<models::User>(connection)
        .optional()?;
    let user = match user {
        Some(user) => user,
        None => return Err(invalid_credentials()),
    };
    if user.verify_password(&login.user.password)? {
        Ok(user)
    } else {
        Err(invalid_credentials())
    }
}

#[post("/login", format = "application/json", data = "<login>")]
pub fn login(mut connection: DbConnection, login: Json<Login>) -> ApiResult<Value> {
    let user = login_user(&mut connection, login.into_inner())?;
    let token = user.token()?;
    Ok(Json(json!({ "user": user_payload(&user, &token) })))
}

#[get("/user", format = "application/json")]
pub fn current(user: CurrentUser) -> ApiResult<Value> {
    let user = user?;
    let token = user.token()?;
    Ok(Json(json!({ "user": user_payload(&user, &token) })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub user: UpdateUser,
}

// Whitelist update: the credential column and the id are not reachable here.
pub fn update_user(
    connection: &mut SqliteConnection,
    mut user: models::User,
    update: UpdateUser,
) -> Result<models::User, ApiError> {
    use crate::db::schema::users::dsl::*;

    let mut error = ValidationError::default();

    if let Some(new_bio) = update.bio {
        user.bio = Some(new_bio);
    }
    if let Some(new_image) = update.image {
        user.image = Some(new_image);
    }

    if let Some(new_email) = update.email {
        match validate_email_format(&new_email) {
            Err(e) => error.merge(e),
            Ok(_) => user.email = new_email,
        }
        let taken = users.filter(email.eq(&user.email)).filter(id.ne(user.id));
        if select(exists(taken)).get_result::<bool>(connection)? {
            error.add_error("email", format!("email already taken: {}", user.email));
        }
    }

    if let Some(new_username) = update.username {
        match validate_username_format(&new_username) {
            Err(e) => error.merge(e),
            Ok(_) => user.username = new_username,
        }
        let taken = users
            .filter(username.eq(&user.username))
            .filter(id.ne(user.id));
        if select(exists(taken)).get_result::<bool>(connection)? {
            error.add_error("username", format!("username already taken: {}", user.username));
        }
    }

    if !error.is_empty() {
        return Err(error.into());
    }
    diesel_update(&user).set(&user).execute(connection)?;
    Ok(user)
}

#[put("/user", format = "application/json", data = "<update>")]
pub fn update(
    current_user: CurrentUser,
    mut connection: DbConnection,
    update: Json<Update>,
) -> ApiResult<Value> {
    let user = current_user?;
    let user = update_user(&mut connection, user, update.into_inner().user)?;
    let token = user.token()?;
    Ok(Json(json!({ "user": user_payload(&user, &token) })))
}

fn user_payload(user: &models::User, token: &str) -> Value {
    json!({
        "username": user.username,
        "email": user.email,
        "bio": user.bio,
        "image": user.image,
        "token": token,
    })
}
