use std::borrow::Cow;
use std::collections::HashSet;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::schema::users;
use crate::profile::Profile;
use crate::types::{ApiError, ValidationError};
use crate::users::utils::jwt_secret;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, AsChangeset)]
#[diesel(table_name = users)]
pub struct User {
    #[serde(skip_serializing)]
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub bio: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    id: i32,
    username: String,
    email: String,
}

impl User {
    pub fn make_password(password: &str) -> Result<String, ApiError> {
        bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|_| ApiError::Internal)
    }

    pub fn verify_password(&self, candidate: &str) -> Result<bool, ApiError> {
        bcrypt::verify(candidate, &self.password).map_err(|_| ApiError::Internal)
    }

    pub fn token(&self) -> Result<String, ApiError> {
        let claims = Claims {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(jwt_secret().as_bytes()),
        )
        .map_err(|_| ApiError::Internal)
    }

    pub fn load_from_token(token: &str, connection: &mut SqliteConnection) -> Result<User, ApiError> {
        // Tokens carry no expiry claim; sessions last until the secret rotates.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(jwt_secret().as_bytes()),
            &validation,
        )
        .map_err(|_| ApiError::Validation(ValidationError::from("token", "invalid token")))?;
        User::load_by_id(data.claims.id, connection)
    }

    pub fn load_by_id(user_id: i32, connection: &mut SqliteConnection) -> Result<User, ApiError> {
        use crate::db::schema::users::dsl::*;
        users
            .filter(id.eq(user_id))
            .get_result::<User>(connection)
            .map_err(|e| e.into())
    }

    pub fn load_by_name(name: &str, connection: &mut SqliteConnection) -> Result<User, ApiError> {
        use crate::db::schema::users::dsl::*;
        users
            .filter(username.eq(name))
            .get_result::<User>(connection)
            .map_err(|e| e.into())
    }

    pub fn profile(&self, following: bool) -> Profile<'static> {
        Profile {
            username: Cow::Owned(self.username.clone()),
            bio: self.bio.clone().map(Cow::Owned),
            image: self.image.clone().map(Cow::Owned),
            following,
        }
    }
}

#[derive(Debug, Deserialize, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}
