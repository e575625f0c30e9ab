use std::env;

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::ValidationError;

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"\A[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\z";
        Regex::new(pattern).unwrap()
    };
    static ref JWT_SECRET: String = {
        dotenvy::dotenv().ok();
        env::var("JWT_SECRET").unwrap_or_else(|_| "conduit-development-secret".to_string())
    };
}

pub fn jwt_secret() -> &'static str {
    &JWT_SECRET
}

pub fn validate_email_format(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(email) {
        Err(ValidationError::from(
            "email",
            format!("invalid email: {}", email),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_username_format(username: &str) -> Result<(), ValidationError> {
    if username.len() < 3 {
        Err(ValidationError::from(
            "username",
            format!("username too short: {}", username),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.len() < 5 {
        Err(ValidationError::from("password", "password too short"))
    } else {
        Ok(())
    }
}
