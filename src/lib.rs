use rocket::serde::json::Json;
use rocket::{catch, catchers, routes, Build, Rocket};
use serde_json::{json, Value};

pub mod article;
pub mod comment;
pub mod db;
pub mod profile;
pub mod tag;
pub mod types;
pub mod users;
pub mod utils;

#[catch(404)]
fn not_found() -> Json<Value> {
    Json(json!({ "errors": { "body": ["entity not found"] } }))
}

#[catch(422)]
fn unprocessable() -> Json<Value> {
    Json(json!({ "errors": { "body": ["unable to process request"] } }))
}

pub fn build_rocket(pool: db::Pool) -> Rocket<Build> {
    rocket::build()
        .manage(pool)
        .mount("/api/users", routes![users::register, users::login])
        .mount("/api", routes![users::current, users::update])
        .mount(
            "/api",
            routes![profile::profile, profile::follow, profile::unfollow],
        )
        .mount(
            "/api/articles",
            routes![
                article::list,
                article::feed,
                article::get,
                article::create,
                article::update,
                article::remove,
                article::favorite,
                article::unfavorite,
                comment::add,
                comment::get,
                comment::delete,
            ],
        )
        .mount("/api/tags", routes![tag::list])
        .register("/", catchers![not_found, unprocessable])
}
