use conduit::article::{create_article, ArticleDetails, ArticleView};
use conduit::db::MIGRATIONS;
use conduit::users::models::User;
use conduit::users::{register_user, Registration, RegistrationDetails};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::MigrationHarness;

pub fn connection() -> SqliteConnection {
    let mut connection = SqliteConnection::establish(":memory:").expect("in-memory database");
    connection
        .run_pending_migrations(MIGRATIONS)
        .expect("migrations apply");
    connection
}

pub fn register(connection: &mut SqliteConnection, name: &str) -> User {
    register_user(
        connection,
        Registration {
            user: RegistrationDetails {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                password: "correct-horse".to_string(),
            },
        },
    )
    .expect("registration succeeds")
}

pub fn publish(
    connection: &mut SqliteConnection,
    author: &User,
    title: &str,
    tags: &[&str],
) -> ArticleView {
    create_article(
        connection,
        author,
        ArticleDetails {
            title: title.to_string(),
            description: format!("{} in brief", title),
            body: format!("{} at length", title),
            tag_list: tags.iter().map(|tag| tag.to_string()).collect(),
        },
    )
    .expect("article creation succeeds")
}
