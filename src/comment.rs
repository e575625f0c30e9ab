use std::collections::HashSet;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel::{delete as diesel_delete, insert_into};
use rocket::serde::json::Json;
use rocket::{delete, get, post};
use serde::{Deserialize, Serialize};

use crate::article::Article;
use crate::db::schema::{comments, follows, users};
use crate::db::DbConnection;
use crate::profile::Profile;
use crate::types::{assert_owner, ApiError, ApiResult};
use crate::users::models::User;
use crate::users::CurrentUser;
use crate::utils::serialize_date;

#[derive(Debug, PartialEq, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Article))]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i32,
    pub article_id: i32,
    pub author_id: i32,
    pub body: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
struct NewComment {
    article_id: i32,
    author_id: i32,
    body: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: i32,
    #[serde(serialize_with = "serialize_date")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_date")]
    pub updated_at: NaiveDateTime,
    pub body: String,
    pub author: Profile<'static>,
}

impl From<(Comment, Profile<'static>)> for CommentView {
    fn from((comment, profile): (Comment, Profile<'static>)) -> Self {
        CommentView {
            id: comment.id,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            body: comment.body,
            author: profile,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentBody {
    pub body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentContainer<T> {
    pub comment: T,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentsContainer<T> {
    pub comments: T,
}

pub fn add_comment(
    connection: &mut SqliteConnection,
    author: &User,
    slug: &str,
    body: String,
) -> Result<CommentView, ApiError> {
    let article = Article::load_by_slug(slug, connection)?;
    let now = Utc::now().naive_utc();
    let new_comment = NewComment {
        article_id: article.id,
        author_id: author.id,
        body,
        created_at: now,
        updated_at: now,
    };
    let comment = insert_into(comments::table)
        .values(&new_comment)
        .get_result::<Comment>(connection)?;
    // The post-create view never evaluates follow state.
    Ok((comment, author.profile(false)).into())
}

pub fn list_comments(
    connection: &mut SqliteConnection,
    viewer: Option<i32>,
    slug: &str,
) -> Result<Vec<CommentView>, ApiError> {
    let article = Article::load_by_slug(slug, connection)?;
    let data = Comment::belonging_to(&article)
        .inner_join(users::table)
        .order(comments::id.asc())
        .load::<(Comment, User)>(connection)?;

    // One batched lookup of the viewer's follow edges toward the authors.
    let followed: HashSet<i32> = match viewer {
        Some(viewer_id) => {
            let authors: Vec<i32> = data.iter().map(|(_, author)| author.id).collect();
            follows::table
                .filter(follows::follower_id.eq(viewer_id))
                .filter(follows::following_id.eq_any(authors))
                .select(follows::following_id)
                .load::<i32>(connection)?
                .into_iter()
                .collect()
        }
        None => HashSet::new(),
    };

    Ok(data
        .into_iter()
        .map(|(comment, author)| {
            let following = followed.contains(&author.id);
            let profile = author.profile(following);
            (comment, profile).into()
        })
        .collect())
}

pub fn delete_comment(
    connection: &mut SqliteConnection,
    actor: i32,
    comment_id: i32,
) -> Result<(), ApiError> {
    let comment = comments::table
        .find(comment_id)
        .first::<Comment>(connection)?;
    assert_owner(actor, comment.author_id)?;
    diesel_delete(&comment).execute(connection)?;
    Ok(())
}

#[post("/<slug>/comments", format = "application/json", data = "<details>")]
pub fn add(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: String,
    details: Json<CommentContainer<CommentBody>>,
) -> ApiResult<CommentContainer<CommentView>> {
    let user = current_user?;
    let body = details.into_inner().comment.body;
    let comment = add_comment(&mut connection, &user, &slug, body)?;
    Ok(Json(CommentContainer { comment }))
}

#[get("/<slug>/comments", format = "application/json")]
pub fn get(
    mut connection: DbConnection,
    current_user: Option<User>,
    slug: String,
) -> ApiResult<CommentsContainer<Vec<CommentView>>> {
    let viewer = current_user.map(|user| user.id);
    let comments_list = list_comments(&mut connection, viewer, &slug)?;
    Ok(Json(CommentsContainer {
        comments: comments_list,
    }))
}

#[delete("/<_slug>/comments/<id>", format = "application/json")]
pub fn delete(
    mut connection: DbConnection,
    current_user: CurrentUser,
    _slug: String,
    id: i32,
) -> ApiResult<()> {
    let user = current_user?;
    delete_comment(&mut connection, user.id, id)?;
    Ok(Json(()))
}
