use std::collections::HashSet;

use chrono::{NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::helper_types::{InnerJoin, IntoBoxed};
use diesel::prelude::*;
use diesel::sqlite::{Sqlite, SqliteConnection};
use diesel::{delete as diesel_delete, insert_into, select, update as diesel_update};
use log::warn;
use rand::Rng;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put};
use serde::{Deserialize, Serialize};
use slug::slugify;

use crate::db::schema::{articles, favorites, follows, tags, users};
use crate::db::DbConnection;
use crate::profile::{is_following, Profile};
use crate::types::{assert_owner, ApiError, ApiResult, ValidationError};
use crate::users::models::User;
use crate::users::CurrentUser;
use crate::utils::{join_tags, serialize_date, split_tags};

#[derive(Debug, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = articles)]
pub struct Article {
    pub id: i32,
    pub author_id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub tag_list: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub favorites_count: i32,
}

impl Article {
    pub fn load_by_slug(slug_: &str, connection: &mut SqliteConnection) -> Result<Article, ApiError> {
        articles::table
            .filter(articles::slug.eq(slug_))
            .get_result::<Article>(connection)
            .map_err(|e| e.into())
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = articles)]
struct NewArticle {
    author_id: i32,
    slug: String,
    title: String,
    description: String,
    body: String,
    tag_list: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
pub struct ArticleDetails {
    pub title: String,
    pub description: String,
    pub body: String,
    #[serde(rename = "tagList", default)]
    pub tag_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateArticle {
    pub article: ArticleDetails,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = articles)]
pub struct UpdateDetails {
    pub title: Option<String>,
    pub description: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateArticle {
    pub article: UpdateDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub tag_list: Vec<String>,
    #[serde(serialize_with = "serialize_date")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_date")]
    pub updated_at: NaiveDateTime,
    pub favorited: bool,
    pub favorites_count: i32,
    pub author: Profile<'static>,
}

impl ArticleView {
    fn build(article: Article, author: Profile<'static>, favorited: bool) -> Self {
        ArticleView {
            tag_list: split_tags(&article.tag_list),
            slug: article.slug,
            title: article.title,
            description: article.description,
            body: article.body,
            created_at: article.created_at,
            updated_at: article.updated_at,
            favorited,
            favorites_count: article.favorites_count,
            author,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArticleResponse {
    article: ArticleView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlesResponse {
    articles: Vec<ArticleView>,
    articles_count: i64,
}

#[derive(Debug, Default)]
pub struct ArticleQuery {
    pub tag: Option<String>,
    pub author: Option<String>,
    pub favorited: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default)]
pub struct FeedQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

struct ListSelection {
    tag: Option<String>,
    // Resolved from usernames before the query is assembled. An unknown
    // username pins the predicate to an impossible id instead of dropping it.
    author_id: Option<i32>,
    favorited_ids: Option<Vec<i32>>,
}

type ArticleAuthorJoin = InnerJoin<articles::table, users::table>;
type BoxedArticles<'a> = IntoBoxed<'a, ArticleAuthorJoin, Sqlite>;

fn filtered_articles(selection: &ListSelection) -> BoxedArticles<'static> {
    let mut query = articles::table.inner_join(users::table).into_boxed();
    if let Some(tag) = &selection.tag {
        query = query.filter(articles::tag_list.like(format!("%{}%", tag)));
    }
    if let Some(author_id) = selection.author_id {
        query = query.filter(articles::author_id.eq(author_id));
    }
    match &selection.favorited_ids {
        Some(ids) if !ids.is_empty() => {
            query = query.filter(articles::id.eq_any(ids.clone()));
        }
        Some(_) => {
            query = query.filter(articles::id.eq(-1));
        }
        None => {}
    }
    query
}

fn resolve_username(connection: &mut SqliteConnection, name: &str) -> Result<Option<i32>, ApiError> {
    users::table
        .filter(users::username.eq(name))
        .select(users::id)
        .first::<i32>(connection)
        .optional()
        .map_err(|e| e.into())
}

fn favorite_ids_of(connection: &mut SqliteConnection, user_id: i32) -> Result<Vec<i32>, ApiError> {
    favorites::table
        .filter(favorites::user_id.eq(user_id))
        .select(favorites::article_id)
        .load::<i32>(connection)
        .map_err(|e| e.into())
}

fn is_favorited(
    connection: &mut SqliteConnection,
    user_id: i32,
    article_id: i32,
) -> Result<bool, ApiError> {
    select(exists(
        favorites::table
            .filter(favorites::user_id.eq(user_id))
            .filter(favorites::article_id.eq(article_id)),
    ))
    .get_result::<bool>(connection)
    .map_err(|e| e.into())
}

pub fn list_articles(
    connection: &mut SqliteConnection,
    viewer: Option<i32>,
    query: &ArticleQuery,
) -> Result<(Vec<ArticleView>, i64), ApiError> {
    let selection = ListSelection {
        tag: query.tag.clone(),
        author_id: match &query.author {
            Some(name) => Some(resolve_username(connection, name)?.unwrap_or(-1)),
            None => None,
        },
        favorited_ids: match &query.favorited {
            Some(name) => match resolve_username(connection, name)? {
                Some(user_id) => Some(favorite_ids_of(connection, user_id)?),
                None => Some(Vec::new()),
            },
            None => None,
        },
    };

    // The total reflects the filters, never the pagination window.
    let total = filtered_articles(&selection)
        .count()
        .get_result::<i64>(connection)?;

    let mut rows = filtered_articles(&selection)
        .order((articles::created_at.desc(), articles::id.asc()));
    if let Some(limit) = query.limit {
        rows = rows.limit(limit);
    }
    if let Some(offset) = query.offset {
        rows = rows.offset(offset);
    }
    let rows = rows.load::<(Article, User)>(connection)?;

    // One favorite-set fetch per call, not per row.
    let viewer_favorites: HashSet<i32> = match viewer {
        Some(viewer_id) => favorite_ids_of(connection, viewer_id)?.into_iter().collect(),
        None => HashSet::new(),
    };

    let views = rows
        .into_iter()
        .map(|(article, author)| {
            let favorited = viewer_favorites.contains(&article.id);
            ArticleView::build(article, author.profile(false), favorited)
        })
        .collect();

    Ok((views, total))
}

pub fn get_feed(
    connection: &mut SqliteConnection,
    viewer: i32,
    query: &FeedQuery,
) -> Result<(Vec<ArticleView>, i64), ApiError> {
    let followed = follows::table
        .filter(follows::follower_id.eq(viewer))
        .select(follows::following_id)
        .load::<i32>(connection)?;
    if followed.is_empty() {
        return Ok((Vec::new(), 0));
    }

    let base = || -> BoxedArticles<'static> {
        articles::table
            .inner_join(users::table)
            .filter(articles::author_id.eq_any(followed.clone()))
            .into_boxed()
    };

    let total = base().count().get_result::<i64>(connection)?;

    let mut rows = base().order((articles::created_at.desc(), articles::id.asc()));
    if let Some(limit) = query.limit {
        rows = rows.limit(limit);
    }
    if let Some(offset) = query.offset {
        rows = rows.offset(offset);
    }
    let rows = rows.load::<(Article, User)>(connection)?;

    let views = rows
        .into_iter()
        .map(|(article, author)| ArticleView::build(article, author.profile(false), false))
        .collect();

    Ok((views, total))
}

pub fn get_article(
    connection: &mut SqliteConnection,
    viewer: Option<i32>,
    slug_: &str,
) -> Result<ArticleView, ApiError> {
    let article = Article::load_by_slug(slug_, connection)?;
    let author = User::load_by_id(article.author_id, connection)?;
    let (favorited, following) = match viewer {
        Some(viewer_id) => (
            is_favorited(connection, viewer_id, article.id)?,
            is_following(connection, viewer_id, author.id)?,
        ),
        None => (false, false),
    };
    Ok(ArticleView::build(article, author.profile(following), favorited))
}

fn make_slug(title: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    format!("{}-{:06x}", slugify(title), suffix)
}

fn validate_details(details: &ArticleDetails) -> Result<(), ApiError> {
    let mut error = ValidationError::default();
    if details.title.trim().is_empty() {
        error.add_error("title", "empty title");
    }
    if details.description.trim().is_empty() {
        error.add_error("description", "empty description");
    }
    if details.body.trim().is_empty() {
        error.add_error("body", "empty body");
    }
    if error.is_empty() {
        Ok(())
    } else {
        Err(error.into())
    }
}

fn register_tags(connection: &mut SqliteConnection, names: &[String]) -> Result<(), ApiError> {
    for name in names {
        insert_into(tags::table)
            .values(tags::name.eq(name))
            .on_conflict(tags::name)
            .do_nothing()
            .execute(connection)?;
    }
    Ok(())
}

pub fn create_article(
    connection: &mut SqliteConnection,
    author: &User,
    details: ArticleDetails,
) -> Result<ArticleView, ApiError> {
    validate_details(&details)?;
    let created = Utc::now().naive_utc();
    let new_article = NewArticle {
        author_id: author.id,
        slug: make_slug(&details.title),
        tag_list: join_tags(&details.tag_list),
        title: details.title,
        description: details.description,
        body: details.body,
        created_at: created,
        updated_at: created,
    };
    let article = insert_into(articles::table)
        .values(&new_article)
        .get_result::<Article>(connection)?;
    register_tags(connection, &details.tag_list)?;
    Ok(ArticleView::build(article, author.profile(false), false))
}

pub fn update_article(
    connection: &mut SqliteConnection,
    actor: i32,
    slug_: &str,
    changes: UpdateDetails,
) -> Result<ArticleView, ApiError> {
    let article = Article::load_by_slug(slug_, connection)?;
    assert_owner(actor, article.author_id)?;
    // Whitelisted columns only; the slug is never recomputed.
    diesel_update(articles::table.find(article.id))
        .set((&changes, articles::updated_at.eq(Utc::now().naive_utc())))
        .execute(connection)?;
    get_article(connection, Some(actor), slug_)
}

pub fn delete_article(
    connection: &mut SqliteConnection,
    actor: i32,
    slug_: &str,
) -> Result<(), ApiError> {
    let article = Article::load_by_slug(slug_, connection)?;
    assert_owner(actor, article.author_id)?;
    diesel_delete(articles::table.find(article.id)).execute(connection)?;
    Ok(())
}

pub fn add_favorite(
    connection: &mut SqliteConnection,
    actor: i32,
    slug_: &str,
) -> Result<ArticleView, ApiError> {
    connection.transaction::<_, ApiError, _>(|connection| {
        let article = Article::load_by_slug(slug_, connection)?;
        // The relation insert decides membership; the counter moves only when
        // a row was actually created, so concurrent toggles cannot double-count.
        let inserted = insert_into(favorites::table)
            .values((
                favorites::user_id.eq(actor),
                favorites::article_id.eq(article.id),
            ))
            .on_conflict((favorites::user_id, favorites::article_id))
            .do_nothing()
            .execute(connection)?;
        if inserted == 1 {
            diesel_update(articles::table.find(article.id))
                .set(articles::favorites_count.eq(articles::favorites_count + 1))
                .execute(connection)?;
        }
        Ok(())
    })?;
    get_article(connection, Some(actor), slug_)
}

pub fn remove_favorite(
    connection: &mut SqliteConnection,
    actor: i32,
    slug_: &str,
) -> Result<ArticleView, ApiError> {
    connection.transaction::<_, ApiError, _>(|connection| {
        let article = Article::load_by_slug(slug_, connection)?;
        let removed = diesel_delete(
            favorites::table
                .filter(favorites::user_id.eq(actor))
                .filter(favorites::article_id.eq(article.id)),
        )
        .execute(connection)?;
        if removed == 1 {
            let adjusted = diesel_update(
                articles::table
                    .filter(articles::id.eq(article.id))
                    .filter(articles::favorites_count.gt(0)),
            )
            .set(articles::favorites_count.eq(articles::favorites_count - 1))
            .execute(connection)?;
            if adjusted == 0 {
                warn!(
                    "favorites count for {} was zero with relation rows present; recounting",
                    article.slug
                );
                reconcile_favorites_count(connection, article.id)?;
            }
        }
        Ok(())
    })?;
    get_article(connection, Some(actor), slug_)
}

// Full recount from the relation; the incremental path must normally keep the
// counter in step without this.
pub fn reconcile_favorites_count(
    connection: &mut SqliteConnection,
    article_id: i32,
) -> Result<(), ApiError> {
    let count: i64 = favorites::table
        .filter(favorites::article_id.eq(article_id))
        .count()
        .get_result(connection)?;
    diesel_update(articles::table.find(article_id))
        .set(articles::favorites_count.eq(count as i32))
        .execute(connection)?;
    Ok(())
}

#[get("/?<tag>&<author>&<favorited>&<limit>&<offset>", format = "application/json")]
pub fn list(
    mut connection: DbConnection,
    current_user: Option<User>,
    tag: Option<String>,
    author: Option<String>,
    favorited: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<ArticlesResponse> {
    let viewer = current_user.map(|user| user.id);
    let query = ArticleQuery {
        tag,
        author,
        favorited,
        limit,
        offset,
    };
    let (articles_list, total) = list_articles(&mut connection, viewer, &query)?;
    Ok(Json(ArticlesResponse {
        articles: articles_list,
        articles_count: total,
    }))
}

#[get("/feed?<limit>&<offset>", format = "application/json")]
pub fn feed(
    mut connection: DbConnection,
    current_user: CurrentUser,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<ArticlesResponse> {
    let current = current_user?;
    let query = FeedQuery { limit, offset };
    let (articles_list, total) = get_feed(&mut connection, current.id, &query)?;
    Ok(Json(ArticlesResponse {
        articles: articles_list,
        articles_count: total,
    }))
}

#[get("/<slug>", format = "application/json")]
pub fn get(
    mut connection: DbConnection,
    current_user: Option<User>,
    slug: String,
) -> ApiResult<ArticleResponse> {
    let viewer = current_user.map(|user| user.id);
    let article = get_article(&mut connection, viewer, &slug)?;
    Ok(Json(ArticleResponse { article }))
}

#[post("/", format = "application/json", data = "<create>")]
pub fn create(
    mut connection: DbConnection,
    current_user: CurrentUser,
    create: Json<CreateArticle>,
) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    let article = create_article(&mut connection, &user, create.into_inner().article)?;
    Ok(Json(ArticleResponse { article }))
}

#[put("/<slug>", format = "application/json", data = "<update>")]
pub fn update(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: String,
    update: Json<UpdateArticle>,
) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    let article = update_article(&mut connection, user.id, &slug, update.into_inner().article)?;
    Ok(Json(ArticleResponse { article }))
}

#[delete("/<slug>", format = "application/json")]
pub fn remove(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: String,
) -> ApiResult<()> {
    let user = current_user?;
    delete_article(&mut connection, user.id, &slug)?;
    Ok(Json(()))
}

#[post("/<slug>/favorite", format = "application/json")]
pub fn favorite(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: String,
) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    let article = add_favorite(&mut connection, user.id, &slug)?;
    Ok(Json(ArticleResponse { article }))
}

#[delete("/<slug>/favorite", format = "application/json")]
pub fn unfavorite(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: String,
) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    let article = remove_favorite(&mut connection, user.id, &slug)?;
    Ok(Json(ArticleResponse { article }))
}
