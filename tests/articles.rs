mod common;

use conduit::article::{
    add_favorite, delete_article, get_article, get_feed, list_articles, remove_favorite,
    update_article, ArticleQuery, FeedQuery, UpdateDetails,
};
use conduit::profile::follow_user;
use conduit::tag::list_tags;
use conduit::types::ApiError;

#[test]
fn listing_counts_filtered_rows_independent_of_pagination() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    common::publish(&mut conn, &alice, "First post", &["news"]);
    common::publish(&mut conn, &alice, "Second post", &["news", "rust"]);
    common::publish(&mut conn, &alice, "Third post", &["rust"]);
    common::publish(&mut conn, &bob, "Bob writes", &["news"]);

    let query = ArticleQuery {
        tag: Some("news".to_string()),
        limit: Some(1),
        offset: Some(1),
        ..Default::default()
    };
    let (articles, total) = list_articles(&mut conn, None, &query).unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(total, 3);

    let query = ArticleQuery {
        author: Some("alice".to_string()),
        limit: Some(2),
        ..Default::default()
    };
    let (articles, total) = list_articles(&mut conn, None, &query).unwrap();
    assert_eq!(articles.len(), 2);
    assert_eq!(total, 3);

    let query = ArticleQuery {
        tag: Some("news".to_string()),
        author: Some("alice".to_string()),
        ..Default::default()
    };
    let (articles, total) = list_articles(&mut conn, None, &query).unwrap();
    assert_eq!(articles.len(), 2);
    assert_eq!(total, 2);
}

#[test]
fn unknown_author_filter_matches_nothing() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    common::publish(&mut conn, &alice, "First post", &[]);

    let query = ArticleQuery {
        author: Some("nobody".to_string()),
        ..Default::default()
    };
    let (articles, total) = list_articles(&mut conn, None, &query).unwrap();
    assert!(articles.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn favorited_filter_with_no_favorites_matches_nothing() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    common::publish(&mut conn, &alice, "First post", &[]);

    let query = ArticleQuery {
        favorited: Some(bob.username.clone()),
        ..Default::default()
    };
    let (articles, total) = list_articles(&mut conn, None, &query).unwrap();
    assert!(articles.is_empty());
    assert_eq!(total, 0);

    let query = ArticleQuery {
        favorited: Some("nobody".to_string()),
        ..Default::default()
    };
    let (articles, total) = list_articles(&mut conn, None, &query).unwrap();
    assert!(articles.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn listing_orders_newest_first() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    common::publish(&mut conn, &alice, "Oldest", &[]);
    common::publish(&mut conn, &alice, "Middle", &[]);
    common::publish(&mut conn, &alice, "Newest", &[]);

    let (articles, _) = list_articles(&mut conn, None, &ArticleQuery::default()).unwrap();
    let titles: Vec<&str> = articles.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["Newest", "Middle", "Oldest"]);
}

#[test]
fn feed_is_empty_without_follows() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    common::publish(&mut conn, &alice, "First post", &[]);

    let (articles, total) = get_feed(&mut conn, bob.id, &FeedQuery::default()).unwrap();
    assert!(articles.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn feed_lists_followed_authors_only() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    let carol = common::register(&mut conn, "carol");
    common::publish(&mut conn, &alice, "Alice first", &[]);
    common::publish(&mut conn, &bob, "Bob only", &[]);
    common::publish(&mut conn, &alice, "Alice second", &[]);

    follow_user(&mut conn, carol.id, "alice").unwrap();

    let (articles, total) = get_feed(&mut conn, carol.id, &FeedQuery::default()).unwrap();
    assert_eq!(total, 2);
    let titles: Vec<&str> = articles.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["Alice second", "Alice first"]);

    let (page, total) = get_feed(
        &mut conn,
        carol.id,
        &FeedQuery {
            limit: Some(1),
            offset: Some(1),
        },
    )
    .unwrap();
    assert_eq!(total, 2);
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].title, "Alice first");
}

#[test]
fn feed_does_not_annotate_favorites() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let carol = common::register(&mut conn, "carol");
    let published = common::publish(&mut conn, &alice, "Alice first", &[]);

    follow_user(&mut conn, carol.id, "alice").unwrap();
    add_favorite(&mut conn, carol.id, &published.slug).unwrap();

    let (articles, _) = get_feed(&mut conn, carol.id, &FeedQuery::default()).unwrap();
    assert!(!articles[0].favorited);
    assert_eq!(articles[0].favorites_count, 1);
}

#[test]
fn favorites_counter_tracks_the_relation() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    let published = common::publish(&mut conn, &alice, "Tagged piece", &["x", "y"]);

    let view = add_favorite(&mut conn, bob.id, &published.slug).unwrap();
    assert_eq!(view.favorites_count, 1);
    assert!(view.favorited);

    let query = ArticleQuery {
        favorited: Some(bob.username.clone()),
        ..Default::default()
    };
    let (articles, total) = list_articles(&mut conn, None, &query).unwrap();
    assert_eq!(total, 1);
    assert_eq!(articles[0].slug, published.slug);

    let view = remove_favorite(&mut conn, bob.id, &published.slug).unwrap();
    assert_eq!(view.favorites_count, 0);
    assert!(!view.favorited);

    let (articles, total) = list_articles(&mut conn, None, &query).unwrap();
    assert!(articles.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn favoriting_twice_is_idempotent() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    let published = common::publish(&mut conn, &alice, "Once only", &[]);

    add_favorite(&mut conn, bob.id, &published.slug).unwrap();
    let view = add_favorite(&mut conn, bob.id, &published.slug).unwrap();
    assert_eq!(view.favorites_count, 1);
    assert!(view.favorited);
}

#[test]
fn drifted_counter_is_rebuilt_from_the_relation() {
    use conduit::db::schema::articles;
    use diesel::prelude::*;

    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    let carol = common::register(&mut conn, "carol");
    let published = common::publish(&mut conn, &alice, "Drifted", &[]);

    add_favorite(&mut conn, bob.id, &published.slug).unwrap();
    add_favorite(&mut conn, carol.id, &published.slug).unwrap();

    // Corrupt the denormalized counter behind the manager's back.
    diesel::update(articles::table)
        .set(articles::favorites_count.eq(0))
        .execute(&mut conn)
        .unwrap();

    // The guarded decrement finds nothing to decrement and recounts instead.
    let view = remove_favorite(&mut conn, bob.id, &published.slug).unwrap();
    assert_eq!(view.favorites_count, 1);
}

#[test]
fn unfavoriting_a_never_favorited_article_is_a_noop() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    let published = common::publish(&mut conn, &alice, "Untouched", &[]);

    let view = remove_favorite(&mut conn, bob.id, &published.slug).unwrap();
    assert_eq!(view.favorites_count, 0);
    assert!(!view.favorited);
}

#[test]
fn listing_annotates_the_viewer_favorites() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    let first = common::publish(&mut conn, &alice, "First post", &[]);
    common::publish(&mut conn, &alice, "Second post", &[]);

    add_favorite(&mut conn, bob.id, &first.slug).unwrap();

    let (articles, _) =
        list_articles(&mut conn, Some(bob.id), &ArticleQuery::default()).unwrap();
    for article in &articles {
        assert_eq!(article.favorited, article.slug == first.slug);
    }
}

#[test]
fn single_article_view_reports_author_follow_state() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    let published = common::publish(&mut conn, &alice, "Followed reading", &[]);

    follow_user(&mut conn, bob.id, "alice").unwrap();

    let view = get_article(&mut conn, Some(bob.id), &published.slug).unwrap();
    assert!(view.author.following);

    let view = get_article(&mut conn, None, &published.slug).unwrap();
    assert!(!view.author.following);
}

#[test]
fn update_requires_authorship() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    let published = common::publish(&mut conn, &alice, "Mine", &[]);

    let changes = UpdateDetails {
        title: Some("Yours now".to_string()),
        description: None,
        body: None,
    };
    let result = update_article(&mut conn, bob.id, &published.slug, changes);
    assert!(matches!(result, Err(ApiError::Forbidden)));

    let changes = UpdateDetails {
        title: Some("Ghost".to_string()),
        description: None,
        body: None,
    };
    let result = update_article(&mut conn, bob.id, "missing-slug", changes);
    assert!(matches!(result, Err(ApiError::NotFound)));
}

#[test]
fn update_keeps_the_slug_and_applies_whitelisted_fields() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let published = common::publish(&mut conn, &alice, "Original title", &["keep"]);

    let changes = UpdateDetails {
        title: Some("Renamed title".to_string()),
        description: None,
        body: Some("rewritten".to_string()),
    };
    let view = update_article(&mut conn, alice.id, &published.slug, changes).unwrap();
    assert_eq!(view.slug, published.slug);
    assert_eq!(view.title, "Renamed title");
    assert_eq!(view.description, published.description);
    assert_eq!(view.body, "rewritten");
    assert_eq!(view.tag_list, vec!["keep".to_string()]);
}

#[test]
fn delete_requires_authorship() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    let bob = common::register(&mut conn, "bob");
    let published = common::publish(&mut conn, &alice, "Mine", &[]);

    let result = delete_article(&mut conn, bob.id, &published.slug);
    assert!(matches!(result, Err(ApiError::Forbidden)));

    let result = delete_article(&mut conn, bob.id, "missing-slug");
    assert!(matches!(result, Err(ApiError::NotFound)));

    delete_article(&mut conn, alice.id, &published.slug).unwrap();
    let result = get_article(&mut conn, None, &published.slug);
    assert!(matches!(result, Err(ApiError::NotFound)));
}

#[test]
fn published_tags_show_up_in_the_tag_listing() {
    let mut conn = common::connection();
    let alice = common::register(&mut conn, "alice");
    common::publish(&mut conn, &alice, "First post", &["rust", "diesel"]);
    common::publish(&mut conn, &alice, "Second post", &["rust"]);

    let tags = list_tags(&mut conn).unwrap();
    assert_eq!(tags, vec!["diesel".to_string(), "rust".to_string()]);
}
