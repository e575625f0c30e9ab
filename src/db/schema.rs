diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        email -> Text,
        password -> Text,
        bio -> Nullable<Text>,
        image -> Nullable<Text>,
    }
}

diesel::table! {
    follows (id) {
        id -> Integer,
        follower_id -> Integer,
        following_id -> Integer,
    }
}

diesel::table! {
    articles (id) {
        id -> Integer,
        author_id -> Integer,
        slug -> Text,
        title -> Text,
        description -> Text,
        body -> Text,
        tag_list -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        favorites_count -> Integer,
    }
}

diesel::table! {
    favorites (id) {
        id -> Integer,
        user_id -> Integer,
        article_id -> Integer,
    }
}

diesel::table! {
    comments (id) {
        id -> Integer,
        article_id -> Integer,
        author_id -> Integer,
        body -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    tags (id) {
        id -> Integer,
        name -> Text,
    }
}

diesel::joinable!(articles -> users (author_id));
diesel::joinable!(comments -> articles (article_id));
diesel::joinable!(comments -> users (author_id));
diesel::joinable!(favorites -> articles (article_id));
diesel::joinable!(favorites -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(users, follows, articles, favorites, comments, tags);
