//! Collection and matcher behaviour through the public API.

use std::sync::Arc;
use valkyrja_core::config::AppConfig;
use valkyrja_core::matcher::normalize_path;
use valkyrja_core::{CastType, Collection, CollectionCache, Matcher, Method, ParamValue, Route};

fn users() -> Matcher {
    let mut collection = Collection::new();
    collection.add(Route::get("/users", "users.index").unwrap()).unwrap();
    collection
        .add(
            Route::get(r"/users/{id:\d+}", "users.show")
                .unwrap()
                .with_name("users.show")
                .with_cast("id", CastType::Int),
        )
        .unwrap();
    Matcher::new(Arc::new(collection))
}

#[test]
fn test_users_example() {
    let matcher = users();

    let index = matcher.match_route("/users", Method::Get).unwrap().unwrap();
    assert_eq!(index.dispatch, "users.index");
    assert!(!index.is_dynamic());

    let show = matcher.match_route("/users/42", Method::Get).unwrap().unwrap();
    assert_eq!(show.dispatch, "users.show");
    assert_eq!(show.param("id"), Some(&ParamValue::Int(42)));

    assert!(matcher.match_route("/users/abc", Method::Get).unwrap().is_none());
}

#[test]
fn test_static_takes_precedence_over_dynamic() {
    let mut collection = Collection::new();
    collection.add(Route::get("/users/{name}", "users.named").unwrap()).unwrap();
    collection.add(Route::get("/users/me", "users.me").unwrap()).unwrap();
    let matcher = Matcher::new(Arc::new(collection));

    let route = matcher.match_route("/users/me", Method::Get).unwrap().unwrap();
    assert_eq!(route.dispatch, "users.me");
    let route = matcher.match_route("/users/you", Method::Get).unwrap().unwrap();
    assert_eq!(route.dispatch, "users.named");
}

#[test]
fn test_method_isolation() {
    let mut collection = Collection::new();
    collection.add(Route::post("/orders/{id}", "orders.update").unwrap()).unwrap();
    let matcher = Matcher::new(Arc::new(collection));

    assert!(matcher.match_route("/orders/1", Method::Get).unwrap().is_none());
    assert!(matcher.match_route("/orders/1", Method::Post).unwrap().is_some());
    assert_eq!(matcher.allowed_methods("/orders/1"), vec![Method::Post]);
}

#[test]
fn test_matches_do_not_leak_between_requests() {
    let matcher = users();
    let mut first = matcher.match_route("/users/1", Method::Get).unwrap().unwrap();
    first.matches.push(("extra".to_string(), ParamValue::Bool(true)));

    let second = matcher.match_route("/users/2", Method::Get).unwrap().unwrap();
    assert_eq!(second.matches, vec![("id".to_string(), ParamValue::Int(2))]);
    let stored = matcher.collection().get_by_name("users.show").unwrap().unwrap();
    assert!(stored.matches.is_empty());
}

#[test]
fn test_first_registered_dynamic_route_wins() {
    let mut collection = Collection::new();
    collection.add(Route::get("/files/{path:.+}", "files.any").unwrap()).unwrap();
    collection.add(Route::get("/files/{name}", "files.one").unwrap()).unwrap();
    let matcher = Matcher::new(Arc::new(collection));

    let route = matcher.match_route("/files/readme", Method::Get).unwrap().unwrap();
    assert_eq!(route.dispatch, "files.any");
}

#[test]
fn test_normalization_is_idempotent() {
    for path in ["users/42/", "/users/42", "//users//42", "/users/42?x=1"] {
        let once = normalize_path(path);
        assert_eq!(once, "/users/42");
        assert_eq!(normalize_path(&once), once);
    }

    let matcher = users();
    let a = matcher.match_route("users/42/", Method::Get).unwrap().unwrap();
    let b = matcher.match_route("/users/42", Method::Get).unwrap().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_cache_file_restores_matching() {
    let matcher = users();
    let path = std::env::temp_dir().join(format!("valkyrja-routes-{}.json", std::process::id()));
    matcher.collection().to_cache().unwrap().save(&path).unwrap();

    let restored = Collection::from_cache(CollectionCache::load(&path).unwrap()).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(restored.len(), 2);
    assert!(!restored.is_resolved("users.show"));

    let matcher = Matcher::new(Arc::new(restored));
    let route = matcher.match_route("/users/7", Method::Get).unwrap().unwrap();
    assert_eq!(route.get_int("id"), Some(7));
    assert_eq!(matcher.url_for("users.show", &[("id", "9")]).unwrap(), "/users/9");
}

#[test]
fn test_route_table_from_toml() {
    let config = AppConfig::from_toml_str(
        r#"
        [[routes.definitions]]
        path = "/posts/{slug}"
        dispatch = "posts.show"
        name = "posts.show"

        [[routes.definitions]]
        path = "/posts"
        dispatch = "posts.store"
        methods = ["POST"]
        "#,
    )
    .unwrap();

    let collection = config.routes.collection().unwrap();
    assert!(collection.has_named("posts.show"));
    assert!(collection.has("/posts", Some(Method::Post)));
    assert!(!collection.has("/posts", Some(Method::Get)));
}
