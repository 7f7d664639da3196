//! Dispatch targets shipped with the server binary.

use serde_json::{json, Map, Value};
use valkyrja_core::{DispatchContext, Dispatcher, Response, Result};

/// Targets referenced by name from the route table
pub fn dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register("health", |_| async { Ok(Response::json(r#"{"status":"ok"}"#)) });
    dispatcher.register("echo", echo);
    dispatcher.register("entity.show", show_entity);
    dispatcher
}

/// Reflect method, path, captured parameters and query
async fn echo(ctx: DispatchContext) -> Result<Response> {
    let mut params = Map::new();
    for (name, value) in ctx.route.arguments() {
        params.insert(name.to_string(), serde_json::to_value(value)?);
    }
    let body = json!({
        "method": ctx.request.method.as_str(),
        "path": ctx.request.path,
        "params": Value::Object(params),
        "query": ctx.request.query_map(),
    });
    Ok(Response::json(body.to_string()))
}

/// First resolved entity of the route, as JSON
async fn show_entity(ctx: DispatchContext) -> Result<Response> {
    let entity = ctx
        .route
        .parameters
        .iter()
        .filter(|parameter| parameter.entity.is_some())
        .find_map(|parameter| ctx.entity(&parameter.name));
    match entity {
        Some(entity) => Ok(Response::json(serde_json::to_string(&entity.fields)?)),
        None => Ok(Response::not_found()),
    }
}
