//! CRUD endpoints over the store.
//!
//! Every mutating handler runs *mutate → save → broadcast* while holding the
//! store lock, so broadcasts go out in the order mutations were committed.
//! If the save fails or panics the store is restored from a checkpoint
//! taken before the mutation and nothing is broadcast.

use crate::error::{ApiError, ApiResult};
use crate::http::{Request, Response};
use crate::messaging::message_types;
use crate::server::ServerContext;
use crate::store::Store;
use crate::utils::current_timestamp;
use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info};

/// Persists the mutated store, or rolls it back to `checkpoint`.
///
/// A panicking backend also rolls back; the panic is then resumed so the
/// dispatcher answers 500.
async fn commit(ctx: &ServerContext, store: &mut Store, checkpoint: Store) -> ApiResult<()> {
    store.touch();
    let saved = AssertUnwindSafe(ctx.backend.save(store)).catch_unwind().await;
    match saved {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("💾 Failed to persist data, rolling back: {}", e);
            *store = checkpoint;
            Err(ApiError::Persistence(e))
        }
        Err(panic) => {
            error!("💾 Storage backend panicked, rolling back");
            *store = checkpoint;
            std::panic::resume_unwind(panic)
        }
    }
}

fn mutation_response(message: &str, key: &str, status: u16) -> Response {
    Response::json(
        &json!({
            "success": true,
            "message": message,
            "key": key,
            "timestamp": current_timestamp(),
        }),
        status,
    )
}

fn read_response(data: &Value) -> Response {
    Response::json(
        &json!({
            "success": true,
            "data": data,
            "timestamp": current_timestamp(),
        }),
        200,
    )
}

fn key_param(request: &Request) -> ApiResult<&str> {
    request
        .param("key")
        .ok_or_else(|| ApiError::BadRequest("Key is required".to_string()))
}

/// `GET /api/data`
pub async fn get_all(ctx: Arc<ServerContext>, _request: Request) -> ApiResult<Response> {
    let store = ctx.store.lock().await;
    Ok(read_response(&store.to_value()))
}

/// `GET /api/data/:key[?field=]`
///
/// A requested field that does not exist falls back to the whole value.
pub async fn get_one(ctx: Arc<ServerContext>, request: Request) -> ApiResult<Response> {
    let key = key_param(&request)?;
    let store = ctx.store.lock().await;

    let value = store
        .get(key)
        .ok_or_else(|| ApiError::NotFound(format!("Key not found: {key}")))?;
    let value = request
        .query("field")
        .and_then(|field| store.get_field(key, field))
        .unwrap_or(value);

    Ok(read_response(value))
}

/// `POST /api/data` with `{ key, value }`.
///
/// Without a `value` field the whole body is stored under `key`.
pub async fn create(ctx: Arc<ServerContext>, request: Request) -> ApiResult<Response> {
    let key = match request.body.get("key") {
        Some(Value::String(key)) if !key.is_empty() => key.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(ApiError::BadRequest("Key is required".to_string())),
    };
    let value = request
        .body
        .get("value")
        .cloned()
        .unwrap_or_else(|| request.body.clone());

    let mut store = ctx.store.lock().await;
    let checkpoint = store.clone();
    store.set(key.clone(), value.clone());
    commit(&ctx, &mut store, checkpoint).await?;

    ctx.connections.broadcast(
        message_types::DATA_UPDATED,
        json!({ "key": key, "value": value, "operation": "set" }),
    );
    info!("📝 Set key '{}'", key);

    Ok(mutation_response("Data saved", &key, 200))
}

/// `PUT /api/data/:key`
pub async fn update(ctx: Arc<ServerContext>, request: Request) -> ApiResult<Response> {
    let key = key_param(&request)?.to_string();

    let mut store = ctx.store.lock().await;
    let checkpoint = store.clone();
    let outcome = store.merge(&key, request.body)?;
    commit(&ctx, &mut store, checkpoint).await?;

    let value = store.get(&key).cloned().unwrap_or(Value::Null);
    ctx.connections.broadcast(
        message_types::DATA_UPDATED,
        json!({ "key": key, "value": value, "operation": "update" }),
    );
    info!("✏️ Updated key '{}' ({:?})", key, outcome);

    Ok(mutation_response("Data updated", &key, 200))
}

/// `DELETE /api/data/:key[?field=|?id=]`
pub async fn remove(ctx: Arc<ServerContext>, request: Request) -> ApiResult<Response> {
    let key = key_param(&request)?;

    let mut store = ctx.store.lock().await;
    let checkpoint = store.clone();
    let deleted = store.delete(key, request.query("field"), request.query("id"))?;
    commit(&ctx, &mut store, checkpoint).await?;

    ctx.connections.broadcast(
        message_types::DATA_UPDATED,
        json!({ "key": key, "operation": "delete" }),
    );
    info!("🗑️ Deleted from key '{}' ({:?})", key, deleted);

    Ok(mutation_response("Data deleted", key, 200))
}
