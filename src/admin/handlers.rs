use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::get,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::protocol::{
    BucketResponse, ENDPOINT_BUCKET, ENDPOINT_BUCKETS, ENDPOINT_OBJECT, ENDPOINT_PING,
    ENDPOINT_STATS, FetchObjectResponse, KEY_SEPARATOR, ListBucketsResponse, MirrorStats,
    StatsResponse, StoreObjectRequest, StoreObjectResponse, StoredObject, object_key,
};
use crate::dispatcher::MirrorDispatcher;
use crate::error::{ClusterError, Result};
use crate::protocol::kv::{KeyValueProtocol, KvRead, KvWrite};
use crate::timestamps::OrderToken;

pub type AdminDispatcher = MirrorDispatcher<KeyValueProtocol>;

/// Routes every admin endpoint to `dispatcher`.
pub fn router(dispatcher: Arc<AdminDispatcher>) -> Router {
    Router::new()
        .route(ENDPOINT_PING, get(handle_ping))
        .route(ENDPOINT_BUCKETS, get(handle_list_buckets))
        .route(ENDPOINT_BUCKET, get(handle_get_bucket))
        .route(
            ENDPOINT_OBJECT,
            get(handle_fetch_object)
                .put(handle_store_object)
                .delete(handle_delete_object),
        )
        .route(ENDPOINT_STATS, get(handle_stats))
        .layer(Extension(dispatcher))
}

fn status_for(error: &ClusterError) -> StatusCode {
    match error {
        ClusterError::NoLiveMirror | ClusterError::MirrorUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ClusterError::AckTimeout(_) | ClusterError::ReadTimeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Every store key starting with `prefix`. Requests are independent of one another,
/// so they carry no order token.
async fn scan_prefix(dispatcher: &AdminDispatcher, prefix: String) -> Result<Vec<String>> {
    let response = dispatcher
        .read(KvRead::Prefix(prefix), OrderToken::unordered())
        .await?;
    Ok(response.values.into_keys().collect())
}

async fn fetch(dispatcher: &AdminDispatcher, store_key: &str) -> Result<Option<String>> {
    let mut response = dispatcher
        .read(KvRead::key(store_key), OrderToken::unordered())
        .await?;
    Ok(response.values.remove(store_key))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

pub async fn handle_ping() -> &'static str {
    "OK"
}

pub async fn handle_list_buckets(
    Extension(dispatcher): Extension<Arc<AdminDispatcher>>,
) -> (StatusCode, Json<ListBucketsResponse>) {
    match scan_prefix(&dispatcher, String::new()).await {
        Ok(keys) => {
            let buckets: BTreeSet<String> = keys
                .iter()
                .filter_map(|key| key.split_once(KEY_SEPARATOR))
                .map(|(bucket, _)| bucket.to_string())
                .collect();
            (
                StatusCode::OK,
                Json(ListBucketsResponse {
                    buckets: buckets.into_iter().collect(),
                }),
            )
        }
        Err(e) => {
            tracing::error!("Failed to list buckets: {}", e);
            (
                status_for(&e),
                Json(ListBucketsResponse {
                    buckets: Vec::new(),
                }),
            )
        }
    }
}

pub async fn handle_get_bucket(
    Extension(dispatcher): Extension<Arc<AdminDispatcher>>,
    Path(bucket): Path<String>,
) -> (StatusCode, Json<BucketResponse>) {
    let prefix = object_key(&bucket, "");
    match scan_prefix(&dispatcher, prefix.clone()).await {
        Ok(keys) => {
            let keys = keys
                .iter()
                .filter_map(|key| key.strip_prefix(prefix.as_str()))
                .map(String::from)
                .collect();
            (StatusCode::OK, Json(BucketResponse { name: bucket, keys }))
        }
        Err(e) => {
            tracing::error!("Failed to list bucket {}: {}", bucket, e);
            (
                status_for(&e),
                Json(BucketResponse {
                    name: bucket,
                    keys: Vec::new(),
                }),
            )
        }
    }
}

pub async fn handle_fetch_object(
    Extension(dispatcher): Extension<Arc<AdminDispatcher>>,
    Path((bucket, key)): Path<(String, String)>,
) -> (StatusCode, Json<FetchObjectResponse>) {
    let (status, object) = match fetch(&dispatcher, &object_key(&bucket, &key)).await {
        Ok(Some(raw)) => match serde_json::from_str::<StoredObject>(&raw) {
            Ok(object) => (StatusCode::OK, Some(object)),
            Err(e) => {
                tracing::error!("Corrupt object {}/{}: {}", bucket, key, e);
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        },
        Ok(None) => (StatusCode::NOT_FOUND, None),
        Err(e) => {
            tracing::error!("Failed to fetch {}/{}: {}", bucket, key, e);
            (status_for(&e), None)
        }
    };

    (
        status,
        Json(FetchObjectResponse {
            bucket,
            key,
            object,
        }),
    )
}

pub async fn handle_store_object(
    Extension(dispatcher): Extension<Arc<AdminDispatcher>>,
    Path((bucket, key)): Path<(String, String)>,
    Json(req): Json<StoreObjectRequest>,
) -> (StatusCode, Json<StoreObjectResponse>) {
    let object = StoredObject {
        content: req.content,
        content_type: req.content_type,
        last_written: now_millis(),
    };
    let encoded = match serde_json::to_string(&object) {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::error!("Failed to serialize object: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StoreObjectResponse::failed()),
            );
        }
    };

    let write = KvWrite::put(object_key(&bucket, &key), encoded);
    match dispatcher.write(write, OrderToken::unordered()).await {
        Ok(ack) => {
            tracing::debug!("Stored {}/{} at {}", bucket, key, ack.timestamp);
            (
                StatusCode::OK,
                Json(StoreObjectResponse {
                    success: true,
                    timestamp: Some(ack.timestamp),
                }),
            )
        }
        Err(e) => {
            tracing::error!("Failed to store {}/{}: {}", bucket, key, e);
            (status_for(&e), Json(StoreObjectResponse::failed()))
        }
    }
}

pub async fn handle_delete_object(
    Extension(dispatcher): Extension<Arc<AdminDispatcher>>,
    Path((bucket, key)): Path<(String, String)>,
) -> (StatusCode, Json<StoreObjectResponse>) {
    let store_key = object_key(&bucket, &key);

    match fetch(&dispatcher, &store_key).await {
        Ok(Some(_)) => {}
        Ok(None) => return (StatusCode::NOT_FOUND, Json(StoreObjectResponse::failed())),
        Err(e) => {
            tracing::error!("Failed to look up {}/{}: {}", bucket, key, e);
            return (status_for(&e), Json(StoreObjectResponse::failed()));
        }
    }

    match dispatcher
        .write(KvWrite::delete(store_key), OrderToken::unordered())
        .await
    {
        Ok(ack) => (
            StatusCode::OK,
            Json(StoreObjectResponse {
                success: true,
                timestamp: Some(ack.timestamp),
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to delete {}/{}: {}", bucket, key, e);
            (status_for(&e), Json(StoreObjectResponse::failed()))
        }
    }
}

pub async fn handle_stats(
    Extension(dispatcher): Extension<Arc<AdminDispatcher>>,
) -> (StatusCode, Json<StatsResponse>) {
    let mirrors = dispatcher
        .mirrors()
        .into_iter()
        .map(|(id, registration)| MirrorStats {
            id,
            watermark: registration.watermark,
            outdated: registration.outdated,
            retired: registration.retired,
        })
        .collect();

    (
        StatusCode::OK,
        Json(StatsResponse {
            timestamp: dispatcher.current_timestamp().await,
            mirrors,
        }),
    )
}
