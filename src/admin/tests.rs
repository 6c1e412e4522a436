//! Admin Adapter Tests
//!
//! Calls the handlers directly with their extractors, against a dispatcher backed by
//! one real mirror.

#[cfg(test)]
mod tests {
    use crate::admin::handlers::*;
    use crate::admin::protocol::{StoreObjectRequest, StoredObject, object_key};
    use crate::config::{DispatcherConfig, MirrorConfig};
    use crate::mailbox::MailboxCluster;
    use crate::metadata::MetadataController;
    use crate::mirror::Mirror;
    use crate::protocol::kv::{KeyRegion, KeyValueProtocol, MemoryStore};
    use crate::timestamps::StateTimestamp;
    use axum::Json;
    use axum::extract::{Extension, Path};
    use axum::http::StatusCode;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn dispatcher_with_mirror() -> (Arc<AdminDispatcher>, Mirror<KeyValueProtocol>) {
        let cluster = MailboxCluster::new();
        let metadata = MetadataController::new(BTreeMap::new());
        let dispatcher = AdminDispatcher::new(
            cluster.clone(),
            metadata.view(),
            StateTimestamp::zero(),
            DispatcherConfig::default(),
        );
        let mirror = Mirror::new(
            MemoryStore::new(KeyRegion::Universe),
            cluster,
            metadata.view(),
            MirrorConfig::default(),
        )
        .unwrap();
        (dispatcher, mirror)
    }

    async fn store(dispatcher: &Arc<AdminDispatcher>, bucket: &str, key: &str, content: &str) {
        let (status, Json(response)) = handle_store_object(
            Extension(dispatcher.clone()),
            Path((bucket.to_string(), key.to_string())),
            Json(StoreObjectRequest {
                content: content.to_string(),
                content_type: "text/plain".to_string(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
    }

    // ============================================================
    // OBJECT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_store_then_fetch_object() {
        let (dispatcher, mirror) = dispatcher_with_mirror();
        store(&dispatcher, "books", "dune", "spice").await;

        let (status, Json(response)) = handle_fetch_object(
            Extension(dispatcher.clone()),
            Path(("books".to_string(), "dune".to_string())),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let object = response.object.unwrap();
        assert_eq!(object.content, "spice");
        assert_eq!(object.content_type, "text/plain");

        // Stored as JSON under the combined key
        let entries = mirror.scan().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, object_key("books", "dune"));
        let decoded: StoredObject = serde_json::from_str(&entries[0].1).unwrap();
        assert_eq!(decoded, object);
    }

    #[tokio::test]
    async fn test_fetch_missing_object_is_not_found() {
        let (dispatcher, _mirror) = dispatcher_with_mirror();

        let (status, Json(response)) = handle_fetch_object(
            Extension(dispatcher),
            Path(("books".to_string(), "missing".to_string())),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(response.object.is_none());
    }

    #[tokio::test]
    async fn test_delete_object() {
        let (dispatcher, mirror) = dispatcher_with_mirror();
        store(&dispatcher, "books", "dune", "spice").await;

        let (status, Json(response)) = handle_delete_object(
            Extension(dispatcher.clone()),
            Path(("books".to_string(), "dune".to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.timestamp, Some(StateTimestamp(2)));
        assert!(mirror.scan().await.is_empty());

        let (status, _) = handle_delete_object(
            Extension(dispatcher),
            Path(("books".to_string(), "dune".to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_store_without_mirrors_is_unavailable() {
        let cluster = MailboxCluster::new();
        let metadata = MetadataController::new(BTreeMap::new());
        let dispatcher = AdminDispatcher::new(
            cluster,
            metadata.view(),
            StateTimestamp::zero(),
            DispatcherConfig::default(),
        );

        let (status, Json(response)) = handle_store_object(
            Extension(dispatcher),
            Path(("b".to_string(), "k".to_string())),
            Json(StoreObjectRequest {
                content: "x".to_string(),
                content_type: "text/plain".to_string(),
            }),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!response.success);
    }

    // ============================================================
    // BUCKET TESTS
    // ============================================================

    #[tokio::test]
    async fn test_list_buckets_and_keys() {
        let (dispatcher, _mirror) = dispatcher_with_mirror();
        store(&dispatcher, "books", "dune", "1").await;
        store(&dispatcher, "books", "emma", "2").await;
        store(&dispatcher, "films", "alien", "3").await;

        let (status, Json(buckets)) = handle_list_buckets(Extension(dispatcher.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(buckets.buckets, vec!["books", "films"]);

        let (status, Json(bucket)) =
            handle_get_bucket(Extension(dispatcher), Path("books".to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bucket.name, "books");
        assert_eq!(bucket.keys, vec!["dune", "emma"]);
    }

    // ============================================================
    // STATUS TESTS
    // ============================================================

    #[tokio::test]
    async fn test_ping_and_stats() {
        let (dispatcher, mirror) = dispatcher_with_mirror();
        assert_eq!(handle_ping().await, "OK");

        store(&dispatcher, "b", "k", "v").await;

        let (status, Json(stats)) = handle_stats(Extension(dispatcher.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats.timestamp, StateTimestamp(1));
        assert_eq!(stats.mirrors.len(), 1);
        assert_eq!(&stats.mirrors[0].id, mirror.id());
        assert_eq!(stats.mirrors[0].watermark, StateTimestamp(1));
        assert!(!stats.mirrors[0].retired);

        // Builds without panicking on conflicting routes
        let _router = router(dispatcher);
    }
}
