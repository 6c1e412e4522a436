//! Mirror Module Tests
//!
//! Drives mirrors directly through their mailboxes, without a dispatcher, to pin
//! down write application, registration and backfill.
//!
//! ## Test Scopes
//! - **Registration**: record joins, publication at construction, retirement.
//! - **Write application**: duplicate skipping, gap buffering, backlog limit.
//! - **Backfill**: snapshot transfer, post-snapshot forwarding, failure paths.

#[cfg(test)]
mod tests {
    use crate::config::MirrorConfig;
    use crate::error::{ClusterError, Result};
    use crate::mailbox::MailboxCluster;
    use crate::metadata::{MetadataController, Semilattice};
    use crate::mirror::{
        DispatcherMetadata, Mirror, MirrorId, MirrorRegistration, MirrorState, ReadEnvelope,
        WriteEnvelope,
    };
    use crate::protocol::kv::{KeyRegion, KeyValueProtocol, KvRead, KvWrite, MemoryStore};
    use crate::timestamps::StateTimestamp;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    type Kv = KeyValueProtocol;

    struct Harness {
        cluster: Arc<MailboxCluster>,
        metadata: MetadataController<DispatcherMetadata<Kv>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                cluster: MailboxCluster::new(),
                metadata: MetadataController::new(BTreeMap::new()),
            }
        }

        fn first_mirror(&self, config: MirrorConfig) -> Mirror<Kv> {
            Mirror::new(
                MemoryStore::new(KeyRegion::Universe),
                self.cluster.clone(),
                self.metadata.view(),
                config,
            )
            .unwrap()
        }

        async fn joining_mirror(&self, source: &MirrorId, config: MirrorConfig) -> Mirror<Kv> {
            Mirror::with_backfill(
                MemoryStore::new(KeyRegion::Universe),
                self.cluster.clone(),
                self.metadata.view(),
                source,
                &CancellationToken::new(),
                config,
            )
            .await
            .unwrap()
        }

        /// Starts a backfill in the background so the test can act while it streams.
        fn spawn_joining_mirror(
            &self,
            source: &MirrorId,
            config: MirrorConfig,
        ) -> JoinHandle<Result<Mirror<Kv>>> {
            let cluster = self.cluster.clone();
            let metadata = self.metadata.view();
            let source = source.clone();
            tokio::spawn(async move {
                Mirror::with_backfill(
                    MemoryStore::new(KeyRegion::Universe),
                    cluster,
                    metadata,
                    &source,
                    &CancellationToken::new(),
                    config,
                )
                .await
            })
        }

        fn registration(&self, id: &MirrorId) -> MirrorRegistration<Kv> {
            self.metadata.view().get().get(id).cloned().unwrap()
        }

        /// Sends a stamped write straight to `mirror`, as a dispatcher that only knows
        /// `mirror` would.
        fn send_write(
            &self,
            mirror: &Mirror<Kv>,
            timestamp: u64,
            write: KvWrite,
        ) -> mpsc::UnboundedReceiver<MirrorId> {
            let (ack, acks) = mpsc::unbounded_channel();
            let envelope = WriteEnvelope {
                write: Arc::new(write),
                timestamp: StateTimestamp(timestamp),
                recipients: Arc::new(BTreeSet::from([mirror.id().clone()])),
                ack,
            };
            self.cluster
                .send(&mirror.addresses().unwrap().write, envelope)
                .unwrap();
            acks
        }

        async fn apply(&self, mirror: &Mirror<Kv>, timestamp: u64, write: KvWrite) {
            let mut acks = self.send_write(mirror, timestamp, write);
            assert_eq!(acks.recv().await.as_ref(), Some(mirror.id()));
        }
    }

    /// One write putting `count` keys, so a snapshot of it streams for a while.
    fn bulk_write(count: usize) -> KvWrite {
        (1..count).fold(KvWrite::put("key-0000", "v"), |write, i| {
            write.and_put(format!("key-{:04}", i), "v")
        })
    }

    fn slow_backfill() -> MirrorConfig {
        MirrorConfig {
            backfill_chunk_size: 1,
            backfill_channel_capacity: 1,
            ..MirrorConfig::default()
        }
    }

    async fn let_others_run() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Records, for every ack, whether its sender's watermark was already published
    /// when the ack became visible.
    struct AckAudit {
        acks: mpsc::UnboundedReceiver<MirrorId>,
        timestamp: StateTimestamp,
        seen: DispatcherMetadata<Kv>,
        acked: BTreeSet<MirrorId>,
        unpublished: Vec<MirrorId>,
    }

    impl AckAudit {
        fn observe(&mut self, current: DispatcherMetadata<Kv>) {
            while let Ok(id) = self.acks.try_recv() {
                let published = self
                    .seen
                    .get(&id)
                    .is_some_and(|registration| registration.watermark >= self.timestamp);
                if !published {
                    self.unpublished.push(id.clone());
                }
                self.acked.insert(id);
            }
            self.seen = current;
        }
    }

    fn entries(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // ============================================================
    // REGISTRATION TESTS
    // ============================================================

    #[test]
    fn test_registration_joins_field_wise() {
        let mut left = MirrorRegistration::<Kv>::with_watermark(StateTimestamp(4));
        let right = MirrorRegistration::<Kv> {
            watermark: StateTimestamp(2),
            outdated: true,
            ..MirrorRegistration::default()
        };

        left.join(&right);
        assert_eq!(left.watermark, StateTimestamp(4));
        assert!(left.outdated);
        assert!(!left.retired);

        left.join(&MirrorRegistration::retirement());
        assert!(left.retired);
        assert!(left.write_target().is_none());
    }

    #[tokio::test]
    async fn test_first_mirror_registers_at_zero() {
        let harness = Harness::new();
        let mirror = harness.first_mirror(MirrorConfig::default());

        assert_eq!(mirror.state(), MirrorState::Active);
        let registration = harness.registration(mirror.id());
        assert_eq!(registration.watermark, StateTimestamp::zero());
        assert_eq!(registration.addresses, mirror.addresses());
        assert!(registration.read_target().is_some());
        assert!(!mirror.outdated_signal().is_pulsed());
    }

    #[tokio::test]
    async fn test_shutdown_retires_and_closes_mailboxes() {
        let harness = Harness::new();
        let mirror = harness.first_mirror(MirrorConfig::default());
        let id = mirror.id().clone();
        let addresses = mirror.addresses().unwrap();
        let mut states = mirror.state_changes();

        mirror.shutdown().await;

        assert_eq!(*states.borrow_and_update(), MirrorState::Stopped);
        let registration = harness.registration(&id);
        assert!(registration.retired);
        assert!(registration.outdated);
        assert_eq!(harness.cluster.mailbox_count(), 0);
        assert!(!harness.cluster.is_alive(&addresses.write));
    }

    #[tokio::test]
    async fn test_dropping_mirror_retires_it() {
        let harness = Harness::new();
        let mirror = harness.first_mirror(MirrorConfig::default());
        let id = mirror.id().clone();

        drop(mirror);

        assert!(harness.registration(&id).retired);
        assert_eq!(harness.cluster.mailbox_count(), 0);
    }

    // ============================================================
    // WRITE APPLICATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_duplicate_write_is_acked_without_effect() {
        let harness = Harness::new();
        let mirror = harness.first_mirror(MirrorConfig::default());

        harness.apply(&mirror, 1, KvWrite::put("a", "first")).await;
        harness.apply(&mirror, 1, KvWrite::put("a", "second")).await;

        assert_eq!(mirror.scan().await, entries(&[("a", "first")]));
        assert_eq!(mirror.watermark().await, StateTimestamp(1));
    }

    #[tokio::test]
    async fn test_writes_apply_in_timestamp_order() {
        let harness = Harness::new();
        let mirror = harness.first_mirror(MirrorConfig::default());

        // t2 arrives first and must wait for t1
        let mut second = harness.send_write(&mirror, 2, KvWrite::put("a", "2"));
        let mut first = harness.send_write(&mirror, 1, KvWrite::put("a", "1"));

        assert!(first.recv().await.is_some());
        assert!(second.recv().await.is_some());
        assert_eq!(mirror.scan().await, entries(&[("a", "2")]));
        assert_eq!(mirror.watermark().await, StateTimestamp(2));
        assert_eq!(mirror.pending_writes().await, 0);
    }

    #[tokio::test]
    async fn test_watermark_is_published_before_ack() {
        let harness = Harness::new();
        let mirror = harness.first_mirror(MirrorConfig::default());

        for t in 1..=5 {
            harness.apply(&mirror, t, KvWrite::put(format!("k{}", t), "v")).await;
            assert_eq!(harness.registration(mirror.id()).watermark, StateTimestamp(t));
        }
    }

    #[tokio::test]
    async fn test_backlog_beyond_limit_marks_outdated() {
        let harness = Harness::new();
        let mirror = harness.first_mirror(MirrorConfig {
            max_pending_writes: 2,
            ..MirrorConfig::default()
        });

        // t1 never arrives
        let _waiting: Vec<_> = (2..=4)
            .map(|t| harness.send_write(&mirror, t, KvWrite::put("a", t.to_string())))
            .collect();

        tokio::time::timeout(Duration::from_secs(1), mirror.outdated_signal().wait())
            .await
            .unwrap();
        let registration = harness.registration(mirror.id());
        assert!(registration.outdated);
        assert!(registration.read_target().is_none());
        assert!(registration.write_target().is_some());
        assert_eq!(mirror.watermark().await, StateTimestamp::zero());
    }

    #[tokio::test]
    async fn test_read_envelope_is_answered_from_store() {
        let harness = Harness::new();
        let mirror = harness.first_mirror(MirrorConfig::default());
        harness
            .apply(&mirror, 1, KvWrite::put("x", "1").and_put("y", "2"))
            .await;

        let (reply, response) = oneshot::channel();
        let read = ReadEnvelope {
            read: KvRead::key("y"),
            reply,
        };
        harness
            .cluster
            .send(&mirror.addresses().unwrap().read, read)
            .unwrap();

        let response = response.await.unwrap();
        assert_eq!(response.values.get("y").map(String::as_str), Some("2"));
        assert!(!response.values.contains_key("x"));
        assert_eq!(mirror.read_local(&KvRead::key("y")).await, response);
    }

    #[tokio::test]
    async fn test_shutdown_applies_writes_already_queued() {
        let harness = Harness::new();
        let mirror = harness.first_mirror(MirrorConfig::default());

        let mut acks = harness.send_write(&mirror, 1, KvWrite::put("a", "1"));
        let id = mirror.id().clone();
        mirror.shutdown().await;

        assert_eq!(acks.recv().await, Some(id.clone()));
        assert_eq!(harness.registration(&id).watermark, StateTimestamp(1));
    }

    // ============================================================
    // BACKFILL TESTS
    // ============================================================

    #[tokio::test]
    async fn test_backfill_copies_snapshot_in_chunks() {
        let harness = Harness::new();
        let config = MirrorConfig {
            backfill_chunk_size: 2,
            backfill_channel_capacity: 1,
            ..MirrorConfig::default()
        };
        let donor = harness.first_mirror(config.clone());
        for (t, key) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            harness.apply(&donor, t as u64 + 1, KvWrite::put(key, key)).await;
        }

        let joiner = harness.joining_mirror(donor.id(), config).await;

        assert_eq!(joiner.state(), MirrorState::Active);
        assert_eq!(joiner.scan().await, donor.scan().await);
        assert_eq!(joiner.watermark().await, StateTimestamp(5));
        assert_eq!(
            harness.registration(joiner.id()).watermark,
            StateTimestamp(5)
        );
    }

    #[tokio::test]
    async fn test_donor_forwards_writes_not_addressed_to_joiner() {
        let harness = Harness::new();
        let donor = harness.first_mirror(MirrorConfig::default());
        harness.apply(&donor, 1, KvWrite::put("a", "1")).await;

        let joiner = harness.joining_mirror(donor.id(), MirrorConfig::default()).await;

        // Addressed to the donor only; the joiner must still receive it
        let mut acks = harness.send_write(&donor, 2, KvWrite::put("b", "2"));
        let mut acked = BTreeSet::new();
        acked.insert(acks.recv().await.unwrap());
        acked.insert(acks.recv().await.unwrap());

        assert_eq!(
            acked,
            BTreeSet::from([donor.id().clone(), joiner.id().clone()])
        );
        assert_eq!(joiner.scan().await, entries(&[("a", "1"), ("b", "2")]));
        assert_eq!(joiner.watermark().await, StateTimestamp(2));
    }

    #[tokio::test]
    async fn test_backfill_from_unknown_source_fails() {
        let harness = Harness::new();
        let stranger = MirrorId::new();

        let result = Mirror::<Kv>::with_backfill(
            MemoryStore::new(KeyRegion::Universe),
            harness.cluster.clone(),
            harness.metadata.view(),
            &stranger,
            &CancellationToken::new(),
            MirrorConfig::default(),
        )
        .await;

        assert_eq!(result.err(), Some(ClusterError::MirrorUnavailable(stranger)));
        assert!(harness.metadata.view().get().is_empty());
    }

    #[tokio::test]
    async fn test_backfill_from_retired_source_fails() {
        let harness = Harness::new();
        let donor = harness.first_mirror(MirrorConfig::default());
        let donor_id = donor.id().clone();
        donor.shutdown().await;

        let result = Mirror::<Kv>::with_backfill(
            MemoryStore::new(KeyRegion::Universe),
            harness.cluster.clone(),
            harness.metadata.view(),
            &donor_id,
            &CancellationToken::new(),
            MirrorConfig::default(),
        )
        .await;

        assert!(matches!(result, Err(ClusterError::MirrorUnavailable(_))));
        assert_eq!(harness.metadata.view().get().len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_backfill_publishes_nothing() {
        let harness = Harness::new();
        let donor = harness.first_mirror(MirrorConfig::default());
        let interruptor = CancellationToken::new();
        interruptor.cancel();

        let result = Mirror::<Kv>::with_backfill(
            MemoryStore::new(KeyRegion::Universe),
            harness.cluster.clone(),
            harness.metadata.view(),
            donor.id(),
            &interruptor,
            MirrorConfig::default(),
        )
        .await;

        assert!(result.err().is_some_and(|e| e.is_interrupted()));
        let metadata = harness.metadata.view().get();
        assert_eq!(metadata.len(), 1);
        assert!(metadata.contains_key(donor.id()));
    }

    #[tokio::test]
    async fn test_backfill_requires_empty_store() {
        let harness = Harness::new();
        let donor = harness.first_mirror(MirrorConfig::default());
        let mut store = MemoryStore::new(KeyRegion::Universe);
        crate::protocol::Store::put(&mut store, "stale".to_string(), "x".to_string());

        let result = Mirror::<Kv>::with_backfill(
            store,
            harness.cluster.clone(),
            harness.metadata.view(),
            donor.id(),
            &CancellationToken::new(),
            MirrorConfig::default(),
        )
        .await;

        assert!(matches!(
            result,
            Err(ClusterError::PreconditionViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_donor_shutdown_still_forwards_queued_writes() {
        let harness = Harness::new();
        let donor = harness.first_mirror(MirrorConfig::default());
        let joiner = harness.joining_mirror(donor.id(), MirrorConfig::default()).await;

        // Addressed to the donor only and still queued when it shuts down
        let mut acks = harness.send_write(&donor, 1, KvWrite::put("a", "1"));
        let donor_id = donor.id().clone();
        donor.shutdown().await;

        let mut acked = BTreeSet::new();
        acked.insert(acks.recv().await.unwrap());
        acked.insert(acks.recv().await.unwrap());
        assert_eq!(acked, BTreeSet::from([donor_id, joiner.id().clone()]));

        // No gap left behind: the next write applies straight away
        harness.apply(&joiner, 2, KvWrite::put("b", "2")).await;
        assert_eq!(joiner.scan().await, entries(&[("a", "1"), ("b", "2")]));
        assert_eq!(joiner.pending_writes().await, 0);
        let registration = harness.registration(joiner.id());
        assert_eq!(registration.watermark, StateTimestamp(2));
        assert!(registration.read_target().is_some());
    }

    #[tokio::test]
    async fn test_donor_lost_mid_stream_fails_backfill() {
        let harness = Harness::new();
        let donor = harness.first_mirror(slow_backfill());
        harness.apply(&donor, 1, bulk_write(1000)).await;
        let donor_id = donor.id().clone();

        let joining = harness.spawn_joining_mirror(&donor_id, slow_backfill());
        let_others_run().await;
        donor.shutdown().await;

        let result = joining.await.unwrap();
        assert_eq!(result.err(), Some(ClusterError::MirrorUnavailable(donor_id.clone())));
        let metadata = harness.metadata.view().get();
        assert_eq!(metadata.len(), 1);
        assert!(metadata.contains_key(&donor_id));
    }

    #[tokio::test]
    async fn test_joiner_acks_tail_writes_only_after_registering() {
        let harness = Harness::new();
        let donor = harness.first_mirror(slow_backfill());
        harness.apply(&donor, 1, bulk_write(1000)).await;

        let joining = harness.spawn_joining_mirror(donor.id(), slow_backfill());
        let_others_run().await;

        // Lands in the joiner's buffer through the donor's tail while the snapshot streams
        let audit = Arc::new(std::sync::Mutex::new(AckAudit {
            acks: harness.send_write(&donor, 2, KvWrite::put("late", "2")),
            timestamp: StateTimestamp(2),
            seen: harness.metadata.view().get(),
            acked: BTreeSet::new(),
            unpublished: Vec::new(),
        }));
        let _subscription = {
            let audit = audit.clone();
            let view = harness.metadata.view();
            harness
                .metadata
                .view()
                .subscribe(Arc::new(move || audit.lock().unwrap().observe(view.get())))
        };

        let joiner = joining.await.unwrap().unwrap();
        assert_eq!(joiner.watermark().await, StateTimestamp(2));

        let mut audit = audit.lock().unwrap();
        audit.observe(harness.metadata.view().get());
        assert_eq!(
            audit.acked,
            BTreeSet::from([donor.id().clone(), joiner.id().clone()])
        );
        assert!(audit.unpublished.is_empty(), "acked early: {:?}", audit.unpublished);
    }
}
