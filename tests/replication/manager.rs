// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use super::common::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiered_vectordb::placement::PlacementStrategy;
use tiered_vectordb::replication::*;
use tokio::time::sleep;

const WAIT: Duration = Duration::from_secs(5);

#[cfg(test)]
mod execution_tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_targets_fail_with_no_targets() {
        let manager = ReplicationManager::new("origin", fast_config()).unwrap();
        let failed = Arc::new(AtomicUsize::new(0));
        let counter = failed.clone();
        manager.set_on_replication_failed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.start().await;

        let task_id = manager
            .schedule_replication("origin", vec![], strings(&["v1"]))
            .await
            .unwrap();
        let task = wait_for_terminal(&manager, &task_id, WAIT).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some(NO_TARGETS_AVAILABLE));
        wait_for_count(&failed, 1, WAIT).await;
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_targets_fail_with_no_targets() {
        let manager = ReplicationManager::new("origin", fast_config()).unwrap();
        manager.start().await;

        let task_id = manager
            .schedule_replication("origin", strings(&["ghost"]), strings(&["v1"]))
            .await
            .unwrap();
        let task = wait_for_terminal(&manager, &task_id, WAIT).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some(NO_TARGETS_AVAILABLE));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_successful_replication_fires_one_callback() {
        let transport = Arc::new(TrackingTransport::new(Duration::from_millis(5)));
        let manager =
            ReplicationManager::with_transport("origin", fast_config(), transport.clone()).unwrap();
        manager.add_node("n1").await;
        manager.add_node("n2").await;

        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        manager.set_on_replication_complete(move |task| {
            assert_eq!(task.status, TaskStatus::Completed);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.start().await;

        let task_id = manager
            .schedule_replication("origin", strings(&["n1", "n2"]), strings(&["v1", "v2"]))
            .await
            .unwrap();
        let task = wait_for_terminal(&manager, &task_id, WAIT).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.error_message.is_none());
        assert!(task.started_at.unwrap() >= task.created_at);
        assert!(task.completed_at.unwrap() >= task.started_at.unwrap());
        assert!(task.duration().is_some());

        wait_for_count(&completed, 1, WAIT).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        let targets: HashSet<String> = transport.calls().into_iter().map(|(_, t, _)| t).collect();
        assert_eq!(targets, strings(&["n1", "n2"]).into_iter().collect());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_only_available_targets_receive_data() {
        let transport = Arc::new(TrackingTransport::new(Duration::ZERO));
        let manager =
            ReplicationManager::with_transport("origin", fast_config(), transport.clone()).unwrap();
        manager.add_node("alive").await;
        manager.start().await;

        let task_id = manager
            .schedule_replication("origin", strings(&["alive", "unknown"]), strings(&["v1"]))
            .await
            .unwrap();
        let task = wait_for_terminal(&manager, &task_id, WAIT).await;

        assert_eq!(task.status, TaskStatus::Completed);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "alive");
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_transfer_error_marks_task_failed() {
        let transport = Arc::new(FaultyTransport {
            bad_target: "flaky".to_string(),
        });
        let manager = ReplicationManager::with_transport("origin", fast_config(), transport).unwrap();
        manager.add_node("flaky").await;

        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let (c, f) = (completed.clone(), failed.clone());
        manager.set_on_replication_complete(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        manager.set_on_replication_failed(move |task| {
            assert_eq!(task.status, TaskStatus::Failed);
            f.fetch_add(1, Ordering::SeqCst);
        });
        manager.start().await;

        let task_id = manager
            .schedule_replication("origin", strings(&["flaky"]), strings(&["v1"]))
            .await
            .unwrap();
        let task = wait_for_terminal(&manager, &task_id, WAIT).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("connection reset"));
        wait_for_count(&failed, 1, WAIT).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_panicking_transport_does_not_kill_worker() {
        let transport = Arc::new(FaultyTransport {
            bad_target: "none".to_string(),
        });
        let config = ReplicationConfig {
            max_concurrent_replications: 1,
            ..fast_config()
        };
        let manager = ReplicationManager::with_transport("origin", config, transport).unwrap();
        manager.add_node("explode").await;
        manager.add_node("steady").await;
        manager.start().await;

        let boom = manager
            .schedule_replication("origin", strings(&["explode"]), strings(&["v1"]))
            .await
            .unwrap();
        let after = manager
            .schedule_replication("origin", strings(&["steady"]), strings(&["v2"]))
            .await
            .unwrap();

        let boom = wait_for_terminal(&manager, &boom, WAIT).await;
        assert_eq!(boom.status, TaskStatus::Failed);
        assert!(boom.error_message.unwrap().contains("transfer aborted"));

        let after = wait_for_terminal(&manager, &after, WAIT).await;
        assert_eq!(after.status, TaskStatus::Completed);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_kill_worker() {
        let config = ReplicationConfig {
            max_concurrent_replications: 1,
            ..fast_config()
        };
        let manager = ReplicationManager::with_transport(
            "origin",
            config,
            Arc::new(SimulatedTransport::instant()),
        )
        .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        manager.set_on_replication_complete(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("subscriber failure");
            }
        });
        manager.add_node("n1").await;
        manager.start().await;

        let first = manager
            .schedule_replication("origin", strings(&["n1"]), strings(&["v1"]))
            .await
            .unwrap();
        let first = wait_for_terminal(&manager, &first, WAIT).await;
        assert_eq!(first.status, TaskStatus::Completed);

        let second = manager
            .schedule_replication("origin", strings(&["n1"]), strings(&["v2"]))
            .await
            .unwrap();
        let second = wait_for_terminal(&manager, &second, WAIT).await;
        assert_eq!(second.status, TaskStatus::Completed);
        assert!(manager.is_running());

        let deadline = tokio::time::Instant::now() + WAIT;
        while calls.load(Ordering::SeqCst) < 2 {
            assert!(tokio::time::Instant::now() < deadline, "callback not retried");
            sleep(Duration::from_millis(5)).await;
        }
        manager.stop().await;
    }
}

#[cfg(test)]
mod concurrency_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let transport = Arc::new(TrackingTransport::new(Duration::from_millis(40)));
        let manager =
            ReplicationManager::with_transport("origin", fast_config(), transport.clone()).unwrap();
        manager.add_node("n1").await;
        manager.start().await;

        let mut task_ids = Vec::new();
        for i in 0..8 {
            task_ids.push(
                manager
                    .schedule_replication("origin", strings(&["n1"]), vec![format!("v{}", i)])
                    .await
                    .unwrap(),
            );
        }

        // sample while the queue drains
        for _ in 0..20 {
            assert!(manager.active_replications().await <= 2);
            sleep(Duration::from_millis(10)).await;
        }

        for task_id in &task_ids {
            let task = wait_for_terminal(&manager, task_id, WAIT).await;
            assert_eq!(task.status, TaskStatus::Completed);
        }
        assert!(transport.peak() <= 2);
        assert!(transport.peak() >= 1);
        assert_eq!(manager.active_replications().await, 0);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_single_worker_dispatches_in_creation_order() {
        let transport = Arc::new(TrackingTransport::new(Duration::from_millis(2)));
        let config = ReplicationConfig {
            max_concurrent_replications: 1,
            ..fast_config()
        };
        let manager =
            ReplicationManager::with_transport("origin", config, transport.clone()).unwrap();
        manager.add_node("n1").await;

        let mut task_ids = Vec::new();
        for i in 0..5 {
            task_ids.push(
                manager
                    .schedule_replication("origin", strings(&["n1"]), vec![format!("v{}", i)])
                    .await
                    .unwrap(),
            );
        }
        manager.start().await;

        for task_id in &task_ids {
            wait_for_terminal(&manager, task_id, WAIT).await;
        }
        let order: Vec<String> = transport
            .calls()
            .into_iter()
            .map(|(_, _, ids)| ids[0].clone())
            .collect();
        let expected: Vec<String> = (0..5).map(|i| format!("v{}", i)).collect();
        assert_eq!(order, expected);
        manager.stop().await;
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let manager = ReplicationManager::new("origin", fast_config()).unwrap();
        assert!(!manager.is_running());

        manager.stop().await;
        manager.start().await;
        manager.start().await;
        assert!(manager.is_running());

        manager.stop().await;
        manager.stop().await;
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_transfer() {
        let transport = Arc::new(TrackingTransport::new(Duration::from_millis(150)));
        let manager =
            ReplicationManager::with_transport("origin", fast_config(), transport).unwrap();
        manager.add_node("n1").await;
        manager.start().await;

        let task_id = manager
            .schedule_replication("origin", strings(&["n1"]), strings(&["v1"]))
            .await
            .unwrap();
        while manager.get_task_status(&task_id).await != Some(TaskStatus::InProgress) {
            sleep(Duration::from_millis(2)).await;
        }

        manager.stop().await;
        assert_eq!(
            manager.get_task_status(&task_id).await,
            Some(TaskStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_pending_tasks_wait_for_start() {
        let manager =
            ReplicationManager::with_transport("origin", fast_config(), Arc::new(SimulatedTransport::instant()))
                .unwrap();
        manager.add_node("n1").await;

        let task_id = manager
            .schedule_replication("origin", strings(&["n1"]), strings(&["v1"]))
            .await
            .unwrap();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(manager.get_task_status(&task_id).await, Some(TaskStatus::Pending));

        manager.start().await;
        let task = wait_for_terminal(&manager, &task_id, WAIT).await;
        assert_eq!(task.status, TaskStatus::Completed);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = ReplicationConfig {
            max_concurrent_replications: 0,
            ..ReplicationConfig::default()
        };
        assert!(matches!(
            ReplicationManager::new("origin", config),
            Err(ReplicationError::InvalidConfig(_))
        ));
    }
}

#[cfg(test)]
mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_creates_new_task_until_limit() {
        let config = ReplicationConfig {
            retry_attempts: 2,
            ..fast_config()
        };
        let transport = Arc::new(FaultyTransport {
            bad_target: "flaky".to_string(),
        });
        let manager = ReplicationManager::with_transport("origin", config, transport).unwrap();
        manager.add_node("flaky").await;
        manager.start().await;

        let first = manager
            .schedule_replication("origin", strings(&["flaky"]), strings(&["v1"]))
            .await
            .unwrap();
        wait_for_terminal(&manager, &first, WAIT).await;

        let second = manager.retry_task(&first).await.unwrap();
        assert_ne!(first, second);
        let retried = wait_for_terminal(&manager, &second, WAIT).await;
        assert_eq!(retried.status, TaskStatus::Failed);
        assert_eq!(retried.attempt, 2);
        assert_eq!(retried.retry_of.as_deref(), Some(first.as_str()));
        assert_eq!(retried.vector_ids, strings(&["v1"]));

        // the original stays failed
        assert_eq!(manager.get_task_status(&first).await, Some(TaskStatus::Failed));

        assert!(matches!(
            manager.retry_task(&second).await,
            Err(ReplicationError::RetryLimitExceeded { attempts: 2, .. })
        ));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_only_failed_tasks_can_be_retried() {
        let manager =
            ReplicationManager::with_transport("origin", fast_config(), Arc::new(SimulatedTransport::instant()))
                .unwrap();
        manager.add_node("n1").await;
        manager.start().await;

        let task_id = manager
            .schedule_replication("origin", strings(&["n1"]), strings(&["v1"]))
            .await
            .unwrap();
        wait_for_terminal(&manager, &task_id, WAIT).await;

        assert!(matches!(
            manager.retry_task(&task_id).await,
            Err(ReplicationError::NotRetryable {
                status: TaskStatus::Completed,
                ..
            })
        ));
        assert!(matches!(
            manager.retry_task("missing").await,
            Err(ReplicationError::TaskNotFound(_))
        ));
        manager.stop().await;
    }
}

#[cfg(test)]
mod placement_tests {
    use super::*;

    #[tokio::test]
    async fn test_replicate_vectors_groups_by_replica_set() {
        let config = ReplicationConfig {
            replication_factor: 2,
            ..fast_config()
        };
        let manager =
            ReplicationManager::with_transport("origin", config, Arc::new(SimulatedTransport::instant()))
                .unwrap();
        for node in ["n1", "n2", "n3", "n4"] {
            manager.add_node(node).await;
        }

        let vector_ids: Vec<String> = (0..30).map(|i| format!("vec-{}", i)).collect();
        let task_ids = manager
            .replicate_vectors("origin", vector_ids.clone())
            .await
            .unwrap();

        let available = manager.available_nodes().await;
        let placement = manager.placement();
        let mut seen = HashSet::new();
        let mut groups = HashSet::new();

        for task_id in &task_ids {
            let task = manager.get_task(task_id).await.unwrap();
            assert_eq!(task.source_node, "origin");
            assert_eq!(task.target_nodes.len(), 2);
            assert!(groups.insert(task.target_nodes.clone()));
            for id in &task.vector_ids {
                assert_eq!(placement.select_replicas(id, &available), task.target_nodes);
                assert!(seen.insert(id.clone()));
            }
        }
        assert_eq!(seen.len(), vector_ids.len());
    }

    #[tokio::test]
    async fn test_replicate_vectors_excludes_source() {
        let config = ReplicationConfig {
            replication_factor: 3,
            ..fast_config()
        };
        let manager = ReplicationManager::new("a", config).unwrap();
        for node in ["a", "b", "c"] {
            manager.add_node(node).await;
        }

        let task_ids = manager
            .replicate_vectors("a", strings(&["x", "y", "z"]))
            .await
            .unwrap();
        for task_id in task_ids {
            let task = manager.get_task(&task_id).await.unwrap();
            assert!(!task.target_nodes.contains(&"a".to_string()));
            assert_eq!(task.target_nodes.len(), 2);
        }
    }
}

#[cfg(test)]
mod query_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_filter_counts_and_prune() {
        let manager =
            ReplicationManager::with_transport("origin", fast_config(), Arc::new(SimulatedTransport::instant()))
                .unwrap();
        manager.add_node("n1").await;
        manager.start().await;

        let ok = manager
            .schedule_replication("origin", strings(&["n1"]), strings(&["v1"]))
            .await
            .unwrap();
        let bad = manager
            .schedule_replication("origin", vec![], strings(&["v2"]))
            .await
            .unwrap();
        wait_for_terminal(&manager, &ok, WAIT).await;
        wait_for_terminal(&manager, &bad, WAIT).await;
        manager.stop().await;

        let pending = manager
            .schedule_replication("origin", strings(&["n1"]), strings(&["v3"]))
            .await
            .unwrap();

        let all: Vec<String> = manager
            .list_tasks(None)
            .await
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(all, vec![ok.clone(), bad.clone(), pending.clone()]);

        let failed = manager.list_tasks(Some(TaskStatus::Failed)).await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task_id, bad);

        let health = manager.get_cluster_health().await;
        assert_eq!(health.task_counts["completed"], 1);
        assert_eq!(health.task_counts["failed"], 1);
        assert_eq!(health.task_counts["pending"], 1);
        assert_eq!(health.task_counts["in_progress"], 0);
        assert!(!health.running);

        assert_eq!(manager.prune_finished(Duration::ZERO).await, 2);
        assert!(manager.get_task(&ok).await.is_none());
        assert_eq!(manager.list_tasks(None).await.len(), 1);
    }
}
