//! Exercises `RemoteBackend` against in-memory test doubles for `KvClient`
//! and `RemoteQueue` — standing in for a real network transport, which is
//! deliberately kept out of this crate's responsibility.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use taskkernel_core::{
    Consumer, GetTaskOptions, JobDescriptor, JobFuture, JobRegistry, TaskBackend, TaskPatch,
    TaskQueueConfig, TaskStatus,
};
use taskkernel_remote::{KvClient, RemoteBackend, RemoteQueue, Result};

#[derive(Default)]
struct FakeKv {
    data: DashMap<String, Vec<u8>>,
}

#[async_trait]
impl KvClient for FakeKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

#[derive(Default)]
struct FakeQueue {
    ids: SegQueue<String>,
    notify: Notify,
}

#[async_trait]
impl RemoteQueue for FakeQueue {
    async fn push(&self, id: &str) -> Result<()> {
        self.ids.push(id.to_string());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        if let Some(id) = self.ids.pop() {
            return Ok(Some(id));
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        Ok(self.ids.pop())
    }
}

fn echo_job(_c: Consumer, args: Vec<Value>, _k: Map<String, Value>) -> JobFuture {
    Box::pin(async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) })
}

fn backend() -> Arc<RemoteBackend> {
    let registry = JobRegistry::new();
    registry.register(JobDescriptor::regular("echo", echo_job));
    RemoteBackend::new(
        Arc::new(FakeKv::default()),
        Arc::new(FakeQueue::default()),
        registry,
        TaskQueueConfig::default(),
    )
}

#[tokio::test]
async fn run_job_persists_and_queues_a_pending_task() {
    let backend = backend();
    let id = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap().unwrap();
    let task = backend.get_task(GetTaskOptions::by_id(&id)).await.unwrap().unwrap();
    assert_eq!(task.name, "echo");
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn pull_next_dequeues_and_loads_the_full_record() {
    let backend = backend();
    let id = backend.run_job("echo", vec![Value::from(9)], Map::new()).await.unwrap().unwrap();
    let pulled = backend.get_task(GetTaskOptions::next(Duration::from_millis(50))).await.unwrap().unwrap();
    assert_eq!(pulled.id, id);
    assert_eq!(pulled.args, vec![Value::from(9)]);
}

#[tokio::test]
async fn duplicate_request_before_completion_is_dropped() {
    let backend = backend();
    let first = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap();
    let second = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap();
    assert!(first.is_some());
    assert!(second.is_none());
}

#[tokio::test]
async fn done_task_is_rekeyed_on_next_request() {
    let backend = backend();
    let id = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap().unwrap();
    backend
        .save_task(&id, TaskPatch::default().with_status(TaskStatus::Started).with_time_started(chrono::Utc::now()))
        .await
        .unwrap();
    backend
        .save_task(&id, TaskPatch::default().with_status(TaskStatus::Success).with_result(Value::from(99)).with_time_ended(chrono::Utc::now()))
        .await
        .unwrap();

    let fresh = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap();
    assert_eq!(fresh, Some(id.clone()));
    assert_eq!(backend.num_tasks().await.unwrap(), 2);
}

#[tokio::test]
async fn wait_for_task_polls_through_to_a_terminal_status() {
    let backend = Arc::clone(&backend());
    let id = backend.run_job("echo", vec![Value::from(1)], Map::new()).await.unwrap().unwrap();
    let writer = Arc::clone(&backend);
    let writer_id = id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer
            .save_task(&writer_id, TaskPatch::default().with_status(TaskStatus::Started).with_time_started(chrono::Utc::now()))
            .await
            .unwrap();
        writer
            .save_task(&writer_id, TaskPatch::default().with_status(TaskStatus::Success).with_result(Value::from(1)).with_time_ended(chrono::Utc::now()))
            .await
            .unwrap();
    });
    let observed = backend.wait_for_task(&id, Duration::from_secs(2)).await.unwrap().unwrap();
    assert_eq!(observed.status, TaskStatus::Success);
}
