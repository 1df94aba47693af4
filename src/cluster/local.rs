//! 进程内协调服务实现
//!
//! 单机模式下使用；测试中多个 [`LocalCoordinator`] 共享同一份
//! [`ClusterState`] 即可模拟多节点集群。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::lock::{ClusterLock, LeaseLock, LockHolder};
use super::{keys, ClusterCoordinator, CoordinatorError};
use crate::task::WorkerId;

/// 清理锁默认租约
const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(5 * 60);

/// 共享状态中的值
#[derive(Debug, Clone, PartialEq, Eq)]
enum SharedValue {
    Text(String),
    Set(HashSet<String>),
    WorkersByNode(HashMap<String, HashSet<WorkerId>>),
}

/// 模拟复制映射的集群共享状态
#[derive(Default)]
pub struct ClusterState {
    map: RwLock<HashMap<&'static str, SharedValue>>,
    locks: Mutex<HashMap<&'static str, Arc<Mutex<Option<LockHolder>>>>>,
}

impl ClusterState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock_slot(&self, name: &'static str) -> Arc<Mutex<Option<LockHolder>>> {
        self.locks
            .lock()
            .entry(name)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn text(&self, key: &'static str) -> Option<String> {
        match self.map.read().get(key) {
            Some(SharedValue::Text(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn set_text(&self, key: &'static str, value: &str) {
        self.map
            .write()
            .insert(key, SharedValue::Text(value.to_string()));
    }

    fn set(&self, key: &'static str) -> HashSet<String> {
        match self.map.read().get(key) {
            Some(SharedValue::Set(values)) => values.clone(),
            _ => HashSet::new(),
        }
    }

    fn update_set(&self, key: &'static str, update: impl FnOnce(&mut HashSet<String>)) {
        let mut map = self.map.write();
        let entry = map
            .entry(key)
            .or_insert_with(|| SharedValue::Set(HashSet::new()));
        if !matches!(entry, SharedValue::Set(_)) {
            *entry = SharedValue::Set(HashSet::new());
        }
        if let SharedValue::Set(values) = entry {
            update(values);
        }
    }

    fn update_workers(&self, update: impl FnOnce(&mut HashMap<String, HashSet<WorkerId>>)) {
        let mut map = self.map.write();
        let entry = map
            .entry(keys::WORKER_UUIDS)
            .or_insert_with(|| SharedValue::WorkersByNode(HashMap::new()));
        if !matches!(entry, SharedValue::WorkersByNode(_)) {
            *entry = SharedValue::WorkersByNode(HashMap::new());
        }
        if let SharedValue::WorkersByNode(workers) = entry {
            update(workers);
        }
    }
}

impl fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterState")
            .field("keys", &self.map.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 单个节点看到的协调服务
#[derive(Debug, Clone)]
pub struct LocalCoordinator {
    node_id: String,
    state: Arc<ClusterState>,
    lock_lease: Duration,
}

impl LocalCoordinator {
    /// 单机模式：独占一份集群状态
    pub fn standalone() -> Self {
        Self::join(ClusterState::new())
    }

    /// 以新节点身份加入已有集群状态
    pub fn join(state: Arc<ClusterState>) -> Self {
        let node_id = Uuid::new_v4().to_string();
        state.update_set(keys::CLIENT_UUIDS, |clients| {
            clients.insert(node_id.clone());
        });
        log::info!("Node {} joined cluster", node_id);
        Self {
            node_id,
            state,
            lock_lease: DEFAULT_LOCK_LEASE,
        }
    }

    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    pub fn state(&self) -> Arc<ClusterState> {
        self.state.clone()
    }
}

impl ClusterCoordinator for LocalCoordinator {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn acquire_clean_job_lock(&self) -> Arc<dyn ClusterLock> {
        Arc::new(LeaseLock::new(
            self.state.lock_slot(keys::CE_CLEANING_JOB_LOCK),
            self.node_id.clone(),
            self.lock_lease,
        ))
    }

    fn worker_uuids(&self) -> Result<HashSet<WorkerId>, CoordinatorError> {
        let clients = self.state.set(keys::CLIENT_UUIDS);
        let map = self.state.map.read();
        let workers = match map.get(keys::WORKER_UUIDS) {
            Some(SharedValue::WorkersByNode(by_node)) => by_node
                .iter()
                .filter(|(node, _)| clients.contains(*node))
                .flat_map(|(_, workers)| workers.iter().cloned())
                .collect(),
            _ => HashSet::new(),
        };
        Ok(workers)
    }

    fn set_worker_uuids(&self, workers: HashSet<WorkerId>) -> Result<(), CoordinatorError> {
        if !self.state.set(keys::CLIENT_UUIDS).contains(&self.node_id) {
            return Err(CoordinatorError::UnknownNode(self.node_id.clone()));
        }
        let node_id = self.node_id.clone();
        self.state.update_workers(|by_node| {
            by_node.insert(node_id, workers);
        });
        Ok(())
    }

    fn leave(&self) -> Result<(), CoordinatorError> {
        let node_id = self.node_id.clone();
        self.state.update_workers(|by_node| {
            by_node.remove(&node_id);
        });
        self.state.update_set(keys::CLIENT_UUIDS, |clients| {
            clients.remove(&node_id);
        });
        self.state.update_set(keys::OPERATIONAL_PROCESSES, |processes| {
            processes.remove(&node_id);
        });
        log::info!("Node {} left cluster", self.node_id);
        Ok(())
    }

    fn leader_id(&self) -> Option<String> {
        self.state.text(keys::LEADER)
    }

    fn set_leader_id(&self, node_id: &str) {
        self.state.set_text(keys::LEADER, node_id);
    }

    fn operational_processes(&self) -> HashSet<String> {
        self.state.set(keys::OPERATIONAL_PROCESSES)
    }

    fn mark_operational(&self, process: &str) {
        self.state.update_set(keys::OPERATIONAL_PROCESSES, |processes| {
            processes.insert(process.to_string());
        });
    }

    fn cluster_version(&self) -> Option<String> {
        self.state.text(keys::SONARQUBE_VERSION)
    }

    fn set_cluster_version(&self, version: &str) {
        self.state.set_text(keys::SONARQUBE_VERSION, version);
    }

    fn client_uuids(&self) -> HashSet<String> {
        self.state.set(keys::CLIENT_UUIDS)
    }
}
