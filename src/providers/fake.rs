use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::instance_type::InstanceType;
use crate::providers::provider::{InstanceConfig, NodeId, ProviderError};

/// Scripted result for one `create()` call.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// A node id comes back and the node is on its way up.
    Launched,
    /// Same, but only after the given delay has passed.
    LaunchedAfter(Duration),
    /// Capacity for the requested instance type is sold out.
    OutOfCapacity,
    /// The request never got off the ground: quota, permissions, bad input.
    Rejected(String),
    /// The request was accepted but no node ever became ready.
    NeverJoined,
    /// The provider API itself was unreachable.
    Transport(String),
}

/// Scripted result for one `delete()` call.
#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    Deleted,
    Rejected(String),
}

/// Everything the allocator sent when it asked for a node.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub instance_type: InstanceType,
    pub config: InstanceConfig,
    /// The id handed back on success; None when the launch failed.
    pub node_id: Option<NodeId>,
}

struct Inner {
    /// Listings served in order; the final one repeats forever.
    catalog: Vec<Vec<InstanceType>>,
    create_script: VecDeque<CreateOutcome>,
    delete_script: VecDeque<DeleteOutcome>,
    launches: Vec<LaunchRecord>,
    deletions: Vec<NodeId>,
    listings_served: usize,
    next_node: u64,
}

/// In-memory stand-in for a cloud backend.
///
/// Outcomes are scripted up front and spent one per call; a dry script means
/// every call succeeds. Every call is also recorded, so a test can assert not
/// just that nodes were requested but exactly which instance types and which
/// node policy the allocator sent.
#[derive(Clone)]
pub struct FakeProvider {
    inner: Arc<Mutex<Inner>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                catalog: Vec::new(),
                create_script: VecDeque::new(),
                delete_script: VecDeque::new(),
                launches: Vec::new(),
                deletions: Vec::new(),
                listings_served: 0,
                next_node: 0,
            })),
        }
    }

    /// Serve the same listing on every enumeration.
    pub fn with_catalog(self, listing: Vec<InstanceType>) -> Self {
        self.inner.lock().unwrap().catalog = vec![listing];
        self
    }

    /// Serve each listing in turn, then repeat the last one. Lets a test
    /// shrink or grow the provider's offerings between reconcile passes.
    pub fn with_catalog_sequence(self, listings: Vec<Vec<InstanceType>>) -> Self {
        self.inner.lock().unwrap().catalog = listings;
        self
    }

    /// Queue the outcome of an upcoming `create()`.
    pub fn script_create(self, outcome: CreateOutcome) -> Self {
        self.inner.lock().unwrap().create_script.push_back(outcome);
        self
    }

    /// Queue the outcome of an upcoming `delete()`.
    pub fn script_delete(self, outcome: DeleteOutcome) -> Self {
        self.inner.lock().unwrap().delete_script.push_back(outcome);
        self
    }

    /// All `create()` calls seen so far, successes and failures alike.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.inner.lock().unwrap().launches.clone()
    }

    /// All node ids `delete()` was called with.
    pub fn deletions(&self) -> Vec<NodeId> {
        self.inner.lock().unwrap().deletions.clone()
    }

    fn mint_node_id(&self) -> NodeId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_node += 1;
        NodeId(format!("fake-{:04}", inner.next_node))
    }

    pub async fn instance_types(&self) -> Vec<InstanceType> {
        let mut inner = self.inner.lock().unwrap();
        if inner.catalog.is_empty() {
            return Vec::new();
        }
        let index = inner.listings_served.min(inner.catalog.len() - 1);
        inner.listings_served += 1;
        inner.catalog[index].clone()
    }

    pub async fn create(
        &self,
        instance_type: &InstanceType,
        config: &InstanceConfig,
    ) -> Result<NodeId, ProviderError> {
        let outcome = self
            .inner
            .lock()
            .unwrap()
            .create_script
            .pop_front()
            .unwrap_or(CreateOutcome::Launched);

        if let CreateOutcome::LaunchedAfter(delay) = &outcome {
            tokio::time::sleep(*delay).await;
        }

        let result = match outcome {
            CreateOutcome::Launched | CreateOutcome::LaunchedAfter(_) => Ok(self.mint_node_id()),
            CreateOutcome::OutOfCapacity => Err(ProviderError::InstanceTypeUnavailable(
                instance_type.name.clone(),
            )),
            CreateOutcome::Rejected(message) => Err(ProviderError::CreationFailed { message }),
            CreateOutcome::NeverJoined => Err(ProviderError::JoinTimeout {
                node_id: Some(self.mint_node_id()),
            }),
            CreateOutcome::Transport(message) => {
                Err(ProviderError::Internal(anyhow::anyhow!(message)))
            }
        };

        self.inner.lock().unwrap().launches.push(LaunchRecord {
            instance_type: instance_type.clone(),
            config: config.clone(),
            node_id: result.as_ref().ok().cloned(),
        });
        result
    }

    pub async fn delete(&self, node_id: &NodeId) -> Result<(), ProviderError> {
        let outcome = self
            .inner
            .lock()
            .unwrap()
            .delete_script
            .pop_front()
            .unwrap_or(DeleteOutcome::Deleted);

        self.inner.lock().unwrap().deletions.push(node_id.clone());

        match outcome {
            DeleteOutcome::Deleted => Ok(()),
            DeleteOutcome::Rejected(message) => Err(ProviderError::CreationFailed { message }),
        }
    }
}
