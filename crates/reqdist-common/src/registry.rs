//! Name service publishing worker endpoints under their node names.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::protocol::error::{ReqdistError, Result};
use crate::transport::{Endpoint, Transport};

#[async_trait]
pub trait NameService: Send + Sync {
    /// Binds `name` to `endpoint`.
    ///
    /// Fails with `NodeAlreadyExists` if a reachable node already holds the
    /// name. A binding whose owner no longer answers is replaced.
    async fn register(&self, name: &str, endpoint: Endpoint) -> Result<()>;

    async fn unregister(&self, name: &str) -> Result<()>;

    async fn lookup(&self, name: &str) -> Result<Endpoint>;

    async fn list_names(&self) -> Result<Vec<String>>;
}

/// An endpoint plus the generation it was bound at.
struct Binding {
    endpoint: Endpoint,
    generation: u64,
}

/// In-process [`NameService`] hosted by the coordinator.
///
/// Duplicate names are checked by describing the current owner with the
/// bindings unlocked, so a slow owner only delays registrations of its own
/// name.
pub struct InMemoryNameService {
    bindings: Mutex<BTreeMap<String, Binding>>,
    transport: Arc<dyn Transport>,
    active: AtomicBool,
    generations: AtomicU64,
}

impl InMemoryNameService {
    /// Creates a name service checking duplicate bindings through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            bindings: Mutex::new(BTreeMap::new()),
            transport,
            active: AtomicBool::new(true),
            generations: AtomicU64::new(0),
        }
    }

    /// Drops every binding and refuses further operations.
    pub async fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.bindings.lock().await.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ReqdistError::NameServiceInactive)
        }
    }
}

#[async_trait]
impl NameService for InMemoryNameService {
    async fn register(&self, name: &str, endpoint: Endpoint) -> Result<()> {
        self.ensure_active()?;
        // Generation of the binding last found unreachable
        let mut checked = None;

        loop {
            let (owner, generation) = {
                let mut bindings = self.bindings.lock().await;
                match bindings.get(name) {
                    Some(current) if checked != Some(current.generation) => {
                        (current.endpoint.clone(), current.generation)
                    }
                    _ => {
                        debug!("Bound {} to {}", name, endpoint);
                        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
                        bindings.insert(name.to_string(), Binding { endpoint, generation });
                        return Ok(());
                    }
                }
            };

            match self.transport.describe(&owner).await {
                Ok(_) => return Err(ReqdistError::NodeAlreadyExists(name.to_string())),
                Err(e) => {
                    info!("Replacing unreachable binding for {} ({})", name, e);
                    checked = Some(generation);
                }
            }
        }
    }

    async fn unregister(&self, name: &str) -> Result<()> {
        self.ensure_active()?;
        self.bindings
            .lock()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ReqdistError::NodeNotFound(name.to_string()))
    }

    async fn lookup(&self, name: &str) -> Result<Endpoint> {
        self.ensure_active()?;
        self.bindings
            .lock()
            .await
            .get(name)
            .map(|binding| binding.endpoint.clone())
            .ok_or_else(|| ReqdistError::NodeNotFound(name.to_string()))
    }

    async fn list_names(&self) -> Result<Vec<String>> {
        self.ensure_active()?;
        Ok(self.bindings.lock().await.keys().cloned().collect())
    }
}
