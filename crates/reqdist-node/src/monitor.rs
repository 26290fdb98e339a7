use std::sync::{Arc, Weak};
use std::time::Duration;

use reqdist_common::config::Settings;
use reqdist_common::transport::NodeService;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::process_node::ProcessNode;

/// Intervals of the reconnection monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Delay between checks while the coordinator is reachable.
    ///
    /// Default: 30s
    pub verification_interval: Duration,
    /// Delay between checks after a failure.
    ///
    /// Default: 5s
    pub reconnection_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            verification_interval: Duration::from_secs(30),
            reconnection_interval: Duration::from_secs(5),
        }
    }
}

impl From<&Settings> for MonitorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            verification_interval: settings.verification_interval,
            reconnection_interval: settings.reconnection_interval,
        }
    }
}

/// Keeps a worker node under the coordinator's control.
///
/// The first check runs at once. A node that received work since the last
/// tick is taken to be connected; otherwise it asks the coordinator (see
/// [`ProcessNode::verify_connection`]). Lost and restored events fire once
/// per transition.
pub struct ReconnectionMonitor {
    node: Weak<ProcessNode>,
    config: MonitorConfig,
    shutdown: CancellationToken,
}

impl ReconnectionMonitor {
    pub fn new(node: &Arc<ProcessNode>, config: MonitorConfig, shutdown: CancellationToken) -> Self {
        Self {
            node: Arc::downgrade(node),
            config,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut connected = match self.node.upgrade() {
            Some(node) => node.is_registered(),
            None => return,
        };
        let mut last_request = 0;

        loop {
            let Some(node) = self.node.upgrade() else {
                break;
            };
            if !node.is_active() {
                break;
            }

            let incoming = node.incoming();
            let outcome = if incoming == last_request {
                node.verify_connection().await
            } else {
                last_request = incoming;
                Ok(())
            };

            let delay = match outcome {
                Ok(()) => {
                    if !connected {
                        info!("Node {} restored connection with the coordinator", node.name());
                        node.events()
                            .dispatch("restored_connection", |l| l.restored_connection(node.node_info()));
                    }
                    connected = true;
                    self.config.verification_interval
                }
                Err(e) => {
                    if connected {
                        warn!("Node {} lost connection with the coordinator: {}", node.name(), e);
                        node.events()
                            .dispatch("lost_connection", |l| l.lost_connection(node.node_info()));
                    } else {
                        debug!("Node {} still disconnected: {}", node.name(), e);
                    }
                    connected = false;
                    self.config.reconnection_interval
                }
            };
            drop(node);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }
    }
}
