use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::{AppError, Result};
use crate::services::deployer::Deployer;

/// Hands queued deployments to a background worker, which runs each one as
/// its own task.
#[derive(Clone)]
pub struct DeployQueue {
    sender: mpsc::UnboundedSender<String>,
}

impl DeployQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Creates the queue and starts its worker on the current runtime.
    pub fn spawn(deployer: Deployer) -> Self {
        let (queue, receiver) = Self::channel();
        tokio::spawn(run_worker(receiver, deployer));
        queue
    }

    pub fn dispatch(&self, deployment_id: &str) -> Result<()> {
        self.sender
            .send(deployment_id.to_string())
            .map_err(|_| AppError::InvalidRequest("Deploy queue is not running".to_string()))
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<String>, deployer: Deployer) {
    info!("Deploy worker started");
    while let Some(deployment_id) = receiver.recv().await {
        let deployer = deployer.clone();
        tokio::spawn(async move {
            if let Err(e) = deployer.run(&deployment_id).await {
                error!("Deployment {} could not run: {}", deployment_id, e);
            }
        });
    }
    info!("Deploy worker stopped");
}
