pub mod abort_registry;
pub mod deploy_queue;
pub mod deployer;
pub mod deployment_service;
pub mod mirror;
pub mod notifier;
pub mod project_file_service;
pub mod step_runner;
#[cfg(test)]
pub(crate) mod test_support;
pub mod transfer;
pub mod workspace;

pub use abort_registry::AbortRegistry;
pub use deploy_queue::DeployQueue;
pub use deployer::{DeploySettings, Deployer};
pub use deployment_service::{DeploymentService, NewDeployment};
pub use notifier::{DeploymentNotifier, LogNotifier, WebhookNotifier};
pub use project_file_service::{ProjectFileChanges, ProjectFileService};
