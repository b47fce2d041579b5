pub mod deployment;
pub mod project;
pub mod step;
pub mod user;

pub use deployment::{Deployment, DeploymentStatus};
pub use project::{Project, ProjectFile, ProjectStatus, Server, SharedFile, Variable};
pub use step::{LogStatus, OutputKind, OutputLine, ServerLog, Stage, Step, StepCommand};
pub use user::User;
