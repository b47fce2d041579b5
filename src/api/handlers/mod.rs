pub mod deployment;
pub mod health;
pub mod project_file;
