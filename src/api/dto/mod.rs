pub mod deployment;
pub mod project_file;
