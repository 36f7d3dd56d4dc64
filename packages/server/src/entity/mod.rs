pub mod batch;
pub mod project;
