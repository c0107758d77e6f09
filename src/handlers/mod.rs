pub mod jobs;
pub mod public;
