pub mod agent;
pub mod errors;
pub mod models;
pub mod prompt;
pub mod providers;
pub mod retriever;
