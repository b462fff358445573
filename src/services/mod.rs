pub mod cache;
pub mod data;
pub mod http;
pub mod pipeline;
pub mod report;
pub mod sources;
