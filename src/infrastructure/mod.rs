pub mod engine;
pub mod fetch;
pub mod storage;
pub mod store;
