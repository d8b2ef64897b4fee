pub mod storage;

pub use storage::{InMemoryStore, RequestMutation, Storage};
