//! # swarmcore-store
//!
//! Durable, receiver-addressed FIFO message queue. Every inter-agent
//! message in the orchestration core passes through here: the store is
//! the only channel agents use to talk to each other, and it is the
//! source of the at-least-once delivery guarantee the rest of the system
//! is built on.

mod store;

pub use store::MessageStore;
