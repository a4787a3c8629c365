pub mod events;
pub mod handle;
pub mod heartbeat;
pub mod requests;
pub mod rpc;
pub mod search;
pub mod session;
pub mod subscriber;
pub mod types;
