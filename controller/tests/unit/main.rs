//! Integration tests of the control plane against in-memory fakes

mod common;
mod test_coordinator;
mod test_manifest;
mod test_rollout;
mod test_store;
