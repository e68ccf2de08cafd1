//! Helpers for setting up test environments, building wire-format transactions and mocking the external
//! interfaces (chain reader, message delivery).
pub mod encode;
pub mod mocks;
pub mod prepare_env;
