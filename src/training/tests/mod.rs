//! Test suite for the agent's training pipeline
//!
//! Covers end-to-end training and validation loops, incremental-class
//! masking, execution strategies and weight persistence through the agent.

pub mod checkpoint_tests;

// Utility modules for testing
pub mod fixtures;

pub use fixtures::{AgentFixture, LineCapture};
pub use test_utils::{
    assert_tensor_close, create_test_device, dense_loader, sequence_loader, single_head_config,
    tiny_bert_spec, two_task_config,
};
