//! Tests for saving and strictly reloading agent weights

use anyhow::Result;
use std::collections::HashMap;

use crate::agent::Agent;
use crate::config::{AgentConfig, ModelSpec, TaskHead};
use crate::error::Error;

use super::fixtures::AgentFixture;
use super::test_utils::{create_test_device, dense_loader, two_task_config};

fn weight_bits(agent: &Agent) -> Result<HashMap<String, Vec<u32>>> {
    let data = agent.model().var_map().data().lock().unwrap();
    let mut bits = HashMap::new();
    for (name, var) in data.iter() {
        let values = var.as_tensor().flatten_all()?.to_vec1::<f32>()?;
        bits.insert(name.clone(), values.iter().map(|v| v.to_bits()).collect());
    }
    Ok(bits)
}

#[test]
fn test_saved_weights_reload_bit_identical() -> Result<()> {
    let device = create_test_device();
    let mut fx = AgentFixture::new(two_task_config())?;
    let mut train = dense_loader(&[0, 2, 1, 1], &["a", "b", "b", "a"], 2, &device)?;
    fx.agent.learn_batch("a", &mut train, None)?;

    let path = fx.agent.save_model(fx.temp_dir.path().join("agent"))?;
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("safetensors"));

    let restored = Agent::new(AgentConfig {
        model_weights: Some(path),
        ..two_task_config()
    })?;
    assert_eq!(weight_bits(&fx.agent)?, weight_bits(&restored)?);
    Ok(())
}

#[test]
fn test_mismatched_architecture_fails_construction() -> Result<()> {
    let fx = AgentFixture::new(two_task_config())?;
    let path = fx.agent.save_model(fx.temp_dir.path().join("agent"))?;

    let wider = AgentConfig {
        model: ModelSpec::Mlp { in_dim: 4, hidden: vec![7] },
        model_weights: Some(path.clone()),
        ..two_task_config()
    };
    assert!(matches!(Agent::new(wider), Err(Error::ModelLoading(_))));

    let extra_head = AgentConfig {
        out_dim: vec![TaskHead::new("a", 2), TaskHead::new("b", 3), TaskHead::new("c", 2)],
        model_weights: Some(path),
        ..two_task_config()
    };
    assert!(matches!(Agent::new(extra_head), Err(Error::ModelLoading(_))));
    Ok(())
}

#[test]
fn test_missing_weight_file_fails_construction() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = AgentConfig {
        model_weights: Some(dir.path().join("absent.safetensors")),
        ..two_task_config()
    };
    assert!(matches!(Agent::new(config), Err(Error::ModelLoading(_))));
    Ok(())
}

#[test]
fn test_parameter_count_matches_architecture() -> Result<()> {
    let agent = Agent::new(two_task_config())?;
    // 4*6 + 6 backbone, 6*2 + 2 and 6*3 + 3 heads
    assert_eq!(agent.count_parameter(), 30 + 14 + 21);
    Ok(())
}
