//! Model weight persistence in the safetensors format

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use tracing::info;

use crate::error::{Error, Result};

/// Prefix added to parameter names by replicated model wrappers
const REPLICA_PREFIX: &str = "module.";

fn canonical_name(name: &str) -> &str {
    name.strip_prefix(REPLICA_PREFIX).unwrap_or(name)
}

/// Snapshot of every parameter, copied to host memory
pub fn state_dict(var_map: &VarMap) -> Result<HashMap<String, Tensor>> {
    let data = var_map
        .data()
        .lock()
        .map_err(|_| Error::model("parameter map lock poisoned"))?;
    data.iter()
        .map(|(name, var)| -> Result<(String, Tensor)> {
            let tensor = var.as_tensor().detach().to_device(&Device::Cpu)?;
            Ok((canonical_name(name).to_string(), tensor))
        })
        .collect()
}

/// Save the parameters to `<filename>.safetensors` and return the path
pub fn save(var_map: &VarMap, filename: impl AsRef<Path>) -> Result<PathBuf> {
    let mut path = filename.as_ref().as_os_str().to_owned();
    path.push(".safetensors");
    let path = PathBuf::from(path);

    info!("=> Saving model to: {}", path.display());
    let tensors = state_dict(var_map)?;
    candle_core::safetensors::save(&tensors, &path)?;
    info!("=> Save Done");
    Ok(path)
}

/// Load a checkpoint into `var_map`, requiring an exact match
///
/// The checkpoint must hold exactly the parameters of the model, with the
/// same shapes. Tensors are converted to each parameter's device and dtype.
pub fn load_strict(var_map: &VarMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    info!("=> Load model weights: {}", path.display());

    let bytes = std::fs::read(path)
        .map_err(|e| Error::model_loading(format!("{}: {}", path.display(), e)))?;
    let header = safetensors::SafeTensors::deserialize(&bytes)
        .map_err(|e| Error::model_loading(format!("{}: {}", path.display(), e)))?;
    let stored: HashMap<String, Vec<usize>> = header
        .tensors()
        .into_iter()
        .map(|(name, view)| (canonical_name(&name).to_string(), view.shape().to_vec()))
        .collect();

    let data = var_map
        .data()
        .lock()
        .map_err(|_| Error::model("parameter map lock poisoned"))?;

    let expected: BTreeSet<&str> = data.keys().map(|k| canonical_name(k)).collect();
    let found: BTreeSet<&str> = stored.keys().map(String::as_str).collect();
    let missing: Vec<&str> = expected.difference(&found).copied().collect();
    let unexpected: Vec<&str> = found.difference(&expected).copied().collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(Error::model_loading(format!(
            "missing keys {:?}, unexpected keys {:?}",
            missing, unexpected
        )));
    }

    for (name, var) in data.iter() {
        let key = canonical_name(name);
        let shape = &stored[key];
        if shape.as_slice() != var.dims() {
            return Err(Error::model_loading(format!(
                "size mismatch for {}: checkpoint {:?}, model {:?}",
                key,
                shape,
                var.dims()
            )));
        }
    }

    let tensors = candle_core::safetensors::load_buffer(&bytes, &Device::Cpu)?;
    let by_name: HashMap<&str, &Tensor> = tensors
        .iter()
        .map(|(name, t)| (canonical_name(name), t))
        .collect();
    for (name, var) in data.iter() {
        let tensor = by_name
            .get(canonical_name(name))
            .ok_or_else(|| Error::model_loading(format!("missing tensor {name}")))?;
        var.set(&tensor.to_device(var.device())?.to_dtype(var.dtype())?)?;
    }

    info!("=> Load Done");
    Ok(())
}
