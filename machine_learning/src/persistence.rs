use std::{collections::HashMap, fs, path::Path};

use log::info;
use safetensors::{
    Dtype, SafeTensorError, SafeTensors, serialize_to_file, tensor::TensorView,
};

use crate::{
    MlErr, Result,
    arch::{Architecture, Classifier, TensorLayout},
};

/// The metadata key under which a model file stores its architecture.
pub const ARCHITECTURE_KEY: &str = "architecture";
const FORMAT_KEY: &str = "format";
const FORMAT: &str = "classifier";

/// Writes every tensor of `model` and its architecture to a single safetensors file.
pub fn save_model(path: &Path, model: &Classifier) -> Result<()> {
    let mut metadata = HashMap::new();
    metadata.insert(
        ARCHITECTURE_KEY.to_string(),
        serde_json::to_string(model.architecture())?,
    );
    metadata.insert(FORMAT_KEY.to_string(), FORMAT.to_string());

    write_tensors(path, model, Some(metadata))
}

/// Writes every tensor of `model` to a safetensors file, without the architecture.
pub fn save_weights(path: &Path, model: &Classifier) -> Result<()> {
    write_tensors(path, model, None)
}

/// Writes the architecture of a model as pretty printed json.
pub fn save_architecture(path: &Path, arch: &Architecture) -> Result<()> {
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, arch)?;
    Ok(())
}

/// Rebuilds a classifier from a file written by `save_model`.
pub fn load_model(path: &Path) -> Result<Classifier> {
    let bytes = fs::read(path)?;
    let (_, metadata) = SafeTensors::read_metadata(&bytes)?;

    let raw_arch = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(ARCHITECTURE_KEY))
        .ok_or_else(|| {
            MlErr::Architecture(format!("{} carries no architecture", path.display()))
        })?;

    let arch: Architecture = serde_json::from_str(raw_arch)?;
    let mut model = Classifier::new(arch)?;

    let tensors = SafeTensors::deserialize(&bytes)?;
    let layout = model.architecture().layout();
    read_tensors(path, &tensors, &layout, model.params_mut())?;

    info!(path:% = path.display(), params = model.params().len(); "loaded model");
    Ok(model)
}

/// Overwrites the backbone of `model` with the `block*` tensors of a pretrained weights file.
pub fn load_backbone(path: &Path, model: &mut Classifier) -> Result<()> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let layout: Vec<_> = model
        .architecture()
        .layout()
        .into_iter()
        .filter(|t| t.name.starts_with("block"))
        .collect();

    read_tensors(path, &tensors, &layout, model.params_mut())?;
    info!(path:% = path.display(), tensors = layout.len(); "loaded pretrained backbone");
    Ok(())
}

fn write_tensors(
    path: &Path,
    model: &Classifier,
    metadata: Option<HashMap<String, String>>,
) -> Result<()> {
    let params = model.params();
    let views = model
        .architecture()
        .layout()
        .into_iter()
        .map(|t| -> Result<_> {
            let data = bytemuck::cast_slice(&params[t.range]);
            Ok((t.name, TensorView::new(Dtype::F32, t.shape, data)?))
        })
        .collect::<Result<Vec<_>>>()?;

    serialize_to_file(views, &metadata, path)?;
    Ok(())
}

fn read_tensors(
    path: &Path,
    tensors: &SafeTensors,
    layout: &[TensorLayout],
    params: &mut [f32],
) -> Result<()> {
    for t in layout {
        let view = match tensors.tensor(&t.name) {
            Ok(view) => view,
            Err(SafeTensorError::TensorNotFound(name)) => {
                return Err(MlErr::MissingTensor {
                    name,
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if view.dtype() != Dtype::F32 || view.shape() != t.shape.as_slice() {
            return Err(MlErr::Architecture(format!(
                "tensor `{}` is {:?}{:?}, expected F32{:?}",
                t.name,
                view.dtype(),
                view.shape(),
                t.shape
            )));
        }

        let values: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        params[t.range.clone()].copy_from_slice(&values);
    }

    Ok(())
}
