use machine_learning::{
    MlErr,
    arch::{Architecture, BlockSpec, Classifier, InputShape},
    persistence,
};
use tempfile::tempdir;

fn arch(hidden_units: usize) -> Architecture {
    Architecture {
        input: InputShape {
            height: 8,
            width: 8,
            channels: 3,
        },
        blocks: vec![BlockSpec::new(4, 2), BlockSpec::new(6, 1)],
        hidden_units,
    }
}

#[test]
fn model_file_roundtrips_architecture_and_params() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.safetensors");

    let mut model = Classifier::new(arch(5)).unwrap();
    model.initialize(11).unwrap();
    persistence::save_model(&path, &model).unwrap();

    let loaded = persistence::load_model(&path).unwrap();
    assert_eq!(loaded.architecture(), model.architecture());
    assert_eq!(loaded.params(), model.params());
}

#[test]
fn weights_file_has_no_architecture() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model-weights.safetensors");

    let mut model = Classifier::new(arch(5)).unwrap();
    model.initialize(1).unwrap();
    persistence::save_weights(&path, &model).unwrap();

    assert!(matches!(
        persistence::load_model(&path),
        Err(MlErr::Architecture(_))
    ));
}

#[test]
fn pretrained_backbone_is_shared_across_heads() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("backbone.safetensors");

    let mut pretrained = Classifier::new(arch(5)).unwrap();
    pretrained.initialize(21).unwrap();
    persistence::save_weights(&path, &pretrained).unwrap();

    let mut model = Classifier::new(arch(9)).unwrap();
    model.initialize(22).unwrap();
    persistence::load_backbone(&path, &mut model).unwrap();

    let n = model.params().len() - model.trainable_size();
    assert_eq!(&model.params()[..n], &pretrained.params()[..n]);
    assert_ne!(model.head_params(), pretrained.head_params());
}

#[test]
fn architecture_is_written_as_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model-architecture.json");

    persistence::save_architecture(&path, &arch(3)).unwrap();
    let raw = std::fs::read_to_string(&path).unwrap();
    let parsed: Architecture = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed, arch(3));
}
