use burn::backend::NdArray;

use blockcost::neural::model::graph::GraphModelConfig;
use blockcost::neural::model::hierarchical::{HierarchicalModelConfig, HierarchyType};
use blockcost::{DataItem, ModelConfig, ModelError, NamedParameters, ParameterSet};

type B = NdArray;

// add r1 <- r1, r2 ; mov r3 <- r1 ; sub r2 <- r3, r1 ; cmp <- r2
const BLOCK_JSON: &str = r#"{
  "instructions": [
    { "srcs": [1, 2], "dsts": [1] },
    { "srcs": [1], "dsts": [3] },
    { "srcs": [3, 1], "dsts": [2] },
    { "srcs": [2], "dsts": [] }
  ],
  "tokens": [
    [10, 1, 20, 21, 1, 20, 1],
    [11, 1, 20, 1, 22, 1],
    [12, 1, 22, 20, 1, 21, 1],
    [13, 1, 21, 1, 1]
  ]
}"#;

fn item() -> DataItem {
    DataItem::from_json(BLOCK_JSON).unwrap()
}

fn graph() -> ModelConfig {
    ModelConfig::Graph(
        GraphModelConfig::new()
            .with_vocab_size(32)
            .with_embedding_size(8)
            .with_hidden_size(8),
    )
}

fn hierarchical(hierarchy: HierarchyType) -> ModelConfig {
    ModelConfig::Hierarchical(
        HierarchicalModelConfig::new()
            .with_vocab_size(32)
            .with_embedding_size(8)
            .with_hidden_size(8)
            .with_hierarchy(hierarchy),
    )
}

#[test]
fn def_use_edges_are_derived_from_the_file() {
    let item = item();
    assert_eq!(item.block.parents(0), &[] as &[usize]);
    assert_eq!(item.block.parents(1), &[0]);
    assert_eq!(item.block.parents(2), &[1, 0]);
    assert_eq!(item.block.parents(3), &[2]);
    assert_eq!(item.block.terminal_instructions(), vec![3]);
    assert_eq!(item.block.paths().count(), 2);
}

#[test_log::test]
fn config_file_to_prediction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    graph().save(&path).unwrap();

    let config = ModelConfig::load(&path).unwrap();
    let model = config.init::<B>(None, &Default::default()).unwrap();
    let prediction = model.predict(&item()).unwrap();
    assert_eq!(prediction.len(), 1);
    assert!(prediction[0].is_finite());
    assert_eq!(prediction, model.predict(&item()).unwrap());
}

#[test_log::test]
fn every_hierarchy_predicts_the_file_block() {
    let device = Default::default();
    for hierarchy in [
        HierarchyType::None,
        HierarchyType::Dense,
        HierarchyType::MultiScale,
        HierarchyType::LinearModel,
        HierarchyType::MopModel,
    ] {
        let model = hierarchical(hierarchy).init::<B>(None, &device).unwrap();
        let prediction = model.predict(&item()).unwrap();
        assert!(prediction[0].is_finite(), "{}", hierarchy);
    }
}

#[test]
fn parameter_file_moves_weights_between_models() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.json");

    let source = graph().init::<B>(None, &device).unwrap();
    source.export_parameters().unwrap().save(&path).unwrap();

    let target = graph()
        .init::<B>(None, &device)
        .unwrap()
        .import_parameters(&ParameterSet::load(&path).unwrap())
        .unwrap();
    assert_eq!(source.predict(&item()).unwrap(), target.predict(&item()).unwrap());
}

#[test]
fn partial_parameter_import_keeps_other_weights() {
    let device = Default::default();
    let a = graph().init::<B>(None, &device).unwrap();
    let b = graph().init::<B>(None, &device).unwrap();

    let embedding = a.export_parameters().unwrap().subset("embedding.");
    assert_eq!(embedding.len(), 1);
    let b_before = b.export_parameters().unwrap();
    let b = b.import_parameters(&embedding).unwrap();
    let b_after = b.export_parameters().unwrap();

    assert_eq!(b_after.get("embedding.weight"), embedding.get("embedding.weight"));
    assert_eq!(b_after.get("dag.cell.input.weight"), b_before.get("dag.cell.input.weight"));
}

#[test]
fn graph_parameters_do_not_fit_a_hierarchical_model() {
    let device = Default::default();
    let params = graph().init::<B>(None, &device).unwrap().export_parameters().unwrap();
    let err = hierarchical(HierarchyType::Dense)
        .init::<B>(None, &device)
        .unwrap()
        .import_parameters(&params)
        .unwrap_err();
    assert!(matches!(err, ModelError::UnknownParameter(_)));
}

#[test]
fn checkpoint_restores_predictions() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let stem = dir.path().join("mop");

    let saved = hierarchical(HierarchyType::MopModel).init::<B>(None, &device).unwrap();
    saved.save(&stem).unwrap();

    let restored = hierarchical(HierarchyType::MopModel)
        .init::<B>(None, &device)
        .unwrap()
        .load(&stem, &device)
        .unwrap()
        .unwrap();
    assert_eq!(saved.predict(&item()).unwrap(), restored.predict(&item()).unwrap());
}

#[test]
fn token_outside_vocabulary_is_reported() {
    let model = ModelConfig::Graph(
        GraphModelConfig::new()
            .with_vocab_size(16)
            .with_embedding_size(4)
            .with_hidden_size(4),
    )
    .init::<B>(None, &Default::default())
    .unwrap();
    assert!(matches!(
        model.predict(&item()),
        Err(ModelError::TokenOutOfRange { .. })
    ));
}
