// tests/transform_pipeline_tests.rs
//
// Properties of the observation transformer pipeline and the risk estimator.
//
// These tests verify:
// 1. Full chain grows (V, 5) to (V, 7) and matches its declared shape.
// 2. Zero-variance rows get confidence exactly 1.0.
// 3. Intention augmentation is deterministic and repeatable.
// 4. Noise -> confidence is not interchangeable with confidence -> noise.
// 5. Estimator output stays in [0, 1] for arbitrary matrices.
// 6. Malformed matrices fail fast with shape errors.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use highway_guard::config::{NoiseConfig, TransformConfig};
use highway_guard::rl::transform::row_confidence;
use highway_guard::rl::{
    ConfidenceAugmentation, FeatureColumn, IntentionAugmentation, NoiseInjection,
    ObservationMatrix, ObservationShape, ObservationTransformer, RiskEstimator, ShapeError,
    TransformerChain,
};

fn random_matrix(rng: &mut ChaCha8Rng, vehicles: usize) -> ObservationMatrix {
    let rows = (0..vehicles)
        .map(|_| {
            vec![
                1.0,
                rng.gen_range(-5.0..5.0),
                rng.gen_range(0.0..4.0),
                rng.gen_range(0.0..2.0),
                rng.gen_range(-1.0..1.0),
            ]
        })
        .collect();
    ObservationMatrix::from_rows(rows).unwrap()
}

/// Every row constant across columns 1-4, so every row has zero variance.
fn constant_rows(vehicles: usize) -> ObservationMatrix {
    let rows = (0..vehicles)
        .map(|i| {
            let c = i as f64 * 0.5;
            vec![1.0, c, c, c, c]
        })
        .collect();
    ObservationMatrix::from_rows(rows).unwrap()
}

fn mean_confidence(obs: &ObservationMatrix) -> f64 {
    let n = obs.vehicles();
    (0..n)
        .map(|r| obs.feature(r, FeatureColumn::Confidence).unwrap())
        .sum::<f64>()
        / n as f64
}

#[test]
fn test_full_chain_grows_two_columns() {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let cfg = TransformConfig {
        noise: NoiseConfig {
            enabled: true,
            std: 0.5,
            seed: Some(9),
        },
        confidence: true,
        intention: true,
    };
    let mut chain = TransformerChain::from_config(&cfg).unwrap();
    for vehicles in [1, 5, 15] {
        let input = random_matrix(&mut rng, vehicles);
        let declared = chain.output_shape(input.shape());
        assert_eq!(declared, ObservationShape::new(vehicles, 7));
        let out = chain.apply(input).unwrap();
        assert_eq!(out.shape(), declared);
        assert!(out.ensure_shape(declared).is_ok());
    }
}

#[test]
fn test_zero_variance_rows_have_full_confidence() {
    let out = ConfidenceAugmentation.transform(constant_rows(4)).unwrap();
    for r in 0..4 {
        assert_eq!(out.feature(r, FeatureColumn::Confidence), Some(1.0));
    }
    assert_eq!(row_confidence(&[1.0, 2.0, 2.0, 2.0, 2.0]), 1.0);
}

#[test]
fn test_intention_stage_is_repeatable() {
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let input = random_matrix(&mut rng, 6);
    let a = IntentionAugmentation.transform(input.clone()).unwrap();
    let b = IntentionAugmentation.transform(input).unwrap();
    assert_eq!(a, b);
    for r in 0..6 {
        let label = a.feature(r, FeatureColumn::Intention).unwrap();
        assert!(label == -1.0 || label == 0.0 || label == 1.0);
    }
}

#[test]
fn test_noise_then_confidence_differs_from_reverse_order() {
    let clean = constant_rows(8);

    let mut noise_first = TransformerChain::new()
        .with_stage(NoiseInjection::new(0.5, Some(21)).unwrap())
        .with_stage(ConfidenceAugmentation);
    let mut confidence_first = TransformerChain::new()
        .with_stage(ConfidenceAugmentation)
        .with_stage(NoiseInjection::new(0.5, Some(21)).unwrap());

    let post_noise = noise_first.apply(clean.clone()).unwrap();
    let pre_noise = confidence_first.apply(clean).unwrap();

    // Noise never touches the appended column, so confidence measured
    // before noise is still the clean value of 1.0 for every row.
    assert_eq!(mean_confidence(&pre_noise), 1.0);
    assert!(mean_confidence(&post_noise) < 1.0);
    assert_ne!(post_noise, pre_noise);
}

#[test]
fn test_estimator_stays_in_unit_interval() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let est = RiskEstimator::default();
    let mut chain = TransformerChain::new()
        .with_stage(NoiseInjection::new(2.0, Some(4)).unwrap())
        .with_stage(ConfidenceAugmentation)
        .with_stage(IntentionAugmentation);

    for _ in 0..200 {
        let vehicles = rng.gen_range(1..10);
        let raw = random_matrix(&mut rng, vehicles);
        let c = est.confidence(&raw);
        assert!((0.0..=1.0).contains(&c), "raw confidence {c}");

        let transformed = chain.apply(raw).unwrap();
        let c = est.confidence(&transformed);
        assert!((0.0..=1.0).contains(&c), "transformed confidence {c}");
    }
}

#[test]
fn test_estimator_handles_non_finite_confidence_feature() {
    let m = ObservationMatrix::from_rows(vec![vec![1.0, 0.0, 0.0, 1.0, 0.0]])
        .unwrap()
        .with_column(FeatureColumn::Confidence, &[f64::NAN])
        .unwrap();
    let e = RiskEstimator::default().estimate(&m);
    assert_eq!(e.self_reported, 0.0);
    assert_eq!(e.blended, 0.5);
}

#[test]
fn test_confidence_is_found_by_label_not_position() {
    let m = ObservationMatrix::from_rows(vec![vec![1.0, 0.0, 0.0, 1.0, 0.9]]).unwrap();
    let mut chain = TransformerChain::new()
        .with_stage(ConfidenceAugmentation)
        .with_stage(IntentionAugmentation);
    let out = chain.apply(m).unwrap();
    // The trailing column is the intention label (+1); confidence sits before it.
    assert_eq!(out.row(0)[6], 1.0);
    let confidence = out.feature(0, FeatureColumn::Confidence).unwrap();
    assert!(confidence < 1.0);
    assert_eq!(
        RiskEstimator::default().estimate(&out).self_reported,
        confidence
    );
}

#[test]
fn test_malformed_matrices_fail_fast() {
    assert_eq!(ObservationMatrix::from_rows(vec![]), Err(ShapeError::Empty));
    assert!(matches!(
        ObservationMatrix::from_rows(vec![vec![1.0, 0.0, 0.0]]),
        Err(ShapeError::TooFewFeatures { found: 3, .. })
    ));
    assert!(matches!(
        ObservationMatrix::from_rows(vec![vec![1.0; 5], vec![1.0; 4]]),
        Err(ShapeError::RaggedRow { row: 1, .. })
    ));

    let m = ObservationMatrix::from_rows(vec![vec![1.0; 5]; 2]).unwrap();
    assert!(matches!(
        m.with_column(FeatureColumn::Confidence, &[1.0]),
        Err(ShapeError::ColumnLength { .. })
    ));
}
