use ndarray::{Array2, Array3, Array4, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{Device, ObservationShape};
use crate::error::DeepQError;
use crate::grad;
use crate::network::{feature_map_shape, FeatureApproximator, Gradients, HIDDEN_UNITS};

fn network(channels: usize, n_actions: usize, seed: u64) -> FeatureApproximator {
    FeatureApproximator::with_rng(
        ObservationShape::new(channels, 36, 36),
        n_actions,
        Device::Cpu,
        &mut StdRng::seed_from_u64(seed),
    )
    .unwrap()
}

fn random_frames(batch: usize, channels: usize, seed: u64) -> Array4<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array4::from_shape_fn((batch, 36, 36, channels), |_| rng.gen_range(0.0..255.0))
}

/// Sum of output values weighted by `weights`, so dLoss/dOutput == weights
fn weighted_output(net: &FeatureApproximator, input: &Array4<f32>, weights: &Array2<f32>) -> f32 {
    let output = net.forward(input.view().into_dyn()).unwrap();
    (&output * weights).sum()
}

#[test]
fn test_feature_map_shapes() {
    assert_eq!(feature_map_shape(&ObservationShape::new(4, 84, 84)).unwrap(), (64, 7, 7));
    assert_eq!(feature_map_shape(&ObservationShape::new(1, 36, 36)).unwrap(), (64, 1, 1));
    assert!(feature_map_shape(&ObservationShape::new(1, 35, 36)).is_err());
    assert!(feature_map_shape(&ObservationShape::new(0, 84, 84)).is_err());
}

#[test]
fn test_feature_map_shape_follows_conv_layers() {
    for &(height, width) in &[(36, 36), (36, 44), (84, 84), (105, 80)] {
        let shape = ObservationShape::new(2, height, width);
        let net = FeatureApproximator::with_rng(shape, 2, Device::Cpu, &mut StdRng::seed_from_u64(0)).unwrap();

        let hw = net
            .features
            .iter()
            .try_fold((height, width), |hw, layer| layer.output_hw(hw))
            .unwrap();
        let channels = net.features.last().unwrap().out_channels;
        assert_eq!(feature_map_shape(&shape).unwrap(), (channels, hw.0, hw.1));
    }
}

#[test]
fn test_network_structure() {
    let net = FeatureApproximator::new(ObservationShape::new(4, 84, 84), 6, Device::Cpu).unwrap();
    assert_eq!(net.features.len(), 3);
    assert_eq!(net.head.len(), 2);
    assert_eq!(net.head[0].input_size(), 3136);
    assert_eq!(net.head[0].output_size(), HIDDEN_UNITS);
    assert_eq!(net.head[1].output_size(), 6);

    let params = net.parameters();
    assert_eq!(params.len(), 10);
    assert_eq!(params[0].shape(), &[32, 4, 8, 8]);
    assert_eq!(params[2].shape(), &[64, 32, 4, 4]);
    assert_eq!(params[4].shape(), &[64, 64, 3, 3]);
    assert_eq!(params[6].shape(), &[3136, 512]);
    assert_eq!(params[9].shape(), &[6]);
}

#[test]
fn test_output_shape_single_and_batch() {
    let net = network(2, 4, 0);
    let single = Array3::<f32>::from_elem((36, 36, 2), 100.0);
    assert_eq!(net.forward(single.view().into_dyn()).unwrap().dim(), (1, 4));

    let batch = random_frames(5, 2, 1);
    assert_eq!(net.forward(batch.view().into_dyn()).unwrap().dim(), (5, 4));
}

#[test]
fn test_batch_rows_match_single_forward() {
    let net = network(1, 3, 2);
    let batch = random_frames(3, 1, 3);
    let batched = net.forward(batch.view().into_dyn()).unwrap();

    for (i, item) in batch.outer_iter().enumerate() {
        let single = net.forward(item.into_dyn()).unwrap();
        for (a, b) in single.row(0).iter().zip(batched.row(i).iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}

#[test]
fn test_prepare_scales_and_moves_channels_first() {
    let net = network(3, 2, 4);
    let mut frame = Array3::<f32>::zeros((36, 36, 3));
    frame[[1, 2, 0]] = 255.0;
    frame[[4, 5, 2]] = 51.0;

    let prepared = net.prepare(frame.view().into_dyn()).unwrap();
    assert_eq!(prepared.dim(), (1, 3, 36, 36));
    assert_eq!(prepared[[0, 0, 1, 2]], 1.0);
    assert!((prepared[[0, 2, 4, 5]] - 0.2).abs() < 1e-6);
    assert!(prepared.is_standard_layout());
}

#[test]
fn test_prepare_rejects_wrong_shapes() {
    let net = network(3, 2, 5);
    let wrong_channels = Array3::<f32>::zeros((36, 36, 1));
    assert!(matches!(
        net.prepare(wrong_channels.view().into_dyn()),
        Err(DeepQError::DimensionMismatch { .. })
    ));
    let empty_batch = Array4::<f32>::zeros((0, 36, 36, 3));
    assert!(net.prepare(empty_batch.view().into_dyn()).is_err());
    let flat = ndarray::Array1::<f32>::zeros(36);
    assert!(net.prepare(flat.view().into_dyn()).is_err());
}

#[test]
fn test_trace_only_when_recording() {
    let net = network(1, 2, 6);
    let input = random_frames(2, 1, 7);
    assert!(net.forward_t(input.view().into_dyn()).unwrap().trace.is_some());

    let untraced = grad::no_grad(|| net.forward_t(input.view().into_dyn())).unwrap();
    assert!(untraced.trace.is_none());

    let mut gradients = Gradients::zeros_like(&net);
    let err = net.backward(untraced.trace.as_ref(), untraced.output.view(), &mut gradients);
    assert!(matches!(err, Err(DeepQError::Training(_))));
}

#[test]
fn test_head_gradients_match_finite_differences() {
    let mut net = network(1, 2, 8);
    let input = random_frames(2, 1, 9);
    let weights = ndarray::arr2(&[[1.0, -0.5], [0.25, 2.0]]);

    let forward = net.forward_t(input.view().into_dyn()).unwrap();
    let mut gradients = Gradients::zeros_like(&net);
    net.backward(forward.trace.as_ref(), weights.view(), &mut gradients).unwrap();

    // Output bias: exactly the column sums of the output weighting
    let bias_grad = &gradients.tensors()[9];
    assert!((bias_grad[[0]] - 1.25).abs() < 1e-6);
    assert!((bias_grad[[1]] - 1.5).abs() < 1e-6);

    // The output is linear in the head weights, so central differences are exact up to rounding
    let eps = 1e-2;
    let weight_grad = &gradients.tensors()[8];
    for &(i, j) in &[(0, 0), (17, 1), (300, 0), (511, 1)] {
        let original = net.head[1].weights[[i, j]];
        net.head[1].weights[[i, j]] = original + eps;
        let plus = weighted_output(&net, &input, &weights);
        net.head[1].weights[[i, j]] = original - eps;
        let minus = weighted_output(&net, &input, &weights);
        net.head[1].weights[[i, j]] = original;

        let numerical = (plus - minus) / (2.0 * eps);
        let analytical = weight_grad[[i, j]];
        assert!(
            (numerical - analytical).abs() <= 1e-2 * (1.0 + analytical.abs()),
            "w[{}, {}]: numerical {} vs analytical {}",
            i, j, numerical, analytical
        );
    }
}

#[test]
fn test_first_conv_gradient_matches_finite_differences() {
    let mut net = network(1, 2, 10);
    let input = random_frames(1, 1, 11);
    let weights = ndarray::arr2(&[[1.0, -1.0]]);

    let forward = net.forward_t(input.view().into_dyn()).unwrap();
    let mut gradients = Gradients::zeros_like(&net);
    net.backward(forward.trace.as_ref(), weights.view(), &mut gradients).unwrap();
    let kernel_grad = gradients.tensors()[0].clone().into_dimensionality::<ndarray::Ix4>().unwrap();

    // Check the entries with the largest analytical gradient
    let mut indexed: Vec<(usize, f32)> = kernel_grad.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    assert!(indexed[0].1.abs() > 0.0);

    let eps = 1e-2;
    let shape = kernel_grad.dim();
    for &(flat, analytical) in indexed.iter().take(3) {
        let idx = (
            flat / (shape.1 * shape.2 * shape.3),
            (flat / (shape.2 * shape.3)) % shape.1,
            (flat / shape.3) % shape.2,
            flat % shape.3,
        );
        let original = net.features[0].kernels[idx];
        net.features[0].kernels[idx] = original + eps;
        let plus = weighted_output(&net, &input, &weights);
        net.features[0].kernels[idx] = original - eps;
        let minus = weighted_output(&net, &input, &weights);
        net.features[0].kernels[idx] = original;

        let numerical = (plus - minus) / (2.0 * eps);
        assert!(
            (numerical - analytical).abs() <= 5e-2 * analytical.abs() + 2e-3,
            "kernel {:?}: numerical {} vs analytical {}",
            idx, numerical, analytical
        );
    }
}

#[test]
fn test_gradients_accumulate_until_zeroed() {
    let net = network(1, 2, 12);
    let input = random_frames(1, 1, 13);
    let weights = ndarray::arr2(&[[1.0, 1.0]]);
    let forward = net.forward_t(input.view().into_dyn()).unwrap();

    let mut gradients = Gradients::zeros_like(&net);
    net.backward(forward.trace.as_ref(), weights.view(), &mut gradients).unwrap();
    let once = gradients.global_norm();
    net.backward(forward.trace.as_ref(), weights.view(), &mut gradients).unwrap();
    assert!((gradients.global_norm() - 2.0 * once).abs() <= 1e-3 * once);

    gradients.zero();
    assert_eq!(gradients.global_norm(), 0.0);
}

#[test]
fn test_soft_update_interpolates() {
    let mut target = network(1, 2, 14);
    let source = network(1, 2, 15);
    let before = target.clone();

    target.soft_update_from(&source, 0.25).unwrap();
    for ((t, b), s) in target.parameters().iter().zip(before.parameters()).zip(source.parameters()) {
        for ((&t, &b), &s) in t.iter().zip(b.iter()).zip(s.iter()) {
            assert!((t - (0.75 * b + 0.25 * s)).abs() < 1e-6);
        }
    }

    target.soft_update_from(&source, 1.0).unwrap();
    assert_eq!(target.parameters(), source.parameters());
}

#[test]
fn test_soft_update_rejects_other_structure() {
    let mut target = network(1, 2, 16);
    let other = network(1, 3, 16);
    let before = target.clone();

    assert!(matches!(
        target.soft_update_from(&other, 0.5),
        Err(DeepQError::DimensionMismatch { .. })
    ));
    assert_eq!(target, before);
}

#[test]
fn test_parallel_forward_matches_cpu() {
    let cpu = network(2, 3, 17);
    let input = random_frames(4, 2, 18);

    let parallel = FeatureApproximator::with_rng(
        ObservationShape::new(2, 36, 36),
        3,
        Device::Parallel,
        &mut StdRng::seed_from_u64(17),
    )
    .unwrap();
    assert_eq!(parallel.parameters(), cpu.parameters());
    assert!(parallel.device().is_parallel());

    let a = cpu.forward(input.view().into_dyn()).unwrap();
    let b = parallel.forward(input.view().into_dyn()).unwrap();
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() < 1e-4);
    }
    assert_eq!(a.len_of(Axis(0)), 4);
}
