//! # Value Network
//!
//! [`FeatureApproximator`] maps raw observations to one value estimate per
//! action:
//!
//! ```text
//! obs / 255 -> conv 32@8x8/4 -> ReLU -> conv 64@4x4/2 -> ReLU -> conv 64@3x3/1 -> ReLU
//!           -> flatten -> dense 512 -> ReLU -> dense n_actions
//! ```
//!
//! Observations arrive channel-last, either a single `[height, width, channels]`
//! frame or a `[batch, height, width, channels]` stack; the output is always
//! `[batch, n_actions]`.
//!
//! The network is a pure function of its weights. A forward pass run while
//! gradient recording is enabled additionally returns a [`ForwardTrace`],
//! which [`FeatureApproximator::backward`] consumes to accumulate parameter
//! gradients.

use ndarray::{Array2, Array4, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD, Axis, Ix3, Ix4};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::config::{Device, ObservationShape};
use crate::error::{DeepQError, Result};
use crate::grad;
use crate::layers::{conv, Conv2DLayer, ConvCache, DenseCache, DenseLayer, LayerTrait};

/// Raw pixel intensities are scaled by this before feature extraction
pub const PIXEL_SCALE: f32 = 255.0;

/// (out_channels, kernel, stride) of each convolutional stage
pub const CONV_STAGES: [(usize, usize, usize); 3] = [(32, 8, 4), (64, 4, 2), (64, 3, 1)];

pub const HIDDEN_UNITS: usize = 512;

/// Shape (channels, height, width) of the feature map leaving the convolutional stack.
///
/// Fails with an `in_shape` parameter error when any stage would produce an
/// empty output.
pub fn feature_map_shape(in_shape: &ObservationShape) -> Result<(usize, usize, usize)> {
    if in_shape.channels == 0 {
        return Err(DeepQError::invalid_parameter("in_shape", "observation needs at least one channel"));
    }

    let mut hw = (in_shape.height, in_shape.width);
    let mut channels = in_shape.channels;
    for &(out_channels, kernel, stride) in CONV_STAGES.iter() {
        hw = stage_output(hw, kernel, stride).ok_or_else(|| DeepQError::InvalidParameter {
            name: "in_shape".to_string(),
            reason: format!(
                "{}x{} observation leaves no spatial extent for a {}x{} kernel with stride {}",
                in_shape.height, in_shape.width, kernel, kernel, stride
            ),
        })?;
        channels = out_channels;
    }
    Ok((channels, hw.0, hw.1))
}

fn stage_output((height, width): (usize, usize), kernel: usize, stride: usize) -> Option<(usize, usize)> {
    conv::output_extent(height, kernel, stride).zip(conv::output_extent(width, kernel, stride))
}

/// Convolutional action-value network
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FeatureApproximator {
    in_shape: ObservationShape,
    n_actions: usize,
    device: Device,
    /// Convolutional feature extractor
    pub features: Vec<Conv2DLayer>,
    /// Hidden dense layer followed by the linear value head
    pub head: Vec<DenseLayer>,
}

/// Activations kept by a recorded forward pass
#[derive(Clone, Debug)]
pub struct ForwardTrace {
    features: Vec<ConvCache>,
    head: Vec<DenseCache>,
    feature_map: (usize, usize, usize),
}

/// Output of a forward pass, with its trace when gradients were recorded
#[derive(Clone, Debug)]
pub struct Forward {
    /// Action values [batch, n_actions]
    pub output: Array2<f32>,
    pub trace: Option<ForwardTrace>,
}

/// Gradient buffer aligned with [`FeatureApproximator::parameters`]
#[derive(Clone, Debug, PartialEq)]
pub struct Gradients {
    tensors: Vec<ArrayD<f32>>,
}

impl Gradients {
    /// Zero-filled buffer with one tensor per parameter
    pub fn zeros_like(network: &FeatureApproximator) -> Self {
        let tensors = network
            .parameters()
            .iter()
            .map(|p| ArrayD::zeros(p.raw_dim()))
            .collect();
        Gradients { tensors }
    }

    /// Reset every accumulated gradient to zero
    pub fn zero(&mut self) {
        self.tensors.iter_mut().for_each(|t| t.fill(0.0));
    }

    pub fn tensors(&self) -> &[ArrayD<f32>] {
        &self.tensors
    }

    /// L2 norm over all tensors
    pub fn global_norm(&self) -> f32 {
        self.tensors
            .iter()
            .flat_map(|t| t.iter())
            .map(|&g| g * g)
            .sum::<f32>()
            .sqrt()
    }

    fn accumulate(&mut self, index: usize, gradient: ArrayViewD<f32>) -> Result<()> {
        let slot = self.tensors.get_mut(index).ok_or_else(|| {
            DeepQError::Training(format!("no gradient slot for parameter {}", index))
        })?;
        if slot.shape() != gradient.shape() {
            return Err(DeepQError::dimension_mismatch(
                format!("{:?}", slot.shape()),
                format!("{:?}", gradient.shape()),
            ));
        }
        *slot += &gradient;
        Ok(())
    }
}

impl FeatureApproximator {
    /// Build a network with freshly initialized weights
    pub fn new(in_shape: ObservationShape, n_actions: usize, device: Device) -> Result<Self> {
        Self::with_rng(in_shape, n_actions, device, &mut rand::thread_rng())
    }

    /// Build a network drawing its initial weights from `rng`
    pub fn with_rng<R: Rng + ?Sized>(
        in_shape: ObservationShape,
        n_actions: usize,
        device: Device,
        rng: &mut R,
    ) -> Result<Self> {
        if n_actions == 0 {
            return Err(DeepQError::invalid_parameter("n_actions", "must be at least 1"));
        }
        let (channels, height, width) = feature_map_shape(&in_shape)?;

        let mut in_channels = in_shape.channels;
        let mut features = Vec::with_capacity(CONV_STAGES.len());
        for &(out_channels, kernel, stride) in CONV_STAGES.iter() {
            features.push(Conv2DLayer::with_rng(
                in_channels,
                out_channels,
                (kernel, kernel),
                (stride, stride),
                Activation::Relu,
                rng,
            ));
            in_channels = out_channels;
        }

        let flat = channels * height * width;
        let head = vec![
            DenseLayer::with_rng(flat, HIDDEN_UNITS, Activation::Relu, rng),
            DenseLayer::with_rng(HIDDEN_UNITS, n_actions, Activation::Linear, rng),
        ];

        Ok(FeatureApproximator { in_shape, n_actions, device, features, head })
    }

    pub fn in_shape(&self) -> ObservationShape {
        self.in_shape
    }

    pub fn n_actions(&self) -> usize {
        self.n_actions
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Place raw observations as a normalized [batch, channels, height, width] tensor.
    ///
    /// Accepts one `[h, w, c]` observation (an implicit batch of one) or a
    /// `[batch, h, w, c]` stack.
    pub fn prepare(&self, observations: ArrayViewD<f32>) -> Result<Array4<f32>> {
        let (height, width, channels) = self.in_shape.hwc();
        let batched = match observations.ndim() {
            3 => observations.into_dimensionality::<Ix3>()?.insert_axis(Axis(0)),
            4 => observations.into_dimensionality::<Ix4>()?,
            _ => {
                return Err(DeepQError::dimension_mismatch(
                    format!("[{}, {}, {}] or [batch, {}, {}, {}]", height, width, channels, height, width, channels),
                    format!("{:?}", observations.shape()),
                ))
            }
        };

        let (batch, h, w, c) = batched.dim();
        if (h, w, c) != (height, width, channels) || batch == 0 {
            return Err(DeepQError::dimension_mismatch(
                format!("[batch >= 1, {}, {}, {}]", height, width, channels),
                format!("{:?}", batched.shape()),
            ));
        }

        let channel_first = batched.permuted_axes([0, 3, 1, 2]);
        Ok(channel_first.as_standard_layout().mapv(|v| v / PIXEL_SCALE))
    }

    /// Forward pass, recording a trace when gradient recording is enabled
    pub fn forward_t(&self, observations: ArrayViewD<f32>) -> Result<Forward> {
        let input = self.prepare(observations)?;
        let recording = grad::is_enabled();

        let mut feature_caches = Vec::with_capacity(self.features.len());
        let mut x = input;
        for layer in &self.features {
            let (out, cache) = layer.forward_batch(x.view(), self.device)?;
            feature_caches.extend(cache);
            x = out;
        }

        let (batch, channels, height, width) = x.dim();
        let mut h = x.into_shape((batch, channels * height * width))?;

        let mut head_caches = Vec::with_capacity(self.head.len());
        for layer in &self.head {
            let (out, cache) = layer.forward_batch(h.view())?;
            head_caches.extend(cache);
            h = out;
        }

        let trace = recording.then(|| ForwardTrace {
            features: feature_caches,
            head: head_caches,
            feature_map: (channels, height, width),
        });
        Ok(Forward { output: h, trace })
    }

    /// Action values for one observation or a batch, without recording
    pub fn forward(&self, observations: ArrayViewD<f32>) -> Result<Array2<f32>> {
        grad::no_grad(|| self.forward_t(observations)).map(|f| f.output)
    }

    /// Backpropagate `grad_output` (dLoss/dOutput, [batch, n_actions]) through a
    /// recorded pass and add the parameter gradients into `gradients`.
    pub fn backward(&self, trace: Option<&ForwardTrace>, grad_output: ArrayView2<f32>, gradients: &mut Gradients) -> Result<()> {
        let trace = trace.ok_or_else(|| {
            DeepQError::Training("forward pass ran with gradient recording disabled".to_string())
        })?;
        if trace.features.len() != self.features.len() || trace.head.len() != self.head.len() {
            return Err(DeepQError::Training("trace does not belong to this network".to_string()));
        }

        let head_offset = 2 * self.features.len();
        let mut error = grad_output.to_owned();
        for (i, (layer, cache)) in self.head.iter().zip(&trace.head).enumerate().rev() {
            let (input_grad, weight_grad, bias_grad) = layer.backward_batch(cache, error.view(), true)?;
            gradients.accumulate(head_offset + 2 * i, weight_grad.view().into_dyn())?;
            gradients.accumulate(head_offset + 2 * i + 1, bias_grad.view().into_dyn())?;
            error = input_grad.ok_or_else(|| DeepQError::Training("missing input gradient".to_string()))?;
        }

        let (channels, height, width) = trace.feature_map;
        let batch = error.nrows();
        let mut map_error: Array4<f32> = error.into_shape((batch, channels, height, width))?;
        for (i, (layer, cache)) in self.features.iter().zip(&trace.features).enumerate().rev() {
            // The raw observation needs no gradient
            let (input_grad, kernel_grad, bias_grad) = layer.backward_batch(cache, map_error.view(), i > 0)?;
            gradients.accumulate(2 * i, kernel_grad.view().into_dyn())?;
            gradients.accumulate(2 * i + 1, bias_grad.view().into_dyn())?;
            if let Some(input_grad) = input_grad {
                map_error = input_grad;
            }
        }
        Ok(())
    }

    /// All trainable tensors: each conv stage's kernels and biases, then each
    /// dense layer's weights and biases
    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.features
            .iter()
            .flat_map(|l| l.parameters())
            .chain(self.head.iter().flat_map(|l| l.parameters()))
            .collect()
    }

    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let FeatureApproximator { features, head, .. } = self;
        features
            .iter_mut()
            .flat_map(|l| l.parameters_mut())
            .chain(head.iter_mut().flat_map(|l| l.parameters_mut()))
            .collect()
    }

    pub fn num_parameters(&self) -> usize {
        self.features.iter().map(|l| l.num_parameters()).sum::<usize>()
            + self.head.iter().map(|l| l.num_parameters()).sum::<usize>()
    }

    /// Check that `other` pairs with this network tensor for tensor.
    pub fn check_same_structure(&self, other: &FeatureApproximator) -> Result<()> {
        let ours = self.parameters();
        let theirs = other.parameters();
        if ours.len() != theirs.len() {
            return Err(DeepQError::dimension_mismatch(
                format!("{} parameter tensors", ours.len()),
                format!("{} parameter tensors", theirs.len()),
            ));
        }
        if let Some((index, (a, b))) = ours
            .iter()
            .zip(&theirs)
            .enumerate()
            .find(|(_, (a, b))| a.shape() != b.shape())
        {
            return Err(DeepQError::dimension_mismatch(
                format!("parameter {} with shape {:?}", index, a.shape()),
                format!("shape {:?}", b.shape()),
            ));
        }
        Ok(())
    }

    /// Blend `source` into this network: `self = (1 - tau) * self + tau * source`.
    ///
    /// Tensors are paired by position and must have identical shapes; the
    /// pairing is checked in full before any tensor is touched.
    pub fn soft_update_from(&mut self, source: &FeatureApproximator, tau: f32) -> Result<()> {
        let _guard = grad::NoGradGuard::new();
        self.check_same_structure(source)?;

        for (mut target, src) in self.parameters_mut().into_iter().zip(source.parameters()) {
            target.zip_mut_with(&src, |t, &s| *t = (1.0 - tau) * *t + tau * s);
        }
        Ok(())
    }
}
