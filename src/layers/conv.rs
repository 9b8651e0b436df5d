//! Convolutional layers for processing spatial data
//!
//! The 2D convolution is evaluated per batch item by unfolding every receptive
//! field into a row of a patch matrix (im2col) and multiplying it with the
//! flattened kernels. The same patch matrices are kept for the backward pass.

use ndarray::{s, Array1, Array2, Array4, ArrayView3, ArrayView4, ArrayViewD, ArrayViewMut3, ArrayViewMutD, Axis};
use ndarray::parallel::prelude::{IntoParallelRefIterator, ParallelIterator};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::config::Device;
use crate::error::{DeepQError, Result};
use crate::grad;
use crate::layers::initialization::WeightInit;
use super::traits::Layer as LayerTrait;

/// 2D Convolutional Layer
///
/// Applies 2D convolution without padding over inputs laid out as
/// [batch, channels, height, width].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Conv2DLayer {
    /// Convolution kernels/filters [out_channels, in_channels, kernel_height, kernel_width]
    pub kernels: Array4<f32>,

    /// Bias terms for each output channel
    pub biases: Array1<f32>,

    pub activation: Activation,

    pub stride: (usize, usize),

    pub in_channels: usize,

    pub out_channels: usize,

    pub kernel_size: (usize, usize),
}

/// Values a recorded forward pass keeps for backpropagation
#[derive(Clone, Debug)]
pub struct ConvCache {
    /// One patch matrix per batch item [out_h * out_w, in_channels * kh * kw]
    cols: Vec<Array2<f32>>,
    input_hw: (usize, usize),
    pre_activation: Array4<f32>,
}

impl Conv2DLayer {
    /// Create a new 2D convolutional layer
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        activation: Activation,
    ) -> Self {
        Self::with_rng(in_channels, out_channels, kernel_size, stride, activation, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let fan_in = in_channels * kernel_size.0 * kernel_size.1;
        let fan_out = out_channels * kernel_size.0 * kernel_size.1;

        let kernels = WeightInit::for_activation(&activation).initialize(
            (out_channels, in_channels, kernel_size.0, kernel_size.1),
            fan_in,
            fan_out,
            rng,
        );

        Conv2DLayer {
            kernels,
            biases: Array1::zeros(out_channels),
            activation,
            stride,
            in_channels,
            out_channels,
            kernel_size,
        }
    }

    /// Spatial size of the output for an input of `(height, width)`.
    ///
    /// `None` when the kernel does not fit, i.e. the output would be empty.
    pub fn output_hw(&self, input_hw: (usize, usize)) -> Option<(usize, usize)> {
        output_extent(input_hw.0, self.kernel_size.0, self.stride.0)
            .zip(output_extent(input_hw.1, self.kernel_size.1, self.stride.1))
    }

    fn patch_len(&self) -> usize {
        self.in_channels * self.kernel_size.0 * self.kernel_size.1
    }

    /// Kernels flattened to [out_channels, in_channels * kh * kw]
    fn kernel_matrix(&self) -> Result<Array2<f32>> {
        Ok(self
            .kernels
            .as_standard_layout()
            .into_owned()
            .into_shape((self.out_channels, self.patch_len()))?)
    }

    /// Unfold every receptive field of one item [channels, height, width]
    fn im2col(&self, item: ArrayView3<f32>, out_hw: (usize, usize)) -> Array2<f32> {
        let (kh, kw) = self.kernel_size;
        let (sh, sw) = self.stride;
        let mut cols = Array2::zeros((out_hw.0 * out_hw.1, self.patch_len()));

        for (row, mut col_row) in cols.outer_iter_mut().enumerate() {
            let y = (row / out_hw.1) * sh;
            let x = (row % out_hw.1) * sw;
            let patch = item.slice(s![.., y..y + kh, x..x + kw]);
            col_row.iter_mut().zip(patch.iter()).for_each(|(dst, &src)| *dst = src);
        }

        cols
    }

    /// Scatter-add patch gradients back onto an item's input gradient
    fn col2im(&self, dcols: &Array2<f32>, out_hw: (usize, usize), mut target: ArrayViewMut3<f32>) {
        let (kh, kw) = self.kernel_size;
        let (sh, sw) = self.stride;

        for (row, col_row) in dcols.outer_iter().enumerate() {
            let y = (row / out_hw.1) * sh;
            let x = (row % out_hw.1) * sw;
            let mut patch = target.slice_mut(s![.., y..y + kh, x..x + kw]);
            patch.iter_mut().zip(col_row.iter()).for_each(|(dst, &g)| *dst += g);
        }
    }

    /// Forward pass for a batch of images [batch, channels, height, width].
    ///
    /// The cache is only produced while gradient recording is enabled.
    pub fn forward_batch(&self, input: ArrayView4<f32>, device: Device) -> Result<(Array4<f32>, Option<ConvCache>)> {
        let (batch_size, channels, in_height, in_width) = input.dim();
        if channels != self.in_channels {
            return Err(DeepQError::dimension_mismatch(
                format!("{} input channels", self.in_channels),
                format!("{} input channels", channels),
            ));
        }
        let out_hw = self.output_hw((in_height, in_width)).ok_or_else(|| {
            DeepQError::dimension_mismatch(
                format!("spatial extent of at least {:?}", self.kernel_size),
                format!("{:?}", (in_height, in_width)),
            )
        })?;

        let kernel_matrix = self.kernel_matrix()?;
        let convolve_item = |b: &usize| -> (Array2<f32>, Array2<f32>) {
            let cols = self.im2col(input.index_axis(Axis(0), *b), out_hw);
            // [out_h * out_w, out_channels]
            let out = cols.dot(&kernel_matrix.t()) + &self.biases;
            (cols, out)
        };

        let items: Vec<usize> = (0..batch_size).collect();
        let per_item: Vec<(Array2<f32>, Array2<f32>)> = if device.is_parallel() {
            items.par_iter().map(convolve_item).collect()
        } else {
            items.iter().map(convolve_item).collect()
        };

        let mut pre_activation = Array4::zeros((batch_size, self.out_channels, out_hw.0, out_hw.1));
        let mut cols = Vec::with_capacity(batch_size);
        for (b, (item_cols, item_out)) in per_item.into_iter().enumerate() {
            let channel_major = item_out
                .reversed_axes()
                .as_standard_layout()
                .into_owned()
                .into_shape((self.out_channels, out_hw.0, out_hw.1))?;
            pre_activation.index_axis_mut(Axis(0), b).assign(&channel_major);
            cols.push(item_cols);
        }

        let mut output = pre_activation.clone();
        self.activation.apply(&mut output);

        let cache = grad::is_enabled().then(|| ConvCache {
            cols,
            input_hw: (in_height, in_width),
            pre_activation,
        });
        Ok((output, cache))
    }

    /// Backward pass.
    ///
    /// Returns the input gradient (when requested), the kernel gradient and the
    /// bias gradient.
    pub fn backward_batch(
        &self,
        cache: &ConvCache,
        output_gradient: ArrayView4<f32>,
        need_input_grad: bool,
    ) -> Result<(Option<Array4<f32>>, Array4<f32>, Array1<f32>)> {
        if output_gradient.dim() != cache.pre_activation.dim() {
            return Err(DeepQError::dimension_mismatch(
                format!("{:?}", cache.pre_activation.dim()),
                format!("{:?}", output_gradient.dim()),
            ));
        }

        let (batch_size, _, out_height, out_width) = output_gradient.dim();
        let out_hw = (out_height, out_width);
        let delta = &output_gradient * &self.activation.derivative(cache.pre_activation.view());

        let kernel_matrix = self.kernel_matrix()?;
        let mut kernel_grads = Array2::<f32>::zeros((self.out_channels, self.patch_len()));
        let mut bias_grads = Array1::<f32>::zeros(self.out_channels);
        let mut input_grads = need_input_grad.then(|| {
            Array4::<f32>::zeros((batch_size, self.in_channels, cache.input_hw.0, cache.input_hw.1))
        });

        for (b, item_cols) in cache.cols.iter().enumerate() {
            // [out_channels, out_h * out_w]
            let g = delta
                .index_axis(Axis(0), b)
                .to_owned()
                .into_shape((self.out_channels, out_height * out_width))?;

            kernel_grads += &g.dot(item_cols);
            bias_grads += &g.sum_axis(Axis(1));

            if let Some(grads) = input_grads.as_mut() {
                let dcols = g.t().dot(&kernel_matrix);
                self.col2im(&dcols, out_hw, grads.index_axis_mut(Axis(0), b));
            }
        }

        let kernel_grads = kernel_grads.into_shape(self.kernels.raw_dim())?;
        Ok((input_grads, kernel_grads, bias_grads))
    }
}

/// Length of a valid (unpadded) convolution along one axis, `None` when empty
pub(crate) fn output_extent(input: usize, kernel: usize, stride: usize) -> Option<usize> {
    (stride > 0 && kernel > 0 && input >= kernel).then(|| (input - kernel) / stride + 1)
}

impl LayerTrait for Conv2DLayer {
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.kernels.view().into_dyn(), self.biases.view().into_dyn()]
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![self.kernels.view_mut().into_dyn(), self.biases.view_mut().into_dyn()]
    }
}
