use ndarray::{Array1, Array2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, info};

use crate::agent::policy;
use crate::agent::traits::{Agent, ValueBasedAgent};
use crate::config::{AgentConfig, Device, ObservationShape};
use crate::error::{DeepQError, Result};
use crate::grad;
use crate::loss::{HuberLoss, Loss};
use crate::network::{FeatureApproximator, Gradients};
use crate::optimizer::{Optimizer, OptimizerKind, OptimizerWrapper};
use crate::transition::{Transition, TransitionBatch};

/// Deep Q-Network (DQN) agent with a softly tracking target network
///
/// - Online network `Q_θ` chooses actions and is trained by the optimizer
/// - Target network `Q_θ′` supplies bootstrap values and only moves by
///   `θ′ ← (1 − τ)·θ′ + τ·θ` after every update
/// - Epsilon-greedy exploration with lowest-index tie-breaking
/// - Optional Double DQN targets
///
/// # Example
///
/// ```rust,no_run
/// use deepq::agent::{Agent, DqnAgent};
/// use deepq::config::{AgentConfig, ObservationShape};
/// use deepq::transition::Transition;
/// use ndarray::Array3;
///
/// let config = AgentConfig::new(ObservationShape::new(4, 84, 84), 6)
///     .with_gamma(0.99)
///     .with_learning_rate(1e-4)
///     .with_tau(0.01);
/// let mut agent = DqnAgent::new(config).unwrap();
/// let mut rng = rand::thread_rng();
///
/// let frame = Array3::<f32>::zeros((84, 84, 4));
/// let action = agent.act(frame.view(), 0.1, &mut rng).unwrap();
///
/// // After environment step...
/// let transition = Transition::new(frame.clone(), action, 1.0, frame, false);
/// agent.update(&vec![transition; 32]).unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct DqnAgent {
    config: AgentConfig,

    /// Main network for action selection
    q_network: FeatureApproximator,

    /// Target network for stable Q-value estimation
    target_network: FeatureApproximator,

    /// Bound to the online network's parameters only
    optimizer: OptimizerWrapper,

    gradients: Gradients,

    loss: HuberLoss,

    use_double_dqn: bool,

    /// Number of completed updates
    train_steps: usize,
}

/// Diagnostics of one update
#[derive(Clone, Debug)]
pub struct UpdateReport {
    pub loss: f32,
    /// Q_θ(s, a) for every transition, before the step
    pub predicted: Array1<f32>,
    /// TD target of every transition
    pub td_targets: Array1<f32>,
    pub gradient_norm: f32,
}

impl DqnAgent {
    /// Create an agent with Adam and standard DQN targets
    pub fn new(config: AgentConfig) -> Result<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    /// Create an agent whose initial weights are drawn from `rng`
    pub fn with_rng<R: Rng + ?Sized>(config: AgentConfig, rng: &mut R) -> Result<Self> {
        Self::assemble(config, OptimizerKind::default(), false, rng)
    }

    fn assemble<R: Rng + ?Sized>(
        config: AgentConfig,
        optimizer: OptimizerKind,
        use_double_dqn: bool,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;

        let q_network = FeatureApproximator::with_rng(config.in_shape, config.n_actions, config.device, rng)?;
        let target_network = q_network.clone();
        let optimizer = optimizer.bind(&q_network.parameters());
        let gradients = Gradients::zeros_like(&q_network);

        info!(
            n_actions = config.n_actions,
            parameters = q_network.num_parameters(),
            double_dqn = use_double_dqn,
            "created DQN agent"
        );

        Ok(DqnAgent {
            config,
            q_network,
            target_network,
            optimizer,
            gradients,
            loss: HuberLoss::default(),
            use_double_dqn,
            train_steps: 0,
        })
    }

    /// Online network θ
    pub fn online(&self) -> &FeatureApproximator {
        &self.q_network
    }

    /// Target network θ′
    pub fn target(&self) -> &FeatureApproximator {
        &self.target_network
    }

    #[cfg(test)]
    pub(crate) fn target_mut(&mut self) -> &mut FeatureApproximator {
        &mut self.target_network
    }

    pub fn optimizer(&self) -> &OptimizerWrapper {
        &self.optimizer
    }

    pub fn use_double_dqn(&self) -> bool {
        self.use_double_dqn
    }

    pub fn train_steps(&self) -> usize {
        self.train_steps
    }

    /// TD targets for a stacked batch, computed without recording gradients.
    ///
    /// Terminal transitions take exactly their reward.
    pub fn td_targets(&self, batch: &TransitionBatch) -> Result<Array1<f32>> {
        let _guard = grad::NoGradGuard::new();

        let next_target = self.target_network.forward(batch.next_states().into_dyn())?;

        let bootstrap: Vec<f32> = if self.use_double_dqn {
            // Online network selects, target network evaluates
            let next_online = self.q_network.forward(batch.next_states().into_dyn())?;
            next_online
                .outer_iter()
                .zip(next_target.outer_iter())
                .map(|(online_row, target_row)| target_row[policy::argmax(online_row)])
                .collect()
        } else {
            next_target
                .outer_iter()
                .map(|row| row.iter().fold(f32::NEG_INFINITY, |max, &val| max.max(val)))
                .collect()
        };

        let gamma = self.config.gamma;
        let (rewards, dones) = (batch.rewards(), batch.dones());
        Ok(Array1::from_shape_fn(batch.len(), |i| {
            if dones[i] > 0.5 {
                rewards[i]
            } else {
                rewards[i] + gamma * bootstrap[i]
            }
        }))
    }

    /// One learning step on `batch`, returning its diagnostics.
    ///
    /// Everything that can fail runs before the first parameter write.
    pub fn learn(&mut self, batch: &[Transition]) -> Result<UpdateReport> {
        let stacked = TransitionBatch::stack(batch, &self.config.in_shape, self.config.n_actions)?;

        let forward = self.q_network.forward_t(stacked.states().into_dyn())?;
        let predicted: Array1<f32> = stacked
            .actions()
            .iter()
            .enumerate()
            .map(|(i, &a)| forward.output[[i, a]])
            .collect();

        let td_targets = self.td_targets(&stacked)?;
        let loss = self.loss.compute(predicted.view(), td_targets.view());

        // Only the taken action's output receives gradient
        let loss_grad = self.loss.gradient(predicted.view(), td_targets.view());
        let mut grad_output = Array2::<f32>::zeros(forward.output.raw_dim());
        for (i, &a) in stacked.actions().iter().enumerate() {
            grad_output[[i, a]] = loss_grad[i];
        }

        self.gradients.zero();
        self.q_network.backward(forward.trace.as_ref(), grad_output.view(), &mut self.gradients)?;
        let gradient_norm = self.gradients.global_norm();
        self.target_network.check_same_structure(&self.q_network)?;

        self.optimizer.step(
            self.q_network.parameters_mut(),
            self.gradients.tensors(),
            self.config.learning_rate,
        )?;
        self.target_network.soft_update_from(&self.q_network, self.config.tau)?;
        self.train_steps += 1;

        debug!(step = self.train_steps, loss, gradient_norm, batch = stacked.len(), "dqn update");

        Ok(UpdateReport { loss, predicted, td_targets, gradient_norm })
    }
}

impl Agent for DqnAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn act(&self, observation: ArrayView3<f32>, epsilon: f32, rng: &mut dyn RngCore) -> Result<usize> {
        policy::epsilon_greedy(epsilon, self.config.n_actions, rng, || {
            let q_values = self.q_values(observation)?;
            Ok(policy::argmax(q_values.view()))
        })
    }

    fn update(&mut self, batch: &[Transition]) -> Result<()> {
        self.learn(batch).map(|_| ())
    }
}

impl ValueBasedAgent for DqnAgent {
    fn q_values(&self, observation: ArrayView3<f32>) -> Result<Array1<f32>> {
        let q_values = grad::no_grad(|| self.q_network.forward(observation.into_dyn()))?;
        Ok(q_values.index_axis_move(Axis(0), 0))
    }
}

/// Builder pattern for DqnAgent
pub struct DqnAgentBuilder {
    in_shape: Option<ObservationShape>,
    n_actions: Option<usize>,
    device: Device,
    gamma: f32,
    learning_rate: f32,
    tau: f32,
    optimizer: OptimizerKind,
    use_double_dqn: bool,
    seed: Option<u64>,
}

impl DqnAgentBuilder {
    pub fn new() -> Self {
        DqnAgentBuilder {
            in_shape: None,
            n_actions: None,
            device: Device::Cpu,
            gamma: AgentConfig::DEFAULT_GAMMA,
            learning_rate: AgentConfig::DEFAULT_LEARNING_RATE,
            tau: AgentConfig::DEFAULT_TAU,
            optimizer: OptimizerKind::default(),
            use_double_dqn: false,
            seed: None,
        }
    }

    /// Take every shared construction parameter from `config`
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.in_shape = Some(config.in_shape);
        self.n_actions = Some(config.n_actions);
        self.device = config.device;
        self.gamma = config.gamma;
        self.learning_rate = config.learning_rate;
        self.tau = config.tau;
        self
    }

    pub fn in_shape(mut self, in_shape: impl Into<ObservationShape>) -> Self {
        self.in_shape = Some(in_shape.into());
        self
    }

    pub fn n_actions(mut self, n_actions: usize) -> Self {
        self.n_actions = Some(n_actions);
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn tau(mut self, tau: f32) -> Self {
        self.tau = tau;
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn use_double_dqn(mut self, use_double: bool) -> Self {
        self.use_double_dqn = use_double;
        self
    }

    /// Seed the weight initialization for reproducible agents
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<DqnAgent> {
        let in_shape = self.in_shape.ok_or_else(|| {
            DeepQError::invalid_parameter("in_shape", "Observation shape must be specified")
        })?;
        let n_actions = self.n_actions.ok_or_else(|| {
            DeepQError::invalid_parameter("n_actions", "Action count must be specified")
        })?;

        let config = AgentConfig {
            device: self.device,
            in_shape,
            n_actions,
            gamma: self.gamma,
            learning_rate: self.learning_rate,
            tau: self.tau,
        };

        match self.seed {
            Some(seed) => DqnAgent::assemble(
                config,
                self.optimizer,
                self.use_double_dqn,
                &mut StdRng::seed_from_u64(seed),
            ),
            None => DqnAgent::assemble(config, self.optimizer, self.use_double_dqn, &mut rand::thread_rng()),
        }
    }
}

impl Default for DqnAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
