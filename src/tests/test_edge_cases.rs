use std::io::Write;

use ndarray::{Array1, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::agent::{Agent, DqnAgent, ValueBasedAgent};
use crate::config::{AgentConfig, ObservationShape};
use crate::error::DeepQError;
use crate::grad;
use crate::transition::{Transition, TransitionBatch};

fn agent_with(config: AgentConfig, seed: u64) -> DqnAgent {
    DqnAgent::with_rng(config, &mut StdRng::seed_from_u64(seed)).unwrap()
}

fn config() -> AgentConfig {
    AgentConfig::new(ObservationShape::new(2, 36, 44), 2).with_tau(0.5)
}

fn frame(fill: f32) -> Array3<f32> {
    Array3::from_elem((36, 44, 2), fill)
}

#[test]
fn test_non_square_observation() {
    let agent = agent_with(config(), 0);
    assert_eq!(agent.online().head[0].input_size(), 128);
    assert_eq!(agent.q_values(frame(30.0).view()).unwrap().len(), 2);
}

#[test]
fn test_single_transition_batch() {
    let mut agent = agent_with(config(), 1);
    let report = agent.learn(&[Transition::new(frame(0.0), 1, 1.0, frame(255.0), false)]).unwrap();
    assert_eq!(report.predicted.len(), 1);
    assert!(report.loss.is_finite());
}

#[test]
fn test_all_terminal_batch_targets_rewards() {
    let mut agent = agent_with(config(), 2);
    let rewards = [1.0, -2.0, 0.0, 0.5];
    let batch: Vec<Transition> = rewards
        .iter()
        .enumerate()
        .map(|(i, &r)| Transition::new(frame(i as f32 * 10.0), i % 2, r, frame(200.0), true))
        .collect();

    let report = agent.learn(&batch).unwrap();
    assert_eq!(report.td_targets, Array1::from(rewards.to_vec()));
}

#[test]
fn test_zero_gamma_targets_rewards() {
    let agent = agent_with(config().with_gamma(0.0), 3);
    let batch = vec![Transition::new(frame(1.0), 0, 0.75, frame(2.0), false)];
    let stacked = TransitionBatch::stack(&batch, &agent.config().in_shape, 2).unwrap();
    assert_eq!(agent.td_targets(&stacked).unwrap()[0], 0.75);
}

#[test]
fn test_saturated_observation_stays_finite() {
    let agent = agent_with(config(), 4);
    let q_values = agent.q_values(frame(255.0).view()).unwrap();
    assert!(q_values.iter().all(|q| q.is_finite()));
    assert!(agent.state_value(frame(255.0).view()).unwrap().is_finite());
}

#[test]
fn test_update_without_gradient_recording_fails_cleanly() {
    let mut agent = agent_with(config(), 5);
    let before = agent.clone();
    let batch = vec![Transition::new(frame(1.0), 0, 1.0, frame(2.0), false)];

    let result = grad::no_grad(|| agent.update(&batch));
    assert!(matches!(result, Err(DeepQError::Training(_))));
    assert_eq!(agent.online(), before.online());
    assert_eq!(agent.target(), before.target());
    assert!(grad::is_enabled());
}

#[test]
fn test_act_inside_no_grad_scope() {
    let agent = agent_with(config(), 6);
    let mut rng = StdRng::seed_from_u64(0);
    let _guard = grad::NoGradGuard::new();
    assert!(agent.act(frame(9.0).view(), 0.0, &mut rng).unwrap() < 2);
}

#[test]
fn test_construction_rejects_invalid_config() {
    let too_small = AgentConfig::new(ObservationShape::new(4, 30, 84), 6);
    assert!(matches!(
        DqnAgent::new(too_small),
        Err(DeepQError::InvalidParameter { ref name, .. }) if name == "in_shape"
    ));
    assert!(DqnAgent::new(config().with_tau(0.0)).is_err());
    assert!(DqnAgent::new(AgentConfig::new(ObservationShape::new(2, 36, 44), 0)).is_err());
}

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let json = config().with_gamma(0.95).to_json().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let loaded = AgentConfig::from_json_file(file.path()).unwrap();
    assert_eq!(loaded, config().with_gamma(0.95));
    assert!(agent_with(loaded, 7).config().gamma == 0.95);

    assert!(matches!(
        AgentConfig::from_json_file(file.path().with_extension("missing")),
        Err(DeepQError::Io(_))
    ));
}

#[test]
fn test_transition_batch_layout() {
    let batch = vec![
        Transition::new(frame(1.0), 0, 1.0, frame(2.0), false),
        Transition::new(frame(3.0), 1, -1.0, frame(4.0), true),
    ];
    let stacked = TransitionBatch::stack(&batch, &config().in_shape, 2).unwrap();
    assert_eq!(stacked.len(), 2);
    assert_eq!(stacked.states().dim(), (2, 36, 44, 2));
    assert_eq!(stacked.next_states()[[1, 0, 0, 0]], 4.0);
    assert_eq!(stacked.dones().to_vec(), vec![0.0, 1.0]);
    assert_eq!(stacked.actions(), &[0, 1]);
}
