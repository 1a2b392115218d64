pub mod network;
pub mod replay_buffer;

use std::collections::HashMap;
use std::path::Path;

use tch::{nn, nn::OptimizerConfig, Device, Kind, Tensor};

use crate::agent::QPolicy;
use crate::dqn::network::QNetwork;
use crate::dqn::replay_buffer::Batch;
use crate::error::RacerError;

#[derive(Debug, Clone)]
pub struct DqnConfig {
    pub obs_dim: usize,
    pub act_dim: usize,
    pub hidden_dim: usize,
    pub learning_rate: f64,
    pub gamma: f64,
    pub tau: f64,
    pub max_grad_norm: f64,
    pub device: Device,
}

/// Double-DQN learner: a policy network trained by Adam and a target network
/// that only ever moves by soft interpolation toward the policy.
pub struct DoubleDqn {
    pub policy: QNetwork,
    pub target: QNetwork,

    pub vs: nn::VarStore,
    pub target_vs: nn::VarStore,
    pub optimizer: nn::Optimizer,

    pub obs_dim: usize,
    pub act_dim: usize,
    pub gamma: f64,
    pub tau: f64,
    pub max_grad_norm: f64,
    pub device: Device,
    pub train_count: usize,
    learning_rate: f64,
}

impl DoubleDqn {
    pub fn new(cfg: &DqnConfig) -> Result<Self, RacerError> {
        let vs = nn::VarStore::new(cfg.device);
        let policy = QNetwork::new(
            &(vs.root() / "q"),
            cfg.obs_dim as i64,
            cfg.hidden_dim as i64,
            cfg.act_dim as i64,
        );

        // Independent varstore so the target never shares storage with the policy.
        let mut target_vs = nn::VarStore::new(cfg.device);
        let target = QNetwork::new(
            &(target_vs.root() / "q"),
            cfg.obs_dim as i64,
            cfg.hidden_dim as i64,
            cfg.act_dim as i64,
        );
        target_vs.copy(&vs)?;
        target_vs.freeze();

        let optimizer = nn::Adam::default().build(&vs, cfg.learning_rate)?;

        Ok(Self {
            policy,
            target,
            vs,
            target_vs,
            optimizer,
            obs_dim: cfg.obs_dim,
            act_dim: cfg.act_dim,
            gamma: cfg.gamma,
            tau: cfg.tau,
            max_grad_norm: cfg.max_grad_norm,
            device: cfg.device,
            train_count: 0,
            learning_rate: cfg.learning_rate,
        })
    }

    fn soft_update(target: &mut nn::VarStore, source: &nn::VarStore, tau: f64) {
        let source_vars = source.variables();
        tch::no_grad(|| {
            for (name, mut target_var) in target.variables() {
                if let Some(source_var) = source_vars.get(&name) {
                    let new_val = target_var.shallow_clone() * (1.0 - tau)
                        + source_var.shallow_clone() * tau;
                    target_var.set_data(&new_val);
                }
            }
        });
    }

    /// `target <- tau * policy + (1 - tau) * target`
    pub fn soft_update_target(&mut self) {
        Self::soft_update(&mut self.target_vs, &self.vs, self.tau);
    }

    /// Overwrites the target network with the policy weights.
    pub fn hard_update_target(&mut self) -> Result<(), RacerError> {
        self.target_vs.copy(&self.vs)?;
        Ok(())
    }

    /// One gradient step on the policy network followed by a soft target
    /// update. Returns the mean squared TD error.
    pub fn train(&mut self, batch: &Batch) -> Result<f32, RacerError> {
        let current_q = self.policy.forward(&batch.obs).gather(1, &batch.actions, false);

        let target_q = tch::no_grad(|| {
            let next_q_policy = self.policy.forward(&batch.next_obs);
            let next_q_target = self.target.forward(&batch.next_obs);
            double_dqn_targets(
                &batch.rewards,
                &batch.dones,
                &next_q_policy,
                &next_q_target,
                self.gamma,
            )
        });

        let loss = (current_q - &target_q).pow_tensor_scalar(2.0).mean(Kind::Float);
        let loss_val = loss.double_value(&[]) as f32;
        if !loss_val.is_finite() {
            return Err(RacerError::NonFiniteLoss {
                train_step: self.train_count,
                loss: loss_val,
            });
        }

        self.optimizer.backward_step_clip_norm(&loss, self.max_grad_norm);
        self.soft_update_target();
        self.train_count += 1;

        Ok(loss_val)
    }

    /// Q-values of the target network, for diagnostics.
    pub fn predict_target(&self, obs: &[f32]) -> Result<Vec<f32>, RacerError> {
        self.forward_single(&self.target, obs)
    }

    fn forward_single(&self, net: &QNetwork, obs: &[f32]) -> Result<Vec<f32>, RacerError> {
        if obs.len() != self.obs_dim {
            return Err(RacerError::DimensionMismatch {
                what: "observation".to_string(),
                expected: vec![self.obs_dim as i64],
                got: vec![obs.len() as i64],
            });
        }
        let q_values = tch::no_grad(|| {
            let obs_tensor = Tensor::from_slice(obs)
                .to_device(self.device)
                .reshape(&[1, self.obs_dim as i64]);
            net.forward(&obs_tensor)
        });
        let flat = q_values.to_device(Device::Cpu).flatten(0, -1);
        Ok(Vec::<f32>::try_from(&flat)?)
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.set_lr(lr);
        self.learning_rate = lr;
    }

    pub fn get_learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Persists the policy network only.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RacerError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.vs.save(path)?;
        Ok(())
    }

    /// Loads policy weights and hard-copies them into the target network.
    /// A file whose tensors do not match this network's shapes is rejected
    /// before anything is overwritten.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), RacerError> {
        let saved: HashMap<String, Tensor> = Tensor::load_multi(path.as_ref())?
            .into_iter()
            .map(|(name, tensor)| (name.replace('|', "."), tensor))
            .collect();

        for (name, var) in self.vs.variables() {
            match saved.get(&name) {
                Some(tensor) if tensor.size() == var.size() => {}
                Some(tensor) => {
                    return Err(RacerError::DimensionMismatch {
                        what: name,
                        expected: var.size(),
                        got: tensor.size(),
                    })
                }
                None => {
                    return Err(RacerError::DimensionMismatch {
                        what: name,
                        expected: var.size(),
                        got: vec![],
                    })
                }
            }
        }

        self.vs.load(path)?;
        self.hard_update_target()
    }
}

impl QPolicy for DoubleDqn {
    /// Policy-network forward pass without gradient tracking.
    fn predict(&self, obs: &[f32]) -> Result<Vec<f32>, RacerError> {
        self.forward_single(&self.policy, obs)
    }

    fn get_obs_dim(&self) -> usize {
        self.obs_dim
    }

    fn get_act_dim(&self) -> usize {
        self.act_dim
    }
}

/// Bootstrap targets with decoupled selection and evaluation:
/// `r + gamma * Q_target(s', argmax_a Q_policy(s', a)) * (1 - done)`.
pub fn double_dqn_targets(
    rewards: &Tensor,
    dones: &Tensor,
    next_q_policy: &Tensor,
    next_q_target: &Tensor,
    gamma: f64,
) -> Tensor {
    let next_actions = next_q_policy.argmax(1, true);
    let next_q = next_q_target.gather(1, &next_actions, false);
    let not_done = dones.ones_like() - dones;
    rewards + next_q * not_done * gamma
}
