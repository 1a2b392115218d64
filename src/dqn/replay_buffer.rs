use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::{Device, Tensor};

use crate::error::RacerError;

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub obs: Vec<f32>,
    pub action: usize,
    pub reward: f32,
    pub next_obs: Vec<f32>,
    pub done: bool,
}

/// Tensors of a sampled minibatch, ready for the learner.
pub struct Batch {
    pub obs: Tensor,
    /// Int64, shape [B, 1].
    pub actions: Tensor,
    pub rewards: Tensor,
    pub next_obs: Tensor,
    /// 1.0 for terminal transitions, shape [B, 1].
    pub dones: Tensor,
}

impl Batch {
    pub fn from_transitions(
        transitions: &[&Transition],
        obs_dim: usize,
        device: Device,
    ) -> Result<Self, RacerError> {
        let b = transitions.len() as i64;
        let mut obs = Vec::with_capacity(transitions.len() * obs_dim);
        let mut next_obs = Vec::with_capacity(transitions.len() * obs_dim);
        let mut actions = Vec::with_capacity(transitions.len());
        let mut rewards = Vec::with_capacity(transitions.len());
        let mut dones = Vec::with_capacity(transitions.len());

        for t in transitions {
            if t.obs.len() != obs_dim || t.next_obs.len() != obs_dim {
                return Err(RacerError::DimensionMismatch {
                    what: "transition observation".to_string(),
                    expected: vec![obs_dim as i64],
                    got: vec![t.obs.len() as i64, t.next_obs.len() as i64],
                });
            }
            obs.extend_from_slice(&t.obs);
            next_obs.extend_from_slice(&t.next_obs);
            actions.push(t.action as i64);
            rewards.push(t.reward);
            dones.push(if t.done { 1.0f32 } else { 0.0 });
        }

        Ok(Self {
            obs: Tensor::from_slice(&obs).reshape(&[b, obs_dim as i64]).to_device(device),
            actions: Tensor::from_slice(&actions).reshape(&[b, 1]).to_device(device),
            rewards: Tensor::from_slice(&rewards).reshape(&[b, 1]).to_device(device),
            next_obs: Tensor::from_slice(&next_obs).reshape(&[b, obs_dim as i64]).to_device(device),
            dones: Tensor::from_slice(&dones).reshape(&[b, 1]).to_device(device),
        })
    }
}

/// Fixed-capacity FIFO experience store with uniform sampling (with
/// replacement).
pub struct ReplayBuffer {
    capacity: usize,
    buffer: VecDeque<Transition>,
    rng: StdRng,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, seed: u64) -> Self {
        assert!(capacity > 0, "replay buffer capacity must be positive");
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn push(&mut self, transition: Transition) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    pub fn can_sample(&self, batch_size: usize) -> bool {
        batch_size > 0 && self.buffer.len() >= batch_size
    }

    /// Callers must check `can_sample` first.
    pub fn sample(&mut self, batch_size: usize) -> Vec<&Transition> {
        assert!(
            self.can_sample(batch_size),
            "sampled {} transitions from a buffer holding {}",
            batch_size,
            self.buffer.len()
        );
        let len = self.buffer.len();
        let indices: Vec<usize> = (0..batch_size).map(|_| self.rng.gen_range(0..len)).collect();
        indices.into_iter().map(|i| &self.buffer[i]).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(tag: f32) -> Transition {
        Transition {
            obs: vec![tag, 0.0],
            action: 1,
            reward: tag,
            next_obs: vec![tag, 1.0],
            done: false,
        }
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut buffer = ReplayBuffer::new(5, 0);
        for i in 0..12 {
            buffer.push(transition(i as f32));
            assert!(buffer.len() <= 5);
        }
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut buffer = ReplayBuffer::new(3, 0);
        for i in 0..4 {
            buffer.push(transition(i as f32));
        }
        let rewards: Vec<f32> = buffer.iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![1.0, 2.0, 3.0]);
        assert!(buffer.iter().all(|t| t.reward != 0.0));
    }

    #[test]
    fn test_sample_returns_exact_batch_from_contents() {
        let mut buffer = ReplayBuffer::new(10, 7);
        for i in 0..10 {
            buffer.push(transition(i as f32));
        }
        buffer.push(transition(10.0));
        let batch = buffer.sample(32);
        assert_eq!(batch.len(), 32);
        assert!(batch.iter().all(|t| t.reward >= 1.0 && t.reward <= 10.0));
    }

    #[test]
    fn test_can_sample_requires_enough_transitions() {
        let mut buffer = ReplayBuffer::new(10, 0);
        assert!(!buffer.can_sample(2));
        buffer.push(transition(0.0));
        assert!(!buffer.can_sample(2));
        buffer.push(transition(1.0));
        assert!(buffer.can_sample(2));
    }

    #[test]
    #[should_panic]
    fn test_sampling_underfilled_buffer_panics() {
        let mut buffer = ReplayBuffer::new(10, 0);
        buffer.push(transition(0.0));
        buffer.sample(4);
    }

    #[test]
    fn test_batch_tensor_shapes() {
        let mut buffer = ReplayBuffer::new(10, 0);
        for i in 0..4 {
            buffer.push(transition(i as f32));
        }
        let sampled = buffer.sample(3);
        let batch = Batch::from_transitions(&sampled, 2, Device::Cpu).unwrap();
        assert_eq!(batch.obs.size(), vec![3, 2]);
        assert_eq!(batch.actions.size(), vec![3, 1]);
        assert_eq!(batch.actions.kind(), tch::Kind::Int64);
        assert_eq!(batch.dones.size(), vec![3, 1]);
    }
}
