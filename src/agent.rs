use crate::error::RacerError;

/// Read-only view of a discrete-action value function, used for action
/// selection and greedy evaluation.
pub trait QPolicy {
    fn predict(&self, obs: &[f32]) -> Result<Vec<f32>, RacerError>;

    fn get_obs_dim(&self) -> usize;
    fn get_act_dim(&self) -> usize;

    fn greedy_action(&self, obs: &[f32]) -> Result<usize, RacerError> {
        let q_values = self.predict(obs)?;
        Ok(argmax(&q_values))
    }
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_first_wins_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[-1.0]), 0);
    }
}
