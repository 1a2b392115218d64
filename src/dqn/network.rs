use tch::{nn, nn::Module, Tensor};

/// Two hidden ReLU layers mapping an observation to one Q-value per action.
#[derive(Debug)]
pub struct QNetwork {
    pub net: nn::Sequential,
}

impl QNetwork {
    pub fn new(vs: &nn::Path, obs_dim: i64, hidden_dim: i64, act_dim: i64) -> Self {
        let fc1 = nn::linear(vs / "fc1", obs_dim, hidden_dim, Default::default());
        let fc2 = nn::linear(vs / "fc2", hidden_dim, hidden_dim, Default::default());
        let fc3 = nn::linear(vs / "fc3", hidden_dim, act_dim, Default::default());

        let net = nn::seq()
            .add(fc1)
            .add_fn(|xs| xs.relu())
            .add(fc2)
            .add_fn(|xs| xs.relu())
            .add(fc3);

        QNetwork { net }
    }

    pub fn forward(&self, obs: &Tensor) -> Tensor {
        self.net.forward(obs)
    }
}
