use rand::{distributions::Uniform, Rng};
use tch::{
    nn::{self, Init, LinearConfig, Module},
    Kind, Tensor,
};

/// Linear layer with weights and bias drawn uniformly from
/// `[-1/sqrt(fan_in), 1/sqrt(fan_in)]` using the caller's random source.
fn linear<R: Rng>(vs_path: nn::Path, in_dim: usize, out_dim: usize, rng: &mut R) -> nn::Linear {
    let config = LinearConfig {
        ws_init: Init::Const(0.0),
        bs_init: Some(Init::Const(0.0)),
        bias: true,
    };
    let mut layer = nn::linear(vs_path, in_dim as i64, out_dim as i64, config);

    let bound = 1.0 / (in_dim as f64).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound);
    let mut draw = |n: usize| -> Tensor {
        let values: Vec<f64> = (0..n).map(|_| rng.sample(dist)).collect();
        Tensor::from_slice(&values)
    };

    let ws = draw(in_dim * out_dim).view([out_dim as i64, in_dim as i64]);
    let bs = draw(out_dim);

    tch::no_grad(|| {
        layer.ws.copy_(&ws);
        if let Some(b) = layer.bs.as_mut() {
            b.copy_(&bs);
        }
    });

    layer
}

/// One hidden layer with ReLU, followed by a linear head.
#[derive(Debug)]
struct Mlp {
    hidden: nn::Linear,
    output: nn::Linear,
}

impl Mlp {
    fn new<R: Rng>(
        vs_path: &nn::Path,
        in_dim: usize,
        hidden_dim: usize,
        out_dim: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            hidden: linear(vs_path / "hidden", in_dim, hidden_dim, rng),
            output: linear(vs_path / "output", hidden_dim, out_dim, rng),
        }
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.hidden).relu().apply(&self.output)
    }
}

/// The actor: maps an observation to a categorical distribution over actions.
#[derive(Debug)]
pub struct Policy {
    mlp: Mlp,
}

impl Policy {
    pub fn new<R: Rng>(
        vs_path: &nn::Path,
        observation_space: usize,
        action_space: usize,
        hidden_dim: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            mlp: Mlp::new(vs_path, observation_space, hidden_dim, action_space, rng),
        }
    }

    #[must_use]
    pub fn logits(&self, observation: &Tensor) -> Tensor {
        self.mlp.forward(observation)
    }

    /// Action probabilities and their logarithms.
    #[must_use]
    pub fn distribution(&self, observation: &Tensor) -> (Tensor, Tensor) {
        let logits = self.logits(observation);
        (
            logits.softmax(-1, Kind::Double),
            logits.log_softmax(-1, Kind::Double),
        )
    }
}

/// The critic: maps an observation to a one-element value estimate.
#[derive(Debug)]
pub struct Value {
    mlp: Mlp,
}

impl Value {
    pub fn new<R: Rng>(
        vs_path: &nn::Path,
        observation_space: usize,
        hidden_dim: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            mlp: Mlp::new(vs_path, observation_space, hidden_dim, 1, rng),
        }
    }
}

impl Module for Value {
    fn forward(&self, xs: &Tensor) -> Tensor {
        self.mlp.forward(xs)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};
    use tch::{nn::VarStore, Device};

    use super::*;

    fn observation() -> Tensor {
        Tensor::from_slice(&[0.01, -0.02, 0.03, 0.04])
    }

    #[test]
    fn policy_outputs_a_distribution() {
        let mut vs = VarStore::new(Device::Cpu);
        let policy = Policy::new(&vs.root(), 4, 3, 8, &mut StdRng::seed_from_u64(1));
        vs.double();

        let (probs, log_probs) = policy.distribution(&observation());
        assert_eq!(probs.size(), vec![3]);
        assert!(probs.log().allclose(&log_probs, 1e-9, 1e-12, false));

        let probs = Vec::<f64>::try_from(&probs.detach()).unwrap();
        assert!(probs.iter().all(|p| *p >= 0.0));
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn value_outputs_one_scalar() {
        let mut vs = VarStore::new(Device::Cpu);
        let value = Value::new(&vs.root(), 4, 8, &mut StdRng::seed_from_u64(1));
        vs.double();

        assert_eq!(value.forward(&observation()).size(), vec![1]);
        assert_eq!(vs.trainable_variables().len(), 4);
    }

    #[test]
    fn initialization_follows_the_seed() {
        let build = |seed| {
            let mut vs = VarStore::new(Device::Cpu);
            let _ = Value::new(&vs.root(), 4, 8, &mut StdRng::seed_from_u64(seed));
            vs.double();
            vs
        };

        let (a, b, c) = (build(3), build(3), build(4));
        let (a, b, c) = (
            a.trainable_variables(),
            b.trainable_variables(),
            c.trainable_variables(),
        );

        assert!(a.iter().zip(&b).all(|(x, y)| x.equal(y)));
        assert!(!a.iter().zip(&c).all(|(x, y)| x.equal(y)));

        let bound = 1.0 / 4f64.sqrt();
        assert!(a[0].abs().max().double_value(&[]) <= bound);
    }
}
