use derive_setters::Setters;
use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
    Rng, SeedableRng,
};
use tch::{
    nn::{self, Module, OptimizerConfig, VarStore},
    Device, Kind, Reduction, Tensor,
};
use tracing::{debug, info, warn};

use crate::{
    config::AgentConfig,
    env::Env as EnvTrait,
    episode::{Episode, Recorder, StepRecord},
    error::{Error, Result},
    gradient::{self, Gradients},
    group::Group,
    model::{Policy, Value},
};

/// Smooth L1 (Huber, delta 1) loss of a value estimate against a fixed return.
fn value_loss(value: &Tensor, target: f64) -> Tensor {
    let target = Tensor::from_slice(&[target]).to_device(value.device());
    value.smooth_l1_loss(&target, Reduction::Mean, 1.0)
}

fn sum(losses: &[Tensor]) -> Tensor {
    Tensor::stack(losses, 0).sum(Kind::Double)
}

/// Actor-critic agent whose critic is trained with SVRG.
///
/// The policy takes a plain SGD step after every episode. The critic is
/// frozen while a group of episodes is collected: each finished episode only
/// contributes a snapshot of the critic gradient. Once the group is complete,
/// [`AcSvrg::finish_step`] applies `update_count` variance-reduced updates on
/// re-sampled episodes of the group and then closes it.
#[must_use]
pub struct AcSvrg<Env>
where
    Env: EnvTrait,
{
    policy: Policy,
    value: Value,
    policy_vs: VarStore,
    value_vs: VarStore,
    policy_optimizer: nn::Optimizer,
    recorder: Recorder,
    group: Group,
    rng: StdRng,
    env: Env,
    device: Device,
    gamma: f64,
    critic_learning_rate: f64,
    group_size: usize,
    update_count: usize,
    log_interval: usize,
    episode_rewards: Vec<f64>,
}

impl<Env> AcSvrg<Env>
where
    Env: EnvTrait,
{
    /// Samples an action for `observation` and records the step into the
    /// episode being rolled out.
    pub fn select_action(&mut self, observation: &Tensor) -> Result<u32> {
        let observation = observation.to_device(self.device);

        let (probs, log_probs) = self.policy.distribution(&observation);
        let value = self.value.forward(&observation);

        let weights = Vec::<f64>::try_from(&probs.detach())?;
        let action = WeightedIndex::new(&weights)?.sample(&mut self.rng);
        let log_prob = log_probs.get(action as i64);

        let action = action as u32;
        self.recorder.push_step(StepRecord {
            observation,
            value,
            action,
            log_prob,
        });

        Ok(action)
    }

    /// Records the reward the environment returned for the last selected action.
    pub fn record_reward(&mut self, reward: f64) {
        self.recorder.push_reward(reward);
    }

    /// Updates the policy from the episode just rolled out, snapshots the
    /// critic gradient without touching the critic, and archives the episode
    /// into the current group. Returns the episode's cumulative reward.
    pub fn finish_episode(&mut self) -> Result<f64> {
        let episode = self.recorder.finish()?;
        let returns = episode.returns(self.gamma);

        let mut policy_losses = Vec::with_capacity(episode.len());
        let mut value_losses = Vec::with_capacity(episode.len());
        for (step, &ret) in episode.steps().iter().zip(&returns) {
            let advantage = ret - step.value.double_value(&[0]);
            policy_losses.push(-&step.log_prob * advantage);
            value_losses.push(value_loss(&step.value, ret));
        }

        self.policy_optimizer.zero_grad();
        gradient::zero(&self.value_vs);

        let actor_loss = sum(&policy_losses);
        let critic_loss = sum(&value_losses);

        let (a, c) = (actor_loss.double_value(&[]), critic_loss.double_value(&[]));
        if !(a.is_finite() && c.is_finite()) {
            warn!(actor_loss = a, critic_loss = c, "non-finite episode loss");
        }

        actor_loss.backward();
        critic_loss.backward();

        self.policy_optimizer.step();

        let total_reward = episode.total_reward();
        let snapshot = Gradients::snapshot(&self.value_vs);
        self.group.push(episode, snapshot);

        Ok(total_reward)
    }

    /// Sum of the critic losses of `episode` re-evaluated at the current
    /// critic parameters.
    fn current_value_loss(&self, episode: &Episode) -> Tensor {
        let losses: Vec<Tensor> = episode
            .steps()
            .iter()
            .zip(episode.returns(self.gamma))
            .map(|(step, ret)| value_loss(&self.value.forward(&step.observation), ret))
            .collect();

        sum(&losses)
    }

    /// One variance-reduced critic update on a uniformly drawn episode `t`:
    /// `p <- p - lr * (mean[p] - snapshot_t[p] + grad_t[p])`.
    fn svrg_update(&mut self, mean: &Gradients) -> Result<()> {
        let t = self.rng.gen_range(0..self.group.len());
        let (episode, snapshot) = self.group.get(t).ok_or(Error::EmptyGroup)?;

        gradient::zero(&self.value_vs);
        self.current_value_loss(episode).backward();

        let lr = self.critic_learning_rate;
        tch::no_grad(|| {
            for ((mut param, mu), past) in self
                .value_vs
                .trainable_variables()
                .into_iter()
                .zip(mean)
                .zip(snapshot)
            {
                let grad = param.grad();
                let grad = if grad.defined() {
                    grad
                } else {
                    param.zeros_like()
                };

                let updated = &param - (mu - past + &grad) * lr;
                param.copy_(&updated);
            }
        });

        Ok(())
    }

    /// Runs the SVRG phase over the current group and closes it.
    pub fn finish_step(&mut self) -> Result<()> {
        let mean = self.group.mean_gradient()?;

        for _ in 0..self.update_count {
            self.svrg_update(&mean)?;
        }

        debug!(
            episodes = self.group.len(),
            updates = self.update_count,
            "group closed"
        );
        self.group.clear();

        Ok(())
    }

    /// Rolls out one episode from a fresh reset and finishes it. Returns the
    /// episode's cumulative reward.
    pub fn run_episode(&mut self) -> Result<f64> {
        let mut observation = self.env.reset();

        loop {
            let action = self.select_action(&observation)?;
            let transition = self.env.step(action);

            self.record_reward(transition.reward);

            if transition.done() {
                break;
            }
            observation = transition.observation;
        }

        let episode_reward = self.finish_episode()?;
        self.episode_rewards.push(episode_reward);

        Ok(episode_reward)
    }

    /// Collects `num_steps` groups of `group_size` episodes, running the SVRG
    /// phase after each group.
    pub fn train(&mut self, num_steps: usize) -> Result<()> {
        for i_step in 0..num_steps {
            if !self.group.is_empty() {
                return Err(Error::LeftoverGroup {
                    episodes: self.group.len(),
                });
            }

            let mut group_reward = 0.0;
            let mut last_reward = 0.0;
            for _ in 0..self.group_size {
                last_reward = self.run_episode()?;
                group_reward += last_reward;
            }

            self.finish_step()?;

            if self.log_interval > 0 && i_step % self.log_interval == 0 {
                info!(
                    step = i_step,
                    last_reward,
                    mean_reward = group_reward / self.group_size as f64,
                    "group finished"
                );
            }
        }

        Ok(())
    }

    /// Cumulative reward of every episode run so far, in order.
    #[must_use]
    pub fn episode_rewards(&self) -> &[f64] {
        &self.episode_rewards
    }

    #[must_use]
    pub fn group(&self) -> &Group {
        &self.group
    }

    #[must_use]
    pub fn policy_vs(&self) -> &VarStore {
        &self.policy_vs
    }

    #[must_use]
    pub fn value_vs(&self) -> &VarStore {
        &self.value_vs
    }

    #[must_use]
    pub fn group_size(&self) -> usize {
        self.group_size
    }
}

#[must_use]
#[derive(Setters, Debug)]
#[setters(strip_option, prefix = "set_")]
pub struct Builder<Env>
where
    Env: EnvTrait,
{
    env: Option<Env>,
    device: Option<Device>,
    gamma: Option<f64>,
    actor_learning_rate: Option<f64>,
    critic_learning_rate: Option<f64>,
    hidden_dim: Option<usize>,
    group_size: Option<usize>,
    update_count: Option<usize>,
    seed: Option<u64>,
    log_interval: Option<usize>,
}

fn ensure(ok: bool, name: &'static str, reason: impl Into<String>) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: reason.into(),
        })
    }
}

impl<Env> Builder<Env>
where
    Env: EnvTrait,
{
    pub fn init() -> Builder<Env> {
        Self {
            env: None,
            device: None,
            gamma: None,
            actor_learning_rate: None,
            critic_learning_rate: None,
            hidden_dim: None,
            group_size: None,
            update_count: None,
            seed: None,
            log_interval: None,
        }
    }

    /// Takes every hyperparameter from `config`.
    pub fn set_config(self, config: &AgentConfig) -> Self {
        self.set_gamma(config.gamma)
            .set_actor_learning_rate(config.actor_learning_rate)
            .set_critic_learning_rate(config.critic_learning_rate)
            .set_hidden_dim(config.hidden_dim)
            .set_group_size(config.group_size)
            .set_update_count(config.update_count)
            .set_seed(config.seed)
    }

    /// Builds the agent. Unset hyperparameters fall back to
    /// [`AgentConfig::default`]; the environment is required.
    pub fn build(self) -> Result<AcSvrg<Env>> {
        let defaults = AgentConfig::default();

        let env = self.env.ok_or(Error::MissingParameter("env"))?;
        let device = self.device.unwrap_or(Device::Cpu);
        let gamma = self.gamma.unwrap_or(defaults.gamma);
        let actor_learning_rate = self
            .actor_learning_rate
            .unwrap_or(defaults.actor_learning_rate);
        let critic_learning_rate = self
            .critic_learning_rate
            .unwrap_or(defaults.critic_learning_rate);
        let hidden_dim = self.hidden_dim.unwrap_or(defaults.hidden_dim);
        let group_size = self.group_size.unwrap_or(defaults.group_size);
        let update_count = self.update_count.unwrap_or(defaults.update_count);
        let seed = self.seed.unwrap_or(defaults.seed);
        let log_interval = self.log_interval.unwrap_or(0);

        ensure((0.0..=1.0).contains(&gamma), "gamma", "must lie in [0, 1]")?;
        ensure(
            actor_learning_rate.is_finite() && actor_learning_rate > 0.0,
            "actor_learning_rate",
            "must be positive",
        )?;
        ensure(
            critic_learning_rate.is_finite() && critic_learning_rate > 0.0,
            "critic_learning_rate",
            "must be positive",
        )?;
        ensure(hidden_dim > 0, "hidden_dim", "must be at least 1")?;
        ensure(group_size > 0, "group_size", "must be at least 1")?;

        let observation_space = Env::observation_space();
        let action_space = Env::action_space();

        let mut rng = StdRng::seed_from_u64(seed);

        let mut policy_vs = VarStore::new(device);
        let mut value_vs = VarStore::new(device);

        let policy = Policy::new(
            &policy_vs.root(),
            observation_space,
            action_space,
            hidden_dim,
            &mut rng,
        );
        let value = Value::new(&value_vs.root(), observation_space, hidden_dim, &mut rng);

        policy_vs.double();
        value_vs.double();

        let policy_optimizer = nn::Sgd::default().build(&policy_vs, actor_learning_rate)?;

        debug!(
            observation_space,
            action_space, hidden_dim, group_size, update_count, seed, "agent built"
        );

        Ok(AcSvrg {
            policy,
            value,
            policy_vs,
            value_vs,
            policy_optimizer,
            recorder: Recorder::new(),
            group: Group::new(),
            rng,
            env,
            device,
            gamma,
            critic_learning_rate,
            group_size,
            update_count,
            log_interval,
            episode_rewards: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Scripted;

    fn scripted() -> Scripted {
        Scripted::new(vec![
            vec![
                ([0.1, 0.2, -0.1, 0.0], 1.0),
                ([0.2, 0.1, 0.0, -0.1], 1.0),
                ([0.3, 0.0, 0.1, -0.2], 0.5),
            ],
            vec![([-0.1, 0.0, 0.2, 0.1], 1.0), ([0.0, -0.2, 0.1, 0.3], 2.0)],
        ])
    }

    fn agent(group_size: usize, update_count: usize, seed: u64) -> AcSvrg<Scripted> {
        Builder::init()
            .set_env(scripted())
            .set_gamma(0.95)
            .set_actor_learning_rate(1e-2)
            .set_critic_learning_rate(1e-2)
            .set_hidden_dim(8)
            .set_group_size(group_size)
            .set_update_count(update_count)
            .set_seed(seed)
            .build()
            .unwrap()
    }

    fn params(vs: &VarStore) -> Vec<Tensor> {
        vs.trainable_variables()
            .iter()
            .map(|v| v.detach().copy())
            .collect()
    }

    fn same(a: &[Tensor], b: &[Tensor]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equal(y))
    }

    #[test]
    fn select_action_records_a_step() {
        let mut agent = agent(1, 1, 0);
        let observation = Tensor::from_slice(&[0.0, 0.1, 0.2, 0.3]);

        for n in 1..=3 {
            let action = agent.select_action(&observation).unwrap();
            assert!(action < 2);
            assert_eq!(agent.recorder.len(), n);
        }
    }

    #[test]
    fn finish_episode_rejects_missing_rewards() {
        let mut agent = agent(1, 1, 0);
        let observation = Tensor::from_slice(&[0.0, 0.1, 0.2, 0.3]);
        agent.select_action(&observation).unwrap();
        agent.select_action(&observation).unwrap();
        agent.record_reward(1.0);

        assert!(matches!(
            agent.finish_episode(),
            Err(Error::Misaligned {
                steps: 2,
                rewards: 1
            })
        ));
        assert!(agent.group().is_empty());
    }

    #[test]
    fn archive_and_snapshots_grow_together() {
        let mut agent = agent(3, 2, 1);
        assert_eq!(agent.group().len(), 0);

        for k in 1..=3 {
            let reward = agent.run_episode().unwrap();
            let (episode, _) = agent.group().get(k - 1).unwrap();
            assert_eq!(episode.total_reward(), reward);
            assert_eq!(agent.group().episodes().len(), k);
            assert_eq!(agent.group().snapshots().len(), k);
        }
        assert_eq!(agent.episode_rewards(), &[2.5, 3.0, 2.5]);
    }

    #[test]
    fn finish_step_closes_the_group() {
        let mut agent = agent(2, 4, 1);
        agent.run_episode().unwrap();
        agent.run_episode().unwrap();

        agent.finish_step().unwrap();
        assert!(agent.group().is_empty());
        assert!(agent.group().snapshots().is_empty());
    }

    #[test]
    fn finish_step_needs_episodes() {
        let mut agent = agent(2, 4, 1);
        assert!(matches!(agent.finish_step(), Err(Error::EmptyGroup)));
    }

    #[test]
    fn finish_episode_only_moves_the_policy() {
        let mut agent = agent(2, 4, 2);
        let value_before = params(agent.value_vs());
        let policy_before = params(agent.policy_vs());

        agent.run_episode().unwrap();

        assert!(same(&value_before, &params(agent.value_vs())));
        assert!(!same(&policy_before, &params(agent.policy_vs())));
    }

    #[test]
    fn finish_step_only_moves_the_critic() {
        let mut agent = agent(2, 4, 2);
        agent.run_episode().unwrap();
        agent.run_episode().unwrap();

        let value_before = params(agent.value_vs());
        let policy_before = params(agent.policy_vs());

        agent.finish_step().unwrap();

        assert!(same(&policy_before, &params(agent.policy_vs())));
        assert!(!same(&value_before, &params(agent.value_vs())));
    }

    #[test]
    fn single_episode_group_is_plain_gradient_descent() {
        let mut agent = agent(1, 3, 5);
        agent.run_episode().unwrap();

        let mean = agent.group.mean_gradient().unwrap();
        let (episode, snapshot) = agent.group.get(0).unwrap();
        for (mu, past) in mean.iter().zip(snapshot) {
            let correction = mu - past;
            assert_eq!(correction.abs().sum(Kind::Double).double_value(&[]), 0.0);
        }
        assert_eq!(episode.len(), 3);

        for _ in 0..3 {
            let (episode, _) = agent.group.get(0).unwrap();
            gradient::zero(&agent.value_vs);
            agent.current_value_loss(episode).backward();

            let expected: Vec<Tensor> = tch::no_grad(|| {
                agent
                    .value_vs
                    .trainable_variables()
                    .iter()
                    .map(|p| p - p.grad() * agent.critic_learning_rate)
                    .collect()
            });

            agent.svrg_update(&mean).unwrap();
            assert!(same(&expected, &params(agent.value_vs())));
        }
    }

    #[test]
    fn snapshots_match_the_episode_value_gradient() {
        let mut agent = agent(2, 4, 5);
        agent.run_episode().unwrap();
        agent.run_episode().unwrap();

        for k in 0..2 {
            let (episode, snapshot) = agent.group.get(k).unwrap();
            gradient::zero(&agent.value_vs);
            agent.current_value_loss(episode).backward();
            let fresh = Gradients::snapshot(&agent.value_vs);

            let magnitude: f64 = snapshot
                .iter()
                .map(|g| g.abs().sum(Kind::Double).double_value(&[]))
                .sum();
            assert!(magnitude > 0.0);

            assert_eq!(snapshot.len(), fresh.len());
            for (past, now) in snapshot.iter().zip(&fresh) {
                assert!(past.allclose(now, 1e-12, 1e-12, false));
            }
        }
    }

    #[test]
    fn svrg_update_applies_the_control_variate() {
        let mut agent = agent(2, 4, 5);
        agent.run_episode().unwrap();
        agent.run_episode().unwrap();

        let snapshots = agent.group.snapshots();
        assert!(!snapshots[0]
            .iter()
            .zip(&snapshots[1])
            .all(|(a, b)| a.equal(b)));

        let mu: Vec<Tensor> = tch::no_grad(|| {
            (0..snapshots[0].len())
                .map(|i| {
                    snapshots[0][i].zeros_like()
                        + &snapshots[0][i] / 2.0
                        + &snapshots[1][i] / 2.0
                })
                .collect()
        });
        let mean = agent.group.mean_gradient().unwrap();
        assert!(mu.iter().zip(&mean).all(|(a, b)| a.equal(b)));

        let lr = agent.critic_learning_rate;
        for _ in 0..4 {
            let t = agent.rng.clone().gen_range(0..2);

            let (episode, past) = agent.group.get(t).unwrap();
            gradient::zero(&agent.value_vs);
            agent.current_value_loss(episode).backward();

            let expected: Vec<Tensor> = tch::no_grad(|| {
                agent
                    .value_vs
                    .trainable_variables()
                    .iter()
                    .zip(&mu)
                    .zip(past)
                    .map(|((p, m), s)| p - (m - s + p.grad()) * lr)
                    .collect()
            });

            agent.svrg_update(&mean).unwrap();
            assert!(same(&expected, &params(agent.value_vs())));
        }
    }

    #[test]
    fn train_refuses_a_group_left_open() {
        let mut agent = agent(2, 4, 1);
        agent.run_episode().unwrap();

        assert!(matches!(
            agent.train(1),
            Err(Error::LeftoverGroup { episodes: 1 })
        ));
        assert_eq!(agent.episode_rewards().len(), 1);
    }

    #[test]
    fn same_seed_reproduces_training() {
        let mut a = agent(2, 4, 9);
        let mut b = agent(2, 4, 9);
        let mut c = agent(2, 4, 10);

        for agent in [&mut a, &mut b, &mut c] {
            agent.train(2).unwrap();
        }

        assert!(same(&params(a.value_vs()), &params(b.value_vs())));
        assert!(same(&params(a.policy_vs()), &params(b.policy_vs())));
        assert_eq!(a.episode_rewards(), b.episode_rewards());
        assert_eq!(a.episode_rewards().len(), 4);

        assert!(!same(&params(a.value_vs()), &params(c.value_vs())));
    }

    #[test]
    fn svrg_iterations_are_determined_by_the_seed() {
        let trajectory = |seed| {
            let mut agent = agent(2, 4, seed);
            agent.run_episode().unwrap();
            agent.run_episode().unwrap();

            let mean = agent.group.mean_gradient().unwrap();
            let mut states = Vec::new();
            for _ in 0..4 {
                agent.svrg_update(&mean).unwrap();
                states.push(params(agent.value_vs()));
            }
            states
        };

        let (first, second) = (trajectory(21), trajectory(21));
        assert_eq!(first.len(), 4);
        for (x, y) in first.iter().zip(&second) {
            assert!(same(x, y));
        }
        for pair in first.windows(2) {
            assert!(!same(&pair[0], &pair[1]));
        }
    }

    #[test]
    fn builder_setters_reach_the_agent() {
        let agent = Builder::init()
            .set_env(scripted())
            .set_config(&AgentConfig::default())
            .set_group_size(3)
            .set_critic_learning_rate(0.5)
            .build()
            .unwrap();

        assert_eq!(agent.group_size(), 3);
        assert_eq!(agent.critic_learning_rate, 0.5);
        assert_eq!(agent.gamma, AgentConfig::default().gamma);
        assert_eq!(agent.update_count, AgentConfig::default().update_count);
    }

    #[test]
    fn build_validates_parameters() {
        assert!(matches!(
            Builder::<Scripted>::init().build(),
            Err(Error::MissingParameter("env"))
        ));
        assert!(matches!(
            Builder::init().set_env(scripted()).set_group_size(0).build(),
            Err(Error::InvalidParameter {
                name: "group_size",
                ..
            })
        ));
        assert!(matches!(
            Builder::init().set_env(scripted()).set_gamma(1.5).build(),
            Err(Error::InvalidParameter { name: "gamma", .. })
        ));
        assert!(Builder::init()
            .set_env(scripted())
            .set_config(&AgentConfig::default())
            .build()
            .is_ok());
    }
}
