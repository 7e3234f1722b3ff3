use tch::Tensor;

use crate::error::{Error, Result};

/// What the agent saw and did at one step of an episode.
///
/// `value` and `log_prob` stay attached to the graph of the rollout forward
/// pass so the episode losses can be backpropagated through them.
#[derive(Debug)]
pub struct StepRecord {
    pub observation: Tensor,
    pub value: Tensor,
    pub action: u32,
    pub log_prob: Tensor,
}

/// Discounted return of every step, computed with one backward scan.
#[must_use]
pub fn discounted_returns(rewards: &[f64], gamma: f64) -> Vec<f64> {
    let mut returns = vec![0.0; rewards.len()];

    let mut discounted_sum = 0.0;
    for i in (0..rewards.len()).rev() {
        discounted_sum = rewards[i] + gamma * discounted_sum;
        returns[i] = discounted_sum;
    }

    returns
}

/// A finished trajectory: one reward per recorded step.
#[derive(Debug)]
pub struct Episode {
    steps: Vec<StepRecord>,
    rewards: Vec<f64>,
}

impl Episode {
    #[must_use]
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn returns(&self, gamma: f64) -> Vec<f64> {
        discounted_returns(&self.rewards, gamma)
    }

    #[must_use]
    pub fn total_reward(&self) -> f64 {
        self.rewards.iter().sum()
    }
}

/// Accumulates the episode currently being rolled out.
#[derive(Debug, Default)]
pub struct Recorder {
    steps: Vec<StepRecord>,
    rewards: Vec<f64>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Recorder {
        Recorder::default()
    }

    pub fn push_step(&mut self, step: StepRecord) {
        self.steps.push(step);
    }

    pub fn push_reward(&mut self, reward: f64) {
        self.rewards.push(reward);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.rewards.is_empty()
    }

    /// Freezes the recorded steps and rewards into an [`Episode`] and leaves
    /// the recorder empty. On error the buffers are left untouched.
    pub fn finish(&mut self) -> Result<Episode> {
        if self.steps.len() != self.rewards.len() {
            return Err(Error::Misaligned {
                steps: self.steps.len(),
                rewards: self.rewards.len(),
            });
        }
        if self.steps.is_empty() {
            return Err(Error::EmptyEpisode);
        }

        Ok(Episode {
            steps: std::mem::take(&mut self.steps),
            rewards: std::mem::take(&mut self.rewards),
        })
    }
}
