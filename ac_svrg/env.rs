use tch::Tensor;

/// Outcome of a single environment step.
#[derive(Debug)]
pub struct Transition {
    pub observation: Tensor,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
}

impl Transition {
    #[must_use]
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

pub trait Env {
    fn observation_space() -> usize;
    fn action_space() -> usize;
    fn reset(&mut self) -> Tensor;
    fn step(&mut self, action: u32) -> Transition;
}

mod cart_pole {
    pub use super::{Env as EnvTrait, Transition};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;
    use tch::Tensor;

    #[derive(Clone, Debug)]
    struct State(f64, f64, f64, f64);

    impl State {
        fn sample(rng: &mut StdRng) -> Self {
            Self(
                rng.gen_range(-0.05..0.05),
                rng.gen_range(-0.05..0.05),
                rng.gen_range(-0.05..0.05),
                rng.gen_range(-0.05..0.05),
            )
        }

        fn to_tensor(&self) -> Tensor {
            Tensor::from_slice(&[self.0, self.1, self.2, self.3])
        }
    }

    #[derive(Clone, Debug)]
    pub struct Env {
        current_step: u16,
        state: State,
        rng: StdRng,
    }

    const MAX_STEPS: u16 = 500;
    const REWARD_PER_STEP: f64 = 1.0;
    const GRAVITY: f64 = 9.8;
    const CART_MASS: f64 = 1.0;
    const POLE_MASS: f64 = 0.1;
    const TOTAL_MASS: f64 = CART_MASS + POLE_MASS;
    const POLE_LENGTH: f64 = 0.5;
    const POLE_MASS_LENGTH: f64 = POLE_MASS * POLE_LENGTH;
    const FORCE_MAG: f64 = 10.0;
    const TAU: f64 = 0.02;
    const THETA_THRESHOLD_RADIANS: f64 = 12.0 * 2.0 * PI / 360.0;
    const X_THRESHOLD: f64 = 2.4;

    impl Env {
        #[must_use]
        pub fn new(seed: u64) -> Self {
            let mut rng = StdRng::seed_from_u64(seed);
            Self {
                current_step: 0,
                state: State::sample(&mut rng),
                rng,
            }
        }
    }

    impl EnvTrait for Env {
        fn observation_space() -> usize {
            4
        }

        fn action_space() -> usize {
            2
        }

        fn reset(&mut self) -> Tensor {
            self.state = State::sample(&mut self.rng);
            self.current_step = 0;
            self.state.to_tensor()
        }

        fn step(&mut self, action: u32) -> Transition {
            self.current_step += 1;

            let State(mut x, mut x_dot, mut theta, mut theta_dot) = self.state;

            let force = if action == 1 { FORCE_MAG } else { -FORCE_MAG };

            let costheta = theta.cos();
            let sintheta = theta.sin();

            let tmp = (force + POLE_MASS_LENGTH * theta_dot.powi(2) * sintheta) / TOTAL_MASS;
            let thetaacc = (GRAVITY * sintheta - costheta * tmp)
                / (POLE_LENGTH * (4.0 / 3.0 - POLE_MASS * costheta.powi(2) / TOTAL_MASS));
            let xacc = tmp - POLE_MASS_LENGTH * thetaacc * costheta / TOTAL_MASS;

            x += TAU * x_dot;
            x_dot += TAU * xacc;
            theta += TAU * theta_dot;
            theta_dot += TAU * thetaacc;

            self.state = State(x, x_dot, theta, theta_dot);

            let terminated = !(-X_THRESHOLD..=X_THRESHOLD).contains(&x)
                || !(-THETA_THRESHOLD_RADIANS..=THETA_THRESHOLD_RADIANS).contains(&theta);

            Transition {
                observation: self.state.to_tensor(),
                reward: REWARD_PER_STEP,
                terminated,
                truncated: !terminated && self.current_step >= MAX_STEPS,
            }
        }
    }
}

mod scripted {
    pub use super::{Env as EnvTrait, Transition};
    use tch::Tensor;

    /// Replays fixed `(observation, reward)` sequences whatever the action.
    ///
    /// Entry `i` of an episode is the observation the agent acts on at step `i`
    /// and the reward it receives for that step. The episode terminates after
    /// its last entry; the next `reset` moves on to the following episode and
    /// wraps around at the end of the list.
    #[derive(Clone, Debug)]
    pub struct Env {
        episodes: Vec<Vec<([f64; 4], f64)>>,
        episode: usize,
        cursor: usize,
    }

    impl Env {
        /// # Panics
        ///
        /// Panics if `episodes` is empty or holds an empty episode.
        #[must_use]
        pub fn new(episodes: Vec<Vec<([f64; 4], f64)>>) -> Self {
            assert!(
                !episodes.is_empty() && episodes.iter().all(|e| !e.is_empty()),
                "scripted episodes must be non-empty"
            );

            Self {
                episode: episodes.len() - 1,
                episodes,
                cursor: 0,
            }
        }

        fn current(&self) -> &[([f64; 4], f64)] {
            &self.episodes[self.episode]
        }
    }

    impl EnvTrait for Env {
        fn observation_space() -> usize {
            4
        }

        fn action_space() -> usize {
            2
        }

        fn reset(&mut self) -> Tensor {
            self.episode = (self.episode + 1) % self.episodes.len();
            self.cursor = 0;
            Tensor::from_slice(&self.current()[0].0)
        }

        fn step(&mut self, _action: u32) -> Transition {
            let episode = self.current();
            let reward = episode[self.cursor].1;
            let terminated = self.cursor + 1 == episode.len();
            let next = if terminated {
                episode[self.cursor].0
            } else {
                episode[self.cursor + 1].0
            };

            self.cursor = (self.cursor + 1).min(episode.len() - 1);

            Transition {
                observation: Tensor::from_slice(&next),
                reward,
                terminated,
                truncated: false,
            }
        }
    }
}

pub use cart_pole::Env as CartPole;
pub use scripted::Env as Scripted;
