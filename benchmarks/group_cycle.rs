use criterion::{criterion_group, criterion_main, BatchSize, Criterion, PlottingBackend};

const GROUP_SIZE: usize = 10;
const UPDATE_COUNT: usize = 2 * GROUP_SIZE;

fn group_cycle_cpu(c: &mut Criterion) {
    use ac_svrg::{agent, env};

    c.bench_function("AC-SVRG/CPU group cycle", |b| {
        b.iter_batched(
            || {
                agent::Builder::init()
                    .set_env(env::CartPole::new(33))
                    .set_gamma(0.95)
                    .set_actor_learning_rate(1e-4)
                    .set_critic_learning_rate(1e-4)
                    .set_hidden_dim(16)
                    .set_group_size(GROUP_SIZE)
                    .set_update_count(UPDATE_COUNT)
                    .set_seed(33)
                    .build()
                    .unwrap()
            },
            |mut agent| {
                agent.train(1).unwrap();
                assert_eq!(agent.episode_rewards().len(), GROUP_SIZE);
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(20)
        .plotting_backend(PlottingBackend::None);
    targets = group_cycle_cpu
}
criterion_main!(benches);
