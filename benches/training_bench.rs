//! Benchmarks for the discriminator side of training.

use advset::kb::{Fact, Triple};
use advset::training::{batch_size_for, make_batches, CorruptionSlot, Corruptions, Corruptor, TrainingBatch};
use advset::{parse_clauses, EmbeddingStore, EntityConstraint, Projector, TrainConfig, Trainer, TrainingSession, Vocabulary};
use candle_core::Device;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// A ring of `n` entities linked by two predicates.
fn ring(n: usize) -> Vec<Triple> {
    let mut triples = Vec::with_capacity(2 * n);
    for i in 0..n {
        let (a, b) = (format!("e{}", i), format!("e{}", (i + 1) % n));
        triples.push(Triple::new(&a, "next", &b));
        triples.push(Triple::new(&b, "prev", &a));
    }
    triples
}

fn bench_batch_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_assembly");

    for n in [1_000, 10_000] {
        let triples = ring(n);
        let vocab = Vocabulary::from_triples(&triples);
        let facts: Vec<Fact> = vocab.facts(&triples).unwrap();
        let subjects = Corruptor::new(CorruptionSlot::Subject, vocab.entity_indices()).unwrap();
        let objects = Corruptor::new(CorruptionSlot::Object, vocab.entity_indices()).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(facts.len()), &facts, |b, facts| {
            let mut rng = ChaCha8Rng::seed_from_u64(0);
            b.iter(|| {
                let corruptions = Corruptions {
                    subjects: subjects.corrupt(facts, &mut rng),
                    objects: objects.corrupt(facts, &mut rng),
                    relations: None,
                };
                let size = batch_size_for(facts.len(), 10);
                for range in make_batches(facts.len(), size) {
                    black_box(TrainingBatch::assemble(facts, &corruptions, range).unwrap());
                }
            })
        });
    }

    group.finish();
}

fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection");
    let device = Device::Cpu;
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let store = EmbeddingStore::new(10_000, 100, 100, 100, &mut rng, &device).unwrap();

    for constraint in [EntityConstraint::UnitSphere, EntityConstraint::UnitCube] {
        let projector = Projector::new(constraint, Some(1.0), vec![1, 2, 3], 10_001, &device).unwrap();
        group.bench_function(format!("{:?}", constraint), |b| {
            b.iter(|| projector.project_store(black_box(&store)).unwrap())
        });
    }

    group.finish();
}

fn bench_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("training_epoch");
    group.sample_size(10);

    let triples = ring(500);
    let clauses = parse_clauses("prev(X, Y) :- next(Y, X)").unwrap();

    for adversarial in [false, true] {
        let name = if adversarial { "adversarial" } else { "plain" };
        group.bench_function(name, |b| {
            b.iter(|| {
                let vocab = Vocabulary::from_triples(&triples);
                let facts = vocab.facts(&triples).unwrap();
                let mut config = TrainConfig {
                    entity_embedding_size: 20,
                    nb_epochs: 1,
                    ..TrainConfig::default()
                };
                if adversarial {
                    config.adversary.lr = Some(0.1);
                    config.adversary.epochs = 5;
                }
                let mut session = TrainingSession::new(config, vocab, &clauses, &Device::Cpu).unwrap();
                black_box(Trainer::new(&mut session).run(&facts).unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_batch_assembly, bench_projection, bench_epoch);
criterion_main!(benches);
