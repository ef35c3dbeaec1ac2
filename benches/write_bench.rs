// Write performance benchmarks for mapkv

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mapkv::batch::{BatchExecutor, BatchRequest};
use mapkv::script::LuaExecutor;
use mapkv::{Binding, EnvFlags, EnvOptions, Environment};
use std::hint::black_box;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Environment {
    // Durability is not what these benchmarks measure
    let options = EnvOptions::default().map_size(256 * 1024 * 1024).flags(EnvFlags::NO_SYNC);
    Environment::open_with(Binding::new().unwrap(), dir.path(), &options).unwrap()
}

fn benchmark_single_puts(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_put");

    for size in [100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let env = open(&temp_dir);

                // One transaction per record
                for i in 0..size {
                    let key = format!("key{:08}", i);
                    let value = format!("value{:08}", i);
                    env.write(|txn| txn.set(&key, &value)).unwrap();
                }

                black_box(&env);
            });
        });
    }

    group.finish();
}

fn benchmark_batched_puts(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_put");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let env = open(&temp_dir);

                env.write(|txn| {
                    for i in 0..size {
                        txn.set(format!("key{:08}", i), format!("value{:08}", i))?;
                    }
                    Ok(())
                })
                .unwrap();

                black_box(&env);
            });
        });
    }

    group.finish();
}

fn benchmark_random_puts(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_put");

    for size in [1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                use rand::Rng;
                let mut rng = rand::rng();
                let temp_dir = TempDir::new().unwrap();
                let env = open(&temp_dir);

                env.write(|txn| {
                    for _ in 0..size {
                        let key_num: u32 = rng.random();
                        txn.set(format!("key{:010}", key_num), format!("value{:010}", key_num))?;
                    }
                    Ok(())
                })
                .unwrap();

                black_box(&env);
            });
        });
    }

    group.finish();
}

fn benchmark_batch_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_request");

    for size in [100, 1000].iter() {
        let mut request = BatchRequest::new(true);
        for i in 0..*size {
            request.set(&format!("key{:08}", i), &format!("value{:08}", i));
        }

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &request, |b, request| {
            let temp_dir = TempDir::new().unwrap();
            let executor = BatchExecutor::new(open(&temp_dir));
            b.iter(|| {
                let report = executor.execute(black_box(request)).unwrap();
                black_box(report);
            });
        });
    }

    group.finish();
}

fn benchmark_lua_script(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let executor = LuaExecutor::new(open(&temp_dir), None);
    let script = r#"
        for i = 1, 100 do
            db.put("key" .. i, "value" .. i)
        end
    "#;

    c.bench_function("lua_script_100_puts", |b| {
        b.iter(|| executor.execute(black_box(script)).unwrap());
    });
}

criterion_group!(
    benches,
    benchmark_single_puts,
    benchmark_batched_puts,
    benchmark_random_puts,
    benchmark_batch_request,
    benchmark_lua_script
);
criterion_main!(benches);
