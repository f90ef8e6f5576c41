//! Throughput of the whole class transform on methods with a growing number
//! of suspension sites, plus a resume round on the runtime.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use resumable::binary_format::{decode_class, encode_class};
use resumable::execution::{ContinuableRunner, NoHost, RunOutcome};
use resumable::structure::classes::{access, Class, Code, Method};
use resumable::structure::config::InstrumentConfig;
use resumable::structure::instructions::{Instr, MethodRef};
use resumable::transform_class;

const CLASS: &str = "bench/Flow";

/// `sites` pauses, each with a handful of live locals and one stack entry.
fn flow(sites: usize) -> Class {
    let pause = Instr::InvokeVirtual(MethodRef::new(CLASS, "pause", "()V"));
    let mut instrs = vec![Instr::IConst(0), Instr::IStore(1), Instr::LConst(1), Instr::LStore(2)];
    for i in 0..sites {
        instrs.extend(vec![
            Instr::IInc(1, 1),
            Instr::ILoad(1),
            Instr::ALoad(0),
            pause.clone(),
            Instr::I2L,
            Instr::LLoad(2),
            Instr::LAdd,
            Instr::LStore(2),
        ]);
        if i % 4 == 3 {
            instrs.extend(vec![Instr::DConst(1.0), Instr::DStore(4)]);
        }
    }
    instrs.push(Instr::Return);

    Class {
        access: access::PUBLIC,
        name: CLASS.to_string(),
        super_name: Some("java/lang/Object".to_string()),
        interfaces: Vec::new(),
        methods: vec![Method {
            access: access::PUBLIC,
            name: "execute".to_string(),
            descriptor: "()V".to_string(),
            max_locals: 6,
            code: Code { instrs, try_catch: Vec::new() },
        }],
    }
}

fn bench_transform(c: &mut Criterion) {
    let config = InstrumentConfig::default();
    let mut group = c.benchmark_group("transform_class");
    for sites in [1, 8, 64, 256] {
        let bytes = encode_class(&flow(sites));
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sites), &bytes, |b, bytes| {
            b.iter(|| transform_class(black_box(bytes), CLASS, &config))
        });
    }
    group.finish();
}

fn bench_resume(c: &mut Criterion) {
    let config = InstrumentConfig::default();
    let bytes = encode_class(&flow(64));
    let out = match transform_class(&bytes, CLASS, &config) {
        Ok(out) => out.into_bytes(&bytes).into_owned(),
        Err(e) => panic!("{}", e),
    };
    let class = match decode_class(&out) {
        Ok(class) => class,
        Err(e) => panic!("{}", e),
    };

    c.bench_function("resume_all_sites", |b| {
        b.iter(|| {
            let mut runner = ContinuableRunner::new(class.clone(), &config);
            let mut outcome = runner.start(&mut NoHost);
            while let Ok(RunOutcome::Paused(id)) = outcome {
                outcome = runner.resume(id, &mut NoHost);
            }
            black_box(outcome)
        })
    });
}

criterion_group!(benches, bench_transform, bench_resume);
criterion_main!(benches);
