//! Performance benchmarks for blockext.
//!
//! Run with: cargo bench
//!
//! Target performance:
//! - In-process opcode invocation: < 1µs
//! - Descriptor normalization (20 blocks): < 100µs

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use blockext::extensions::{
    normalize, ArgSpec, ArgumentType, BlockArgs, BlockContext, BlockDescriptor, BlockType, BlockValue,
    Extension, ExtensionDescriptor, ExtensionManager, HostRuntime, InstanceBinding, MenuSpec,
};

/// Extension with a configurable number of reporter blocks.
struct Wide {
    blocks: usize,
}

impl Extension for Wide {
    fn get_info(&mut self) -> ExtensionDescriptor {
        let mut descriptor = ExtensionDescriptor::new("wide", "Wide")
            .with_menu("axis", MenuSpec::fixed(["x", "y", "z"]));
        for i in 0..self.blocks {
            descriptor = descriptor.with_block(
                BlockDescriptor::new(format!("value{}", i), BlockType::Reporter)
                    .with_text("value of [AXIS] plus [N]")
                    .with_argument("AXIS", ArgSpec::default().with_menu("axis"))
                    .with_argument("N", ArgSpec::new(ArgumentType::Number).with_default(1)),
            );
        }
        descriptor
    }

    fn invoke(&mut self, _opcode: &str, args: &BlockArgs, _context: &BlockContext) -> anyhow::Result<BlockValue> {
        Ok(args.get("N").cloned().unwrap_or(BlockValue::Null))
    }
}

/// Benchmark invoking an in-process opcode through the manager.
fn bench_invoke(c: &mut Criterion) {
    let mut manager = ExtensionManager::new(Arc::new(HostRuntime::new()));
    manager
        .register_internal_extension(Box::new(Wide { blocks: 4 }))
        .expect("register");
    manager.load_extension_id_sync("coreExample").expect("load");

    let args = match json!({ "AXIS": "x", "N": 3 }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let context = BlockContext::default();

    let mut group = c.benchmark_group("invoke");

    group.bench_function("registry_lookup_and_call", |b| {
        b.iter(|| black_box(manager.invoke(black_box("wide_value2"), &args, &context).ready()))
    });

    let function = manager.get_opcode_function("coreExample_exampleOpcode").expect("opcode");
    group.bench_function("resolved_function_call", |b| {
        b.iter(|| black_box(function.call(&args, &context).ready()))
    });

    group.finish();
}

/// Benchmark descriptor normalization for growing block counts.
fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for blocks in [1usize, 20, 100] {
        let mut extension = Wide { blocks };
        let descriptor = extension.get_info();
        let binding = InstanceBinding::Local(Arc::new(parking_lot::Mutex::new(
            Box::new(extension) as Box<dyn Extension>
        )));

        group.bench_with_input(BenchmarkId::from_parameter(blocks), &descriptor, |b, descriptor| {
            b.iter(|| black_box(normalize(black_box(descriptor), &binding)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_invoke, bench_normalize);
criterion_main!(benches);
