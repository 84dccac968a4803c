//! Benchmarks for reconciliation matching real editor usage patterns
//!
//! The interesting costs are the from-scratch build of a large tree, the
//! steady-state single-character edit, and the no-edit revalidation pass
//! that should be dominated by wholesale subtree relocation.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use docview::{reconcile, ChangedRange, DefaultHooks, DocText, NodeId, ViewArena};

/// Generate a realistic document with mixed line lengths.
fn generate_document(lines: usize) -> String {
    let mut doc = String::new();
    for i in 0..lines {
        match i % 5 {
            0 => doc.push_str(&format!("fn function_{}() {{\n", i)),
            1 => doc.push_str(&format!(
                "    let variable_{} = \"string literal with some text\";\n",
                i
            )),
            2 => doc.push_str(&format!("    // explanation of step {}\n", i)),
            3 => doc.push_str(&format!("    process_data({}, {}, {});\n", i, i * 2, i * 3)),
            _ => doc.push_str("}\n"),
        }
    }
    doc
}

fn build(arena: &mut ViewArena, doc: &str) -> NodeId {
    let empty = arena.new_root();
    let change = ChangedRange {
        from_old: 0,
        to_old: 0,
        from_new: 0,
        to_new: doc.len(),
    };
    let mut text = DocText::new(doc);
    reconcile(
        arena,
        empty,
        &[change],
        &[],
        &mut text,
        None,
        &DefaultHooks,
    )
    .expect("build")
    .root
}

fn bench_full_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_build");
    for lines in [100, 1000, 10000].iter() {
        let doc = generate_document(*lines);
        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, _| {
            b.iter(|| {
                let mut arena = ViewArena::new();
                std::hint::black_box(build(&mut arena, &doc));
            });
        });
    }
    group.finish();
}

fn bench_single_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_insert");
    for lines in [100, 1000, 10000].iter() {
        let doc = generate_document(*lines);
        let mid = doc.len() / 2;
        let new_doc = format!("{}x{}", &doc[..mid], &doc[mid..]);
        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, _| {
            b.iter(|| {
                let mut arena = ViewArena::new();
                let root = build(&mut arena, &doc);
                let change = ChangedRange {
                    from_old: mid,
                    to_old: mid,
                    from_new: mid,
                    to_new: mid + 1,
                };
                let mut text = DocText::new(&new_doc);
                let result = reconcile(
                    &mut arena,
                    root,
                    &[change],
                    &[],
                    &mut text,
                    None,
                    &DefaultHooks,
                )
                .expect("reconcile");
                std::hint::black_box(result.root);
            });
        });
    }
    group.finish();
}

fn bench_noop_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("noop_reconcile");
    for lines in [100, 1000, 10000].iter() {
        let doc = generate_document(*lines);
        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, _| {
            b.iter(|| {
                let mut arena = ViewArena::new();
                let root = build(&mut arena, &doc);
                let mut text = DocText::new(&doc);
                let result = reconcile(
                    &mut arena,
                    root,
                    &[],
                    &[],
                    &mut text,
                    None,
                    &DefaultHooks,
                )
                .expect("reconcile");
                std::hint::black_box(result.ledger.count(docview::ReuseKind::Fully));
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_full_build,
    bench_single_insert,
    bench_noop_reconcile
);
criterion_main!(benches);
