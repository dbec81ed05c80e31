//! Benchmarks compile and evaluate cost across representative expression
//! shapes, mirroring the teacher's `cel-jit/benches/comparison.rs` groups
//! (arithmetic, member access, indexing, comprehension scaling) minus the
//! tree-walking-interpreter comparison this crate has no baseline for.

use cel::runtime::BindingMap;
use cel::{compile, CompileOptions, Value};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn benchmark_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let exprs = [
        ("arithmetic", "1 + 2 * 3 - 4 / 2"),
        ("comparison", "10 > 5 && 3 < 7 || 1 == 1"),
        ("conditional", "x > 10 ? x * 2 : x + 5"),
        ("member_access", "obj.nested.value + obj.other"),
        ("comprehension", "[1, 2, 3, 4, 5].map(x, x * 2)"),
    ];
    for (name, expr) in exprs {
        group.bench_function(name, |b| b.iter(|| compile(black_box(expr), &CompileOptions::default()).unwrap()));
    }
    group.finish();
}

fn benchmark_simple_arithmetic(c: &mut Criterion) {
    let expr = "1 + 2 * 3 - 4 / 2";
    let program = compile(expr, &CompileOptions::default()).unwrap();
    let bindings = BindingMap::new();

    c.bench_function("evaluate_simple_arithmetic", |b| b.iter(|| program.evaluate(black_box(&bindings))));
}

fn benchmark_variable_access(c: &mut Criterion) {
    let expr = "apple";
    let program = compile(expr, &CompileOptions::default()).unwrap();
    let mut bindings = BindingMap::new();
    bindings.insert("apple", Value::Bool(true));

    c.bench_function("evaluate_variable_access", |b| b.iter(|| program.evaluate(black_box(&bindings))));
}

fn benchmark_list_indexing(c: &mut Criterion) {
    let expr = "list[0] + list[5] + list[9]";
    let program = compile(expr, &CompileOptions::default()).unwrap();
    let mut bindings = BindingMap::new();
    bindings.insert("list", Value::List((1..=10).map(Value::Int).collect()));

    c.bench_function("evaluate_list_indexing", |b| b.iter(|| program.evaluate(black_box(&bindings))));
}

fn benchmark_map_macro_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_list_scaling");
    let expr = "list.map(x, x * 2)";
    let program = compile(expr, &CompileOptions::default()).unwrap();

    for size in [1, 10, 100, 1000, 10000] {
        let mut bindings = BindingMap::new();
        bindings.insert("list", Value::List((0..size).map(Value::Int).collect()));
        group.bench_with_input(BenchmarkId::new("evaluate", size), &bindings, |b, bindings| {
            b.iter(|| program.evaluate(black_box(bindings)))
        });
    }
    group.finish();
}

fn benchmark_filter_macro_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_list_scaling");
    let expr = "list.filter(x, x % 2 == 0)";
    let program = compile(expr, &CompileOptions::default()).unwrap();

    for size in [1, 10, 100, 1000, 10000] {
        let mut bindings = BindingMap::new();
        bindings.insert("list", Value::List((0..size).map(Value::Int).collect()));
        group.bench_with_input(BenchmarkId::new("evaluate", size), &bindings, |b, bindings| {
            b.iter(|| program.evaluate(black_box(bindings)))
        });
    }
    group.finish();
}

fn benchmark_comprehension_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("comprehension_scaling");
    let expr = "items.filter(x, x % 2 == 0).map(x, x * 2)";
    let program = compile(expr, &CompileOptions::default()).unwrap();

    for size in [10, 50, 100, 500] {
        let mut bindings = BindingMap::new();
        bindings.insert("items", Value::List((1..=size).map(Value::Int).collect()));
        group.bench_with_input(BenchmarkId::new("evaluate", size), &bindings, |b, bindings| {
            b.iter(|| program.evaluate(black_box(bindings)))
        });
    }
    group.finish();
}

fn benchmark_real_world(c: &mut Criterion) {
    let expr = r#"
        user.age >= 18 &&
        user.role in ["admin", "moderator"] &&
        request.method == "POST" &&
        request.path.startsWith("/api/") &&
        size(request.body) < 1000000
    "#;
    let program = compile(expr, &CompileOptions::default()).unwrap();

    let mut user = cel::value::ValueMap::new();
    user.insert(Value::string("age"), Value::Int(25)).unwrap();
    user.insert(Value::string("role"), Value::string("admin")).unwrap();

    let mut request = cel::value::ValueMap::new();
    request.insert(Value::string("method"), Value::string("POST")).unwrap();
    request.insert(Value::string("path"), Value::string("/api/users")).unwrap();
    request.insert(Value::string("body"), Value::string("{}")).unwrap();

    let mut bindings = BindingMap::new();
    bindings.insert("user", Value::Map(user));
    bindings.insert("request", Value::Map(request));

    c.bench_function("evaluate_real_world_policy", |b| b.iter(|| program.evaluate(black_box(&bindings))));
}

criterion_group!(
    benches,
    benchmark_compile,
    benchmark_simple_arithmetic,
    benchmark_variable_access,
    benchmark_list_indexing,
    benchmark_map_macro_scaling,
    benchmark_filter_macro_scaling,
    benchmark_comprehension_scaling,
    benchmark_real_world,
);
criterion_main!(benches);
