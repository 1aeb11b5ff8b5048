use criterion::{Criterion, black_box, criterion_group, criterion_main};
use runtime::{Runtime, RuntimeConfig};

const SCRIPT: &str = "bench";

fn load(src: &str, polymorphic_limit: usize) -> Runtime {
    let classes = compiler::compile_source(&format!("{SCRIPT}.kst"), src).expect("compile");
    let rt = Runtime::new(RuntimeConfig {
        polymorphic_limit,
        ..RuntimeConfig::default()
    });
    rt.load(classes).expect("load");
    rt
}

fn run_case(c: &mut Criterion, name: &str, src: &str) {
    let cached = load(src, RuntimeConfig::default().polymorphic_limit);
    let uncached = load(src, 0);
    black_box(cached.run_script(SCRIPT).expect("warmup"));

    c.bench_function(&format!("{name}_with_call_site_cache"), |b| {
        b.iter(|| black_box(cached.run_script(SCRIPT).expect("run")))
    });
    c.bench_function(&format!("{name}_without_call_site_cache"), |b| {
        b.iter(|| black_box(uncached.run_script(SCRIPT).expect("run")))
    });
}

fn bench_call_sites(c: &mut Criterion) {
    let monomorphic = "\
class Counter {
    def n = 0
    def bump(by) { n = n + by }
}
def c = new Counter()
def i = 0
while (i < 200) {
    c.bump(1)
    i = i + 1
}
c.n
";
    run_case(c, "monomorphic", monomorphic);

    let polymorphic = "\
class Shape { def area() { 0 } }
class Square extends Shape { def area() { 4 } }
class Circle extends Shape { def area() { 3.14 } }
def shapes = [new Shape(), new Square(), new Circle()]
def total = 0
def i = 0
while (i < 200) {
    total = total + shapes[i % 3].area()
    i = i + 1
}
total
";
    run_case(c, "polymorphic", polymorphic);
}

criterion_group!(benches, bench_call_sites);
criterion_main!(benches);
