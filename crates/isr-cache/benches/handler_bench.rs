use criterion::{black_box, criterion_group, criterion_main, Criterion};
use isr_cache::{CacheHandler, InMemoryCacheHandler, RevalidateOptions};

const DOMAINS: [&str; 4] = ["a.com", "b.com", "c.com", "d.com"];

fn urls(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("https://{}/page-{}", DOMAINS[i % DOMAINS.len()], i))
        .collect()
}

fn bench_handler(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let cache = InMemoryCacheHandler::new(DOMAINS).expect("domains");
    let urls = urls(10_000);
    let body = "<html><body>".to_string() + &"x".repeat(4096) + "</body></html>";

    rt.block_on(async {
        for url in &urls {
            cache
                .add(url, &body, RevalidateOptions::after(60))
                .await
                .expect("add");
        }
    });

    c.bench_function("add", |b| {
        let mut i = 0;
        b.iter(|| {
            let url = &urls[i % urls.len()];
            i += 1;
            rt.block_on(cache.add(black_box(url), &body, RevalidateOptions::after(60)))
        })
    });

    c.bench_function("get_hit", |b| {
        let mut i = 0;
        b.iter(|| {
            let url = &urls[i % urls.len()];
            i += 1;
            rt.block_on(cache.get(black_box(url)))
        })
    });

    c.bench_function("get_unknown_domain", |b| {
        b.iter(|| rt.block_on(cache.get(black_box("https://unknown.com/page"))))
    });
}

criterion_group!(benches, bench_handler);
criterion_main!(benches);
