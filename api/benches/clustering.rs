use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::Rng;

use newsbrief_api::clustering::similarity::{StoryMeta, find_title_clusters};

const HEADLINE_WORDS: &[&str] = &[
    "market", "launch", "report", "climate", "election", "rocket", "quarterly", "breach",
    "startup", "housing", "energy", "review", "protest", "merger", "outage", "research",
];

fn generate_stories(n: usize, duplicate_ratio: f64) -> Vec<StoryMeta> {
    let mut rng = rand::thread_rng();
    let mut stories = Vec::with_capacity(n);
    for i in 0..n {
        let feed_id = (i % 40) as i32 + 1;
        let title = if rng.r#gen::<f64>() < duplicate_ratio && i > 0 {
            // Reuse an earlier headline so cross-feed duplicates exist
            stories[rng.gen_range(0..i)].story_title.clone()
        } else {
            (0..7)
                .map(|_| HEADLINE_WORDS[rng.gen_range(0..HEADLINE_WORDS.len())])
                .collect::<Vec<_>>()
                .join(" ")
        };
        stories.push(StoryMeta {
            story_hash: format!("{feed_id}:guid{i}"),
            feed_id,
            resolved_feed_id: feed_id,
            story_title: title,
            story_date: 1_700_000_000 + i as i64,
        });
    }
    stories
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_title_clusters");
    for size in [100, 1000, 5000].iter() {
        let stories = generate_stories(*size, 0.15);
        group.bench_function(BenchmarkId::new("mixed_pool", size), |b| {
            b.iter(|| find_title_clusters(&stories))
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
