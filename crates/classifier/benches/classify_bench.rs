//! 분류 벤치마크
//!
//! 특성 변환과 포레스트 예측 비용을 행 수별로 측정합니다.

use std::path::Path;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use flowwatch_classifier::{CategoryEncoders, Classifier, FeatureAdapter, PortPolicy, RandomForest};
use flowwatch_core::table::FlowTable;

const ENCODERS: &str = r#"{
    "Proto": ["tcp", "udp", "icmp", "man"],
    "State": ["CON", "FIN", "RST", "INT"],
    "Sport": ["0", "http", "https", "domain"],
    "Dport": ["0", "http", "https", "domain"]
}"#;

/// 깊이 `depth`의 완전 이진 트리 JSON
fn tree_json(depth: u32, feature_offset: usize) -> String {
    let internal = (1usize << depth) - 1;
    let total = (1usize << (depth + 1)) - 1;
    let nodes: Vec<String> = (0..total)
        .map(|i| {
            if i < internal {
                format!(
                    r#"{{"feature": {}, "threshold": {}.5, "left": {}, "right": {}}}"#,
                    (i + feature_offset) % 10,
                    i % 7,
                    2 * i + 1,
                    2 * i + 2
                )
            } else if i % 2 == 0 {
                r#"{"value": [3.0, 1.0]}"#.to_owned()
            } else {
                r#"{"value": [1.0, 3.0]}"#.to_owned()
            }
        })
        .collect();
    format!(r#"{{"nodes": [{}]}}"#, nodes.join(","))
}

fn forest(trees: usize, depth: u32) -> RandomForest {
    let trees: Vec<String> = (0..trees).map(|t| tree_json(depth, t)).collect();
    let json = format!(r#"{{"classes": [0, 1], "trees": [{}]}}"#, trees.join(","));
    RandomForest::from_json(&json, Path::new("bench.json")).unwrap()
}

fn flow_table(rows: usize) -> FlowTable {
    let mut table = FlowTable::new([
        "Src IP",
        "Dst IP",
        "Src Port",
        "Dst Port",
        "Protocol",
        "State Flags",
        "Duration (s)",
        "Total Packets",
        "Total Bytes",
        "Out Bytes",
    ]);
    for i in 0..rows {
        table
            .push_row(vec![
                "192.168.0.10".to_owned(),
                "10.0.0.1".to_owned(),
                (40000 + i % 2000).to_string(),
                if i % 3 == 0 { "80" } else { "443" }.to_owned(),
                "6".to_owned(),
                "SYN, ACK".to_owned(),
                format!("{:.2}", (i % 50) as f64 / 10.0),
                (i % 20 + 1).to_string(),
                (i % 20 * 700 + 60).to_string(),
                (i % 20 * 300).to_string(),
            ])
            .unwrap();
    }
    table
}

fn bench_convert(c: &mut Criterion) {
    let encoders =
        Arc::new(CategoryEncoders::from_json(ENCODERS, Path::new("enc.json")).unwrap());
    let adapter = FeatureAdapter::new(PortPolicy::AllowList, encoders);
    let mut group = c.benchmark_group("feature_convert");

    for rows in [10usize, 1_000, 10_000] {
        let table = flow_table(rows);
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &table, |b, table| {
            b.iter(|| adapter.convert_table(black_box(table)).unwrap().len())
        });
    }

    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let encoders =
        Arc::new(CategoryEncoders::from_json(ENCODERS, Path::new("enc.json")).unwrap());
    let adapter = FeatureAdapter::new(PortPolicy::AllowList, encoders);
    let features = adapter.convert_table(&flow_table(1_000)).unwrap();
    let mut group = c.benchmark_group("forest_predict_1000_rows");
    group.throughput(Throughput::Elements(features.len() as u64));

    for trees in [10usize, 100] {
        let model = forest(trees, 8);
        group.bench_with_input(BenchmarkId::from_parameter(trees), &model, |b, model| {
            b.iter(|| model.predict(black_box(&features)).unwrap().len())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_convert, bench_predict);
criterion_main!(benches);
