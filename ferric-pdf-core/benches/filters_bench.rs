//! Filter and open-path benchmarks
//!
//! Run with: `cargo bench --bench filters_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ferric_pdf::filters::{self, FilterType};
use ferric_pdf::{Document, Object, SaveOptions, Stream};

// Content-stream-like payload: compressible but not uniform
fn sample_payload(len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    let mut i = 0u32;
    while data.len() < len {
        data.extend_from_slice(
            format!("BT /F1 12 Tf {} {} Td (Line {i}) Tj ET\n", i % 500, i * 7 % 800).as_bytes(),
        );
        i += 1;
    }
    data.truncate(len);
    data
}

fn bench_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("filters");
    let mut cases = vec![
        FilterType::AsciiHex,
        FilterType::Ascii85,
        FilterType::Lzw,
        FilterType::RunLength,
    ];
    if cfg!(feature = "compression") {
        cases.push(FilterType::Flate);
    }

    for size in [4 * 1024, 256 * 1024] {
        let data = sample_payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        for &filter in &cases {
            let encoded = filters::encode(filter, None, &data).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("decode_{}", filter.name()), size),
                &encoded,
                |b, encoded| b.iter(|| filters::decode(filter, None, black_box(encoded)).unwrap()),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("encode_{}", filter.name()), size),
                &data,
                |b, data| b.iter(|| filters::encode(filter, None, black_box(data)).unwrap()),
            );
        }
    }
    group.finish();
}

fn bench_open(c: &mut Criterion) {
    let mut doc = Document::new();
    for i in 0..500 {
        doc.create_object(Stream::with_data(sample_payload(512 + i)));
        doc.create_object(Object::Integer(i as i64));
    }

    let mut group = c.benchmark_group("document");
    for (label, options) in [
        ("table", SaveOptions::default()),
        (
            "xref_stream",
            SaveOptions::default()
                .with_xref_stream(true)
                .with_compression(true),
        ),
    ] {
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes, &options).unwrap();
        group.bench_with_input(BenchmarkId::new("open", label), &bytes, |b, bytes| {
            b.iter(|| Document::from_bytes(black_box(bytes.clone())).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("load_all", label), &bytes, |b, bytes| {
            b.iter(|| {
                let mut parsed = Document::from_bytes(bytes.clone()).unwrap();
                for id in parsed.object_ids() {
                    black_box(parsed.get_object(id).unwrap());
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_filters, bench_open);
criterion_main!(benches);
