use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kv::encoding::keycode::{decode_keys, decode_value, encode_keys, encode_value};
use kv::encoding::Base64Codec;
use kv::value::Value;
use rand::Rng;

/// Benchmarks for the order-preserving key codec (`encoding::keycode`) that
/// every row key, index entry, and mvcc version key is built from.

fn generate_text(size: usize) -> String {
    let text = "The quick brown fox jumps over the lazy dog. ";
    let mut data = String::with_capacity(size);
    while data.len() < size {
        data.push_str(text);
    }
    data.truncate(size);
    data
}

fn generate_blob(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

fn bench_scalar_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("keycode_scalar");

    group.bench_function("encode_integer", |b| {
        b.iter(|| encode_value(black_box(&Value::Integer(42))));
    });
    let encoded_int = encode_value(&Value::Integer(42));
    group.bench_function("decode_integer", |b| {
        b.iter(|| decode_value(black_box(&encoded_int)).unwrap());
    });

    group.bench_function("encode_double", |b| {
        b.iter(|| encode_value(black_box(&Value::Double(std::f64::consts::PI))));
    });
    let encoded_double = encode_value(&Value::Double(std::f64::consts::PI));
    group.bench_function("decode_double", |b| {
        b.iter(|| decode_value(black_box(&encoded_double)).unwrap());
    });

    group.finish();
}

fn bench_text_and_blob(c: &mut Criterion) {
    let mut group = c.benchmark_group("keycode_variable_length");

    for size in [16, 64, 256, 1024] {
        let text = generate_text(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode_text", size), &text, |b, text| {
            b.iter(|| encode_value(black_box(&Value::Text(text.clone()))));
        });

        let encoded_text = encode_value(&Value::Text(text.clone()));
        group.bench_with_input(
            BenchmarkId::new("decode_text", size),
            &encoded_text,
            |b, encoded| {
                b.iter(|| decode_value(black_box(encoded)).unwrap());
            },
        );

        let blob = generate_blob(size);
        group.bench_with_input(BenchmarkId::new("encode_blob", size), &blob, |b, blob| {
            b.iter(|| encode_value(black_box(&Value::Blob(blob.clone()))));
        });
    }

    group.finish();
}

fn bench_composite_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("keycode_composite");

    for width in [1, 2, 4, 8] {
        let values: Vec<Value> = (0..width)
            .map(|i| Value::Text(format!("component-{i}")))
            .collect();
        group.bench_with_input(
            BenchmarkId::new("encode_keys", width),
            &values,
            |b, values| {
                b.iter(|| encode_keys(black_box(values)));
            },
        );

        let encoded = encode_keys(&values);
        group.bench_with_input(
            BenchmarkId::new("decode_keys", width),
            &encoded,
            |b, encoded| {
                b.iter(|| decode_keys(black_box(encoded)).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_base64_escaping(c: &mut Criterion) {
    let mut group = c.benchmark_group("base64_escaping");
    let codec = Base64Codec::new();

    for size in [64, 256, 1024, 4096] {
        let data = generate_blob(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &data, |b, data| {
            b.iter(|| codec.encode(black_box(data)).unwrap());
        });

        let encoded = codec.encode(&data).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, encoded| {
            b.iter(|| codec.decode(black_box(encoded)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    encoding_benches,
    bench_scalar_round_trip,
    bench_text_and_blob,
    bench_composite_keys,
    bench_base64_escaping
);

criterion_main!(encoding_benches);
