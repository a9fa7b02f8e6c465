use std::fmt::Write as _;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use fixture_seed::{StreamingProducer, intern::InterningCache};

fn generate_orders(rows: usize) -> String {
    let mut xml = String::from("<dataset>\n");
    for i in 0..rows {
        let status = match i % 3 {
            0 => "shipped",
            1 => "pending",
            _ => "processing",
        };
        let day = (i % 28) + 1;
        writeln!(
            xml,
            r#"  <ORDERS ID="{i}" ORDERED_AT="2024-01-{day:02}" STATUS="{status}" REGION="EU"/>"#
        )
        .expect("row");
        if i % 10 == 0 {
            writeln!(xml, r#"  <AUDIT ORDER_ID="{i}" ACTION="created"/>"#).expect("audit row");
        }
    }
    xml.push_str("</dataset>\n");
    xml
}

fn bench_interning(c: &mut Criterion) {
    let xml = generate_orders(20_000);
    let mut group = c.benchmark_group("flat_xml_parse");

    for (label, enabled) in [("interning", true), ("no_interning", false)] {
        group.bench_function(label, |b| {
            b.iter_batched(
                || InterningCache::with_enabled(enabled),
                |cache| {
                    StreamingProducer::new(xml.as_bytes(), "orders.xml")
                        .with_column_sensing(true)
                        .with_cache(cache)
                        .produce_dataset()
                        .expect("parse orders")
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_interning);
criterion_main!(benches);
