//! Benchmarks for frame parsing and the render throttle

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use market_stream::parser::{OrderEvent, ParsedFrame};
use market_stream::throttle::{Offer, Throttle};
use std::time::Duration;
use tokio::time::Instant;

fn create_orderbook_frame(levels: usize) -> String {
    let units: Vec<String> = (0..levels)
        .map(|i| {
            format!(
                r#"{{"ask_price":{},"bid_price":{},"ask_size":0.5234,"bid_size":1.25}}"#,
                143_100_000 + i * 1000,
                143_099_000 - i * 1000
            )
        })
        .collect();

    format!(
        r#"{{"type":"orderbook","code":"KRW-BTC","timestamp":1704067200000,"total_ask_size":8.2,"total_bid_size":4.1,"orderbook_units":[{}],"stream_type":"REALTIME"}}"#,
        units.join(",")
    )
}

const ORDER_EVENT: &str = r#"{"type":"myOrder","code":"KRW-BTC","uuid":"ac2dc2a3-fce9-40a2-a4f6-5987c25c438f","ask_bid":"BID","order_type":"limit","state":"trade","price":143000000,"avg_price":143000000,"volume":0.02,"remaining_volume":0.01,"executed_volume":0.01,"order_timestamp":1704067200000,"stream_type":"REALTIME"}"#;

fn benchmark_parse_orderbook(c: &mut Criterion) {
    let frame = create_orderbook_frame(15);

    c.bench_function("parse_orderbook_15_levels", |b| {
        b.iter(|| {
            black_box(ParsedFrame::parse(black_box(frame.as_bytes())).ok());
        })
    });

    c.bench_function("parse_and_split_levels", |b| {
        b.iter(|| {
            if let Ok(ParsedFrame::Orderbook(frame)) = ParsedFrame::parse(frame.as_bytes()) {
                black_box(frame.into_levels());
            }
        })
    });
}

fn benchmark_parse_order_event(c: &mut Criterion) {
    c.bench_function("parse_order_event", |b| {
        b.iter(|| {
            black_box(OrderEvent::parse(black_box(ORDER_EVENT)).ok());
        })
    });
}

fn benchmark_throttle_offer(c: &mut Criterion) {
    let mut throttle = Throttle::new(Duration::from_millis(16));
    let start = Instant::now();

    c.bench_function("throttle_offer", |b| {
        let mut tick = 0u64;
        b.iter(|| {
            tick += 1;
            let now = start + Duration::from_micros(tick * 100);
            if let Offer::Deferred { .. } = throttle.offer(black_box(tick), now) {
                black_box(throttle.has_pending());
            }
        })
    });
}

criterion_group!(
    benches,
    benchmark_parse_orderbook,
    benchmark_parse_order_event,
    benchmark_throttle_offer
);
criterion_main!(benches);
