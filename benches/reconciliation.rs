//! Benchmark suite for comparing processing strategies
//!
//! Compares the synchronous and asynchronous strategies on one synthetic day
//! of readings using the divan benchmarking framework.
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench
//! ```
//!
//! # Generated Input
//!
//! Every run writes a fresh day of data to temporary files:
//! - one tank per station, large enough to absorb every depletion
//! - one nozzle per station, a reading every `86400 / n` seconds
//! - card payments matching the dispensed volume

use fuel_reconciliation_engine::cli::{ReportKind, StrategyType};
use fuel_reconciliation_engine::strategy::{create_strategy, BatchConfig, RunRequest};
use fuel_reconciliation_engine::types::{EngineConfig, TenantContext};
use chrono::{Duration, TimeZone, Utc};
use std::io::Write;
use tempfile::NamedTempFile;

const STATIONS: usize = 8;

fn main() {
    divan::main();
}

struct Input {
    readings: NamedTempFile,
    tanks: NamedTempFile,
}

impl Input {
    fn generate(readings_per_station: usize) -> Self {
        let mut tanks = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(
            tanks,
            "tenant_id,station_id,fuel_type,capacity,minimum_level,current_volume,last_updated"
        )
        .expect("Failed to write tanks");
        for station in 0..STATIONS {
            writeln!(
                tanks,
                "acme,s{},diesel,100000000,1000,90000000,2024-03-01T00:00:00Z",
                station
            )
            .expect("Failed to write tanks");
        }

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let step = Duration::seconds((86_400 / readings_per_station.max(1)).max(1) as i64);
        let mut readings = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(
            readings,
            "nozzle_id,tenant_id,station_id,fuel_type,recorded_at,meter_value,previous_meter_value,meter_reset,payment_method,amount,price_per_unit"
        )
        .expect("Failed to write readings");
        for station in 0..STATIONS {
            for i in 0..readings_per_station {
                let at = start + step * i as i32;
                writeln!(
                    readings,
                    "n{s},acme,s{s},diesel,{at},{value},{prev},,card,{amount},2",
                    s = station,
                    at = at.to_rfc3339(),
                    value = 1000 + i * 25,
                    prev = if i == 0 { String::new() } else { (1000 + (i - 1) * 25).to_string() },
                    amount = if i == 0 { 0 } else { 50 },
                )
                .expect("Failed to write readings");
            }
        }

        Self { readings, tanks }
    }

    fn request(&self) -> RunRequest {
        RunRequest {
            ctx: TenantContext::new("acme"),
            readings: self.readings.path().to_path_buf(),
            tanks: self.tanks.path().to_path_buf(),
            tank_events: None,
            from: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
            window: Duration::hours(1),
            report: ReportKind::Records,
        }
    }
}

/// Synchronous strategy, hourly windows over one day
#[divan::bench(args = [100, 1_000, 10_000])]
fn sync_strategy(bencher: divan::Bencher, readings_per_station: usize) {
    let input = Input::generate(readings_per_station);
    let request = input.request();
    let strategy = create_strategy(StrategyType::Sync, EngineConfig::default(), None);

    bencher.bench_local(|| {
        let mut output = Vec::new();
        strategy
            .process(&request, &mut output)
            .expect("Processing failed");
        output
    });
}

/// Asynchronous strategy, hourly windows over one day
#[divan::bench(args = [100, 1_000, 10_000])]
fn async_strategy(bencher: divan::Bencher, readings_per_station: usize) {
    let input = Input::generate(readings_per_station);
    let request = input.request();
    let strategy = create_strategy(
        StrategyType::Async,
        EngineConfig::default(),
        Some(BatchConfig::default()),
    );

    bencher.bench_local(|| {
        let mut output = Vec::new();
        strategy
            .process(&request, &mut output)
            .expect("Processing failed");
        output
    });
}
