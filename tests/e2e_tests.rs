//! End-to-end integration tests
//!
//! These tests run the complete reconciliation pipeline over predefined CSV
//! fixtures. Each fixture directory holds:
//! - readings.csv, tanks.csv and an optional tank_events.csv as input
//! - expected_records.csv, the records report of the period
//! - expected_inventory.csv, the tank levels after ingestion
//!
//! Fixtures cover a settled day with a refill, a meter rollback, two
//! tenants sharing files, and malformed rows that must be skipped.
//!
//! Each test is run twice: once with the synchronous strategy and once with
//! the async strategy.

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use fuel_reconciliation_engine::cli::{ReportKind, StrategyType};
    use fuel_reconciliation_engine::strategy::{create_strategy, BatchConfig, RunRequest};
    use fuel_reconciliation_engine::types::{EngineConfig, TenantContext};
    use rstest::rstest;
    use std::fs;
    use std::path::Path;

    /// Column holding the generated record id
    const RECORD_ID_COLUMN: usize = 13;

    fn request(fixture_dir: &Path, window_hours: i64, report: ReportKind) -> RunRequest {
        let events = fixture_dir.join("tank_events.csv");
        RunRequest {
            ctx: TenantContext::new("acme"),
            readings: fixture_dir.join("readings.csv"),
            tanks: fixture_dir.join("tanks.csv"),
            tank_events: events.exists().then_some(events),
            from: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
            window: Duration::hours(window_hours),
            report,
        }
    }

    fn run(request: &RunRequest, strategy_type: StrategyType) -> String {
        // small batches so the async strategy splits even tiny fixtures
        let strategy = create_strategy(
            strategy_type.clone(),
            EngineConfig::default(),
            Some(BatchConfig::new(2, 2)),
        );
        let mut output = Vec::new();
        strategy
            .process(request, &mut output)
            .unwrap_or_else(|e| panic!("Failed to process fixture ({:?}): {}", strategy_type, e));
        String::from_utf8(output).expect("Output is not UTF-8")
    }

    /// Record ids are random; blank them before comparing
    fn blank_record_ids(csv: &str) -> Vec<String> {
        csv.lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 0 {
                    return line.to_string();
                }
                let mut columns: Vec<&str> = line.split(',').collect();
                if let Some(id) = columns.get_mut(RECORD_ID_COLUMN) {
                    *id = "";
                }
                columns.join(",")
            })
            .collect()
    }

    fn read_expected(fixture_dir: &Path, name: &str) -> String {
        let path = fixture_dir.join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read expected file {}: {}", path.display(), e))
    }

    /// Run a fixture and compare the records and inventory reports
    fn run_test_fixture(fixture_name: &str, window_hours: i64, strategy_type: StrategyType) {
        let fixture_dir = Path::new("tests/fixtures").join(fixture_name);
        assert!(
            fixture_dir.join("readings.csv").exists(),
            "Fixture not found: {}",
            fixture_dir.display()
        );

        let records = run(
            &request(&fixture_dir, window_hours, ReportKind::Records),
            strategy_type.clone(),
        );
        let expected = read_expected(&fixture_dir, "expected_records.csv");
        assert_eq!(
            blank_record_ids(&records),
            blank_record_ids(&expected),
            "\n\nRecords mismatch for fixture: {} (strategy: {:?})\n\nActual output:\n{}\n\nExpected output:\n{}\n",
            fixture_name,
            strategy_type,
            records,
            expected
        );

        let inventory = run(
            &request(&fixture_dir, window_hours, ReportKind::Inventory),
            strategy_type.clone(),
        );
        let expected = read_expected(&fixture_dir, "expected_inventory.csv");
        assert_eq!(
            inventory.lines().collect::<Vec<_>>(),
            expected.lines().collect::<Vec<_>>(),
            "\n\nInventory mismatch for fixture: {} (strategy: {:?})\n",
            fixture_name,
            strategy_type
        );
    }

    /// End-to-end test for all fixtures with both processing strategies
    #[rstest]
    #[case("settled_day", 24)]
    #[case("meter_rollback", 12)]
    #[case("tenant_isolation", 24)]
    #[case("malformed_data", 24)]
    fn test_fixtures(
        #[case] fixture: &str,
        #[case] window_hours: i64,
        #[values(StrategyType::Sync, StrategyType::Async)] strategy: StrategyType,
    ) {
        run_test_fixture(fixture, window_hours, strategy);
    }

    #[rstest]
    fn test_summary_report(
        #[values(StrategyType::Sync, StrategyType::Async)] strategy: StrategyType,
    ) {
        let fixture_dir = Path::new("tests/fixtures/settled_day");
        let output = run(&request(fixture_dir, 24, ReportKind::Summary), strategy);

        let summary: serde_json::Value =
            serde_json::from_str(&output).expect("Summary is not valid JSON");
        assert_eq!(summary["tenant_id"], "acme");
        assert_eq!(summary["counts"]["ok"], 0);
        assert_eq!(summary["counts"]["warn"], 1);
        assert_eq!(summary["counts"]["critical"], 0);
        assert_eq!(summary["range"]["from"], "2024-03-01");
        assert_eq!(summary["range"]["to"], "2024-03-01");
        assert_eq!(summary["top"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_station_scope_excludes_other_stations() {
        let fixture_dir = Path::new("tests/fixtures/tenant_isolation");
        let mut request = request(fixture_dir, 24, ReportKind::Records);
        request.ctx = TenantContext::resolve(Some("acme"), Some("s2")).unwrap();

        let output = run(&request, StrategyType::Sync);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2, "{}", output);
        assert!(lines[1].starts_with("acme,s2,premium,"), "{}", output);
    }
}
