//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod fixture_portal;
pub mod socket_guard;

use causelist_core::config::{LimitsConfig, RetryConfig, TimeoutConfig};
use causelist_core::{
    CaseType, CourtSelection, DateRange, EngineConfig, Query, RetrievalOrchestrator,
};
use chrono::NaiveDate;

use fixture_portal::{FixturePortal, fixture_layout};

/// Date the orchestrator treats as today.
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
}

/// Cause-list date used by most tests.
pub fn list_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

/// Fast config for the fixture portal at `search_url`.
pub fn test_config(search_url: &str) -> EngineConfig {
    EngineConfig {
        portal: fixture_layout(search_url),
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
        limits: LimitsConfig {
            max_sessions: 2,
            download_workers: 2,
            min_document_bytes: 16,
            max_pages: 50,
            rate_limit_ms: 0,
        },
        timeouts: TimeoutConfig {
            command_ms: 1_000,
            ready_ms: 200,
            http_connect_secs: 5,
            http_read_secs: 10,
        },
        ..EngineConfig::default()
    }
}

/// Orchestrator over `portal` with `config`, today pinned.
pub fn orchestrator(portal: &FixturePortal, config: &EngineConfig) -> RetrievalOrchestrator {
    RetrievalOrchestrator::new(config, portal.driver())
        .unwrap()
        .with_today(today())
}

/// Civil list of one court on [`list_date`].
pub fn civil_query(court: &str) -> Query {
    Query::new(
        CourtSelection::Named(court.to_string()),
        DateRange::single(list_date()),
    )
    .with_case_type(Some(CaseType::Civil))
}

