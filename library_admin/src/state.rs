use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Local, NaiveDate};

use library_ledger::fines::FinePolicy;
use library_records::backend::{InMemoryLibraryBackend, LibraryBackend};
use library_records::circulation::Circulation;
use library_records::client::LibraryRestClient;
use library_records::fines_cache::LocalFinesCache;
use library_records::records::LibraryRecords;

use crate::settings::{AdminCredentials, Settings};

/// Everything the handlers share
pub struct ConsoleState {
    pub records: LibraryRecords,
    pub circulation: Circulation,
    pub fines_cache: LocalFinesCache,
    pub fine_policy: FinePolicy,
    pub admin: AdminCredentials,
    pub loan_period_days: i64,
    fixed_today: Option<NaiveDate>,
}

impl ConsoleState {
    pub fn new(
        backend: Arc<dyn LibraryBackend>,
        fines_cache: LocalFinesCache,
        settings: &Settings,
    ) -> Self {
        let records = LibraryRecords::new(backend);
        Self {
            circulation: Circulation::new(records.clone(), settings.fines),
            records,
            fines_cache,
            fine_policy: settings.fines,
            admin: settings.admin.clone(),
            loan_period_days: settings.loan_period_days,
            fixed_today: None,
        }
    }

    /// Picks the backend and opens the fines cache configured in `settings`
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let backend: Arc<dyn LibraryBackend> = if settings.use_in_memory_backend {
            tracing::info!("Using in-memory backend");
            Arc::new(InMemoryLibraryBackend::default())
        } else {
            tracing::info!("Using REST backend at {}", settings.backend_url);
            Arc::new(LibraryRestClient::with_read_retries(
                &settings.backend_url,
                settings.read_retries,
            )?)
        };
        let fines_cache = LocalFinesCache::open(&settings.fines_cache_path)
            .context("Failed to open fines cache")?;
        Ok(Self::new(backend, fines_cache, settings))
    }

    /// Pins the date used for fines and default loan dates
    pub fn with_today(self, today: NaiveDate) -> Self {
        Self {
            fixed_today: Some(today),
            ..self
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.fixed_today
            .unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn due_date_from(&self, start_date: NaiveDate) -> NaiveDate {
        start_date + Duration::days(self.loan_period_days)
    }
}
