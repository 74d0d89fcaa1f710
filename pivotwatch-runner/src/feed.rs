//! CSV sample logs and the market data sources built on them.
//!
//! A sample log is a two-column CSV, `timestamp,price`, with RFC 3339 UTC
//! timestamps. Prices are parsed as decimals straight from the text.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pivotwatch_core::domain::{PriceSample, SessionKind, SessionOhlc};
use pivotwatch_core::schedule::session_window;
use pivotwatch_core::SessionHours;

use crate::provider::{DataError, MarketData};

#[derive(Debug, Serialize, Deserialize)]
struct SampleRow {
    timestamp: DateTime<Utc>,
    price: String,
}

/// In-memory, time-ordered price log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleLog {
    samples: Vec<PriceSample>,
}

impl SampleLog {
    /// Sorts by timestamp; equal timestamps keep their input order.
    pub fn from_samples(mut samples: Vec<PriceSample>) -> Self {
        samples.sort_by_key(|s| s.timestamp);
        Self { samples }
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, DataError> {
        let mut csv = csv::Reader::from_reader(reader);
        let mut samples = Vec::new();
        for (i, row) in csv.deserialize::<SampleRow>().enumerate() {
            let row = row.map_err(|e| DataError::Malformed(format!("row {}: {e}", i + 1)))?;
            let price = Decimal::from_str(row.price.trim())
                .map_err(|e| DataError::Malformed(format!("row {}: price '{}': {e}", i + 1, row.price)))?;
            samples.push(PriceSample::new(row.timestamp, price));
        }
        Ok(Self::from_samples(samples))
    }

    pub fn read_csv(path: &Path) -> Result<Self, DataError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(io::BufReader::new(file))
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), DataError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer =
            csv::Writer::from_path(path).map_err(|e| DataError::Malformed(e.to_string()))?;
        for s in &self.samples {
            writer
                .serialize(SampleRow {
                    timestamp: s.timestamp,
                    price: s.price.to_string(),
                })
                .map_err(|e| DataError::Malformed(e.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn samples(&self) -> &[PriceSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.first().map(|s| s.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.last().map(|s| s.timestamp)
    }

    /// Samples with `since < ts <= until`.
    pub fn between(&self, since: Option<DateTime<Utc>>, until: DateTime<Utc>) -> Vec<PriceSample> {
        self.samples
            .iter()
            .filter(|s| since.map_or(true, |t| s.timestamp > t) && s.timestamp <= until)
            .copied()
            .collect()
    }

    /// High, low and last price over `[start, end)`.
    pub fn ohlc(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<SessionOhlc> {
        let mut window = self
            .samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp < end);
        let first = window.next()?;
        let (high, low, close) = window.fold(
            (first.price, first.price, first.price),
            |(h, l, _), s| (h.max(s.price), l.min(s.price), s.price),
        );
        Some(SessionOhlc::new(high, low, close))
    }
}

/// A CSV file another process appends to. Re-read on every call.
#[derive(Debug, Clone)]
pub struct CsvMarketData {
    path: PathBuf,
    hours: SessionHours,
}

impl CsvMarketData {
    pub fn new(path: PathBuf, hours: SessionHours) -> Self {
        Self { path, hours }
    }

    async fn load(&self) -> Result<SampleLog, DataError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| DataError::Unavailable(format!("{}: {e}", self.path.display())))?;
        SampleLog::from_reader(bytes.as_slice())
    }
}

#[async_trait]
impl MarketData for CsvMarketData {
    async fn recent_samples(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PriceSample>, DataError> {
        let log = self.load().await?;
        Ok(log.between(since, DateTime::<Utc>::MAX_UTC))
    }

    async fn session_ohlc(
        &self,
        session: SessionKind,
        date: NaiveDate,
    ) -> Result<SessionOhlc, DataError> {
        let (start, end) = session_window(session, date, &self.hours);
        self.load()
            .await?
            .ohlc(start, end)
            .ok_or(DataError::NoSessionData { session, date })
    }
}

/// A recorded log served up to a movable horizon, for replays.
///
/// Nothing after the horizon is visible, and a session's OHLC only becomes
/// available once its window has closed.
#[derive(Debug)]
pub struct ReplayMarketData {
    log: SampleLog,
    hours: SessionHours,
    horizon_ms: AtomicI64,
    overrides: BTreeMap<(SessionKind, NaiveDate), SessionOhlc>,
}

impl ReplayMarketData {
    pub fn new(log: SampleLog, hours: SessionHours) -> Self {
        Self {
            log,
            hours,
            horizon_ms: AtomicI64::new(i64::MIN),
            overrides: BTreeMap::new(),
        }
    }

    /// Serve `ohlc` for `session` on `date` instead of aggregating the log.
    pub fn with_session(mut self, session: SessionKind, date: NaiveDate, ohlc: SessionOhlc) -> Self {
        self.overrides.insert((session, date), ohlc);
        self
    }

    pub fn log(&self) -> &SampleLog {
        &self.log
    }

    pub fn set_horizon(&self, now: DateTime<Utc>) {
        self.horizon_ms.store(now.timestamp_millis(), Ordering::SeqCst);
    }

    fn horizon(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.horizon_ms.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl MarketData for ReplayMarketData {
    async fn recent_samples(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PriceSample>, DataError> {
        let Some(horizon) = self.horizon() else {
            return Ok(Vec::new());
        };
        Ok(self.log.between(since, horizon))
    }

    async fn session_ohlc(
        &self,
        session: SessionKind,
        date: NaiveDate,
    ) -> Result<SessionOhlc, DataError> {
        if let Some(ohlc) = self.overrides.get(&(session, date)) {
            return Ok(*ohlc);
        }
        let (start, end) = session_window(session, date, &self.hours);
        match self.horizon() {
            Some(horizon) if horizon >= end => {}
            _ => {
                return Err(DataError::Unavailable(format!(
                    "{session} session for {date} has not closed yet"
                )))
            }
        }
        self.log
            .ohlc(start, end)
            .ok_or(DataError::NoSessionData { session, date })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    const CSV: &str = "timestamp,price\n\
        2024-03-06T00:00:00Z,2030.10\n\
        2024-03-06T01:00:00Z,2044.90\n\
        2024-03-06T02:00:00Z,2025.00\n\
        2024-03-06T03:59:00Z,2031.55\n\
        2024-03-06T04:00:00Z,2090.00\n";

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, h, m, 0).unwrap()
    }

    #[test]
    fn parses_decimal_prices_exactly() {
        let log = SampleLog::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(log.len(), 5);
        assert_eq!(log.samples()[0].price, dec!(2030.10));
        assert_eq!(log.samples()[3].price, dec!(2031.55));
    }

    #[test]
    fn malformed_price_names_the_row() {
        let err = SampleLog::from_reader("timestamp,price\n2024-03-06T00:00:00Z,abc\n".as_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn ohlc_covers_half_open_window() {
        let log = SampleLog::from_reader(CSV.as_bytes()).unwrap();
        let ohlc = log.ohlc(at(0, 0), at(4, 0)).unwrap();
        assert_eq!(ohlc, SessionOhlc::new(dec!(2044.90), dec!(2025.00), dec!(2031.55)));
        assert!(log.ohlc(at(5, 0), at(6, 0)).is_none());
    }

    #[test]
    fn between_is_exclusive_then_inclusive() {
        let log = SampleLog::from_reader(CSV.as_bytes()).unwrap();
        let got = log.between(Some(at(1, 0)), at(3, 59));
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].timestamp, at(2, 0));
    }

    #[test]
    fn csv_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/samples.csv");
        let log = SampleLog::from_reader(CSV.as_bytes()).unwrap();
        log.write_csv(&path).unwrap();
        assert_eq!(SampleLog::read_csv(&path).unwrap(), log);
    }

    #[tokio::test]
    async fn replay_source_hides_the_future() {
        let log = SampleLog::from_reader(CSV.as_bytes()).unwrap();
        let source = ReplayMarketData::new(log, SessionHours::default());
        assert!(source.recent_samples(None).await.unwrap().is_empty());

        source.set_horizon(at(2, 0));
        assert_eq!(source.recent_samples(None).await.unwrap().len(), 3);
        assert!(matches!(
            source.session_ohlc(SessionKind::Asia, at(0, 0).date_naive()).await,
            Err(DataError::Unavailable(_))
        ));

        source.set_horizon(at(4, 0) + Duration::minutes(3));
        let ohlc = source.session_ohlc(SessionKind::Asia, at(0, 0).date_naive()).await.unwrap();
        assert_eq!(ohlc.high, dec!(2044.90));
    }

    #[tokio::test]
    async fn overrides_take_precedence() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let seed = SessionOhlc::new(dec!(2050), dec!(2020), dec!(2040));
        let source = ReplayMarketData::new(SampleLog::default(), SessionHours::default())
            .with_session(SessionKind::Classic, date, seed);
        assert_eq!(source.session_ohlc(SessionKind::Classic, date).await.unwrap(), seed);
    }

    proptest::proptest! {
        #[test]
        fn ohlc_brackets_the_close(cents in proptest::collection::vec(190_000i64..210_000, 1..60)) {
            let samples = cents
                .iter()
                .enumerate()
                .map(|(i, c)| PriceSample::new(at(0, 0) + Duration::minutes(i as i64), Decimal::new(*c, 2)))
                .collect();
            let log = SampleLog::from_samples(samples);
            let ohlc = log.ohlc(at(0, 0), at(4, 0)).unwrap();
            proptest::prop_assert!(ohlc.low <= ohlc.close && ohlc.close <= ohlc.high);
            proptest::prop_assert_eq!(ohlc.close, Decimal::new(*cents.last().unwrap(), 2));
        }

        #[test]
        fn between_splits_without_overlap(n in 1usize..50, cut in 0i64..60) {
            let samples = (0..n)
                .map(|i| PriceSample::new(at(0, 0) + Duration::minutes(i as i64), dec!(2000)))
                .collect();
            let log = SampleLog::from_samples(samples);
            let split = at(0, 0) + Duration::minutes(cut);
            let end = at(23, 0);
            let first = log.between(None, split);
            let rest = log.between(Some(split), end);
            proptest::prop_assert_eq!(first.len() + rest.len(), n);
        }
    }

    #[tokio::test]
    async fn csv_source_reads_appended_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.csv");
        std::fs::write(&path, CSV).unwrap();
        let source = CsvMarketData::new(path.clone(), SessionHours::default());
        assert_eq!(source.recent_samples(Some(at(3, 0))).await.unwrap().len(), 2);

        let missing = CsvMarketData::new(dir.path().join("nope.csv"), SessionHours::default());
        assert!(matches!(missing.recent_samples(None).await, Err(DataError::Unavailable(_))));
    }
}
