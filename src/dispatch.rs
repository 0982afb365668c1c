//! Runs one analysis end to end.
//!
//! The dispatcher picks the extraction, bucketing, and assembly steps for
//! a request and drives the aggregation rounds in a fixed order. For a
//! given request every party runs the exact same sequence of rounds.

use crate::aggregate::{Round, SecureAggregator};
use crate::bucket;
use crate::error::{Error, Result};
use crate::extract::{self, DataSource, RawTable};
use crate::models::{AnalysisKind, AnalysisRequest, CountSeries, Histogram, Report};
use crate::observer::{Event, ProgressObserver};
use crate::report::{self, ReportHeader};
use chrono::Utc;
use tracing::{debug, info, warn};

/// Per-run parameters shared by every analysis kind.
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub k_threshold: u32,
    /// Year ages are computed against.
    pub reference_year: i32,
    /// Number of parties in the roster, for report metadata.
    pub parties: usize,
}

/// What a run produced.
#[derive(Debug)]
pub enum Outcome {
    Report(Report),
    /// The kind only extracts data so far; the extracted table is attached.
    Unimplemented { kind: AnalysisKind, table: RawTable },
}

impl Outcome {
    pub fn into_report(self) -> Result<Report> {
        match self {
            Outcome::Report(report) => Ok(report),
            Outcome::Unimplemented { kind, .. } => Err(Error::NotImplemented(kind.name())),
        }
    }
}

pub struct Dispatcher<S, A, O> {
    source: S,
    aggregator: A,
    observer: O,
    settings: RunSettings,
}

impl<S, A, O> Dispatcher<S, A, O>
where
    S: DataSource,
    A: SecureAggregator,
    O: ProgressObserver,
{
    pub fn new(source: S, aggregator: A, observer: O, settings: RunSettings) -> Self {
        Self {
            source,
            aggregator,
            observer,
            settings,
        }
    }

    /// Runs `request` and returns its report, or the raw table for kinds
    /// that are not implemented past extraction.
    pub async fn route(&mut self, request: &AnalysisRequest) -> Result<Outcome> {
        let kind = request.kind();
        info!("Running {} analysis", kind);
        self.observer.on_event(Event::Fetching { kind });

        match request {
            AnalysisRequest::AgePyramid { diagnosis } => {
                let table = extract::fetch_age_table(&self.source, diagnosis, self.settings.reference_year).await?;
                self.observer.on_event(Event::Fetched {
                    rows: table.records.len() + table.skipped,
                    skipped: table.skipped,
                });

                let title = format!(
                    "Age pyramid for diagnosis {} across {} parties",
                    diagnosis, self.settings.parties
                );
                let report = self.aggregate(kind, title, bucket::age_pyramid(&table)).await?;
                Ok(Outcome::Report(report))
            }
            AnalysisRequest::TimeSeries {
                variant,
                start,
                end,
            } => {
                let table = extract::fetch_event_table(&self.source, *variant).await?;
                self.observer.on_event(Event::Fetched {
                    rows: table.events.len() + table.skipped,
                    skipped: table.skipped,
                });

                let title = format!(
                    "Time series ({}) {} to {} across {} parties",
                    variant, start, end, self.settings.parties
                );
                let report = self.aggregate(kind, title, bucket::monthly(&table, *start, *end)).await?;
                Ok(Outcome::Report(report))
            }
            AnalysisRequest::DiagnosisCoincidence => {
                let table = extract::fetch_coincidence_table(&self.source).await?;
                self.observer.on_event(Event::Fetched {
                    rows: table.len(),
                    skipped: 0,
                });
                if table.is_empty() {
                    warn!("No complete rows in the {} extraction", kind);
                }
                warn!("{} analysis is not implemented yet, returning the extracted table", kind);
                Ok(Outcome::Unimplemented { kind, table })
            }
        }
    }

    /// One aggregation round per series, in histogram order, then assembly.
    async fn aggregate(&mut self, kind: AnalysisKind, title: String, histogram: Histogram) -> Result<Report> {
        let total = histogram.series.len();
        self.observer.on_event(Event::Bucketized {
            buckets: histogram.labels.len(),
            series: total,
        });
        debug!("Local totals before aggregation: {}", histogram.total());

        let mut aggregated = Vec::with_capacity(total);
        for (index, series) in histogram.series.iter().enumerate() {
            self.observer.on_event(Event::RoundStarted {
                name: &series.name,
                index,
                total,
                parties: self.settings.parties,
            });

            let round = Round {
                name: &series.name,
                labels: &histogram.labels,
                counts: &series.counts,
                k_threshold: self.settings.k_threshold,
            };
            let sums = self.aggregator.aggregate(&round).await?;
            if sums.len() != histogram.labels.len() {
                return Err(Error::LengthMismatch {
                    expected: histogram.labels.len(),
                    actual: sums.len(),
                });
            }

            self.observer.on_event(Event::RoundFinished { name: &series.name });
            aggregated.push(CountSeries::new(series.name.clone(), sums));
        }

        let header = ReportHeader {
            title,
            kind,
            label_header: histogram.label_header.to_string(),
            suppression_threshold: self.settings.k_threshold,
            parties: self.settings.parties,
            generated_at: Utc::now(),
        };
        let report = report::combine(header, histogram.labels, aggregated);
        self.observer.on_event(Event::Assembled);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{add_wrapping, suppress, AggregationSettings, TcpAggregator};
    use crate::extract::QueryDescriptor;
    use crate::models::{TimeSeriesVariant, YearMonth};
    use crate::observer::testing::RecordingObserver;
    use crate::observer::SilentObserver;
    use crate::topology::Topology;
    use std::time::Duration;

    /// Answers every query with the same CSV body.
    struct CannedSource {
        body: String,
    }

    impl CannedSource {
        fn new(body: &str) -> Self {
            Self {
                body: body.to_string(),
            }
        }
    }

    impl DataSource for CannedSource {
        async fn fetch(&self, query: &QueryDescriptor) -> Result<RawTable> {
            let table = RawTable::from_csv(&self.body)?;
            table.require_columns(query.required_columns)?;
            Ok(table)
        }
    }

    /// Plays a single peer whose vector for round `i` is `peer[i]`.
    struct PeerSum {
        peer: Vec<Vec<u32>>,
        submitted: Vec<(String, Vec<u32>)>,
    }

    impl PeerSum {
        fn new(peer: Vec<Vec<u32>>) -> Self {
            Self {
                peer,
                submitted: Vec::new(),
            }
        }
    }

    impl SecureAggregator for PeerSum {
        async fn aggregate(&mut self, round: &Round<'_>) -> Result<Vec<u32>> {
            round.check_shape()?;
            let mut sums = round.counts.to_vec();
            add_wrapping(&mut sums, &self.peer[self.submitted.len()]);
            suppress(&mut sums, round.k_threshold);
            self.submitted.push((round.name.to_string(), round.counts.to_vec()));
            Ok(sums)
        }
    }

    /// Returns a vector one bucket short.
    struct Truncating;

    impl SecureAggregator for Truncating {
        async fn aggregate(&mut self, round: &Round<'_>) -> Result<Vec<u32>> {
            Ok(round.counts[1..].to_vec())
        }
    }

    fn settings(k_threshold: u32) -> RunSettings {
        RunSettings {
            k_threshold,
            reference_year: 2024,
            parties: 2,
        }
    }

    /// Twelve patients aged 5, 15, 15, 25, 35, 45 (male) and
    /// 55, 65, 75, 85, 95, 5 (female) in 2024.
    const AGE_CSV: &str = "id,gender,birthDate\n\
        p1,male,2019\np2,male,2009\np3,male,2009\np4,male,1999\np5,male,1989\np6,male,1979\n\
        p7,female,1969\np8,female,1959\np9,other,1949\np10,female,1939\np11,,1929\np12,female,2019\n";

    const EVENT_CSV: &str = "condition_id,recordedDate\n\
        c1,2020-12-31\nc2,2021-01-05\nc3,2021-02-10T08:00:00+01:00\nc4,2021-03-31\nc5,2021-04-01\nc6,\n";

    fn age_pyramid() -> AnalysisRequest {
        AnalysisRequest::AgePyramid {
            diagnosis: "I11.00".to_string(),
        }
    }

    fn first_quarter() -> AnalysisRequest {
        AnalysisRequest::time_series(
            TimeSeriesVariant::Covid19,
            "2021-01".parse().unwrap(),
            "2021-03".parse::<YearMonth>().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_age_pyramid_runs_male_then_female() {
        let aggregator = PeerSum::new(vec![vec![10; 10], vec![0; 10]]);
        let mut dispatcher = Dispatcher::new(
            CannedSource::new(AGE_CSV),
            aggregator,
            RecordingObserver::default(),
            settings(5),
        );

        let report = dispatcher.route(&age_pyramid()).await.unwrap().into_report().unwrap();

        let submitted = &dispatcher.aggregator.submitted;
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].0, "male");
        assert_eq!(submitted[1].0, "female");
        assert_eq!(submitted[0].1, vec![1, 2, 1, 1, 1, 0, 0, 0, 0, 0]);
        assert_eq!(submitted[1].1, vec![1, 0, 0, 0, 0, 1, 1, 1, 1, 1]);
        let local_total: u32 = submitted.iter().flat_map(|(_, counts)| counts).sum();
        assert_eq!(local_total, 12);

        assert_eq!(report.title, "Age pyramid for diagnosis I11.00 across 2 parties");
        assert_eq!(report.labels.len(), 10);
        assert_eq!(report.labels[0], "[0, 10]");
        assert_eq!(report.labels[9], "(90, inf)");
        assert_eq!(report.count("male", "(10, 20]"), Some(12));
        assert_eq!(report.count("male", "(50, 60]"), Some(10));
        // every female sum is at most 1 and therefore suppressed
        assert!(report.series[1].counts.iter().all(|&count| count == 0));
        assert_eq!(report.suppression_note(), "counts ≤ 5 suppressed");
    }

    #[tokio::test]
    async fn test_time_series_counts_first_quarter() {
        let aggregator = PeerSum::new(vec![vec![10, 0, 4]]);
        let mut dispatcher = Dispatcher::new(
            CannedSource::new(EVENT_CSV),
            aggregator,
            SilentObserver,
            settings(5),
        );

        let report = dispatcher.route(&first_quarter()).await.unwrap().into_report().unwrap();

        assert_eq!(dispatcher.aggregator.submitted[0].1, vec![1, 1, 1]);
        assert_eq!(report.labels, vec!["2021-01", "2021-02", "2021-03"]);
        assert_eq!(report.series[0].counts, vec![11, 0, 0]);
        assert_eq!(report.title, "Time series (covid-19) 2021-01 to 2021-03 across 2 parties");
    }

    #[tokio::test]
    async fn test_zero_threshold_keeps_small_sums() {
        let aggregator = PeerSum::new(vec![vec![0, 1, 0]]);
        let mut dispatcher = Dispatcher::new(
            CannedSource::new(EVENT_CSV),
            aggregator,
            SilentObserver,
            settings(0),
        );

        let report = dispatcher.route(&first_quarter()).await.unwrap().into_report().unwrap();

        assert_eq!(report.series[0].counts, vec![1, 2, 1]);
        assert_eq!(report.suppression_note(), "suppression disabled (k = 0)");
    }

    #[tokio::test]
    async fn test_diagnosis_coincidence_returns_table() {
        let csv = "id,subject,icd10,gender\nc1,p1,E84.0,female\nc2,p2,,female\nc3,p3,O30.0,female\n";
        let mut dispatcher = Dispatcher::new(
            CannedSource::new(csv),
            PeerSum::new(Vec::new()),
            SilentObserver,
            settings(5),
        );

        let outcome = dispatcher.route(&AnalysisRequest::DiagnosisCoincidence).await.unwrap();

        assert!(dispatcher.aggregator.submitted.is_empty());
        match &outcome {
            Outcome::Unimplemented { kind, table } => {
                assert_eq!(*kind, AnalysisKind::DiagnosisCoincidence);
                assert_eq!(table.len(), 2);
            }
            Outcome::Report(_) => panic!("diagnosis coincidence produced a report"),
        }
        assert!(matches!(outcome.into_report(), Err(Error::NotImplemented(_))));
    }

    #[tokio::test]
    async fn test_short_aggregate_is_length_mismatch() {
        let mut dispatcher = Dispatcher::new(
            CannedSource::new(EVENT_CSV),
            Truncating,
            SilentObserver,
            settings(5),
        );

        match dispatcher.route(&first_quarter()).await {
            Err(Error::LengthMismatch { expected, actual }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_column_aborts_before_aggregation() {
        let mut dispatcher = Dispatcher::new(
            CannedSource::new("id,gender\np1,male\n"),
            PeerSum::new(Vec::new()),
            SilentObserver,
            settings(5),
        );

        let err = dispatcher.route(&age_pyramid()).await.unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(dispatcher.aggregator.submitted.is_empty());
    }

    #[tokio::test]
    async fn test_observer_sees_every_stage() {
        let mut dispatcher = Dispatcher::new(
            CannedSource::new(EVENT_CSV),
            PeerSum::new(vec![vec![0, 0, 0]]),
            RecordingObserver::default(),
            settings(0),
        );

        dispatcher.route(&first_quarter()).await.unwrap();

        assert_eq!(
            dispatcher.observer.events,
            vec![
                "Fetching { kind: TimeSeries }",
                "Fetched { rows: 6, skipped: 1 }",
                "Bucketized { buckets: 3, series: 1 }",
                "RoundStarted { name: \"count\", index: 0, total: 1, parties: 2 }",
                "RoundFinished { name: \"count\" }",
                "Assembled",
            ]
        );
    }

    #[tokio::test]
    async fn test_two_parties_over_tcp() {
        let ports: Vec<u16> = (0..2)
            .map(|_| {
                std::net::TcpListener::bind("127.0.0.1:0")
                    .unwrap()
                    .local_addr()
                    .unwrap()
                    .port()
            })
            .collect();
        let roster = format!("1@127.0.0.1:{};2@127.0.0.1:{}", ports[0], ports[1]);
        let network = AggregationSettings {
            bind_host: "127.0.0.1".to_string(),
            connect_timeout: Duration::from_secs(10),
            round_timeout: Some(Duration::from_secs(10)),
            verify_labels: true,
            allow_clear_sums: true,
        };

        let party = |id: u32, csv: &str| {
            let topology = Topology::parse(&roster, id).unwrap();
            Dispatcher::new(
                CannedSource::new(csv),
                TcpAggregator::new(topology, network.clone()).unwrap(),
                SilentObserver,
                settings(0),
            )
        };
        let mut first = party(1, AGE_CSV);
        let mut second = party(2, AGE_CSV);

        let request = age_pyramid();
        let (a, b) = tokio::join!(first.route(&request), second.route(&request));
        let a = a.unwrap().into_report().unwrap();
        let b = b.unwrap().into_report().unwrap();

        assert_eq!(a.series, b.series);
        assert_eq!(a.series[0].counts, vec![2, 4, 2, 2, 2, 0, 0, 0, 0, 0]);
        assert_eq!(a.series[1].counts, vec![2, 0, 0, 0, 0, 2, 2, 2, 2, 2]);
    }
}
