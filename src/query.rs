//! Search parameters for one retrieval job.
//!
//! A [`Query`] names a court (or every court of a complex), a date or date
//! range, an optional case type and an optional court location. It is
//! immutable once built and is validated against the portal's supported
//! [`DateWindow`] before any browser work starts. The orchestrator expands
//! it into concrete [`Search`]es, one per court, day and case type.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Date formats accepted on input, tried in order.
const ACCEPTED_DATE_FORMATS: [&str; 2] = ["%d-%m-%Y", "%Y-%m-%d"];

/// Errors raised while parsing or validating a query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The court name is empty.
    #[error("court name must not be empty")]
    EmptyCourt,

    /// Neither or both of a court name and "all courts" were given.
    #[error("give either a court name or all courts, not both or neither")]
    AmbiguousCourt,

    /// Neither a date nor a complete range was given.
    #[error("a date, or both ends of a date range, is required")]
    MissingDate,

    /// A date could not be parsed.
    #[error("invalid date '{input}': expected DD-MM-YYYY or YYYY-MM-DD")]
    InvalidDate {
        /// The rejected input
        input: String,
    },

    /// Unknown case type label.
    #[error("unknown case type '{input}': expected civil or criminal")]
    UnknownCaseType {
        /// The rejected input
        input: String,
    },

    /// The range ends before it starts.
    #[error("date range is inverted: {start} is after {end}")]
    InvertedRange {
        /// Range start
        start: NaiveDate,
        /// Range end
        end: NaiveDate,
    },

    /// A date predates the portal's archive.
    #[error("{date} is before the earliest supported date {earliest}")]
    TooEarly {
        /// Offending date
        date: NaiveDate,
        /// Earliest date the portal serves
        earliest: NaiveDate,
    },

    /// A date is too far in the future.
    #[error("{date} is after the latest supported date {latest}")]
    TooFarAhead {
        /// Offending date
        date: NaiveDate,
        /// Latest date the portal serves
        latest: NaiveDate,
    },

    /// The range covers more days than allowed.
    #[error("date range spans {days} days, maximum is {max}")]
    RangeTooLong {
        /// Days in the requested range
        days: i64,
        /// Configured maximum
        max: u32,
    },
}

/// Case category offered by the cause-list form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseType {
    /// Civil cause list.
    Civil,
    /// Criminal cause list.
    Criminal,
}

impl CaseType {
    /// Both case types, in the order the portal lists them.
    pub const ALL: [CaseType; 2] = [CaseType::Civil, CaseType::Criminal];

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Civil => "Civil",
            Self::Criminal => "Criminal",
        }
    }

    /// Lowercase name, as serialized.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Civil => "civil",
            Self::Criminal => "criminal",
        }
    }
}

impl fmt::Display for CaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CaseType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "civil" => Ok(Self::Civil),
            "criminal" => Ok(Self::Criminal),
            _ => Err(QueryError::UnknownCaseType {
                input: s.to_string(),
            }),
        }
    }
}

/// Which court(s) to search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "name")]
pub enum CourtSelection {
    /// One court, matched against the court drop-down label.
    Named(String),
    /// Every court offered for the selected location.
    All,
}

impl fmt::Display for CourtSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::All => f.write_str("all courts"),
        }
    }
}

/// Position of the court in the portal's location hierarchy.
///
/// Each level is optional; an absent level leaves the drop-down untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourtLocation {
    /// State label.
    #[serde(default)]
    pub state: Option<String>,
    /// District label.
    #[serde(default)]
    pub district: Option<String>,
    /// Court complex label.
    #[serde(default)]
    pub complex: Option<String>,
}

impl CourtLocation {
    /// Returns `(level, label)` pairs for the levels that are set, outermost first.
    #[must_use]
    pub fn levels(&self) -> Vec<(LocationLevel, &str)> {
        [
            (LocationLevel::State, self.state.as_deref()),
            (LocationLevel::District, self.district.as_deref()),
            (LocationLevel::Complex, self.complex.as_deref()),
        ]
        .into_iter()
        .filter_map(|(level, label)| {
            label
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| (level, l))
        })
        .collect()
    }
}

/// One level of the location hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationLevel {
    /// State drop-down.
    State,
    /// District drop-down.
    District,
    /// Court complex drop-down.
    Complex,
}

impl fmt::Display for LocationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::State => "state",
            Self::District => "district",
            Self::Complex => "court complex",
        })
    }
}

/// Inclusive range of cause-list dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// A range of one day.
    #[must_use]
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// A range from `start` to `end` inclusive. Ordering is checked by [`Query::validate`].
    #[must_use]
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// First day.
    #[must_use]
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day.
    #[must_use]
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days covered (zero for an inverted range).
    #[must_use]
    pub fn span_days(&self) -> i64 {
        ((self.end - self.start).num_days() + 1).max(0)
    }

    /// Iterates the days of the range in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |day| *day <= self.end)
    }
}

/// Dates the portal can serve, relative to today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    /// Earliest date with published cause lists.
    #[serde(default = "default_earliest")]
    pub earliest: NaiveDate,
    /// How many days past today a list may be requested.
    #[serde(default = "default_max_days_ahead")]
    pub max_days_ahead: u32,
    /// Maximum number of days in one query.
    #[serde(default = "default_max_range_days")]
    pub max_range_days: u32,
}

fn default_earliest() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn default_max_days_ahead() -> u32 {
    30
}

fn default_max_range_days() -> u32 {
    31
}

impl Default for DateWindow {
    fn default() -> Self {
        Self {
            earliest: default_earliest(),
            max_days_ahead: default_max_days_ahead(),
            max_range_days: default_max_range_days(),
        }
    }
}

/// Parameters of one retrieval job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    court: CourtSelection,
    dates: DateRange,
    #[serde(default)]
    case_type: Option<CaseType>,
    #[serde(default)]
    location: CourtLocation,
}

impl Query {
    /// Creates a query for a court over a date range.
    #[must_use]
    pub fn new(court: CourtSelection, dates: DateRange) -> Self {
        Self {
            court,
            dates,
            case_type: None,
            location: CourtLocation::default(),
        }
    }

    /// Restricts the query to one case type.
    #[must_use]
    pub fn with_case_type(mut self, case_type: Option<CaseType>) -> Self {
        self.case_type = case_type;
        self
    }

    /// Sets the court location.
    #[must_use]
    pub fn with_location(mut self, location: CourtLocation) -> Self {
        self.location = location;
        self
    }

    /// Court selection.
    #[must_use]
    pub fn court(&self) -> &CourtSelection {
        &self.court
    }

    /// Date range.
    #[must_use]
    pub fn dates(&self) -> DateRange {
        self.dates
    }

    /// Case type filter, if any.
    #[must_use]
    pub fn case_type(&self) -> Option<CaseType> {
        self.case_type
    }

    /// Court location.
    #[must_use]
    pub fn location(&self) -> &CourtLocation {
        &self.location
    }

    /// Checks the query against the portal's date window.
    ///
    /// `today` is injected so validation is deterministic.
    ///
    /// # Errors
    ///
    /// Returns the first [`QueryError`] found.
    pub fn validate(&self, window: &DateWindow, today: NaiveDate) -> Result<(), QueryError> {
        if matches!(&self.court, CourtSelection::Named(name) if name.trim().is_empty()) {
            return Err(QueryError::EmptyCourt);
        }

        let DateRange { start, end } = self.dates;
        if start > end {
            return Err(QueryError::InvertedRange { start, end });
        }
        if start < window.earliest {
            return Err(QueryError::TooEarly {
                date: start,
                earliest: window.earliest,
            });
        }
        let latest = today + ChronoDuration::days(i64::from(window.max_days_ahead));
        if end > latest {
            return Err(QueryError::TooFarAhead { date: end, latest });
        }
        let days = self.dates.span_days();
        if days > i64::from(window.max_range_days) {
            return Err(QueryError::RangeTooLong {
                days,
                max: window.max_range_days,
            });
        }
        Ok(())
    }

    /// Expands the query into concrete searches for the given court labels.
    ///
    /// Order: court, then day, then case type. Without a case-type filter
    /// both lists are searched.
    #[must_use]
    pub fn searches(&self, courts: &[String]) -> Vec<Search> {
        let case_types: Vec<CaseType> = match self.case_type {
            Some(case_type) => vec![case_type],
            None => CaseType::ALL.to_vec(),
        };

        let mut searches = Vec::new();
        for court in courts {
            for date in self.dates.days() {
                for case_type in &case_types {
                    searches.push(Search {
                        court: court.clone(),
                        date,
                        case_type: *case_type,
                        location: self.location.clone(),
                    });
                }
            }
        }
        searches
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.court)?;
        if self.dates.start == self.dates.end {
            write!(f, " on {}", self.dates.start)?;
        } else {
            write!(f, " from {} to {}", self.dates.start, self.dates.end)?;
        }
        if let Some(case_type) = self.case_type {
            write!(f, " ({case_type})")?;
        }
        Ok(())
    }
}

/// One form submission: a single court, day and case type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Search {
    /// Court drop-down label.
    pub court: String,
    /// Cause-list date.
    pub date: NaiveDate,
    /// Case type button to press.
    pub case_type: CaseType,
    /// Location drop-downs to set first.
    pub location: CourtLocation,
}

/// Loosely typed query parameters, as accepted from the command line or a JSON body.
///
/// Dates are strings in either accepted format; [`QueryRequest::into_query`]
/// does the parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    /// Court drop-down label.
    pub court: Option<String>,
    /// Search every court offered for the location.
    pub all_courts: bool,
    /// Single cause-list date.
    pub date: Option<String>,
    /// Range start.
    pub from: Option<String>,
    /// Range end.
    pub to: Option<String>,
    /// `civil` or `criminal`; both when absent.
    pub case_type: Option<String>,
    /// State drop-down label.
    pub state: Option<String>,
    /// District drop-down label.
    pub district: Option<String>,
    /// Court complex drop-down label.
    pub complex: Option<String>,
}

impl QueryRequest {
    /// Parses the parameters into a [`Query`]. Window checks are left to [`Query::validate`].
    ///
    /// # Errors
    ///
    /// [`QueryError`] for a missing or ambiguous court, missing or unparseable
    /// dates and unknown case types.
    pub fn into_query(self) -> Result<Query, QueryError> {
        let court = match (self.court, self.all_courts) {
            (Some(name), false) => CourtSelection::Named(name),
            (None, true) => CourtSelection::All,
            _ => return Err(QueryError::AmbiguousCourt),
        };

        let dates = match (self.date, self.from, self.to) {
            (Some(date), None, None) => DateRange::single(parse_date(&date)?),
            (None, Some(from), Some(to)) => DateRange::new(parse_date(&from)?, parse_date(&to)?),
            _ => return Err(QueryError::MissingDate),
        };

        let case_type = self
            .case_type
            .as_deref()
            .map(str::parse::<CaseType>)
            .transpose()?;

        Ok(Query::new(court, dates)
            .with_case_type(case_type)
            .with_location(CourtLocation {
                state: self.state,
                district: self.district,
                complex: self.complex,
            }))
    }
}

/// Parses a date in `DD-MM-YYYY` or `YYYY-MM-DD` form.
///
/// # Errors
///
/// Returns [`QueryError::InvalidDate`] if neither format matches.
pub fn parse_date(input: &str) -> Result<NaiveDate, QueryError> {
    let trimmed = input.trim();
    ACCEPTED_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| QueryError::InvalidDate {
            input: input.to_string(),
        })
}
