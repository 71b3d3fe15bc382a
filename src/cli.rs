//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use causelist_core::QueryRequest;

/// Retrieve court cause lists from a court portal.
///
/// Drives a browser through the portal's cause-list search for a court (or
/// every court of a complex) and a date or date range, and saves every
/// listed document under the output directory.
#[derive(Parser, Debug)]
#[command(name = "causelist")]
#[command(author, version, about)]
#[command(group(ArgGroup::new("court_choice").required(true).args(["court", "all"])))]
#[command(group(ArgGroup::new("date_choice").required(true).args(["date", "from"])))]
pub struct Args {
    /// Court drop-down label, e.g. "Principal District Judge"
    #[arg(long)]
    pub court: Option<String>,

    /// Search every court offered for the selected location
    #[arg(long)]
    pub all: bool,

    /// State drop-down label
    #[arg(long)]
    pub state: Option<String>,

    /// District drop-down label
    #[arg(long)]
    pub district: Option<String>,

    /// Court complex drop-down label
    #[arg(long)]
    pub complex: Option<String>,

    /// Cause-list date (DD-MM-YYYY or YYYY-MM-DD)
    #[arg(short, long)]
    pub date: Option<String>,

    /// First date of a range
    #[arg(long, requires = "to")]
    pub from: Option<String>,

    /// Last date of a range
    #[arg(long, requires = "from")]
    pub to: Option<String>,

    /// Case type: civil or criminal (both when omitted)
    #[arg(long = "case")]
    pub case_type: Option<String>,

    /// Directory documents are saved under
    #[arg(short, long, default_value = "causelists")]
    pub output: PathBuf,

    /// Config file (defaults to ~/.config/causelist/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum attempts for retryable failures (1-10), overrides config
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: Option<u32>,

    /// Concurrent document downloads (1-32), overrides config
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u64).range(1..=32))]
    pub workers: Option<u64>,

    /// Browser sessions (1-32), overrides config
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=32))]
    pub sessions: Option<u64>,

    /// WebDriver server URL, overrides config
    #[arg(long)]
    pub webdriver_url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,
}

impl Args {
    /// Query parameters given on the command line.
    #[must_use]
    pub fn query_request(&self) -> QueryRequest {
        QueryRequest {
            court: self.court.clone(),
            all_courts: self.all,
            date: self.date.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            case_type: self.case_type.clone(),
            state: self.state.clone(),
            district: self.district.clone(),
            complex: self.complex.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["causelist"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn test_cli_court_and_date_parse() {
        let args = parse(&["--court", "Delhi HC", "--date", "01-03-2024"]).unwrap();
        assert_eq!(args.court.as_deref(), Some("Delhi HC"));
        assert_eq!(args.output, PathBuf::from("causelists"));
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.max_retries.is_none());
    }

    #[test]
    fn test_cli_court_or_all_is_required() {
        let err = parse(&["--date", "01-03-2024"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_court_and_all_conflict() {
        let err = parse(&["--court", "X", "--all", "--date", "01-03-2024"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_date_or_range_is_required() {
        let err = parse(&["--all"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_range_needs_both_ends() {
        let err = parse(&["--all", "--from", "01-03-2024"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = parse(&["--all", "-d", "01-03-2024", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_max_retries_range_is_enforced() {
        assert!(parse(&["--all", "-d", "01-03-2024", "-r", "11"]).is_err());
        let args = parse(&["--all", "-d", "01-03-2024", "-r", "5"]).unwrap();
        assert_eq!(args.max_retries, Some(5));
    }

    #[test]
    fn test_cli_builds_query_request() {
        let args = parse(&[
            "--all",
            "--state",
            "Delhi",
            "--from",
            "01-03-2024",
            "--to",
            "03-03-2024",
            "--case",
            "criminal",
        ])
        .unwrap();
        let request = args.query_request();
        assert!(request.all_courts);
        assert_eq!(request.state.as_deref(), Some("Delhi"));
        assert_eq!(request.case_type.as_deref(), Some("criminal"));
        let query = request.into_query().unwrap();
        assert_eq!(query.dates().span_days(), 3);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = parse(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
