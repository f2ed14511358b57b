//! Command-line surface of the `market-sync` binary.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the config file (market_sync.toml). Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the scheduler until SIGINT/SIGTERM
    Run,

    /// Run the daily historical sync once
    Sync,

    /// Refresh live quotes once
    Quotes,

    /// Report stale historical data
    Health,

    /// Performance summary of one ticker
    Summary {
        /// Stored ticker (e.g. "BOVA11.SA")
        ticker: String,

        /// Trailing window in years
        #[arg(long, default_value = "5")]
        years: u32,
    },

    /// Stored observations of one ticker
    History {
        /// Stored ticker (e.g. "BOVA11.SA")
        ticker: String,

        /// First date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
    },

    /// Registered jobs with their next fire times
    Jobs,

    /// Run one job by id and print its run record
    Exec {
        /// Job id (e.g. "daily_sync")
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_history_dates() {
        let cli = Cli::try_parse_from([
            "market-sync",
            "history",
            "CDI",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-31",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Commands::History {
                ticker: "CDI".into(),
                start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            }
        );
    }

    #[test]
    fn summary_defaults_to_five_years() {
        let cli = Cli::try_parse_from(["market-sync", "-c", "svc.toml", "summary", "BOVA11.SA"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("svc.toml")));
        assert_eq!(
            cli.command,
            Commands::Summary {
                ticker: "BOVA11.SA".into(),
                years: 5
            }
        );
    }
}
