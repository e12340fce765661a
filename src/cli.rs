//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use paperspider_core::{ArtifactKind, ExportField, ExportFormat, FilterRule, FilterSet};

/// Collect conference paper listings and fetch abstracts, PDFs and BibTeX.
///
/// Each (conference, year) is a dataset under the base directory holding a
/// `papers.sqlite` plus `pdf/` and `bib/` folders.
#[derive(Parser, Debug)]
#[command(name = "paperspider")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Root directory holding datasets (default: config file, then ./papers)
    #[arg(long, value_name = "DIR", global = true)]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List datasets found under the base directory
    Datasets,

    /// Pull a year's paper listing into its dataset
    Sync {
        #[command(flatten)]
        dataset: DatasetArgs,
    },

    /// Show papers with their artifact status
    List {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Fetch one artifact kind for the selected papers
    Fetch {
        /// Artifact to fetch: abstract, pdf or bib
        kind: ArtifactKind,
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        filters: FilterArgs,
        /// Concurrent fetch workers (1-32)
        #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
        concurrency: Option<u8>,
        /// Minimum delay between request starts in milliseconds (0 to disable, max 60000)
        #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
        delay_ms: Option<u64>,
    },

    /// Write the selected papers as CSV, JSON or a title list
    Export {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        filters: FilterArgs,
        /// Output format: csv, json or txt
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        /// Comma-separated fields (source_id, title, authors, abstract, keywords, detail_url)
        #[arg(long, value_delimiter = ',', default_value = "title,authors,abstract")]
        fields: Vec<ExportField>,
        /// Write to FILE instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Print where a paper's PDF or BibTeX file lives
    Path {
        /// Artifact kind: pdf or bib
        kind: ArtifactKind,
        #[command(flatten)]
        dataset: DatasetArgs,
        /// Source-assigned paper id
        source_id: String,
    },
}

/// Dataset selector.
#[derive(ClapArgs, Debug, Clone)]
pub struct DatasetArgs {
    /// Conference slug (neurips, icml, iclr)
    #[arg(long = "conf", value_name = "SLUG")]
    pub conference: String,

    /// Proceedings year
    #[arg(long, value_parser = clap::value_parser!(u16).range(1980..=2100))]
    pub year: u16,
}

/// Keyword filters, each `FIELD:MODE:PATTERN` (e.g. `title:contains:graph`).
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Rule every paper must match
    #[arg(long, value_name = "RULE")]
    pub must: Vec<FilterRule>,

    /// Rule counted toward --min-should
    #[arg(long, value_name = "RULE")]
    pub should: Vec<FilterRule>,

    /// Rule no paper may match
    #[arg(long, value_name = "RULE")]
    pub must_not: Vec<FilterRule>,

    /// Minimum number of --should rules a paper must match
    #[arg(long, default_value_t = 1)]
    pub min_should: usize,
}

impl FilterArgs {
    /// Builds the filter set the flags describe.
    pub fn to_filter_set(&self) -> FilterSet {
        let rules = self
            .must
            .iter()
            .cloned()
            .map(FilterRule::must)
            .chain(self.should.iter().cloned().map(FilterRule::should))
            .chain(self.must_not.iter().cloned().map(FilterRule::must_not));
        rules
            .fold(FilterSet::new(), FilterSet::with_rule)
            .with_min_should_match(self.min_should)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use paperspider_core::{ClauseRole, FilterField, MatchMode};

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = parse(&["paperspider", "-v", "datasets"]);
        assert_eq!(args.verbose, 1);

        let args = parse(&["paperspider", "datasets", "-vv"]);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_and_base_dir_are_global() {
        let args = parse(&["paperspider", "sync", "--conf", "icml", "--year", "2023", "-q", "--base-dir", "/tmp/p"]);
        assert!(args.quiet);
        assert_eq!(args.base_dir, Some(PathBuf::from("/tmp/p")));
        match args.command {
            Command::Sync { dataset } => {
                assert_eq!(dataset.conference, "icml");
                assert_eq!(dataset.year, 2023);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_subcommand_required() {
        assert!(Args::try_parse_from(["paperspider"]).is_err());
    }

    #[test]
    fn test_cli_fetch_flags() {
        let args = parse(&[
            "paperspider", "fetch", "pdf", "--conf", "neurips", "--year", "2024", "-c", "8",
            "--delay-ms", "0",
        ]);
        match args.command {
            Command::Fetch {
                kind,
                concurrency,
                delay_ms,
                ..
            } => {
                assert_eq!(kind, ArtifactKind::Pdf);
                assert_eq!(concurrency, Some(8));
                assert_eq!(delay_ms, Some(0));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_fetch_concurrency_range() {
        for bad in ["0", "33"] {
            let err = Args::try_parse_from([
                "paperspider", "fetch", "abstract", "--conf", "iclr", "--year", "2024", "-c", bad,
            ])
            .unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_year_out_of_range_rejected() {
        let err = Args::try_parse_from(["paperspider", "sync", "--conf", "icml", "--year", "1900"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_filters_build_set() {
        let args = parse(&[
            "paperspider", "list", "--conf", "neurips", "--year", "2024",
            "--must", "title:contains:graph",
            "--should", "abstract:contains:attention",
            "--should", "keywords:contains:transformer",
            "--must-not", "all:contains:survey",
            "--min-should", "2",
        ]);
        let Command::List { filters, .. } = args.command else {
            panic!("expected list");
        };
        let set = filters.to_filter_set();
        assert_eq!(set.min_should_match, 2);
        let roles: Vec<ClauseRole> = set.rules.iter().map(|r| r.role).collect();
        assert_eq!(
            roles,
            vec![ClauseRole::Must, ClauseRole::Should, ClauseRole::Should, ClauseRole::MustNot]
        );
        assert_eq!(set.rules[3].field, FilterField::All);
        assert_eq!(set.rules[0].mode, MatchMode::Contains);
    }

    #[test]
    fn test_cli_bad_filter_rejected() {
        let err = Args::try_parse_from([
            "paperspider", "list", "--conf", "neurips", "--year", "2024", "--must", "title",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_export_defaults_and_fields() {
        let args = parse(&["paperspider", "export", "--conf", "icml", "--year", "2024"]);
        let Command::Export { format, fields, output, .. } = args.command else {
            panic!("expected export");
        };
        assert_eq!(format, ExportFormat::Csv);
        assert_eq!(
            fields,
            vec![ExportField::Title, ExportField::Authors, ExportField::Abstract]
        );
        assert!(output.is_none());

        let args = parse(&[
            "paperspider", "export", "--conf", "icml", "--year", "2024", "--format", "json",
            "--fields", "id,keywords",
        ]);
        let Command::Export { format, fields, .. } = args.command else {
            panic!("expected export");
        };
        assert_eq!(format, ExportFormat::Json);
        assert_eq!(fields, vec![ExportField::SourceId, ExportField::Keywords]);
    }

    #[test]
    fn test_cli_path_positionals() {
        let args = parse(&["paperspider", "path", "bib", "--conf", "iclr", "--year", "2024", "abc123"]);
        let Command::Path { kind, source_id, .. } = args.command else {
            panic!("expected path");
        };
        assert_eq!(kind, ArtifactKind::Bib);
        assert_eq!(source_id, "abc123");
    }
}
