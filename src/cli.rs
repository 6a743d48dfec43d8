//! Command-line surface. Flags map directly onto the sync planner's mode and
//! onto which materializer outputs are produced.

use clap::{Args, Parser, Subcommand};

use crate::plan::SyncMode;
use crate::DEFAULT_CROP_LIMIT;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch per-crop pesticide usage tables from the PPM cross-reference
    /// system.
    Crops(CropOpts),
    /// Split the pesticide master list into per-code CSV files with
    /// registrations, label images and usage ranges.
    Pesticides(PesticideOpts),
}

#[derive(Args)]
pub struct CropOpts {
    /// Base filename suffix for the per-crop output files.
    #[arg(short, long, default_value = "pesticide_data.csv")]
    pub output: String,

    /// Limit the number of crops processed per run.
    #[arg(short, long, default_value_t = DEFAULT_CROP_LIMIT)]
    pub limit: usize,

    /// Process all crops, ignoring the limit.
    #[arg(long)]
    pub full: bool,

    /// Re-download crops that already have an output file.
    #[arg(long)]
    pub force: bool,
}

impl CropOpts {
    pub fn sync_mode(&self) -> SyncMode {
        if self.force {
            SyncMode::Force
        } else if self.full {
            SyncMode::Normal
        } else {
            SyncMode::Limit(self.limit)
        }
    }
}

#[derive(Args)]
pub struct PesticideOpts {
    /// Limit the number of pesticide codes processed per run.
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Process these pesticide codes only (e.g. A001 F005).
    #[arg(long, num_args = 1..)]
    pub codes: Vec<String>,

    /// Skip downloading label images.
    #[arg(long)]
    pub no_images: bool,

    /// Plan every requested code, but for codes whose CSV already exists only
    /// download their label images; the existing CSV is never re-fetched or
    /// rewritten.
    #[arg(long, conflicts_with_all = ["force", "no_images", "ranges_only"])]
    pub images_only: bool,

    /// Fetch and materialize usage-range listings only.
    #[arg(long)]
    pub ranges_only: bool,

    /// Re-fetch codes that already have an output file.
    #[arg(long)]
    pub force: bool,
}

impl PesticideOpts {
    pub fn sync_mode(&self) -> SyncMode {
        if self.force {
            SyncMode::Force
        } else if let Some(n) = self.limit {
            SyncMode::Limit(n)
        } else {
            SyncMode::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_flags_map_onto_sync_modes() {
        let base = CropOpts {
            output: "data.csv".into(),
            limit: 10,
            full: false,
            force: false,
        };
        assert_eq!(base.sync_mode(), SyncMode::Limit(10));
        let full = CropOpts { full: true, ..base_clone(&base) };
        assert_eq!(full.sync_mode(), SyncMode::Normal);
        let force = CropOpts { force: true, ..base_clone(&base) };
        assert_eq!(force.sync_mode(), SyncMode::Force);
    }

    fn base_clone(opts: &CropOpts) -> CropOpts {
        CropOpts {
            output: opts.output.clone(),
            limit: opts.limit,
            full: opts.full,
            force: opts.force,
        }
    }

    #[test]
    fn cli_parses_pesticide_codes() {
        let cli = Cli::try_parse_from([
            "ppm-fetch",
            "pesticides",
            "--codes",
            "A001",
            "F005",
            "--no-images",
        ])
        .unwrap();
        let Command::Pesticides(opts) = cli.command else {
            panic!("expected pesticides subcommand");
        };
        assert_eq!(opts.codes, vec!["A001", "F005"]);
        assert!(opts.no_images);
        assert_eq!(opts.sync_mode(), SyncMode::Normal);
    }

    #[test]
    fn images_only_rejects_conflicting_flags() {
        for conflict in ["--force", "--no-images", "--ranges-only"] {
            let parsed =
                Cli::try_parse_from(["ppm-fetch", "pesticides", "--images-only", conflict]);
            assert!(parsed.is_err(), "--images-only should conflict with {conflict}");
        }
    }
}
