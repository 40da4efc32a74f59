use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Watch the folder and process batches until stopped
    Run,

    /// Process every eligible file currently in the watch folder once
    Scan,

    /// Query the ledger and print missing dates as JSON
    Gaps,

    /// Print batches as they settle, without processing them
    Batches,

    /// Validate the watch folder, outputs folder and external programs
    Check,

    /// Print the effective settings with sensitive values masked
    Config,

    /// Print the pending files and the state of the outputs folder
    Stats,

    /// Delete record files older than the retention window from the outputs folder
    Cleanup {
        /// Overrides OUTPUT_RETENTION_DAYS
        #[arg(long)]
        days: Option<u64>,
    },
}
