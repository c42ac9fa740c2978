use clap::{Parser, Subcommand};

/// Talk to a job runner server
#[derive(Debug, Parser)]
pub struct ArgParser {
    /// Base URL of the server
    #[clap(
        short = 's',
        long = "server",
        env = "JOBRUNNER_SERVER",
        default_value = "http://127.0.0.1:8000"
    )]
    pub server: String,
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum SubCommand {
    /// list the runnable jobs
    Jobs,
    /// run a job and print its transcript as it streams
    Run {
        /// name of the job
        job: String,

        #[clap(long, env = "USER")]
        /// operator name recorded with the run
        user: Option<String>,
    },
    /// list past runs, most recent first
    Logs {
        #[clap(long)]
        /// only show runs of this job
        job: Option<String>,

        #[clap(long, default_value_t = 0)]
        /// page number, starting at 0
        page: usize,
    },
    /// print the transcript of one run
    Log {
        /// run id, as shown by `logs`
        id: String,
    },
}
