mod arg_parser;
mod client_cli;

use arg_parser::{ArgParser, SubCommand};
use client_cli::ClientCli;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ArgParser::parse();
    let client = ClientCli::connect(&args.server);

    match args.sub_command {
        SubCommand::Jobs => client.list_jobs().await?,
        SubCommand::Run { job, user } => client.run(&job, user.as_deref()).await?,
        SubCommand::Logs { job, page } => client.list_logs(job.as_deref(), page).await?,
        SubCommand::Log { id } => client.show_log(&id).await?,
    }

    Ok(())
}
