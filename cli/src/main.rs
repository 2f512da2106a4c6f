mod arg_parser;
mod client_cli;

use arg_parser::{ArgParser, SubCommand, Submission};
use client_cli::{ClientCli, ClientError};

use clap::Parser;
use serde::Serialize;
use std::process;

#[tokio::main]
async fn main() {
    let args = ArgParser::parse();
    let client = ClientCli::connect(&args.server);

    if let Err(err) = run(&client, args.sub_command).await {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

async fn run(client: &ClientCli, sub_command: SubCommand) -> Result<(), ClientError> {
    match sub_command.submission() {
        Some(Submission::Preprocess(request)) => print(&client.preprocess(&request).await?),
        Some(Submission::Generate(request)) => print(&client.generate(&request).await?),
        None => print(&client.health().await?),
    }
    Ok(())
}

fn print<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("could not format response: {err}"),
    }
}
