// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use boring::cli::{Cli, Commands};
use boring::ipc::CmdKind;
use boring::{commands, daemon, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let _ = e.print();
            // Anything except an explicit help/version request is a
            // user-visible error.
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    if cli.daemon {
        daemon::run().await;
        return ExitCode::SUCCESS;
    }

    if let Some(shell) = cli.shell {
        clap_complete::generate(
            clap_complete::Shell::from(shell),
            &mut Cli::command(),
            "boring",
            &mut std::io::stdout(),
        );
        return ExitCode::SUCCESS;
    }

    logging::init_cli();

    let result = match cli.command {
        Some(Commands::List) => commands::list_tunnels().await,
        Some(Commands::Open { all, patterns }) => {
            commands::control_tunnels(patterns, all, CmdKind::Open).await
        }
        Some(Commands::Close { all, patterns }) => {
            commands::control_tunnels(patterns, all, CmdKind::Close).await
        }
        Some(Commands::Edit) => commands::edit_config(),
        Some(Commands::Version) => {
            commands::version();
            Ok(())
        }
        None => {
            let _ = Cli::command().print_help();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Per-operation details were printed where they happened;
            // this is the terminal summary line.
            if e.to_string() != "operation failed" {
                eprintln!("{e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
