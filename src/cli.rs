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

//! Command-line surface.

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = "boring",
    about = "A persistent SSH tunnel manager",
    disable_version_flag = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Run as the background daemon (internal).
    #[arg(long = "daemon", hide = true, exclusive = true)]
    pub daemon: bool,

    /// Print shell completions and exit.
    #[arg(long = "shell", value_enum, exclusive = true)]
    pub shell: Option<CompletionShell>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List tunnels
    #[command(visible_alias = "l")]
    List,

    /// Open tunnels by name or glob pattern
    #[command(visible_alias = "o")]
    Open {
        /// Operate on all configured tunnels
        #[arg(short = 'a', long = "all")]
        all: bool,
        /// Tunnel names or glob patterns
        patterns: Vec<String>,
    },

    /// Close tunnels by name or glob pattern
    #[command(visible_alias = "c")]
    Close {
        /// Operate on all running tunnels
        #[arg(short = 'a', long = "all")]
        all: bool,
        /// Tunnel names or glob patterns
        patterns: Vec<String>,
    },

    /// Edit the configuration file
    #[command(visible_alias = "e")]
    Edit,

    /// Print version information
    #[command(visible_alias = "v")]
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

impl From<CompletionShell> for Shell {
    fn from(s: CompletionShell) -> Shell {
        match s {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
        }
    }
}
