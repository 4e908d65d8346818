//! Operator console: one command per stdin line.
//!
//! Commands only call the public subscription operations; the console keeps
//! no state of its own.
//!
//! ```text
//! newfsub [--file] <peer> <share> <subPath> <localDestination> [watermark]
//! getfsubs
//! times <peer> <shareIndex> <subPath> <since>
//! downloads
//! ```

use crate::downloads::LoggedDownloads;
use clap::{Parser, Subcommand};
use std::fmt::Write;
use subscription_core::{Exchange, Millis, PeerId, Subscription, TargetKind};

#[derive(Parser, Debug)]
#[command(no_binary_name = true, name = "console")]
pub struct ConsoleLine {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Subscribe to a folder (or file) in a peer's share-base
    Newfsub {
        /// Peer id, possibly negative
        #[arg(allow_negative_numbers = true)]
        peer: PeerId,
        share: String,
        sub_path: String,
        local_destination: String,
        /// Only changes after this time (ms since epoch) are fetched
        #[arg(default_value_t = 0)]
        watermark: Millis,
        /// The sub-path names a single file rather than a folder
        #[arg(long)]
        file: bool,
    },
    /// List all subscriptions
    Getfsubs,
    /// Ask a peer which files changed, by share index
    Times {
        #[arg(allow_negative_numbers = true)]
        peer: PeerId,
        share_index: u32,
        sub_path: String,
        since: Millis,
    },
    /// Show and clear the downloads queued so far
    Downloads,
}

/// Split a line into arguments. Double or single quotes group words and are
/// stripped.
pub fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

/// Parse one console line. Blank lines give `None`.
pub fn parse(line: &str) -> Result<Option<Command>, clap::Error> {
    let args = split_args(line);
    if args.is_empty() {
        return Ok(None);
    }
    ConsoleLine::try_parse_from(args).map(|parsed| Some(parsed.command))
}

/// Run a command and return what to print.
pub async fn execute(command: Command, exchange: &Exchange, downloads: &LoggedDownloads) -> String {
    match command {
        Command::Newfsub {
            peer,
            share,
            sub_path,
            local_destination,
            watermark,
            file,
        } => {
            let target = if file { TargetKind::File } else { TargetKind::Folder };
            let subscription = Subscription::new(peer, share, sub_path, local_destination, watermark)
                .with_target(target);
            match exchange.store().create(&subscription) {
                Ok(()) => format!("Created {}", subscription),
                Err(e) => format!("Rejected: {}", e),
            }
        }
        Command::Getfsubs => match exchange.store().list_all() {
            Ok(subscriptions) if subscriptions.is_empty() => "No subscriptions".to_string(),
            Ok(subscriptions) => {
                let mut out = String::new();
                for subscription in subscriptions {
                    let _ = writeln!(out, "{}", subscription);
                }
                out.trim_end().to_string()
            }
            Err(e) => format!("Could not list subscriptions: {}", e),
        },
        Command::Times {
            peer,
            share_index,
            sub_path,
            since,
        } => match exchange.send_query(peer, share_index, &sub_path, since).await {
            Ok(()) => format!("Asked peer {} about share {} '{}' since {}", peer, share_index, sub_path, since),
            Err(e) => format!("Query failed: {}", e),
        },
        Command::Downloads => {
            let pending = downloads.drain();
            if pending.is_empty() {
                return "No downloads queued".to_string();
            }
            let mut out = String::new();
            for download in pending {
                let _ = writeln!(
                    out,
                    "peer {}: '{}' -> '{}'",
                    download.peer, download.remote_path, download.destination
                );
            }
            out.trim_end().to_string()
        }
    }
}
