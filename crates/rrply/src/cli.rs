use clap::Parser;
use rrply_proto::protocol::Command;
use std::ffi::OsString;

/// rockradio.com console player
#[derive(Parser, Debug)]
#[command(name = "rrply", version, about)]
pub struct Args {
    /// Channel id to play; 0 shows the channel menu
    #[arg(short = 'c', long = "channel", value_name = "ID", default_value_t = 0)]
    pub channel: u64,

    /// Debug logging on stdout (also accepted as -verbose)
    #[arg(short, long)]
    pub verbose: bool,

    /// Toggle play/pause in a running player, then exit
    #[arg(long, conflicts_with_all = ["key", "status"])]
    pub toggle: bool,

    /// Press a bound hotkey in a running player, then exit
    #[arg(long, value_name = "KEY", conflicts_with = "status")]
    pub key: Option<String>,

    /// Print the status of a running player, then exit
    #[arg(long)]
    pub status: bool,
}

impl Args {
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize(std::env::args_os()))
    }

    /// The command to send when running as a client of another instance.
    pub fn client_command(&self) -> Option<Command> {
        if self.toggle {
            Some(Command::TogglePause)
        } else if let Some(key) = &self.key {
            Some(Command::Key { key: key.clone() })
        } else if self.status {
            Some(Command::Status)
        } else {
            None
        }
    }
}

/// Accept the single-dash `-verbose` spelling.
fn normalize<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            if arg == "-verbose" {
                OsString::from("--verbose")
            } else {
                arg
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        let args = std::iter::once("rrply")
            .chain(args.iter().copied())
            .map(OsString::from);
        Args::try_parse_from(normalize(args))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.channel, 0);
        assert!(!args.verbose);
        assert!(args.client_command().is_none());
    }

    #[test]
    fn test_channel_and_verbose_spellings() {
        for verbose in ["-verbose", "--verbose", "-v"] {
            let args = parse(&["-c", "42", verbose]).unwrap();
            assert_eq!(args.channel, 42);
            assert!(args.verbose, "{} not accepted", verbose);
        }
    }

    #[test]
    fn test_bad_channel_rejected() {
        assert!(parse(&["-c", "metal"]).is_err());
    }

    #[test]
    fn test_client_commands() {
        assert_eq!(
            parse(&["--toggle"]).unwrap().client_command(),
            Some(Command::TogglePause)
        );
        assert_eq!(
            parse(&["--key", "Pause"]).unwrap().client_command(),
            Some(Command::Key { key: "Pause".into() })
        );
        assert_eq!(
            parse(&["--status"]).unwrap().client_command(),
            Some(Command::Status)
        );
        assert!(parse(&["--toggle", "--status"]).is_err());
    }
}
