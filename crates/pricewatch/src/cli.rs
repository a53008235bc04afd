//! CLI argument parsing
//!
//! Two modes: the default continuous loop (for containers), and `--once`
//! for cron or systemd timers where the process should exit after one pass.

use clap::Parser;

/// PriceWatch - periodic price intelligence for LLM inference services
#[derive(Parser, Debug)]
#[command(name = "pricewatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Run a single collection tick and exit
    ///
    /// Exit codes: 0 on success, 1 on configuration errors,
    /// 2 on unrecoverable runtime errors.
    #[arg(long)]
    pub once: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_mode() {
        let cli = Cli::try_parse_from(["pricewatch"]).unwrap();
        assert!(!cli.once);
    }

    #[test]
    fn test_cli_once_mode() {
        let cli = Cli::try_parse_from(["pricewatch", "--once"]).unwrap();
        assert!(cli.once);
    }

    #[test]
    fn test_cli_rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["pricewatch", "--daily"]).is_err());
    }
}
