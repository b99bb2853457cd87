//! Log output for the binary.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Filter used when `RUST_LOG` is not set: `info`, raised per target by the
/// debug flags.
pub fn default_directives(config: &Config) -> String {
    let mut directives = vec!["info"];
    if config.fs_debug {
        directives.extend(["mtpfs::fs=debug", "rfuse3=debug"]);
    }
    if config.session.mtp_debug {
        directives.push("libmtp=debug");
    }
    if config.session.data_debug {
        directives.push("libmtp::data=trace");
    }
    directives.join(",")
}

/// Installs the global subscriber, writing to stderr.
pub fn init(config: &Config) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(config))
            .context("building the default log filter")?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(anyhow::Error::msg)
        .context("installing the log subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use clap::Parser;

    fn config(flags: &[&str]) -> Config {
        let mut argv = vec!["mtpfs"];
        argv.extend_from_slice(flags);
        argv.push("/mnt/phone");
        Config::from_args(Args::try_parse_from(argv).unwrap()).unwrap()
    }

    #[test]
    fn quiet_by_default() {
        assert_eq!(default_directives(&config(&[])), "info");
    }

    #[test]
    fn debug_flags_raise_their_targets() {
        let all = default_directives(&config(&["--fs-debug", "--mtp-debug", "--data-debug"]));
        assert_eq!(
            all,
            "info,mtpfs::fs=debug,rfuse3=debug,libmtp=debug,libmtp::data=trace"
        );
        assert!(EnvFilter::try_new(all).is_ok());
    }
}
