const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

/// Build metadata exported by `build.rs`.
pub struct BannerInfo {
    pub version: &'static str,
    pub build_time: &'static str,
    pub branch: &'static str,
    pub commit_short: &'static str,
    pub profile: &'static str,
}

impl Default for BannerInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            build_time: option_env!("BUILD_TIME").unwrap_or("unknown"),
            branch: option_env!("GIT_BRANCH").unwrap_or("unknown"),
            commit_short: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
        }
    }
}

impl BannerInfo {
    /// `v0.3.2 (main@1a2b3c4, release)`
    pub fn summary(&self) -> String {
        format!(
            "v{} ({}@{}, {})",
            self.version, self.branch, self.commit_short, self.profile
        )
    }
}

/// Prints the startup banner to stdout and, when enabled, the log file.
pub fn print_banner(info: &BannerInfo) {
    crate::log_println!();
    crate::log_println!(
        "{GREEN}{BOLD}  voicekeeper{RESET} {CYAN}{}{RESET}",
        info.summary()
    );
    crate::log_println!("{DIM}  built {}{RESET}", info.build_time);
    if info.profile == "debug" {
        crate::log_println!("{YELLOW}  debug build: timings are not representative{RESET}");
    }
    crate::log_println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_names_version_commit_and_profile() {
        let info = BannerInfo {
            version: "0.3.2",
            build_time: "0",
            branch: "main",
            commit_short: "1a2b3c4",
            profile: "release",
        };
        assert_eq!(info.summary(), "v0.3.2 (main@1a2b3c4, release)");
    }
}
