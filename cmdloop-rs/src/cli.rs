//! Command-line argument parsing.
//!
//! Usage:
//!   cmdloop [-f[<file>]] [-c<cmd>] [-vnbd] [<script>...]

use std::path::PathBuf;

use directories::ProjectDirs;

pub const USAGE: &str = "Usage: cmdloop [-f[<file>]] [-c<cmd>] [-vnbd] [<script>...]";

const RC_NAME: &str = ".cmdlooprc";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    pub config: ConfigFile,
    /// Command to execute after the scripts (`-c<cmd>`).
    pub command: Option<String>,
    /// Report errors with the offending command (`-v`).
    pub verbose: bool,
    /// Don't prompt (`-n`).
    pub nowait: bool,
    /// Read stdin as one batch program (`-b`).
    pub batch: bool,
    /// Start in single-step debug mode (`-d`).
    pub debug: bool,
    /// Scripts sourced in order before any input is read.
    pub scripts: Vec<PathBuf>,
}

/// How to choose the user config file.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ConfigFile {
    /// Search the standard locations (default).
    #[default]
    Search,
    /// `-f` with no file argument: skip user config.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    parse_argv(&raw)
}

/// Parse a slice of argument strings.
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            args.scripts.extend(argv[i + 1..].iter().map(PathBuf::from));
            break;
        }
        if !arg.starts_with('-') || arg == "-" {
            args.scripts.push(PathBuf::from(arg));
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'v' => args.verbose = true,
                'n' => args.nowait = true,
                'b' => args.batch = true,
                'd' => args.debug = true,

                // -f[<file>]
                'f' => {
                    if j + 1 < chars.len() {
                        let file: String = chars[j + 1..].iter().collect();
                        args.config = ConfigFile::Explicit(PathBuf::from(file));
                        j = chars.len();
                    } else if i + 1 < argv.len() && !argv[i + 1].starts_with('-') {
                        i += 1;
                        args.config = ConfigFile::Explicit(PathBuf::from(&argv[i]));
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }

                // -c<cmd>
                'c' => {
                    let cmd = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err("-c requires a command argument".to_owned());
                    };
                    args.command = Some(cmd);
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    Ok(args)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Search `~/.cmdlooprc`, `./.cmdlooprc`, then the platform config
/// directory.  Returns the first path that exists.
pub fn find_user_config() -> Option<PathBuf> {
    config_candidates().into_iter().find(|p| p.is_file())
}

fn config_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(RC_NAME));
    }
    paths.push(PathBuf::from(".").join(RC_NAME));
    if let Some(dirs) = ProjectDirs::from("", "", "cmdloop") {
        paths.push(dirs.config_dir().join("config"));
    }
    paths
}

// ── Tests ─────────────────────────────────────────────────────────────────────
