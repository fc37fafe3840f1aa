//! CLI entry point for the tape image tool.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use interposer_core::{format_blank_image, BlockSummary, FileStore, InterposerConfig};
use log as _;
use serde_json as _;
use tape_tool::{load_config, HostSession, ToolError};
#[cfg(test)]
use tempfile as _;
use thiserror as _;

const USAGE_TEXT: &str = "\
Usage: tape-tool <command> [options]

Commands:
  format  <image>                 Write a blank, holed tape image
  inspect <image> [--block <n>]   Summarize recorded blocks
  write   <image> <payload>       Record payload after a sync cell at the safe start
  read    <image> <len>           Play back up to len bytes of the first record

Options:
  -c, --config <file>  JSON configuration (defaults apply to missing fields)
  -b, --block <n>      Block to summarize (inspect only)
  -h, --help           Show this help message

Examples:
  tape-tool format blank.tape
  tape-tool write blank.tape 'HELLO'
  tape-tool read blank.tape 5
  RUST_LOG=debug tape-tool inspect blank.tape --block 1
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Format { image: PathBuf },
    Inspect { image: PathBuf, block: Option<u32> },
    Write { image: PathBuf, payload: Vec<u8> },
    Read { image: PathBuf, len: usize },
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    command: Command,
    config: Option<PathBuf>,
}

#[derive(Debug)]
enum ParseResult {
    Run(Invocation),
    Help,
}

#[allow(clippy::while_let_on_iterator)]
fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();
    let mut positionals: Vec<OsString> = Vec::new();
    let mut config: Option<PathBuf> = None;
    let mut block: Option<u32> = None;

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "-c" || arg == "--config" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --config".to_string())?;
            config = Some(PathBuf::from(value));
            continue;
        }

        if arg == "-b" || arg == "--block" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --block".to_string())?;
            block = Some(parse_number(&value, "block")?);
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        positionals.push(arg);
    }

    if block.is_some() && command_str != "inspect" {
        return Err("--block is only valid for inspect".to_string());
    }

    let command = match command_str.as_str() {
        "format" => {
            let [image] = expect_positionals(positionals, &["image"])?;
            Command::Format {
                image: PathBuf::from(image),
            }
        }
        "inspect" => {
            let [image] = expect_positionals(positionals, &["image"])?;
            Command::Inspect {
                image: PathBuf::from(image),
                block,
            }
        }
        "write" => {
            let [image, payload] = expect_positionals(positionals, &["image", "payload"])?;
            Command::Write {
                image: PathBuf::from(image),
                payload: payload.to_string_lossy().into_owned().into_bytes(),
            }
        }
        "read" => {
            let [image, len] = expect_positionals(positionals, &["image", "length"])?;
            Command::Read {
                image: PathBuf::from(image),
                len: parse_number(&len, "length")?,
            }
        }
        other => return Err(format!("unknown command: {other}")),
    };

    Ok(ParseResult::Run(Invocation { command, config }))
}

fn expect_positionals<const N: usize>(
    positionals: Vec<OsString>,
    names: &[&str; N],
) -> Result<[OsString; N], String> {
    if positionals.len() < N {
        return Err(format!("missing {} argument", names[positionals.len()]));
    }
    if positionals.len() > N {
        return Err(format!(
            "unexpected argument: {}",
            positionals[N].to_string_lossy()
        ));
    }
    positionals
        .try_into()
        .map_err(|_| "argument count mismatch".to_string())
}

fn parse_number<T: std::str::FromStr>(value: &OsString, name: &str) -> Result<T, String> {
    let text = value.to_string_lossy();
    text.parse()
        .map_err(|_| format!("invalid {name}: {text}"))
}

fn resolve_config(path: Option<&Path>) -> Result<InterposerConfig, i32> {
    path.map_or_else(
        || Ok(InterposerConfig::default()),
        |path| load_config(path).map_err(|error| report(&error)),
    )
}

fn report(error: &ToolError) -> i32 {
    eprintln!("error: {error}");
    1
}

fn run_format(image: &Path, config: &InterposerConfig) -> Result<(), i32> {
    let bytes = format_blank_image(&config.tape.geometry);
    fs::write(image, &bytes).map_err(|source| {
        report(&ToolError::Io {
            path: image.to_path_buf(),
            source,
        })
    })?;
    println!("Formatted {} ({} bytes)", image.display(), bytes.len());
    Ok(())
}

fn run_inspect(image: &Path, block: Option<u32>, config: &InterposerConfig) -> Result<(), i32> {
    let bytes = fs::read(image).map_err(|source| {
        report(&ToolError::Io {
            path: image.to_path_buf(),
            source,
        })
    })?;

    if let Some(block) = block {
        let Some(summary) = BlockSummary::of(&bytes, block) else {
            eprintln!("error: block {block} is past the end of {}", image.display());
            return Err(1);
        };
        print_summary(&summary);
        return Ok(());
    }

    let expected = config.tape.geometry.image_len_bytes();
    if bytes.len() as u64 != expected {
        println!(
            "warning: image is {} bytes, geometry expects {expected}",
            bytes.len()
        );
    }
    let mut recorded = 0;
    let mut block = 0;
    while let Some(summary) = BlockSummary::of(&bytes, block) {
        if !summary.is_blank() {
            print_summary(&summary);
            recorded += 1;
        }
        block += 1;
    }
    println!("{recorded} of {block} blocks hold recorded cells");
    Ok(())
}

fn print_summary(summary: &BlockSummary) {
    println!(
        "block {:>4}: gaps {:>4}  syncs {:>4}  data {:>4}  holes {:>4}",
        summary.block, summary.gaps, summary.syncs, summary.data, summary.holes
    );
}

fn run_write(image: &Path, payload: &[u8], config: &InterposerConfig) -> Result<(), i32> {
    let mut session =
        HostSession::open(config, FileStore::new(), image).map_err(|error| report(&error))?;
    session.record(payload).map_err(|error| report(&error))?;
    let counters = session.close().map_err(|error| report(&error))?;
    println!(
        "Recorded {} bytes to {} ({} block flushes, {} storage faults)",
        payload.len(),
        image.display(),
        counters.block_flushes,
        counters.storage_faults
    );
    Ok(())
}

fn run_read(image: &Path, len: usize, config: &InterposerConfig) -> Result<(), i32> {
    let mut config = *config;
    config.tape.write_protected = true;
    let mut session =
        HostSession::open(&config, FileStore::new(), image).map_err(|error| report(&error))?;
    let bytes = session.play(len).map_err(|error| report(&error))?;
    session.close().map_err(|error| report(&error))?;

    let hex: String = bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{hex}");
    if bytes.len() < len {
        eprintln!("warning: record holds only {} bytes", bytes.len());
    }
    Ok(())
}

fn run(invocation: Invocation) -> Result<(), i32> {
    let config = resolve_config(invocation.config.as_deref())?;
    match invocation.command {
        Command::Format { image } => run_format(&image, &config),
        Command::Inspect { image, block } => run_inspect(&image, block, &config),
        Command::Write { image, payload } => run_write(&image, &payload, &config),
        Command::Read { image, len } => run_read(&image, len, &config),
    }
}

fn main() {
    env_logger::init();

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Run(invocation)) => match run(invocation) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn args(values: &[&str]) -> impl Iterator<Item = OsString> {
        values
            .iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn invocation(values: &[&str]) -> Invocation {
        match parse_args(args(values)).expect("valid args should parse") {
            ParseResult::Run(invocation) => invocation,
            ParseResult::Help => panic!("unexpected help"),
        }
    }

    #[test]
    fn parses_write_command() {
        assert_eq!(
            invocation(&["write", "t.tape", "HELLO"]),
            Invocation {
                command: Command::Write {
                    image: PathBuf::from("t.tape"),
                    payload: b"HELLO".to_vec(),
                },
                config: None,
            }
        );
    }

    #[test]
    fn parses_inspect_with_block_and_config() {
        assert_eq!(
            invocation(&["inspect", "t.tape", "--block", "3", "-c", "cfg.json"]),
            Invocation {
                command: Command::Inspect {
                    image: PathBuf::from("t.tape"),
                    block: Some(3),
                },
                config: Some(PathBuf::from("cfg.json")),
            }
        );
    }

    #[test]
    fn parses_read_length() {
        assert_eq!(
            invocation(&["read", "t.tape", "16"]).command,
            Command::Read {
                image: PathBuf::from("t.tape"),
                len: 16,
            }
        );
    }

    #[test]
    fn parses_help_flag() {
        let result = parse_args(args(&["--help"])).expect("help should parse without error");
        assert!(matches!(result, ParseResult::Help));
    }

    #[test]
    fn rejects_unknown_command() {
        let error = parse_args(args(&["rewind"])).expect_err("unknown command should fail");
        assert!(error.contains("unknown command"));
    }

    #[test]
    fn rejects_block_outside_inspect() {
        let error = parse_args(args(&["format", "t.tape", "--block", "1"]))
            .expect_err("block on format should fail");
        assert!(error.contains("only valid for inspect"));
    }

    #[test]
    fn reports_missing_and_extra_positionals() {
        let missing = parse_args(args(&["write", "t.tape"])).expect_err("missing payload");
        assert!(missing.contains("missing payload"));
        let extra = parse_args(args(&["format", "a", "b"])).expect_err("extra image");
        assert!(extra.contains("unexpected argument: b"));
    }

    #[test]
    fn rejects_non_numeric_length() {
        let error = parse_args(args(&["read", "t.tape", "lots"])).expect_err("bad length");
        assert!(error.contains("invalid length"));
    }
}
