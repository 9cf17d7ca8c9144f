//! oxz - streaming XZ decompressor.
//!
//! Decompresses a single .xz stream (LZMA2, optionally BCJ-filtered)
//! from a file or stdin to a file or stdout, driving the multi-call
//! decoder through fixed-size buffers so memory use stays bounded by
//! the dictionary limit regardless of file size.

use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use oxz_core::{Status, XzBuf, XzError};
use oxz_stream::XzDecoder;
use std::fs::File;
use std::io::{self, Read, Write};
use std::process::ExitCode;

/// I/O buffer size for the streaming loop.
const BUF_SIZE: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "oxz")]
#[command(author, version, about = "Decompress .xz files (LZMA2 with optional BCJ filters)")]
#[command(long_about = "
Decompress a single .xz stream to a file or standard output.

Only the none and CRC32 integrity checks are supported, which covers
streams produced with `xz --check=crc32` and the kernel/boot tooling.

Examples:
  oxz data.xz -o data
  cat data.xz | oxz > data
  oxz --dict-mib 64 huge.xz -o huge
")]
struct Cli {
    /// Input file (use "-" for stdin)
    #[arg(default_value = "-")]
    input: String,

    /// Output file (use "-" for stdout)
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Dictionary memory limit in MiB for streaming mode
    #[arg(long, default_value_t = 16)]
    dict_mib: u32,

    /// Read the whole input up front and decode it in one call
    /// (no dictionary allocation; output is limited to --max-mib)
    #[arg(long)]
    single_call: bool,

    /// Output size cap in MiB for --single-call
    #[arg(long, default_value_t = 256)]
    max_mib: u32,

    /// Print a shell completion script and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn open_input(path: &str) -> io::Result<Box<dyn Read>> {
    if path == "-" {
        Ok(Box::new(io::stdin().lock()))
    } else {
        Ok(Box::new(File::open(path)?))
    }
}

fn open_output(path: &str) -> io::Result<Box<dyn Write>> {
    if path == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        Ok(Box::new(File::create(path)?))
    }
}

fn describe(err: &XzError) -> String {
    match err {
        XzError::Format => "not an .xz file".into(),
        XzError::MemLimit { requested, .. } => format!(
            "dictionary of {} MiB required; raise --dict-mib",
            requested.div_ceil(1024 * 1024)
        ),
        XzError::Buf => "file is truncated or corrupt".into(),
        other => other.to_string(),
    }
}

/// Drive the multi-call decoder between two byte streams.
fn decompress_stream(
    input: &mut dyn Read,
    output: &mut dyn Write,
    dict_max: u32,
) -> Result<(), String> {
    let mut dec = XzDecoder::new(dict_max);
    let mut in_buf = vec![0u8; BUF_SIZE];
    let mut out_buf = vec![0u8; BUF_SIZE];
    let mut in_len = 0usize;
    let mut in_pos = 0usize;

    loop {
        if in_pos == in_len {
            in_len = input.read(&mut in_buf).map_err(|e| e.to_string())?;
            in_pos = 0;
        }

        let mut b = XzBuf::new(&in_buf[in_pos..in_len], &mut out_buf);
        let ret = dec.run(&mut b);
        let produced = b.out_pos;
        in_pos += b.in_pos;

        output
            .write_all(&out_buf[..produced])
            .map_err(|e| e.to_string())?;

        match ret {
            Ok(Status::NeedsMore) => continue,
            Ok(Status::StreamEnd) => {
                output.flush().map_err(|e| e.to_string())?;
                return Ok(());
            }
            Err(e) => return Err(describe(&e)),
        }
    }
}

/// Read everything, decode in one call with the output buffer serving
/// as the dictionary.
fn decompress_single(
    input: &mut dyn Read,
    output: &mut dyn Write,
    max_out: usize,
) -> Result<(), String> {
    let mut data = Vec::new();
    input.read_to_end(&mut data).map_err(|e| e.to_string())?;

    let mut dec = XzDecoder::new(0);
    let mut out = vec![0u8; max_out];
    let mut b = XzBuf::new(&data, &mut out);

    match dec.run(&mut b) {
        Ok(Status::StreamEnd) => {
            let produced = b.out_pos;
            output.write_all(&out[..produced]).map_err(|e| e.to_string())?;
            output.flush().map_err(|e| e.to_string())?;
            Ok(())
        }
        Ok(Status::NeedsMore) => unreachable!("single-call never suspends"),
        Err(XzError::Buf) => Err("output exceeds --max-mib, or file is corrupt".into()),
        Err(e) => Err(describe(&e)),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "oxz", &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    let result = (|| {
        let mut input = open_input(&cli.input).map_err(|e| format!("{}: {e}", cli.input))?;
        let mut output = open_output(&cli.output).map_err(|e| format!("{}: {e}", cli.output))?;

        if cli.single_call {
            decompress_single(
                input.as_mut(),
                output.as_mut(),
                cli.max_mib as usize * 1024 * 1024,
            )
        } else {
            // at least 1 MiB; zero would select single-call mode
            let dict_max = cli.dict_mib.max(1).saturating_mul(1024 * 1024);
            decompress_stream(input.as_mut(), output.as_mut(), dict_max)
        }
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("oxz: {msg}");
            ExitCode::FAILURE
        }
    }
}
