// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::fs::File;
use std::io::{self, Write};
use std::ops::Deref;
use std::panic;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use gpu_crash_processor::CrashReport;
use gpu_dump::format::GPUDUMP_STREAM_TYPE;
use gpu_dump::GpuDump;
use num_traits::FromPrimitive;
use shader_symbols::SymbolDatabase;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Verbosity {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Verbosity> for LevelFilter {
    fn from(v: Verbosity) -> LevelFilter {
        match v {
            Verbosity::Off => LevelFilter::OFF,
            Verbosity::Error => LevelFilter::ERROR,
            Verbosity::Warn => LevelFilter::WARN,
            Verbosity::Info => LevelFilter::INFO,
            Verbosity::Debug => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }
}

/// Analyzes GPU crash dumps and produces a report (either human-readable or JSON).
#[derive(Debug, Parser)]
#[command(name = "gpu-crash-stackwalk", version)]
struct Args {
    /// Emit a machine-readable JSON report.
    ///
    /// The report is a single object with one key per section present in the dump.
    #[arg(long, conflicts_with = "dump")]
    json: bool,

    /// Pretty-print --json output.
    #[arg(long, requires = "json")]
    pretty: bool,

    /// Dump the raw stream directory of the dump instead of a report.
    #[arg(long)]
    dump: bool,

    /// A directory of compiled shader binaries (`.cso`).
    ///
    /// May be given more than once. Directories are not searched recursively.
    #[arg(long = "shader-dir", value_name = "DIR")]
    shader_dirs: Vec<PathBuf>,

    /// A directory of shader symbol files (`.pdb`, `.lld`).
    ///
    /// May be given more than once. Directories are not searched recursively.
    #[arg(long = "symbol-dir", value_name = "DIR")]
    symbol_dirs: Vec<PathBuf>,

    /// Where to write the output to (if unspecified, stdout is used).
    #[arg(long, value_name = "PATH")]
    output_file: Option<PathBuf>,

    /// Where to write logs to (if unspecified, stderr is used).
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Set the logging level.
    #[arg(long, value_enum, default_value = "error")]
    verbose: Verbosity,

    /// Path to the GPU dump file to analyze.
    dump_path: PathBuf,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = LevelFilter::from(args.verbose);
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_ansi(false);
    // A subscriber may already be installed; keep it.
    let _ = match args.log_file {
        Some(ref path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    };
    Ok(())
}

fn stream_name(stream_type: u32) -> String {
    match GPUDUMP_STREAM_TYPE::from_u32(stream_type) {
        Some(known) => format!("{known:?}"),
        None => format!("{stream_type:#x}"),
    }
}

fn print_raw_dump<'a, T, W>(dump: &GpuDump<'a, T>, output: &mut W) -> io::Result<()>
where
    T: Deref<Target = [u8]> + 'a,
    W: Write + ?Sized,
{
    let header = &dump.header;
    writeln!(output, "GPUDUMP_HEADER")?;
    writeln!(output, "  signature            = {:#x}", header.signature)?;
    writeln!(output, "  version              = {}", header.version)?;
    writeln!(output, "  stream_count         = {}", header.stream_count)?;
    writeln!(output, "  stream_directory_rva = {:#x}", header.stream_directory_rva)?;
    writeln!(output, "  time_date_stamp      = {}", header.time_date_stamp)?;
    writeln!(output)?;

    for stream_type in dump.stream_types() {
        let contents = dump.get_raw_stream(stream_type).unwrap_or_default();
        writeln!(
            output,
            "Stream {} ({}): {} bytes",
            stream_name(stream_type),
            stream_type,
            contents.len()
        )?;
        for line in contents.chunks(16) {
            let hex: Vec<_> = line.iter().map(|b| format!("{b:02x}")).collect();
            writeln!(output, "  {}", hex.join(" "))?;
        }
        writeln!(output)?;
    }
    Ok(())
}

fn try_main(args: Args) -> anyhow::Result<()> {
    let dump = GpuDump::read_path(&args.dump_path).map_err(|e| {
        anyhow::anyhow!(
            "{} - Error reading dump {}: {}",
            e.name(),
            args.dump_path.display(),
            e
        )
    })?;

    let mut output: Box<dyn Write> = match args.output_file {
        Some(ref path) => Box::new(
            File::create(path)
                .with_context(|| format!("failed to create output file {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    if args.dump {
        print_raw_dump(&dump, &mut *output)?;
        return Ok(output.flush()?);
    }

    let symbols = SymbolDatabase::new(&args.shader_dirs, &args.symbol_dirs);
    info!(
        "indexed {} shader binaries and {} symbol files",
        symbols.binary_count(),
        symbols.symbol_count()
    );
    let report = CrashReport::decode(&dump, &symbols);
    if args.json {
        report.print_json(&mut output, args.pretty)?;
        writeln!(output)?;
    } else {
        report.print(&mut *output)?;
    }
    Ok(output.flush()?)
}

fn log_panics() {
    panic::set_hook(Box::new(|panic_info| {
        let (filename, line) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line()))
            .unwrap_or(("<unknown>", 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref)
            .or_else(|| panic_info.payload().downcast_ref::<&str>().copied())
            .unwrap_or("<cause unknown>");
        error!("Panic - A panic occurred at {}:{}: {}", filename, line, cause);
    }));
}

fn main() {
    let args = Args::parse();
    if let Err(e) = init_logging(&args) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
    log_panics();

    if let Err(e) = try_main(args) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;
    use std::path::Path;

    #[test]
    fn test_args() {
        Args::command().debug_assert();

        let args = Args::try_parse_from([
            "gpu-crash-stackwalk",
            "--json",
            "--pretty",
            "--shader-dir",
            "a",
            "--shader-dir",
            "b",
            "--symbol-dir",
            "c",
            "--verbose",
            "debug",
            "crash.dump",
        ])
        .unwrap();
        assert!(args.json && args.pretty);
        assert_eq!(args.shader_dirs, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(args.symbol_dirs, vec![PathBuf::from("c")]);
        assert_eq!(args.verbose, Verbosity::Debug);
        assert_eq!(args.dump_path, Path::new("crash.dump"));
    }

    #[test]
    fn test_pretty_requires_json() {
        assert!(Args::try_parse_from(["gpu-crash-stackwalk", "--pretty", "x.dump"]).is_err());
        assert!(Args::try_parse_from(["gpu-crash-stackwalk", "--json", "--dump", "x.dump"]).is_err());
    }

    #[test]
    fn test_stream_name() {
        assert_eq!(stream_name(5), "PageFaultInfoStream");
        assert_eq!(stream_name(0x4700), "0x4700");
    }
}
