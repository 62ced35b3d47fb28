//! `bbcbasic-run`: load an already-tokenised program file and execute it
//! to completion against a real terminal/OS [`Host`], reporting whatever
//! [`StopReason`] the run ends on.

use std::io::Write;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use bbcbasic_rt::host::{
    EscapeSource, Host, LineInput, OsHost, OutputSink, ProgramLoader, SysParam, SysResult,
    TraceSink,
};
use bbcbasic_rt::{Interpreter, Limits, Program, RunFlags, StopReason};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bbcbasic-run", about = "Run a tokenised BBC BASIC program")]
struct Cli {
    /// Path to a tokenised program image (see `crate::program` for the
    /// line-record layout this crate expects).
    program: std::path::PathBuf,

    /// Require DIM HIMEM addresses to fit in 32 bits.
    #[arg(long)]
    addr32: bool,

    /// Disable the single-line-IF/nested-block-IF cascade tweak.
    #[arg(long)]
    no_cascade_if_tweak: bool,
}

/// The one non-test [`Host`]: stdout for `PRINT`/`VDU`, stdin for `INPUT`,
/// a real shell for `OSCLI`, and a trace file opened on request.
struct TerminalHost {
    trace: Option<std::fs::File>,
}

impl OsHost for TerminalHost {
    fn os_cli(&mut self, command: &[u8], to_file: Option<&str>) -> anyhow::Result<()> {
        let command = String::from_utf8_lossy(command).into_owned();
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(&command);
        match to_file {
            Some(path) => {
                let out = std::fs::File::create(path)
                    .with_context(|| format!("opening OSCLI redirect target {path}"))?;
                cmd.stdout(out);
            }
            None => {
                cmd.stdout(std::process::Stdio::inherit());
            }
        }
        cmd.status().context("running OSCLI command")?;
        Ok(())
    }

    fn sys_call(&mut self, swi_number: i64, _args: &[SysParam]) -> anyhow::Result<SysResult> {
        anyhow::bail!("SYS {swi_number} is not implemented by this host")
    }
}

impl TraceSink for TerminalHost {
    fn open_out(&mut self, path: &str) -> anyhow::Result<()> {
        self.trace = Some(
            std::fs::File::create(path).with_context(|| format!("opening trace file {path}"))?,
        );
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.trace = None;
        Ok(())
    }

    fn put_string(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        if let Some(file) = &mut self.trace {
            file.write_all(bytes)?;
        }
        Ok(())
    }
}

impl LineInput for TerminalHost {
    fn read_line(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line.into_bytes())
    }
}

impl EscapeSource for TerminalHost {
    fn escape_poll(&mut self) -> bool {
        false
    }
}

impl bbcbasic_rt::host::Clock for TerminalHost {
    fn wait_delay(&mut self, centiseconds: u32) {
        std::thread::sleep(Duration::from_millis(centiseconds as u64 * 10));
    }

    fn wait(&mut self) {}
}

impl ProgramLoader for TerminalHost {
    fn load_program(&mut self, filename: &[u8]) -> anyhow::Result<Vec<u8>> {
        let path = String::from_utf8_lossy(filename).into_owned();
        std::fs::read(&path).with_context(|| format!("loading program {path}"))
    }
}

impl OutputSink for TerminalHost {
    fn write_output(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        std::io::stdout().write_all(bytes)?;
        Ok(())
    }
}

impl Host for TerminalHost {}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let bytes = std::fs::read(&cli.program)
        .with_context(|| format!("reading {}", cli.program.display()))?;
    let program = Program::new(bytes);

    let run_flags = RunFlags {
        cascade_if_tweak: !cli.no_cascade_if_tweak,
        addr32: cli.addr32,
    };
    let host = TerminalHost { trace: None };
    let mut interpreter = Interpreter::new(program, run_flags, Limits::default(), host);

    match interpreter.run() {
        StopReason::EndOfProgram | StopReason::Stop => Ok(()),
        StopReason::End { value } => {
            if let Some(code) = value {
                std::process::exit(code as i32);
            }
            Ok(())
        }
        StopReason::Quit { code } => std::process::exit(code),
        StopReason::UnhandledError(err) => {
            eprintln!("Error: {err} (line-relative ERR {})", err.errnum());
            std::process::exit(1);
        }
    }
}
