//! Host contracts (SPEC_FULL.md component C11; spec §6 external
//! collaborators): narrow traits for everything this crate treats as an
//! external collaborator rather than implementing itself — the OS command
//! gateway, the trace sink, the line editor, the escape flag, the clock,
//! and the program loader `RUN`/`CHAIN` need. A [`NullHost`] satisfies all
//! of them for running and testing the core without a real OS.

use crate::error::Result;

/// `os_cli`/`sys_call`/`call_native` (spec §6). Host/IO-shaped failures
/// stay on `anyhow::Result`, exactly as the teacher uses it for its own
/// fallible file/parse operations — there is no `BasicError` taxonomy a
/// BASIC program could branch on for "the shell failed to start".
pub trait OsHost {
    /// Run a shell command. `to_file`, if set, names a temp file the host
    /// should redirect command output into (for `OSCLI ... TO`); the
    /// caller reads it back line-by-line and deletes it.
    fn os_cli(&mut self, command: &[u8], to_file: Option<&str>) -> anyhow::Result<()>;

    /// Positional `SYS` call. Integer/float/string parameters already
    /// converted by the caller; returns the raw `out[]` slots plus the
    /// flags word (spec §6).
    fn sys_call(&mut self, swi_number: i64, args: &[SysParam]) -> anyhow::Result<SysResult>;

    /// Unsupported in this core; always fails (spec §6: "unsupported in
    /// this core beyond returning a fixed error").
    fn call_native(&mut self, address: u64, argv: &[i64]) -> anyhow::Result<i64> {
        let _ = (address, argv);
        anyhow::bail!("CALL/native code is not supported by this runtime")
    }
}

#[derive(Debug, Clone)]
pub enum SysParam {
    Int(i64),
    Float(f64),
    Str(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct SysResult {
    pub out: Vec<SysParam>,
    pub flags: u32,
}

/// `open_out`/`close`/`put_string` for `TRACE ... TO <file>` (spec §6).
pub trait TraceSink {
    fn open_out(&mut self, path: &str) -> anyhow::Result<()>;
    fn close(&mut self) -> anyhow::Result<()>;
    fn put_string(&mut self, bytes: &[u8]) -> anyhow::Result<()>;
}

/// `read_line` for the `INPUT` family (spec §6; not covered in depth by
/// this core beyond the contract).
pub trait LineInput {
    fn read_line(&mut self) -> anyhow::Result<Vec<u8>>;
}

/// `escape_poll` (spec §5/§6): a non-blocking query of the latent escape
/// flag, checked at the loop-back points named in §5.
pub trait EscapeSource {
    fn escape_poll(&mut self) -> bool;
}

/// `wait_delay`/`wait` for `WAIT` (spec §6, SPEC_FULL.md §4.9 supplement).
pub trait Clock {
    fn wait_delay(&mut self, centiseconds: u32);
    fn wait(&mut self);
}

/// `read_basic`/`read_library`-adjacent: hands back a tokenised image for
/// `RUN "file"`/`CHAIN` (SPEC_FULL.md §6 supplement). Tokenising itself
/// stays out of scope (spec §1); this only loads an already-tokenised
/// program.
pub trait ProgramLoader {
    fn load_program(&mut self, filename: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// `PRINT`'s (and `VDU`'s, where the host chooses to support it) character
/// sink. Kept as its own narrow trait, same as `TraceSink`, rather than
/// folded into `OsHost` — a host may want to swap just the output sink out
/// for tests without touching shell/SYS handling.
pub trait OutputSink {
    fn write_output(&mut self, bytes: &[u8]) -> anyhow::Result<()>;
}

/// The full set of host collaborators an [`crate::interpreter::Interpreter`]
/// needs. Implementors typically hold one real OS/terminal binding and
/// implement every trait on it; [`NullHost`] is the all-traits-satisfied
/// test/embedding default.
pub trait Host:
    OsHost + TraceSink + LineInput + EscapeSource + Clock + ProgramLoader + OutputSink
{
    fn end_of_run(&mut self) {}
}

/// A host with no external world: `OSCLI`/`SYS`/`CALL` fail with
/// `UNSUPPORTED`-shaped errors, escape never fires, waits return
/// immediately, and line input is always empty. Used by unit tests and as
/// a starting point for embedders that only need the interpreter core.
#[derive(Debug, Default)]
pub struct NullHost {
    pub trace_open: bool,
}

impl OsHost for NullHost {
    fn os_cli(&mut self, _command: &[u8], _to_file: Option<&str>) -> anyhow::Result<()> {
        anyhow::bail!("NullHost has no shell to run OSCLI commands")
    }

    fn sys_call(&mut self, _swi_number: i64, _args: &[SysParam]) -> anyhow::Result<SysResult> {
        anyhow::bail!("NullHost has no SYS calls")
    }
}

impl TraceSink for NullHost {
    fn open_out(&mut self, _path: &str) -> anyhow::Result<()> {
        self.trace_open = true;
        Ok(())
    }
    fn close(&mut self) -> anyhow::Result<()> {
        self.trace_open = false;
        Ok(())
    }
    fn put_string(&mut self, _bytes: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }
}

impl LineInput for NullHost {
    fn read_line(&mut self) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

impl EscapeSource for NullHost {
    fn escape_poll(&mut self) -> bool {
        false
    }
}

impl Clock for NullHost {
    fn wait_delay(&mut self, _centiseconds: u32) {}
    fn wait(&mut self) {}
}

impl ProgramLoader for NullHost {
    fn load_program(&mut self, filename: &[u8]) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!(
            "NullHost cannot load {:?}; install a ProgramLoader for RUN/CHAIN",
            String::from_utf8_lossy(filename)
        )
    }
}

impl OutputSink for NullHost {
    fn write_output(&mut self, _bytes: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Host for NullHost {}

/// An in-memory host used by tests: records everything `PRINT`/`VDU` write
/// and lets `escape_poll` be armed on demand, without pulling in a real
/// terminal or shell.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub output: Vec<u8>,
    pub escape_armed: bool,
}

impl RecordingHost {
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl OsHost for RecordingHost {
    fn os_cli(&mut self, _command: &[u8], _to_file: Option<&str>) -> anyhow::Result<()> {
        anyhow::bail!("RecordingHost has no shell to run OSCLI commands")
    }

    fn sys_call(&mut self, _swi_number: i64, _args: &[SysParam]) -> anyhow::Result<SysResult> {
        anyhow::bail!("RecordingHost has no SYS calls")
    }
}

impl TraceSink for RecordingHost {
    fn open_out(&mut self, _path: &str) -> anyhow::Result<()> {
        Ok(())
    }
    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn put_string(&mut self, _bytes: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }
}

impl LineInput for RecordingHost {
    fn read_line(&mut self) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

impl EscapeSource for RecordingHost {
    fn escape_poll(&mut self) -> bool {
        self.escape_armed
    }
}

impl Clock for RecordingHost {
    fn wait_delay(&mut self, _centiseconds: u32) {}
    fn wait(&mut self) {}
}

impl ProgramLoader for RecordingHost {
    fn load_program(&mut self, filename: &[u8]) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!(
            "RecordingHost cannot load {:?}",
            String::from_utf8_lossy(filename)
        )
    }
}

impl OutputSink for RecordingHost {
    fn write_output(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.output.extend_from_slice(bytes);
        Ok(())
    }
}

impl Host for RecordingHost {}

/// Convert a host-collaborator failure into the domain error taxonomy,
/// attaching the original as `#[source]` so nothing is silently dropped
/// (SPEC_FULL.md "Error handling": host/IO errors surface to the
/// interpreter as `Unsupported`/`Broken`, never a bare string).
pub fn host_err(err: anyhow::Error) -> crate::error::BasicError {
    crate::error::BasicError::Host(err.to_string())
}

pub fn require<T>(result: anyhow::Result<T>) -> Result<T> {
    result.map_err(host_err)
}
