use std::{
    borrow::Cow,
    io::{self, Write as _},
};

use crate::exception::Exception;

/// Trait for handling output from the `print` foreign function.
///
/// Implement this trait to capture or redirect program output.
pub trait PrintWriter {
    /// Called once for each formatted argument passed to `print`.
    ///
    /// Writes only the argument's text; separators and the trailing newline are emitted
    /// via [`PrintWriter::stdout_push`].
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception>;

    /// Add a single character to stdout.
    fn stdout_push(&mut self, end: char) -> Result<(), Exception>;
}

/// `PrintWriter` that writes straight to the process stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        io::stdout()
            .write_all(output.as_bytes())
            .map_err(|err| Exception::new("RuntimeError", err.to_string()))
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        let mut buf = [0; 4];
        let mut stdout = io::stdout();
        stdout
            .write_all(end.encode_utf8(&mut buf).as_bytes())
            .and_then(|()| if end == '\n' { stdout.flush() } else { Ok(()) })
            .map_err(|err| Exception::new("RuntimeError", err.to_string()))
    }
}

/// `PrintWriter` that collects all output into a string.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.0.push_str(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        self.0.push(end);
        Ok(())
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) -> Result<(), Exception> {
        Ok(())
    }

    fn stdout_push(&mut self, _end: char) -> Result<(), Exception> {
        Ok(())
    }
}
