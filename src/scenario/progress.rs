//! Human-readable progress lines
//!
//! A failing sink must not fail the run. After the first write error the
//! remaining lines are dropped and a warning is logged once.

use std::fmt::Display;
use std::io::Write;

/// Line-oriented writer over a caller-supplied sink
pub struct Progress<'a> {
    sink: &'a mut dyn Write,
    broken: bool,
}

impl<'a> Progress<'a> {
    pub fn new(sink: &'a mut dyn Write) -> Self {
        Self {
            sink,
            broken: false,
        }
    }

    /// Write one line
    pub fn line(&mut self, line: impl Display) {
        if self.broken {
            return;
        }
        if let Err(e) = writeln!(self.sink, "{}", line) {
            tracing::warn!(error = %e, "Progress sink failed, dropping further progress lines");
            self.broken = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct FailingSink {
        attempts: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            self.attempts += 1;
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_lines_are_newline_terminated() {
        let mut out = Vec::new();
        {
            let mut progress = Progress::new(&mut out);
            progress.line("1. Test case");
            progress.line(format_args!("{}. Success", 1));
        }
        assert_eq!(String::from_utf8(out).unwrap(), "1. Test case\n1. Success\n");
    }

    #[test]
    fn test_broken_sink_is_not_retried() {
        let mut sink = FailingSink { attempts: 0 };
        {
            let mut progress = Progress::new(&mut sink);
            progress.line("a");
            progress.line("b");
        }
        assert_eq!(sink.attempts, 1);
    }
}
