//! Append-only per-run log, grounded on `src/server/worker_task.rs`'s
//! `FileLogger` (`data.logger.log(msg)` held behind the worker's own
//! mutex). The `ActivityLog` in `plexcache-datastore` is a separate,
//! structured, persistent thing; this is the free-text phase/progress
//! log a run emits to stdout/a file while it executes, serialized with
//! `console_lock` (`spec.md` §5) so interleaved worker threads don't
//! tear each other's lines.

use std::io::Write;
use std::sync::Mutex;

static CONSOLE_LOCK: Mutex<()> = Mutex::new(());

/// A simple append-to-file-and-optionally-stdout logger, one per run.
pub struct RunLogger {
    file: Option<std::fs::File>,
    to_stdout: bool,
}

impl RunLogger {
    pub fn new(path: Option<&std::path::Path>, to_stdout: bool) -> std::io::Result<Self> {
        let file = match path {
            Some(p) => {
                if let Some(dir) = p.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                Some(
                    std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(p)?,
                )
            }
            None => None,
        };
        Ok(RunLogger { file, to_stdout })
    }

    pub fn log(&mut self, msg: impl AsRef<str>) {
        let _guard = CONSOLE_LOCK.lock().unwrap();
        let line = msg.as_ref();
        if self.to_stdout {
            println!("{line}");
        }
        if let Some(f) = self.file.as_mut() {
            let _ = writeln!(f, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_lines_to_file() {
        let mut path = std::env::temp_dir();
        path.push(format!("plexcache-runlog-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let mut logger = RunLogger::new(Some(&path), false).unwrap();
            logger.log("line one");
            logger.log("line two");
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "line one\nline two\n");
        std::fs::remove_file(&path).ok();
    }
}
