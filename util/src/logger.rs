// Copyright (c) 2024 The Sealboot Authors. All rights reserved.
//
// Sealboot is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use std::io::Write;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::UtilError;

/// Format like "[LEVEL][file: line]: message".
struct ConsoleLogger {
    output: Mutex<Box<dyn Write + Send>>,
    level: Level,
}

impl ConsoleLogger {
    fn new(level: Level, output: Box<dyn Write + Send>) -> Self {
        ConsoleLogger {
            output: Mutex::new(output),
            level,
        }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let formatmsg = format!(
            "[{:<5}][{}: {}]: {}\n",
            record.level(),
            record.file().unwrap_or(""),
            record.line().unwrap_or(0),
            record.args()
        );

        if let Ok(mut output) = self.output.lock() {
            let _ = output.write_all(formatmsg.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut output) = self.output.lock() {
            let _ = output.flush();
        }
    }
}

/// Map a textual level ("error" .. "trace") onto a `log::Level`.
/// Unknown names fall back to `Info`.
pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "error" => Level::Error,
        "warn" => Level::Warn,
        "info" => Level::Info,
        "debug" => Level::Debug,
        "trace" => Level::Trace,
        _ => Level::Info,
    }
}

/// Install the process wide logger writing to `output`.
pub fn init_log(level: Level, output: Box<dyn Write + Send>) -> Result<()> {
    let logger = ConsoleLogger::new(level, output);
    log::set_boxed_logger(Box::new(logger))
        .map(|()| log::set_max_level(LevelFilter::Trace))
        .map_err(|_| anyhow!(UtilError::LoggerInstalled))
}

/// Drop every log record. Used when no console is wired up.
pub fn silence_log() {
    log::set_max_level(LevelFilter::Off);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("ERROR"), Level::Error);
        assert_eq!(parse_level("warn"), Level::Warn);
        assert_eq!(parse_level("trace"), Level::Trace);
        assert_eq!(parse_level("bogus"), Level::Info);
    }

    #[test]
    fn test_console_logger_format() {
        let buf = SharedBuf::default();
        let logger = ConsoleLogger::new(Level::Info, Box::new(buf.clone()));

        logger.log(
            &Record::builder()
                .args(format_args!("loading kernel"))
                .level(Level::Info)
                .file(Some("boot.rs"))
                .line(Some(42))
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("filtered"))
                .level(Level::Debug)
                .build(),
        );

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out, "[INFO ][boot.rs: 42]: loading kernel\n");
    }
}
