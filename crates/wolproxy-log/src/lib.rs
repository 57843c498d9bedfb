//! Logger for the proxy service: timestamped records are handed to a
//! dedicated writer thread over a bounded channel so the async runtime
//! never blocks on console or file I/O. The log file rotates in place
//! (`proxy.log` -> `proxy.log.1` -> ...) once it crosses the size cap.

use chrono::Local;
use log::{Level, Log, SetLoggerError, set_boxed_logger, set_max_level};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Stdout, Write, stdout};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

pub enum LogCommand {
    Record(String),
    Flush,
    Terminate,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: Level,
    pub file: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub backup_count: u32,
    pub console: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::Info,
            file: None,
            max_size_bytes: 10 * 1024 * 1024,
            backup_count: 3,
            console: true,
        }
    }
}

/// Parses a config-file level name. Case-insensitive.
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::Trace),
        "debug" => Some(Level::Debug),
        "info" => Some(Level::Info),
        "warn" | "warning" => Some(Level::Warn),
        "error" => Some(Level::Error),
        _ => None,
    }
}

pub struct ProxyLogger {
    max_level: Level,
    sender: mpsc::SyncSender<LogCommand>,
}

impl ProxyLogger {
    pub fn new(settings: LogSettings, buffer_size: usize) -> (Self, mpsc::Receiver<LogCommand>) {
        let (sender, receiver) = mpsc::sync_channel(buffer_size);

        let logger = ProxyLogger {
            max_level: settings.level,
            sender,
        };
        (logger, receiver)
    }

    pub fn init(settings: LogSettings) -> Result<(), SetLoggerError> {
        let max_level = settings.level;
        let (logger, receiver) = ProxyLogger::new(settings.clone(), 1024);

        let _handle = thread::Builder::new()
            .name("wolproxy-log-writer".into())
            .spawn(move || {
                let mut sink = LogSink::open(&settings);
                while let Ok(command) = receiver.recv() {
                    match command {
                        LogCommand::Record(message) => {
                            if let Err(e) = sink.write_record(&message) {
                                eprintln!("[ProxyLogger] Failed to write log record: {}", e);
                            }
                        }
                        LogCommand::Flush => {
                            if let Err(e) = sink.flush() {
                                eprintln!("[ProxyLogger] Failed to flush log: {}", e);
                            }
                        }
                        LogCommand::Terminate => {
                            let _ = sink.flush();
                            break;
                        }
                    }
                }
                // Channel closed or termination requested. Ensure final flush.
                let _ = sink.flush();
            })
            .expect("Failed to spawn logger thread");

        set_boxed_logger(Box::new(logger))?;
        set_max_level(max_level.to_level_filter());
        Ok(())
    }
}

impl Log for ProxyLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let now = Local::now();
            let message = format!(
                "{} {} [{}] {}\n",
                now.format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            );

            if let Err(e) = self.sender.try_send(LogCommand::Record(message)) {
                eprintln!("[ProxyLogger] Failed to send log message: {}", e);
            }
        }
    }

    fn flush(&self) {
        let _ = self.sender.send(LogCommand::Flush);
    }
}

struct LogSink {
    console: Option<BufWriter<Stdout>>,
    file: Option<FileSink>,
}

impl LogSink {
    fn open(settings: &LogSettings) -> Self {
        let console = settings.console.then(|| BufWriter::new(stdout()));

        let file = settings.file.as_ref().and_then(|path| {
            match FileSink::open(
                path.clone(),
                settings.max_size_bytes,
                settings.backup_count,
            ) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    eprintln!(
                        "[ProxyLogger] Could not open log file '{}': {}. Continuing with console only.",
                        path.display(),
                        e
                    );
                    None
                }
            }
        });

        Self { console, file }
    }

    fn write_record(&mut self, message: &str) -> io::Result<()> {
        if let Some(console) = &mut self.console {
            console.write_all(message.as_bytes())?;
        }
        if let Some(file) = &mut self.file {
            file.write_record(message)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(console) = &mut self.console {
            console.flush()?;
        }
        if let Some(file) = &mut self.file {
            file.flush()?;
        }
        Ok(())
    }
}

struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
    max_size_bytes: u64,
    backup_count: u32,
}

impl FileSink {
    fn open(path: PathBuf, max_size_bytes: u64, backup_count: u32) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written,
            max_size_bytes,
            backup_count,
        })
    }

    fn write_record(&mut self, message: &str) -> io::Result<()> {
        if self.max_size_bytes > 0 && self.written + message.len() as u64 > self.max_size_bytes {
            self.rotate()?;
        }
        self.writer.write_all(message.as_bytes())?;
        self.written += message.len() as u64;
        Ok(())
    }

    /// Shifts `file.N-1` -> `file.N` for every backup slot, moves the live
    /// file to `file.1`, and reopens a fresh live file. With no backup
    /// slots configured the live file is simply truncated.
    fn rotate(&mut self) -> io::Result<()> {
        self.writer.flush()?;

        if self.backup_count == 0 {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.writer = BufWriter::new(file);
            self.written = 0;
            return Ok(());
        }

        for index in (1..self.backup_count).rev() {
            let from = backup_path(&self.path, index);
            if from.exists() {
                fs::rename(&from, backup_path(&self.path, index + 1))?;
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, backup_path(&self.path, 1))?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.written = 0;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

fn backup_path(path: &PathBuf, index: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}
