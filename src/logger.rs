use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::Result;

/// Run log, every record goes to stdout and is appended to `<dir>/log.txt`.
pub struct Logger {
    file: File,
}

impl Logger {
    pub fn new(dir: &Path) -> Result<Logger> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        let file = File::options()
            .create(true)
            .append(true)
            .open(dir.join("log.txt"))?;
        Ok(Logger { file })
    }

    pub fn write(&mut self, msg: &str) -> Result<()> {
        println!("{}", msg);
        writeln!(self.file, "{}", msg)?;
        self.file.flush()?;
        Ok(())
    }
}
