use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write the output to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize the record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

impl Args {
    /// Open the output for records with the given column headers.
    pub fn open(self, headers: &[&'static str]) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<dyn std::io::Write>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let formatter = match &self.format {
            Format::Table => {
                let mut comfy = comfy_table::Table::new();
                comfy
                    .set_header(headers.to_vec())
                    .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Formatter::Table { comfy }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv,
        };
        let mut output = Output { path: self.output, io, formatter };
        if let Formatter::Csv = output.formatter {
            output.write_csv_row(headers)?;
        }
        Ok(output)
    }
}

enum Formatter {
    Csv,
    Table { comfy: comfy_table::Table },
    Jsonl,
}

pub struct Output {
    path: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

impl Output {
    fn write_csv_row<V: AsRef<str>>(&mut self, values: &[V]) -> Result<(), Error> {
        let longest = values.iter().map(|v| v.as_ref().len()).max().unwrap_or(0);
        // Worst case every byte is a quote that needs escaping, plus the surrounding quotes.
        let mut buffer = vec![0; 2 + 2 * longest];
        let mut writer = csv_core::Writer::new();
        let mut line = Vec::new();
        for (index, value) in values.iter().enumerate() {
            if index != 0 {
                let (WriteResult::InputEmpty, n) = writer.delimiter(&mut buffer) else {
                    unreachable!("delimiter always fits the buffer");
                };
                line.extend_from_slice(&buffer[..n]);
            }
            let (WriteResult::InputEmpty, _, n) = writer.field(value.as_ref().as_bytes(), &mut buffer)
            else {
                unreachable!("buffer is sized for the worst case");
            };
            line.extend_from_slice(&buffer[..n]);
        }
        let (WriteResult::InputEmpty, n) = writer.terminator(&mut buffer) else {
            unreachable!("terminator always fits the buffer");
        };
        line.extend_from_slice(&buffer[..n]);
        self.io.write_all(&line).map_err(|e| self.write_error(e))
    }

    /// Emit a record: `cells` for tabular formats, `record` for JSON lines.
    pub fn record<R: serde::Serialize>(
        &mut self,
        cells: impl FnOnce() -> Vec<String>,
        record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv => self.write_csv_row(&cells())?,
            Formatter::Table { comfy } => {
                comfy.add_row(cells());
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, &record()).map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.clone()),
        }
    }

    pub fn commit(mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy } = &self.formatter {
            let rendered = format!("{comfy}\n");
            self.io.write_all(rendered.as_bytes()).map_err(|e| self.write_error(e))?;
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}
