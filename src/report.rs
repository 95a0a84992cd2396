use crate::encoding::{WordCount, WordTable};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::io::Write;

pub const CSV_HEADER: [&str; 2] = ["word", "frequency"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Json,
}

/// Final word counts, most frequent first, ties in ascending word order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Report {
    entries: Vec<WordCount>,
}

impl Report {
    pub fn from_table(table: WordTable) -> Report {
        let mut entries = table.into_counts();
        entries.sort_by(|a, b| {
            Reverse(a.count)
                .cmp(&Reverse(b.count))
                .then_with(|| a.word.cmp(&b.word))
        });
        Report { entries }
    }

    pub fn entries(&self) -> &[WordCount] {
        &self.entries
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    pub fn write<W: Write>(&self, format: OutputFormat, out: W) -> Result<()> {
        match format {
            OutputFormat::Csv => self.write_csv(out),
            OutputFormat::Json => self.write_json(out),
        }
    }

    /// `word,frequency` header, then one row per entry. The header is written
    /// even for an empty report.
    pub fn write_csv<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(out);
        writer.write_record(CSV_HEADER)?;
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_json<W: Write>(&self, mut out: W) -> Result<()> {
        serde_json::to_writer_pretty(&mut out, self)?;
        writeln!(out)?;
        Ok(())
    }
}
