use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::audio::{duration_secs, AudioSource};
use crate::error::{Error, Result};

/// The typed part of a label table row: `fname,label[,length]`. Any other
/// columns stay with the owning [`LabelTable`] and are written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRow {
    pub fname: String,
    pub label: String,
    /// Duration in seconds, present once the table has been enriched.
    #[serde(default)]
    pub length: Option<f64>,
}

const LENGTH: &str = "length";

/// File name to class label (and duration), in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    rows: Vec<LabelRow>,
    /// Header as read, in file order.
    columns: Vec<String>,
    /// Raw cells per row, parallel to `rows` and `columns`.
    cells: Vec<Vec<String>>,
}

impl LabelTable {
    pub fn new(rows: Vec<LabelRow>) -> Result<Self> {
        let cells = rows
            .iter()
            .map(|r| vec![r.fname.clone(), r.label.clone()])
            .collect();
        Self::with_columns(rows, vec!["fname".into(), "label".into()], cells)
    }

    fn with_columns(rows: Vec<LabelRow>, columns: Vec<String>, cells: Vec<Vec<String>>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for row in &rows {
            if !seen.insert(row.fname.as_str()) {
                return Err(Error::Config(format!("duplicate file '{}' in label table", row.fname)));
            }
        }
        Ok(Self { rows, columns, cells })
    }

    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let headers = rdr.headers()?.clone();
        let mut rows = Vec::new();
        let mut cells = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.deserialize::<LabelRow>(Some(&headers))?);
            cells.push(record.iter().map(str::to_string).collect());
        }
        if rows.is_empty() {
            return Err(Error::Config(format!("label table {} is empty", path.display())));
        }
        debug!(
            "Loaded {} rows with columns {:?} from {}",
            rows.len(),
            headers,
            path.display()
        );
        let columns = headers.iter().map(str::to_string).collect();
        Self::with_columns(rows, columns, cells)
    }

    /// Every column as read, with `length` appended if the input lacked it.
    pub fn header(&self) -> Vec<String> {
        let mut header = self.columns.clone();
        if !header.iter().any(|c| c == LENGTH) {
            header.push(LENGTH.to_string());
        }
        header
    }

    /// Rows paired with their cells in [`header`](Self::header) order; the
    /// `length` cell reflects the current duration.
    pub fn records(&self) -> impl Iterator<Item = (&LabelRow, Vec<String>)> {
        let length_at = self.columns.iter().position(|c| c == LENGTH);
        self.rows.iter().zip(&self.cells).map(move |(row, cells)| {
            let mut record = cells.clone();
            let length = row.length.map(|l| l.to_string()).unwrap_or_default();
            match length_at {
                Some(i) => record[i] = length,
                None => record.push(length),
            }
            (row, record)
        })
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(self.header())?;
        for (_, record) in self.records() {
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn rows(&self) -> &[LabelRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sorted unique labels.
    pub fn classes(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn files_of(&self, class: &str) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|r| r.label == class)
            .map(|r| r.fname.as_str())
            .collect()
    }

    pub fn file_to_class(&self) -> HashMap<String, String> {
        self.rows
            .iter()
            .map(|r| (r.fname.clone(), r.label.clone()))
            .collect()
    }

    /// Decode every file whose duration is unknown and record it.
    pub fn enrich_durations<S: AudioSource>(&mut self, source: &S, sample_rate: u32) -> Result<()> {
        let missing = self.rows.iter().filter(|r| r.length.is_none()).count();
        if missing == 0 {
            return Ok(());
        }
        info!("Measuring duration of {missing} files");
        for row in self.rows.iter_mut().filter(|r| r.length.is_none()) {
            let samples = source.load(&row.fname)?;
            row.length = Some(duration_secs(samples.len(), sample_rate));
        }
        Ok(())
    }

    fn lengths(&self) -> Result<impl Iterator<Item = (&LabelRow, f64)>> {
        if let Some(row) = self.rows.iter().find(|r| r.length.is_none()) {
            return Err(Error::Config(format!("file '{}' has no duration", row.fname)));
        }
        Ok(self.rows.iter().filter_map(|r| r.length.map(|l| (r, l))))
    }

    pub fn total_secs(&self) -> Result<f64> {
        Ok(self.lengths()?.map(|(_, l)| l).sum())
    }

    /// Mean clip duration per class.
    pub fn class_distribution(&self) -> Result<ClassDistribution> {
        let mut acc: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for (row, length) in self.lengths()? {
            let entry = acc.entry(row.label.clone()).or_default();
            entry.0 += length;
            entry.1 += 1;
        }
        Ok(ClassDistribution {
            means: acc
                .into_iter()
                .map(|(class, (sum, n))| (class, sum / n as f64))
                .collect(),
        })
    }

    /// Two draws for every tenth of a second of audio in the table.
    pub fn default_sample_count(&self) -> Result<usize> {
        Ok(2 * (self.total_secs()? / 0.1) as usize)
    }
}

/// Mean duration per class, keyed in sorted class order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDistribution {
    means: BTreeMap<String, f64>,
}

impl ClassDistribution {
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.means.keys().map(String::as_str)
    }

    pub fn mean(&self, class: &str) -> Option<f64> {
        self.means.get(class).copied()
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    /// Sampling weights proportional to mean duration, summing to 1.
    pub fn probabilities(&self) -> Vec<f64> {
        let total: f64 = self.means.values().sum();
        self.means.values().map(|m| m / total).collect()
    }
}
