use std::path::Path;

use anyhow::{Context, Result};

use timbre_core::{LabelTable, Predictions};

/// Every label table column, one probability column per class, then `y_pred`.
pub fn write_predictions(
    path: &Path,
    table: &LabelTable,
    classes: &[String],
    predictions: &Predictions,
) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let mut header = table.header();
    header.extend(classes.iter().cloned());
    header.push("y_pred".to_string());
    wtr.write_record(&header)?;

    for (row, mut record) in table.records() {
        let probs = predictions
            .file_probabilities
            .get(&row.fname)
            .with_context(|| format!("no prediction for {}", row.fname))?;
        let predicted = predictions
            .predicted_class(&row.fname)
            .and_then(|i| classes.get(i))
            .with_context(|| format!("prediction for {} is out of range", row.fname))?;

        record.extend(probs.iter().map(|p| p.to_string()));
        record.push(predicted.clone());
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use timbre_core::LabelRow;

    fn table() -> LabelTable {
        LabelTable::new(vec![
            LabelRow {
                fname: "a.wav".into(),
                label: "Cello".into(),
                length: Some(1.5),
            },
            LabelRow {
                fname: "b.wav".into(),
                label: "Flute".into(),
                length: None,
            },
        ])
        .unwrap()
    }

    #[test]
    fn writes_one_row_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        let classes = vec!["Cello".to_string(), "Flute".to_string()];
        let predictions = Predictions {
            true_labels: vec![0, 1],
            predicted_labels: vec![0, 0],
            file_probabilities: BTreeMap::from([
                ("a.wav".to_string(), vec![0.75, 0.25]),
                ("b.wav".to_string(), vec![0.5, 0.5]),
            ]),
        };

        write_predictions(&path, &table(), &classes, &predictions).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "fname,label,length,Cello,Flute,y_pred");
        assert_eq!(lines[1], "a.wav,Cello,1.5,0.75,0.25,Cello");
        assert_eq!(lines[2], "b.wav,Flute,,0.5,0.5,Cello");
    }

    #[test]
    fn keeps_every_input_column() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("instruments.csv");
        std::fs::write(&labels, "fname,label,source,length\na.wav,Cello,studio,2.5\n").unwrap();
        let table = LabelTable::from_csv(&labels).unwrap();

        let path = dir.path().join("predictions.csv");
        let classes = vec!["Cello".to_string(), "Flute".to_string()];
        let predictions = Predictions {
            true_labels: vec![0],
            predicted_labels: vec![1],
            file_probabilities: BTreeMap::from([("a.wav".to_string(), vec![0.25, 0.75])]),
        };
        write_predictions(&path, &table, &classes, &predictions).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "fname,label,source,length,Cello,Flute,y_pred");
        assert_eq!(lines[1], "a.wav,Cello,studio,2.5,0.25,0.75,Flute");
    }

    #[test]
    fn missing_prediction_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        let classes = vec!["Cello".to_string(), "Flute".to_string()];
        let predictions = Predictions::default();

        assert!(write_predictions(&path, &table(), &classes, &predictions).is_err());
    }
}
