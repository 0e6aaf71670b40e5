use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::Writer;
use ndarray::{Dimension, IxDyn};
use serde::Serialize;

use crate::config::AnalysisMode;
use crate::polarimetry::{PolVar, PolarimetricVariables};
use crate::simulator::{SerialTrace, SimulationOutput, Sweep, VarArrays, INTEGRATED};
use crate::RadsimError;

pub fn create_timestamped_output_dir(output_root: &Path) -> Result<PathBuf, RadsimError> {
    fs::create_dir_all(output_root)?;

    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut output_dir = output_root.join(&timestamp);
    let mut counter = 1_u32;

    while output_dir.exists() {
        output_dir = output_root.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn ensure_len(context: &'static str, expected: usize, actual: usize) -> Result<(), RadsimError> {
    if expected == actual {
        return Ok(());
    }

    Err(RadsimError::LengthMismatch {
        context,
        expected,
        got: actual,
    })
}

/// Shortest scientific form that parses back to the same value
fn fmt_f64(value: f64) -> String {
    format!("{value:e}")
}

fn var_header() -> impl Iterator<Item = String> {
    PolVar::ALL.iter().map(|var| var.key().to_string())
}

/// File-name-safe form of a parameter path or target name
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// One row per target with every radar variable
pub fn write_variables_csv(
    path: &Path,
    results: &[(String, PolarimetricVariables)],
) -> Result<(), RadsimError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(std::iter::once("target".to_string()).chain(var_header()))?;

    for (target, vars) in results {
        writer.write_record(
            std::iter::once(target.clone()).chain(vars.iter().map(|(_, value)| fmt_f64(value))),
        )?;
    }

    writer.flush()?;
    Ok(())
}

/// Units and descriptions of the variable columns
pub fn write_units_csv(path: &Path) -> Result<(), RadsimError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["variable", "units", "name"])?;
    for var in PolVar::ALL {
        writer.write_record([var.key(), var.units(), var.name()])?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per (target, swept value)
pub fn write_serial_csv(path: &Path, trace: &SerialTrace) -> Result<(), RadsimError> {
    let mut writer = Writer::from_path(path)?;
    let mut header_written = false;

    for (target, arrays) in &trace.targets {
        let Some(first) = arrays.values().next() else {
            continue;
        };
        let axis_values = &first.axis_values()[0];
        if !header_written {
            let axis_name = first.axis_names()[0].clone();
            writer.write_record(["target".to_string(), axis_name].into_iter().chain(var_header()))?;
            header_written = true;
        }

        let columns = PolVar::ALL
            .iter()
            .map(|var| column(arrays, *var))
            .collect::<Result<Vec<_>, RadsimError>>()?;
        for values in &columns {
            ensure_len("serial trace", axis_values.len(), values.len())?;
        }

        for (row, axis_value) in axis_values.iter().enumerate() {
            writer.write_record(
                [target.clone(), fmt_f64(*axis_value)]
                    .into_iter()
                    .chain(columns.iter().map(|values| fmt_f64(values[row]))),
            )?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn column(arrays: &VarArrays, var: PolVar) -> Result<Vec<f64>, RadsimError> {
    arrays
        .get(&var)
        .map(|array| array.data().iter().copied().collect())
        .ok_or_else(|| RadsimError::InvalidInfoArray(format!("missing variable {var}")))
}

/// One row per grid cell: one column per swept axis, then the variables
pub fn write_parallel_csv(path: &Path, arrays: &VarArrays) -> Result<(), RadsimError> {
    let Some(first) = arrays.values().next() else {
        return Err(RadsimError::InvalidInfoArray("no variables to write".to_string()));
    };
    let shape = first.shape().to_vec();
    for array in arrays.values() {
        ensure_len("parallel grid rank", shape.len(), array.shape().len())?;
    }

    let mut writer = Writer::from_path(path)?;
    writer.write_record(first.axis_names().iter().cloned().chain(var_header()))?;

    for index in ndarray::indices(IxDyn(&shape)) {
        let index = index.slice();
        let coordinates = index
            .iter()
            .zip(first.axis_values())
            .map(|(&i, values)| fmt_f64(values[i]));
        let cells = PolVar::ALL.iter().map(|var| {
            arrays
                .get(var)
                .and_then(|array| array.get(index))
                .map(fmt_f64)
                .unwrap_or_default()
        });
        writer.write_record(coordinates.chain(cells))?;
    }

    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub created_utc: String,
    pub mode: AnalysisMode,
    pub reference: Vec<(String, PolarimetricVariables)>,
    pub parameters: Vec<String>,
    pub files: Vec<String>,
}

pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<(), RadsimError> {
    fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}

/// Write every artifact of a run into `output_dir`; returns the written
/// file names
pub fn write_run_outputs(
    output_dir: &Path,
    output: &SimulationOutput,
) -> Result<Vec<String>, RadsimError> {
    let mut files = Vec::new();
    let mut record = |name: String| -> PathBuf {
        let path = output_dir.join(&name);
        files.push(name);
        path
    };

    write_units_csv(&record("units.csv".to_string()))?;

    let (mode, reference, parameters) = match output {
        SimulationOutput::Single { boxes, integrated } => {
            let mut rows = boxes.clone();
            if let Some(vars) = integrated {
                rows.push((INTEGRATED.to_string(), *vars));
            }
            write_variables_csv(&record("variables.csv".to_string()), &rows)?;
            (AnalysisMode::None, rows, Vec::new())
        }
        SimulationOutput::Sensitivity(sens) => {
            write_variables_csv(&record("reference.csv".to_string()), &sens.reference)?;
            match &sens.sweep {
                Sweep::Serial(traces) => {
                    for trace in traces {
                        let name = format!("serial_{}.csv", file_stem(&trace.parameter));
                        write_serial_csv(&record(name), trace)?;
                    }
                    let parameters = traces.iter().map(|t| t.parameter.clone()).collect();
                    (AnalysisMode::Serial, sens.reference.clone(), parameters)
                }
                Sweep::Parallel(grids) => {
                    for (target, arrays) in grids {
                        let name = format!("parallel_{}.csv", file_stem(target));
                        write_parallel_csv(&record(name), arrays)?;
                    }
                    let parameters = grids
                        .first()
                        .and_then(|(_, arrays)| arrays.values().next())
                        .map(|array| array.axis_names().to_vec())
                        .unwrap_or_default();
                    (AnalysisMode::Parallel, sens.reference.clone(), parameters)
                }
            }
        }
    };

    files.push("summary.json".to_string());
    let summary = RunSummary {
        created_utc: Utc::now().to_rfc3339(),
        mode,
        reference,
        parameters,
        files: files.clone(),
    };
    write_summary_json(&output_dir.join("summary.json"), &summary)?;
    Ok(files)
}
