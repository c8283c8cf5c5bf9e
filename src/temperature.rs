// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// Thermocouple readings taken alongside saved frames. A data acquisition device
// reports a cold-junction (reference) temperature and one measurement channel;
// both arrive as text and are validated before being logged.

use std::process::Command;

use canonical_error::{CanonicalError, failed_precondition_error,
                      invalid_argument_error};
use chrono::{DateTime, Local};
use log::{debug, warn};

use crate::temperature_log::TemperatureLog;

/// A reading as reported by the device, not yet validated.
#[derive(Clone, Debug, PartialEq)]
pub struct RawTemperatureSample {
    pub timestamp: DateTime<Local>,
    pub cold_junction: String,
    pub channel_1: String,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TemperatureSample {
    pub timestamp: DateTime<Local>,
    pub cold_junction_c: f64,
    pub channel_1_c: f64,
}

fn parse_celsius(field: &str, what: &str) -> Result<f64, CanonicalError> {
    match field.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(invalid_argument_error(
            format!("{} reading '{}' is not a temperature", what, field).as_str())),
    }
}

impl RawTemperatureSample {
    pub fn parse(&self) -> Result<TemperatureSample, CanonicalError> {
        Ok(TemperatureSample{
            timestamp: self.timestamp,
            cold_junction_c: parse_celsius(&self.cold_junction, "Cold junction")?,
            channel_1_c: parse_celsius(&self.channel_1, "Channel 1")?,
        })
    }
}

/// Something that can be polled for thermocouple readings. Called
/// synchronously from the frame callback.
pub trait TemperatureSource: Send {
    fn description(&self) -> String;

    /// Returns up to `count` readings.
    fn read_samples(&mut self, count: usize)
                    -> Result<Vec<RawTemperatureSample>, CanonicalError>;
}

/// Produces plausible readings without hardware: a steady cold junction and a
/// channel that drifts by a fixed amount per reading.
pub struct SimulatedThermocouple {
    cold_junction_c: f64,
    channel_1_c: f64,
    drift_per_sample_c: f64,
}

impl SimulatedThermocouple {
    pub fn new(cold_junction_c: f64, channel_1_c: f64, drift_per_sample_c: f64) -> Self {
        SimulatedThermocouple{cold_junction_c, channel_1_c, drift_per_sample_c}
    }
}

impl TemperatureSource for SimulatedThermocouple {
    fn description(&self) -> String {
        "SimulatedThermocouple".to_string()
    }

    fn read_samples(&mut self, count: usize)
                    -> Result<Vec<RawTemperatureSample>, CanonicalError> {
        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            samples.push(RawTemperatureSample{
                timestamp: Local::now(),
                cold_junction: format!("{}", self.cold_junction_c),
                channel_1: format!("{}", self.channel_1_c),
            });
            self.channel_1_c += self.drift_per_sample_c;
        }
        Ok(samples)
    }
}

/// Runs an external program for each poll. The requested sample count is
/// appended as the last argument; every stdout line of the form
/// `cold_junction,channel_1` is one reading, stamped with the time the
/// program finished.
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    pub fn new(program: &str, args: &[String]) -> Self {
        CommandSource{program: program.to_string(), args: args.to_vec()}
    }
}

impl TemperatureSource for CommandSource {
    fn description(&self) -> String {
        format!("CommandSource({} {})", self.program, self.args.join(" "))
    }

    fn read_samples(&mut self, count: usize)
                    -> Result<Vec<RawTemperatureSample>, CanonicalError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(count.to_string())
            .output()
            .map_err(|e| failed_precondition_error(
                format!("Cannot run {}: {}", self.program, e).as_str()))?;
        if !output.status.success() {
            return Err(failed_precondition_error(
                format!("{} exited with {}: {}", self.program, output.status,
                        String::from_utf8_lossy(&output.stderr).trim()).as_str()));
        }
        let timestamp = Local::now();
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines()
           .map(|line| line.trim())
           .filter(|line| !line.is_empty())
           .take(count)
           .map(|line| {
               let mut fields = line.splitn(2, ',');
               RawTemperatureSample{
                   timestamp,
                   cold_junction: fields.next().unwrap_or("").to_string(),
                   channel_1: fields.next().unwrap_or("").to_string(),
               }
           })
           .collect())
    }
}

/// Collects readings each time a frame is saved and appends them to the CSV
/// log.
pub struct TemperatureRecorder {
    source: Box<dyn TemperatureSource>,
    samples_per_save: usize,

    // Readings awaiting serialization.
    buffer: Vec<TemperatureSample>,
    log: TemperatureLog,
}

impl TemperatureRecorder {
    pub fn new(source: Box<dyn TemperatureSource>, samples_per_save: usize,
               log: TemperatureLog) -> Self {
        TemperatureRecorder{source, samples_per_save: samples_per_save.max(1),
                            buffer: Vec::new(), log}
    }

    /// Polls the source and logs what it returned. Malformed readings are
    /// skipped. If polling fails the pending readings are discarded and the
    /// error is returned. Returns the number of rows written.
    pub fn record(&mut self) -> Result<usize, CanonicalError> {
        let raw_samples = match self.source.read_samples(self.samples_per_save) {
            Ok(s) => s,
            Err(e) => {
                self.buffer.clear();
                return Err(e);
            }
        };
        for raw in &raw_samples {
            match raw.parse() {
                Ok(sample) => self.buffer.push(sample),
                Err(e) => warn!("Skipping temperature sample: {}", e),
            }
        }
        let samples: Vec<TemperatureSample> = self.buffer.drain(..).collect();
        self.log.append(&samples)?;
        debug!("Logged {} of {} temperature samples from {}",
               samples.len(), raw_samples.len(), self.source.description());
        Ok(samples.len())
    }

    pub fn log(&self) -> &TemperatureLog {
        &self.log
    }
}
