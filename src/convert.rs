//! Raw ADC readings to physical units, and the text trace format.

use std::fmt::Write;

use crate::proto::{Eeprom, RawSample};

// The ADC maps [-1.2 V, 1.2 V] onto a signed 12-bit range.
const ADC_MIN_VALUE: f64 = -2048.0;
const ADC_MAX_VALUE: f64 = 2047.0;
const ADC_MIN_VOLTAGE: f64 = -1.2;
const ADC_MAX_VOLTAGE: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time_ms: f64,
    pub current_ma: f64,
    pub voltage_mv: f64,
}

fn to_unitful_voltage(raw: f64) -> f64 {
    (raw - ADC_MIN_VALUE) / (ADC_MAX_VALUE - ADC_MIN_VALUE) * (ADC_MAX_VOLTAGE - ADC_MIN_VOLTAGE)
        + ADC_MIN_VOLTAGE
}

/// Applies one device's EEPROM calibration, using the mean of the
/// calibration frame as the zero reference for both channels.
#[derive(Debug, Clone)]
pub struct SampleConverter {
    eeprom: Eeprom,
    baseline_current: f64,
    baseline_voltage: f64,
}

impl SampleConverter {
    pub fn new(eeprom: Eeprom, calibration: &[RawSample]) -> Self {
        let n = calibration.len().max(1) as f64;
        let (mut current, mut voltage) = (0.0, 0.0);
        for s in calibration {
            current += to_unitful_voltage(s.current_raw as f64);
            voltage += to_unitful_voltage(s.voltage_raw as f64);
        }
        Self {
            eeprom,
            baseline_current: current / n,
            baseline_voltage: voltage / n,
        }
    }

    pub fn convert(&self, raw: &RawSample, sample_number: usize) -> Sample {
        let e = &self.eeprom;
        let mut current = to_unitful_voltage(raw.current_raw as f64) - self.baseline_current;
        let mut voltage = to_unitful_voltage(raw.voltage_raw as f64) - self.baseline_voltage;

        // Undo the r2/r3 divider in front of the ADC, then volts to millivolts.
        let divider = e.r3 as f64 / (e.r2 as f64 + e.r3 as f64);
        voltage = voltage / divider * 1000.0;

        // Undo the amplifier gain; the ADC sees the drop across r1.
        current = current / e.low_gain as f64 / e.r1 as f64 * 1000.0;
        current = (current - e.low_gain_correction_offset as f64)
            / e.low_gain_correction_factor as f64;

        Sample {
            time_ms: sample_number as f64 / e.sd_sample_rate as f64 * 1000.0,
            current_ma: current,
            voltage_mv: voltage,
        }
    }
}

/// Formats samples one per line as `time current voltage`.
pub fn samples_to_string(converter: &SampleConverter, samples: &[RawSample]) -> String {
    let mut out = String::with_capacity(samples.len() * 24);
    for (i, raw) in samples.iter().enumerate() {
        let s = converter.convert(raw, i);
        let _ = writeln!(out, "{:.2} {:.1} {:.1}", s.time_ms, s.current_ma, s.voltage_mv);
    }
    out
}
