//! Engine-output pass: reads the annotation comments the slicer appends to
//! its toolpath file.

use std::f64::consts::PI;
use std::io::BufRead;

use super::MetricField;
use crate::slicer::MaterialType;

pub const FILAMENT_DIAMETER_MM: f64 = 1.75;
/// Used when no duration token can be recognised.
pub const DEFAULT_PRINT_HOURS: f64 = 1.0;

const FILAMENT_LENGTH_KEY: &str = "filament used [mm]";
const PRINT_TIME_KEY: &str = "estimated printing time";
const SUPPORT_KEY: &str = "support_material";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineMetrics {
    pub filament_grams: f64,
    pub print_time_hours: f64,
    pub supports_required: bool,
    pub defaulted: Vec<MetricField>,
}

impl EngineMetrics {
    /// Everything defaulted, used when the artifact cannot be read at all.
    pub fn defaults() -> Self {
        Self {
            filament_grams: 0.0,
            print_time_hours: DEFAULT_PRINT_HOURS,
            supports_required: false,
            defaulted: vec![MetricField::Filament, MetricField::PrintTime],
        }
    }
}

/// Mass in grams of `length_mm` of filament of the given material.
pub fn filament_grams(length_mm: f64, material: MaterialType) -> f64 {
    let radius = FILAMENT_DIAMETER_MM / 2.0;
    let volume_cm3 = length_mm * PI * radius * radius / 1000.0;
    volume_cm3 * material.density()
}

/// Parse a duration such as `1d 2h 3m 4s` into fractional hours.
///
/// Tokens may appear in any subset and order; `None` when nothing is
/// recognised.
pub fn parse_duration_hours(text: &str) -> Option<f64> {
    let lower = text.to_ascii_lowercase();
    let mut chars = lower.chars().peekable();
    let mut number = String::new();
    let mut total = 0.0;
    let mut recognized = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let unit_hours = match c {
            'd' => Some(24.0),
            'h' => Some(1.0),
            'm' => Some(1.0 / 60.0),
            's' => Some(1.0 / 3600.0),
            _ => None,
        };
        // "5min" or "3hours" are not tokens we understand
        let standalone = !chars.peek().is_some_and(char::is_ascii_alphabetic);
        if let (Some(scale), true, Ok(value)) = (unit_hours, standalone, number.parse::<f64>()) {
            total += value * scale;
            recognized = true;
        }
        number.clear();
    }

    recognized.then_some(total)
}

fn split_annotation(line: &str) -> Option<(&str, &str)> {
    let body = line.trim().strip_prefix(';')?;
    let (key, value) = body.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Parse filament length (possibly one value per extruder, comma separated).
fn parse_length(value: &str) -> Option<f64> {
    let mut total = 0.0;
    for part in value.split(',') {
        let length: f64 = part.trim().parse().ok()?;
        if !length.is_finite() || length < 0.0 {
            return None;
        }
        total += length;
    }
    Some(total)
}

/// Scan the engine artifact. Malformed or missing annotations fall back to
/// defaults and are listed in `defaulted`; this never fails.
pub fn parse_engine_output(reader: impl BufRead, material: MaterialType) -> EngineMetrics {
    let mut filament_mm: Option<f64> = None;
    let mut print_hours: Option<f64> = None;
    let mut supports_required = false;

    for line in reader.split(b'\n') {
        let Ok(raw) = line else { break };
        // annotations are comments; skip toolpath moves without decoding them
        if !raw.trim_ascii_start().starts_with(b";") {
            continue;
        }
        let line = String::from_utf8_lossy(&raw);

        if let Some((key, value)) = split_annotation(&line) {
            if key == FILAMENT_LENGTH_KEY {
                if filament_mm.is_none() {
                    filament_mm = parse_length(value);
                }
                continue;
            }
            if key.starts_with(PRINT_TIME_KEY) {
                // normal mode wins over silent mode when both are present
                if print_hours.is_none() || key.contains("normal mode") {
                    print_hours = parse_duration_hours(value).or(print_hours);
                }
                continue;
            }
            if key == SUPPORT_KEY {
                supports_required |= value == "1";
                continue;
            }
        }

        let lower = line.to_ascii_lowercase();
        if lower.contains("support") && lower.contains("enable") {
            supports_required = true;
        }
    }

    let mut defaulted = Vec::new();
    let filament_grams = match filament_mm {
        Some(mm) => filament_grams(mm, material),
        None => {
            defaulted.push(MetricField::Filament);
            0.0
        }
    };
    let print_time_hours = print_hours.unwrap_or_else(|| {
        defaulted.push(MetricField::PrintTime);
        DEFAULT_PRINT_HOURS
    });

    EngineMetrics {
        filament_grams,
        print_time_hours,
        supports_required,
        defaulted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn compound_durations_are_exact() {
        assert!(close(parse_duration_hours("1h 30m 45s").unwrap(), 1.5125));
        assert!(close(parse_duration_hours("45m 30s").unwrap(), 45.0 / 60.0 + 30.0 / 3600.0));
        assert!(close(parse_duration_hours("30s").unwrap(), 30.0 / 3600.0));
        assert!(close(parse_duration_hours("2h").unwrap(), 2.0));
    }

    #[test]
    fn duration_tokens_in_any_order_and_with_days() {
        assert!(close(parse_duration_hours("30s 1h").unwrap(), 1.0 + 30.0 / 3600.0));
        assert!(close(parse_duration_hours("1d 2h").unwrap(), 26.0));
        assert!(close(parse_duration_hours("1h30m").unwrap(), 1.5));
        assert!(close(parse_duration_hours("1.5h").unwrap(), 1.5));
    }

    #[test]
    fn unrecognised_durations_are_none() {
        assert_eq!(parse_duration_hours(""), None);
        assert_eq!(parse_duration_hours("soon"), None);
        assert_eq!(parse_duration_hours("5 minutes"), None);
    }

    #[test]
    fn filament_mass_uses_material_density() {
        let pla = filament_grams(1000.0, MaterialType::Pla);
        let expected = 1000.0 * PI * 0.875 * 0.875 / 1000.0 * 1.24;
        assert!(close(pla, expected));
        assert!(filament_grams(1000.0, MaterialType::Abs) < pla);
    }

    #[test]
    fn reads_prusaslicer_annotations() {
        let gcode = "\
G1 X10 Y10
; filament used [mm] = 2500.5
; filament used [g] = 7.45
; estimated printing time (normal mode) = 2h 5m 0s
; estimated printing time (silent mode) = 2h 30m 0s
; support_material = 1
";
        let metrics = parse_engine_output(gcode.as_bytes(), MaterialType::Pla);
        assert!(close(metrics.filament_grams, filament_grams(2500.5, MaterialType::Pla)));
        assert!(close(metrics.print_time_hours, 2.0 + 5.0 / 60.0));
        assert!(metrics.supports_required);
        assert!(metrics.defaulted.is_empty());
    }

    #[test]
    fn malformed_annotations_fall_back_to_defaults() {
        let gcode = "\
; filament used [mm] = lots
; estimated printing time (normal mode) = unknown
; support_material = 0
";
        let metrics = parse_engine_output(gcode.as_bytes(), MaterialType::Pla);
        assert_eq!(metrics.filament_grams, 0.0);
        assert_eq!(metrics.print_time_hours, DEFAULT_PRINT_HOURS);
        assert!(!metrics.supports_required);
        assert_eq!(
            metrics.defaulted,
            vec![MetricField::Filament, MetricField::PrintTime]
        );
    }

    #[test]
    fn multi_extruder_lengths_are_summed() {
        let gcode = "; filament used [mm] = 100.0, 50.0\n";
        let metrics = parse_engine_output(gcode.as_bytes(), MaterialType::Petg);
        assert!(close(metrics.filament_grams, filament_grams(150.0, MaterialType::Petg)));
    }

    #[test]
    fn free_text_support_annotation_sets_flag() {
        let gcode = "; Support material: enabled\n";
        assert!(parse_engine_output(gcode.as_bytes(), MaterialType::Pla).supports_required);
    }
}
