use std::collections::BTreeMap;

use super::settings::{BedAdhesion, PrintSettings};

/// Values written for every job regardless of the caller's settings.
const STATIC_DEFAULTS: &[(&str, &str)] = &[
    ("first_layer_height", "0.2"),
    ("support_material_auto", "1"),
    ("nozzle_diameter", "0.4"),
    ("filament_diameter", "1.75"),
    ("travel_speed", "120"),
    ("retract_length", "0.8"),
    ("retract_speed", "35"),
];

/// Key/value configuration file consumed by the slicing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    entries: BTreeMap<&'static str, String>,
}

impl EngineConfig {
    pub fn from_settings(settings: &PrintSettings) -> Self {
        let mut entries: BTreeMap<&'static str, String> = STATIC_DEFAULTS
            .iter()
            .map(|(key, value)| (*key, (*value).to_string()))
            .collect();

        let support = if settings.supports { "1" } else { "0" };
        let (skirts, brim_width, raft_layers) = match settings.bed_adhesion {
            BedAdhesion::Skirt => ("1", "0", "0"),
            BedAdhesion::Brim => ("0", "5", "0"),
            BedAdhesion::Raft => ("0", "0", "2"),
            BedAdhesion::None => ("0", "0", "0"),
        };

        let per_job = [
            ("layer_height", settings.layer_height.to_string()),
            ("fill_density", format!("{}%", settings.infill_density)),
            ("fill_pattern", settings.infill_pattern.engine_value().to_string()),
            ("support_material", support.to_string()),
            ("temperature", settings.nozzle_temperature.to_string()),
            ("first_layer_temperature", settings.nozzle_temperature.to_string()),
            ("bed_temperature", settings.bed_temperature.to_string()),
            ("first_layer_bed_temperature", settings.bed_temperature.to_string()),
            ("perimeter_speed", settings.print_speed.to_string()),
            ("infill_speed", settings.print_speed.to_string()),
            ("filament_type", settings.material_type.to_string()),
            ("skirts", skirts.to_string()),
            ("brim_width", brim_width.to_string()),
            ("raft_layers", raft_layers.to_string()),
        ];
        entries.extend(per_job);

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key} = {value}\n"))
            .collect()
    }
}
