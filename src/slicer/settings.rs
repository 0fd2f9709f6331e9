use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Infill geometry passed through to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfillPattern {
    #[default]
    Grid,
    Rectilinear,
    Gyroid,
    Honeycomb,
    Triangles,
    Cubic,
    Line,
    Concentric,
}

impl InfillPattern {
    pub fn engine_value(self) -> &'static str {
        match self {
            InfillPattern::Grid => "grid",
            InfillPattern::Rectilinear => "rectilinear",
            InfillPattern::Gyroid => "gyroid",
            InfillPattern::Honeycomb => "honeycomb",
            InfillPattern::Triangles => "triangles",
            InfillPattern::Cubic => "cubic",
            InfillPattern::Line => "line",
            InfillPattern::Concentric => "concentric",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BedAdhesion {
    #[default]
    Skirt,
    Brim,
    Raft,
    None,
}

/// Filament material. Determines the density used for mass conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MaterialType {
    #[default]
    Pla,
    Abs,
    Petg,
    Tpu,
    Asa,
    Nylon,
}

impl MaterialType {
    /// Density in g/cm³.
    pub fn density(self) -> f64 {
        match self {
            MaterialType::Pla => 1.24,
            MaterialType::Abs => 1.04,
            MaterialType::Petg => 1.27,
            MaterialType::Tpu => 1.21,
            MaterialType::Asa => 1.07,
            MaterialType::Nylon => 1.14,
        }
    }
}

impl fmt::Display for MaterialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MaterialType::Pla => "PLA",
            MaterialType::Abs => "ABS",
            MaterialType::Petg => "PETG",
            MaterialType::Tpu => "TPU",
            MaterialType::Asa => "ASA",
            MaterialType::Nylon => "NYLON",
        };
        f.write_str(name)
    }
}

/// Print settings snapshot for one analysis job.
///
/// Every field is optional on the wire; omitted fields take the engine
/// defaults from [`PrintSettings::default`]. Ranges are enforced before a
/// job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PrintSettings {
    #[validate(range(
        min = 0.1,
        max = 0.5,
        message = "Layer height must be between 0.1 and 0.5 mm"
    ))]
    pub layer_height: f64,

    #[validate(range(max = 100, message = "Infill density must be between 0 and 100 percent"))]
    pub infill_density: u8,

    pub infill_pattern: InfillPattern,

    pub supports: bool,

    pub bed_adhesion: BedAdhesion,

    pub material_type: MaterialType,

    #[validate(range(
        min = 180,
        max = 300,
        message = "Nozzle temperature must be between 180 and 300 °C"
    ))]
    pub nozzle_temperature: u16,

    #[validate(range(max = 120, message = "Bed temperature must be between 0 and 120 °C"))]
    pub bed_temperature: u16,

    #[validate(range(
        min = 10,
        max = 200,
        message = "Print speed must be between 10 and 200 mm/s"
    ))]
    pub print_speed: u16,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            layer_height: 0.2,
            infill_density: 20,
            infill_pattern: InfillPattern::Grid,
            supports: false,
            bed_adhesion: BedAdhesion::Skirt,
            material_type: MaterialType::Pla,
            nozzle_temperature: 210,
            bed_temperature: 60,
            print_speed: 50,
        }
    }
}
