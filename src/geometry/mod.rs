pub mod mesh;
pub mod validator;

#[cfg(test)]
pub(crate) mod fixtures;

pub use validator::{
    GeometryEncoding, GeometryRejection, GeometryReport, GeometryValidator, ValidatorLimits,
};
