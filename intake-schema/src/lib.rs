//! Canonical healthcare schema for claims normalization.
//!
//! The catalog is a subset of OMOP CDM v5.4 covering the fields payment
//! integrity cares about, with built-in aliases for the naming conventions
//! seen across EDI 837 extracts, CSV uploads, and payer feeds. Everything
//! is static and precomputed at first use; lookup is case-insensitive.
//!
//! Reference: <https://ohdsi.github.io/CommonDataModel/cdm54.html>

#![deny(missing_docs)]

pub mod canonical;
pub mod codes;

pub use canonical::{
    field, is_canonical, required_fields, resolve_alias, CanonicalField, FieldType, CLAIMS_SCHEMA,
};
pub use codes::{is_valid_cpt, is_valid_hcpcs, is_valid_npi};
