//! The canonical field catalog and alias resolution.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Value type of a canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Free-form string.
    String,
    /// Integer count or year.
    Int,
    /// Floating-point amount.
    Number,
    /// Calendar date, carried as an ISO-8601 string.
    Date,
    /// List of strings (e.g. diagnosis code lists).
    StringList,
}

/// One entry in the canonical schema.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalField {
    /// Canonical OMOP-style field name.
    pub name: &'static str,
    /// Value type.
    pub field_type: FieldType,
    /// Whether a normalized claim must carry this field.
    pub required: bool,
    /// Known source-side names, ordered by how common they are.
    pub aliases: &'static [&'static str],
    /// Human description; also feeds the embedding matcher.
    pub description: &'static str,
}

/// The claim-relevant canonical schema, grouped by originating OMOP table.
pub static CLAIMS_SCHEMA: &[CanonicalField] = &[
    // -- visit_occurrence --
    CanonicalField {
        name: "visit_occurrence_id",
        field_type: FieldType::String,
        required: true,
        aliases: &["claim_id", "encounter_id", "visit_id"],
        description: "Unique identifier for each visit/claim",
    },
    CanonicalField {
        name: "person_id",
        field_type: FieldType::String,
        required: true,
        aliases: &[
            "member_id",
            "patient_id",
            "subscriber_id",
            "patient_control_number",
            "MemberID",
            "PatientID",
        ],
        description: "Unique identifier for the patient/member",
    },
    CanonicalField {
        name: "visit_start_date",
        field_type: FieldType::Date,
        required: true,
        aliases: &[
            "service_date",
            "date_of_service",
            "dos",
            "statement_from_date",
            "ServiceDate",
            "DateOfService",
        ],
        description: "Start date of the visit/service",
    },
    CanonicalField {
        name: "visit_end_date",
        field_type: FieldType::Date,
        required: false,
        aliases: &["service_end_date", "statement_to_date", "discharge_date"],
        description: "End date of the visit/service",
    },
    CanonicalField {
        name: "visit_type_concept_id",
        field_type: FieldType::Int,
        required: false,
        aliases: &[],
        description: "Type of visit (inpatient, outpatient, etc.)",
    },
    CanonicalField {
        name: "care_site_id",
        field_type: FieldType::String,
        required: false,
        aliases: &["facility_id", "service_facility_npi", "facility_npi"],
        description: "Care site where service was rendered",
    },
    CanonicalField {
        name: "visit_source_value",
        field_type: FieldType::String,
        required: false,
        aliases: &["claim_type", "claim_form_type", "bill_type"],
        description: "Source value for visit type",
    },
    // -- procedure_occurrence --
    CanonicalField {
        name: "procedure_occurrence_id",
        field_type: FieldType::String,
        required: false,
        aliases: &["line_id", "service_line_id", "claim_line_number"],
        description: "Unique identifier for procedure line",
    },
    CanonicalField {
        name: "procedure_concept_id",
        field_type: FieldType::Int,
        required: false,
        aliases: &[],
        description: "OMOP standard concept ID for procedure",
    },
    CanonicalField {
        name: "procedure_source_value",
        field_type: FieldType::String,
        required: true,
        aliases: &[
            "procedure_code",
            "cpt_code",
            "hcpcs_code",
            "service_code",
            "CPTCode",
            "HCPCS",
            "ProcedureCode",
        ],
        description: "Source procedure code (CPT/HCPCS)",
    },
    CanonicalField {
        name: "procedure_date",
        field_type: FieldType::Date,
        required: false,
        aliases: &["line_service_date", "service_from_date"],
        description: "Date procedure was performed",
    },
    CanonicalField {
        name: "quantity",
        field_type: FieldType::Int,
        required: false,
        aliases: &["units", "service_units", "qty", "unit_count"],
        description: "Number of units/services",
    },
    CanonicalField {
        name: "modifier_source_value",
        field_type: FieldType::String,
        required: false,
        aliases: &["modifier", "modifier_1", "modifier1", "mod1"],
        description: "Procedure modifier code",
    },
    CanonicalField {
        name: "modifier_2",
        field_type: FieldType::String,
        required: false,
        aliases: &["modifier2", "mod2"],
        description: "Second procedure modifier",
    },
    CanonicalField {
        name: "modifier_3",
        field_type: FieldType::String,
        required: false,
        aliases: &["modifier3", "mod3"],
        description: "Third procedure modifier",
    },
    CanonicalField {
        name: "modifier_4",
        field_type: FieldType::String,
        required: false,
        aliases: &["modifier4", "mod4"],
        description: "Fourth procedure modifier",
    },
    // -- condition_occurrence --
    CanonicalField {
        name: "condition_source_value",
        field_type: FieldType::String,
        required: false,
        aliases: &[
            "diagnosis_code",
            "dx_code",
            "icd_code",
            "icd10_code",
            "DiagnosisCode",
            "principal_diagnosis",
        ],
        description: "Source diagnosis code (ICD-10)",
    },
    CanonicalField {
        name: "condition_source_value_list",
        field_type: FieldType::StringList,
        required: false,
        aliases: &["diagnosis_codes", "dx_codes", "icd_codes", "diagnoses"],
        description: "List of diagnosis codes",
    },
    // -- provider --
    CanonicalField {
        name: "provider_id",
        field_type: FieldType::String,
        required: false,
        aliases: &[],
        description: "Internal provider ID",
    },
    CanonicalField {
        name: "npi",
        field_type: FieldType::String,
        required: true,
        aliases: &[
            "provider_npi",
            "rendering_npi",
            "billing_npi",
            "attending_npi",
            "rendering_provider_npi",
            "billing_provider_npi",
            "ProviderNPI",
            "NPI",
        ],
        description: "National Provider Identifier",
    },
    CanonicalField {
        name: "specialty_source_value",
        field_type: FieldType::String,
        required: false,
        aliases: &[
            "specialty",
            "provider_specialty",
            "specialty_code",
            "taxonomy_code",
        ],
        description: "Provider specialty/taxonomy",
    },
    // -- cost --
    CanonicalField {
        name: "total_charge",
        field_type: FieldType::Number,
        required: false,
        aliases: &[
            "billed_amount",
            "charge_amount",
            "total_amount",
            "claim_amount",
            "BilledAmount",
            "ChargeAmount",
        ],
        description: "Total charged/billed amount",
    },
    CanonicalField {
        name: "total_cost",
        field_type: FieldType::Number,
        required: false,
        aliases: &["allowed_amount", "paid_amount", "payment_amount"],
        description: "Total cost/allowed amount",
    },
    CanonicalField {
        name: "line_charge",
        field_type: FieldType::Number,
        required: false,
        aliases: &[
            "line_amount",
            "line_charge_amount",
            "service_charge",
            "LineAmount",
        ],
        description: "Line-level charge amount",
    },
    // -- payer_plan_period --
    CanonicalField {
        name: "payer_plan_period_id",
        field_type: FieldType::String,
        required: false,
        aliases: &["plan_id", "coverage_id", "insurance_id"],
        description: "Payer plan period identifier",
    },
    CanonicalField {
        name: "payer_source_value",
        field_type: FieldType::String,
        required: false,
        aliases: &["payer_id", "payer_name", "insurance_name"],
        description: "Payer/insurance source value",
    },
    // -- person --
    CanonicalField {
        name: "year_of_birth",
        field_type: FieldType::Int,
        required: false,
        aliases: &[],
        description: "Year of birth",
    },
    CanonicalField {
        name: "birth_datetime",
        field_type: FieldType::Date,
        required: false,
        aliases: &["dob", "date_of_birth", "birth_date", "DateOfBirth"],
        description: "Date of birth",
    },
    CanonicalField {
        name: "gender_source_value",
        field_type: FieldType::String,
        required: false,
        aliases: &["gender", "sex", "member_gender"],
        description: "Gender/sex",
    },
    CanonicalField {
        name: "age",
        field_type: FieldType::Int,
        required: false,
        aliases: &["patient_age", "member_age"],
        description: "Age at time of service",
    },
];

/// Precomputed lowercase alias → canonical name table.
static ALIAS_LOOKUP: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    let mut lookup = HashMap::new();
    for field in CLAIMS_SCHEMA {
        lookup.insert(field.name.to_lowercase(), field.name);
        for alias in field.aliases {
            lookup.insert(alias.to_lowercase(), field.name);
        }
    }
    lookup
});

static REQUIRED_FIELDS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    CLAIMS_SCHEMA
        .iter()
        .filter(|f| f.required)
        .map(|f| f.name)
        .collect()
});

/// Resolve a source field name (canonical or alias, any case) to its
/// canonical name. O(1) via the precomputed table.
pub fn resolve_alias(name: &str) -> Option<&'static str> {
    ALIAS_LOOKUP.get(&name.to_lowercase()).copied()
}

/// Whether the given name is itself a canonical field name.
pub fn is_canonical(name: &str) -> bool {
    CLAIMS_SCHEMA.iter().any(|f| f.name == name)
}

/// Canonical fields a normalized claim must carry.
pub fn required_fields() -> &'static [&'static str] {
    &REQUIRED_FIELDS
}

/// Look up a field definition by canonical name.
pub fn field(name: &str) -> Option<&'static CanonicalField> {
    CLAIMS_SCHEMA.iter().find(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn alias_union_is_unique() {
        // The union of canonical names and aliases must be unique
        // (case-insensitively), otherwise resolution is ambiguous.
        let mut seen = HashSet::new();
        for f in CLAIMS_SCHEMA {
            assert!(seen.insert(f.name.to_lowercase()), "duplicate name {}", f.name);
            for alias in f.aliases {
                assert!(
                    seen.insert(alias.to_lowercase()),
                    "duplicate alias {alias} on {}",
                    f.name
                );
            }
        }
    }

    #[test]
    fn resolves_domain_synonyms() {
        assert_eq!(resolve_alias("DateOfService"), Some("visit_start_date"));
        assert_eq!(resolve_alias("MemberID"), Some("person_id"));
        assert_eq!(resolve_alias("cpt_code"), Some("procedure_source_value"));
        assert_eq!(resolve_alias("ProviderNPI"), Some("npi"));
    }

    #[test]
    fn resolution_is_case_insensitive() {
        assert_eq!(resolve_alias("memberid"), Some("person_id"));
        assert_eq!(resolve_alias("MEMBERID"), Some("person_id"));
        assert_eq!(resolve_alias("Visit_Occurrence_Id"), Some("visit_occurrence_id"));
    }

    #[test]
    fn canonical_names_resolve_to_themselves() {
        for f in CLAIMS_SCHEMA {
            assert_eq!(resolve_alias(f.name), Some(f.name));
        }
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        assert_eq!(resolve_alias("frobnicator"), None);
        assert_eq!(resolve_alias(""), None);
    }

    #[test]
    fn required_set_matches_catalog() {
        let required = required_fields();
        assert!(required.contains(&"visit_occurrence_id"));
        assert!(required.contains(&"person_id"));
        assert!(required.contains(&"visit_start_date"));
        assert!(required.contains(&"procedure_source_value"));
        assert!(required.contains(&"npi"));
        assert_eq!(required.len(), 5);
    }

    #[test]
    fn field_lookup() {
        let quantity = field("quantity").unwrap();
        assert_eq!(quantity.field_type, FieldType::Int);
        assert!(quantity.aliases.contains(&"units"));
        assert!(field("no_such_field").is_none());
    }
}
