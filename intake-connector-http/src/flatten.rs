//! FHIR resource flattening.
//!
//! Each supported resource type reduces to a flat record the mapper can
//! work with; `CodeableConcept`, `Reference`, and `Money` collapse to
//! their canonical scalar forms. Unknown types get a generic pass over
//! common fields.

use intake_core::Record;
use serde_json::Value;

/// Flatten one FHIR resource into a flat record.
pub fn flatten_resource(resource: &Value) -> Record {
    let resource_type = resource["resourceType"].as_str().unwrap_or("Unknown");
    let mut flat = Record::new();
    flat.insert("resource_type".into(), Value::String(resource_type.into()));
    flat.insert("resource_id".into(), resource["id"].clone());
    flat.insert(
        "last_updated".into(),
        resource["meta"]["lastUpdated"].clone(),
    );

    let specific = match resource_type {
        "Claim" => flatten_claim(resource),
        "ExplanationOfBenefit" => flatten_eob(resource),
        "Coverage" => flatten_coverage(resource),
        "Patient" => flatten_patient(resource),
        "Practitioner" => flatten_practitioner(resource),
        "Organization" => flatten_organization(resource),
        _ => flatten_generic(resource),
    };
    flat.extend(specific);
    flat
}

/// First coding code of a `CodeableConcept`, falling back to its text.
pub fn codeable_concept(concept: &Value) -> Value {
    if concept.is_null() {
        return Value::Null;
    }
    if let Some(code) = concept["coding"][0]["code"].as_str() {
        return Value::String(code.to_string());
    }
    concept["text"].clone()
}

/// The literal reference string of a `Reference`.
pub fn reference(value: &Value) -> Value {
    value["reference"].clone()
}

/// The numeric value of a `Money`.
pub fn money(value: &Value) -> Value {
    value["value"].clone()
}

fn flatten_claim(claim: &Value) -> Record {
    let mut flat = Record::new();
    flat.insert("status".into(), claim["status"].clone());
    flat.insert("use".into(), claim["use"].clone());
    flat.insert("type_code".into(), codeable_concept(&claim["type"]));
    flat.insert("patient_reference".into(), reference(&claim["patient"]));
    flat.insert("created".into(), claim["created"].clone());
    flat.insert("provider_reference".into(), reference(&claim["provider"]));
    flat.insert("priority_code".into(), codeable_concept(&claim["priority"]));
    flat.insert("total_value".into(), money(&claim["total"]));
    flat.insert("billable_start".into(), claim["billablePeriod"]["start"].clone());
    flat.insert("billable_end".into(), claim["billablePeriod"]["end"].clone());

    let diagnosis_codes: Vec<Value> = claim["diagnosis"]
        .as_array()
        .map(|diagnoses| {
            diagnoses
                .iter()
                .map(|d| codeable_concept(&d["diagnosisCodeableConcept"]))
                .collect()
        })
        .unwrap_or_default();
    flat.insert("diagnosis_codes".into(), Value::Array(diagnosis_codes));

    let procedure_codes: Vec<Value> = claim["procedure"]
        .as_array()
        .map(|procedures| {
            procedures
                .iter()
                .map(|p| codeable_concept(&p["procedureCodeableConcept"]))
                .collect()
        })
        .unwrap_or_default();
    flat.insert("procedure_codes".into(), Value::Array(procedure_codes));

    let items: Vec<Value> = claim["item"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| Value::Object(flatten_claim_item(item)))
                .collect()
        })
        .unwrap_or_default();
    flat.insert("item_count".into(), Value::from(items.len()));
    flat.insert("items".into(), Value::Array(items));

    if let Some(insurance) = claim["insurance"].as_array().and_then(|i| i.first()) {
        flat.insert(
            "insurance_reference".into(),
            reference(&insurance["coverage"]),
        );
    }
    flat
}

fn flatten_claim_item(item: &Value) -> Record {
    let mut flat = Record::new();
    flat.insert("sequence".into(), item["sequence"].clone());
    flat.insert(
        "service_code".into(),
        codeable_concept(&item["productOrService"]),
    );
    let modifiers: Vec<Value> = item["modifier"]
        .as_array()
        .map(|mods| mods.iter().map(codeable_concept).collect())
        .unwrap_or_default();
    flat.insert("modifier_codes".into(), Value::Array(modifiers));
    flat.insert("quantity".into(), item["quantity"]["value"].clone());
    flat.insert("unit_price".into(), money(&item["unitPrice"]));
    flat.insert("net".into(), money(&item["net"]));
    flat.insert("service_date".into(), item["servicedDate"].clone());
    flat.insert(
        "location_code".into(),
        codeable_concept(&item["locationCodeableConcept"]),
    );
    flat
}

fn flatten_eob(eob: &Value) -> Record {
    let mut flat = Record::new();
    flat.insert("status".into(), eob["status"].clone());
    flat.insert("use".into(), eob["use"].clone());
    flat.insert("outcome".into(), eob["outcome"].clone());
    flat.insert("type_code".into(), codeable_concept(&eob["type"]));
    flat.insert("patient_reference".into(), reference(&eob["patient"]));
    flat.insert("created".into(), eob["created"].clone());
    flat.insert("provider_reference".into(), reference(&eob["provider"]));
    flat.insert("claim_reference".into(), reference(&eob["claim"]));
    flat.insert("billable_start".into(), eob["billablePeriod"]["start"].clone());
    flat.insert("billable_end".into(), eob["billablePeriod"]["end"].clone());

    if let Some(totals) = eob["total"].as_array() {
        for total in totals {
            if let Value::String(category) = codeable_concept(&total["category"]) {
                let key = format!("total_{}", category.to_lowercase().replace(' ', "_"));
                flat.insert(key, money(&total["amount"]));
            }
        }
    }

    flat.insert("payment_amount".into(), money(&eob["payment"]["amount"]));
    flat.insert("payment_date".into(), eob["payment"]["date"].clone());
    flat.insert(
        "item_count".into(),
        Value::from(eob["item"].as_array().map_or(0, Vec::len)),
    );
    flat
}

fn flatten_coverage(coverage: &Value) -> Record {
    let mut flat = Record::new();
    flat.insert("status".into(), coverage["status"].clone());
    flat.insert("type_code".into(), codeable_concept(&coverage["type"]));
    flat.insert(
        "subscriber_reference".into(),
        reference(&coverage["subscriber"]),
    );
    flat.insert(
        "beneficiary_reference".into(),
        reference(&coverage["beneficiary"]),
    );
    flat.insert("payor_reference".into(), reference(&coverage["payor"][0]));
    flat.insert("period_start".into(), coverage["period"]["start"].clone());
    flat.insert("period_end".into(), coverage["period"]["end"].clone());
    flat.insert("subscriber_id".into(), coverage["subscriberId"].clone());
    flat.insert("dependent".into(), coverage["dependent"].clone());
    flat.insert(
        "relationship_code".into(),
        codeable_concept(&coverage["relationship"]),
    );
    flat
}

fn flatten_patient(patient: &Value) -> Record {
    let mut flat = Record::new();
    flat.insert("identifier".into(), patient["identifier"][0]["value"].clone());
    flat.insert(
        "identifier_system".into(),
        patient["identifier"][0]["system"].clone(),
    );
    let name = &patient["name"][0];
    flat.insert(
        "family_name".into(),
        Value::String(name["family"].as_str().unwrap_or("").to_string()),
    );
    let given = name["given"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    flat.insert("given_name".into(), Value::String(given));
    flat.insert("birth_date".into(), patient["birthDate"].clone());
    flat.insert("gender".into(), patient["gender"].clone());
    flat.insert("active".into(), patient["active"].clone());
    flat.insert(
        "deceased".into(),
        Value::Bool(patient["deceasedBoolean"].as_bool().unwrap_or(false)),
    );
    flat
}

fn npi_identifier(resource: &Value) -> Value {
    if let Some(identifiers) = resource["identifier"].as_array() {
        for identifier in identifiers {
            let system = identifier["system"].as_str().unwrap_or("").to_lowercase();
            if system.contains("npi") {
                return identifier["value"].clone();
            }
        }
    }
    Value::Null
}

fn flatten_practitioner(practitioner: &Value) -> Record {
    let mut flat = Record::new();
    flat.insert("npi".into(), npi_identifier(practitioner));
    let name = &practitioner["name"][0];
    flat.insert(
        "family_name".into(),
        Value::String(name["family"].as_str().unwrap_or("").to_string()),
    );
    let given = name["given"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    flat.insert("given_name".into(), Value::String(given));
    flat.insert("active".into(), practitioner["active"].clone());
    flat.insert("gender".into(), practitioner["gender"].clone());
    flat
}

fn flatten_organization(org: &Value) -> Record {
    let mut flat = Record::new();
    flat.insert("npi".into(), npi_identifier(org));
    flat.insert("name".into(), org["name"].clone());
    flat.insert("type_code".into(), codeable_concept(&org["type"][0]));
    flat.insert("active".into(), org["active"].clone());
    flat
}

fn flatten_generic(resource: &Value) -> Record {
    let mut flat = Record::new();
    for key in ["status", "active", "name", "identifier"] {
        match &resource[key] {
            Value::Null => {}
            Value::Array(array) => {
                flat.insert(
                    key.into(),
                    array
                        .first()
                        .map(|v| Value::String(v.to_string()))
                        .unwrap_or(Value::Null),
                );
            }
            other => {
                flat.insert(key.into(), other.clone());
            }
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codeable_concept_prefers_coding_code() {
        let concept = json!({"coding": [{"system": "cpt", "code": "99213"}], "text": "Office visit"});
        assert_eq!(codeable_concept(&concept), json!("99213"));

        let text_only = json!({"text": "Office visit"});
        assert_eq!(codeable_concept(&text_only), json!("Office visit"));

        assert_eq!(codeable_concept(&Value::Null), Value::Null);
    }

    #[test]
    fn money_and_reference_reduce_to_scalars() {
        assert_eq!(money(&json!({"value": 120.50, "currency": "USD"})), json!(120.50));
        assert_eq!(
            reference(&json!({"reference": "Patient/p-1"})),
            json!("Patient/p-1")
        );
    }

    #[test]
    fn claim_flattening_covers_lines_and_diagnoses() {
        let claim = json!({
            "resourceType": "Claim",
            "id": "c-1",
            "meta": {"lastUpdated": "2024-03-01T10:00:00Z"},
            "status": "active",
            "use": "claim",
            "patient": {"reference": "Patient/p-1"},
            "provider": {"reference": "Practitioner/dr-1"},
            "total": {"value": 250.0},
            "billablePeriod": {"start": "2024-02-01", "end": "2024-02-02"},
            "diagnosis": [{"diagnosisCodeableConcept": {"coding": [{"code": "E11.9"}]}}],
            "item": [{
                "sequence": 1,
                "productOrService": {"coding": [{"code": "99213"}]},
                "quantity": {"value": 1},
                "net": {"value": 125.0}
            }]
        });

        let flat = flatten_resource(&claim);
        assert_eq!(flat["resource_type"], json!("Claim"));
        assert_eq!(flat["resource_id"], json!("c-1"));
        assert_eq!(flat["last_updated"], json!("2024-03-01T10:00:00Z"));
        assert_eq!(flat["patient_reference"], json!("Patient/p-1"));
        assert_eq!(flat["total_value"], json!(250.0));
        assert_eq!(flat["diagnosis_codes"], json!(["E11.9"]));
        assert_eq!(flat["item_count"], json!(1));
        assert_eq!(flat["items"][0]["service_code"], json!("99213"));
        assert_eq!(flat["items"][0]["quantity"], json!(1));
    }

    #[test]
    fn practitioner_npi_comes_from_identifier_system() {
        let practitioner = json!({
            "resourceType": "Practitioner",
            "id": "dr-1",
            "identifier": [
                {"system": "http://example.org/internal", "value": "X-1"},
                {"system": "http://hl7.org/fhir/sid/us-npi", "value": "1234567893"}
            ],
            "name": [{"family": "Curie", "given": ["Marie", "S"]}]
        });
        let flat = flatten_resource(&practitioner);
        assert_eq!(flat["npi"], json!("1234567893"));
        assert_eq!(flat["family_name"], json!("Curie"));
        assert_eq!(flat["given_name"], json!("Marie S"));
    }

    #[test]
    fn eob_totals_become_category_columns() {
        let eob = json!({
            "resourceType": "ExplanationOfBenefit",
            "id": "eob-1",
            "total": [
                {"category": {"coding": [{"code": "submitted"}]}, "amount": {"value": 300.0}},
                {"category": {"coding": [{"code": "benefit"}]}, "amount": {"value": 250.0}}
            ],
            "payment": {"amount": {"value": 250.0}, "date": "2024-03-10"}
        });
        let flat = flatten_resource(&eob);
        assert_eq!(flat["total_submitted"], json!(300.0));
        assert_eq!(flat["total_benefit"], json!(250.0));
        assert_eq!(flat["payment_amount"], json!(250.0));
    }

    #[test]
    fn unknown_types_flatten_generically() {
        let other = json!({
            "resourceType": "Location",
            "id": "loc-1",
            "status": "active",
            "name": "Main Campus"
        });
        let flat = flatten_resource(&other);
        assert_eq!(flat["resource_type"], json!("Location"));
        assert_eq!(flat["status"], json!("active"));
        assert_eq!(flat["name"], json!("Main Campus"));
    }
}
